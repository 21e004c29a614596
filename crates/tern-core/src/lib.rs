//! # tern-core
//!
//! Arrays, devices and array-construction backends for tern.
//!
//! This crate provides:
//! - [`Array`]: n-dimensional `f64` array on a [`Device`]
//! - [`Shape`]: dimensions of an example or a stacked batch
//! - [`ArrayModule`]: builds (and stacks) arrays on one device:
//!   [`HostModule`], and `CudaModule` with the `cuda` feature
//! - [`BackendSelector`]: picks the module for a `gpu` flag
//! - [`Error`] / [`Result`]: the single error type

pub mod array;
pub mod backend;
pub mod error;
pub mod shape;

pub use array::{Array, Device, Storage};
#[cfg(feature = "cuda")]
pub use backend::CudaModule;
pub use backend::{ArrayModule, BackendSelector, DefaultSelector, HostModule};
pub use error::{Error, Result};
pub use shape::Shape;
