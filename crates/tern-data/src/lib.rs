//! # tern-data
//!
//! Datasets, transforms and minibatch loaders for tern.
//!
//! This crate provides:
//! - [`Dataset`] trait: random access to examples by scalar index
//! - [`PreparedDataset`]: a dataset populated once by a [`Prepare`] variant,
//!   with input and target transform slots
//! - [`DataLoader`]: shuffled or in-order minibatches, one permutation per epoch
//! - [`SeqDataLoader`]: stride-sequential minibatches for sequence models
//! - [`Transform`]: per-example preprocessing (identity by default)
//! - Built-in variants: [`Spiral`], [`SinCurve`], [`Mnist`] (IDX format parser)

pub mod dataset;
pub mod loader;
pub mod mnist;
pub mod sin_curve;
pub mod spiral;
pub mod transform;

pub use dataset::{Dataset, DatasetConfig, DatasetIndex, Example, Prepare, Prepared, PreparedDataset};
pub use loader::{
    Batch, DataLoader, DataLoaderConfig, Loader, PermutationSampler, Sampler, SeqDataLoader,
    StrideSampler,
};
pub use mnist::{Mnist, MnistError};
pub use sin_curve::SinCurve;
pub use spiral::Spiral;
pub use transform::{Compose, Flatten, Identity, Normalize, OneHot, Reshape, Transform};
