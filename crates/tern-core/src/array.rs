use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::shape::Shape;

// Array: an n-dimensional f64 array living on one device
//
// Examples handed out by datasets are host arrays. Batches are built by an
// array-construction module (see `backend`) and may live on the host or on
// an accelerator, depending on which module the loader selected.
//
// The storage is behind an Arc so cloning an example out of a dataset is
// O(1). Transforms that rewrite values take ownership and only copy when the
// buffer is still shared.

/// Identifies where an array's data lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu,
    Cuda(usize),
}

impl Device {
    /// A human-readable name for this device (e.g., "cpu", "cuda:0").
    pub fn name(&self) -> String {
        match self {
            Device::Cpu => "cpu".to_string(),
            Device::Cuda(ordinal) => format!("cuda:{ordinal}"),
        }
    }

    pub fn is_cuda(&self) -> bool {
        matches!(self, Device::Cuda(_))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// The buffer behind an [`Array`].
#[derive(Clone)]
pub enum Storage {
    /// Row-major host memory.
    Host(Arc<Vec<f64>>),
    /// Device memory on the CUDA device with the given ordinal.
    #[cfg(feature = "cuda")]
    Cuda {
        slice: Arc<cudarc::driver::CudaSlice<f64>>,
        ordinal: usize,
    },
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Storage::Host(data) => write!(f, "Host(len={})", data.len()),
            #[cfg(feature = "cuda")]
            Storage::Cuda { slice, ordinal } => {
                use cudarc::driver::DeviceSlice;
                write!(f, "Cuda(ordinal={ordinal}, len={})", slice.len())
            }
        }
    }
}

/// An n-dimensional array of `f64` values.
#[derive(Debug, Clone)]
pub struct Array {
    shape: Shape,
    storage: Storage,
}

impl Array {
    /// Create a host array from a flat row-major buffer.
    pub fn from_vec(data: Vec<f64>, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        let expected = shape.elem_count();
        if data.len() != expected {
            return Err(Error::ElementCountMismatch {
                shape,
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            shape,
            storage: Storage::Host(Arc::new(data)),
        })
    }

    /// A 0-dimensional host array holding one value.
    pub fn scalar(value: f64) -> Self {
        Self {
            shape: Shape::from(()),
            storage: Storage::Host(Arc::new(vec![value])),
        }
    }

    /// A 1-dimensional host array.
    pub fn vector(data: Vec<f64>) -> Self {
        Self {
            shape: Shape::from(data.len()),
            storage: Storage::Host(Arc::new(data)),
        }
    }

    /// Wrap an already-validated storage buffer.
    ///
    /// Used by array-construction modules; `storage` must hold exactly
    /// `shape.elem_count()` elements.
    pub fn from_storage(storage: Storage, shape: Shape) -> Self {
        Self { shape, storage }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn elem_count(&self) -> usize {
        self.shape.elem_count()
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn device(&self) -> Device {
        match &self.storage {
            Storage::Host(_) => Device::Cpu,
            #[cfg(feature = "cuda")]
            Storage::Cuda { ordinal, .. } => Device::Cuda(*ordinal),
        }
    }

    /// Borrow the data if it lives in host memory.
    pub fn host_data(&self) -> Option<&[f64]> {
        match &self.storage {
            Storage::Host(data) => Some(data.as_slice()),
            #[cfg(feature = "cuda")]
            Storage::Cuda { .. } => None,
        }
    }

    /// The single value of a one-element array, if it lives on the host.
    pub fn as_scalar(&self) -> Option<f64> {
        match self.host_data() {
            Some([v]) => Some(*v),
            _ => None,
        }
    }

    /// Copy the data to a host `Vec`, synchronising with the device if needed.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        match &self.storage {
            Storage::Host(data) => Ok(data.to_vec()),
            #[cfg(feature = "cuda")]
            Storage::Cuda { slice, .. } => slice
                .device()
                .dtoh_sync_copy(slice.as_ref())
                .map_err(|e| Error::msg(format!("dtoh f64: {e}"))),
        }
    }

    /// Change the shape without touching the data.
    pub fn reshape(self, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        if shape.elem_count() != self.elem_count() {
            return Err(Error::ReshapeElementMismatch {
                src: self.elem_count(),
                dst: shape.elem_count(),
                dst_shape: shape,
            });
        }
        Ok(Self {
            shape,
            storage: self.storage,
        })
    }

    /// Collapse to one dimension.
    pub fn flatten(self) -> Self {
        let n = self.elem_count();
        Self {
            shape: Shape::from(n),
            storage: self.storage,
        }
    }

    /// Apply `f` to every element, keeping the shape.
    ///
    /// # Panics
    /// Panics if the array does not live in host memory. Dataset examples
    /// always do; only stacked batches can live on an accelerator.
    pub fn map(self, f: impl Fn(f64) -> f64) -> Self {
        let data = match self.storage {
            Storage::Host(data) => data,
            #[cfg(feature = "cuda")]
            Storage::Cuda { ordinal, .. } => panic!("Array::map: array lives on cuda:{ordinal}"),
        };
        let mut data = Arc::unwrap_or_clone(data);
        for v in &mut data {
            *v = f(*v);
        }
        Self {
            shape: self.shape,
            storage: Storage::Host(Arc::new(data)),
        }
    }
}
