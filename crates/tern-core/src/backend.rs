use std::fmt;
use std::sync::{Arc, Mutex};

#[cfg(feature = "cuda")]
use crate::array::Storage;
use crate::array::{Array, Device};
use crate::error::{Error, Result};
use crate::shape::Shape;

// Backend: where stacked batches are materialised
//
// An ArrayModule turns a finite sequence of same-shaped host examples into
// one rectangular array. HostModule keeps the result in host memory;
// CudaModule (feature "cuda") copies it to an NVIDIA device via cudarc.
//
// A BackendSelector resolves the module to use from the loader's `gpu` flag
// at every batch-assembly call. Selection is the only place an accelerator
// can be found missing, and it never falls back to host memory.
//
// Loaders hold the selector as a trait object so tests can swap in a fake
// accelerator and observe which module built each batch.

/// An array-construction module for one device.
pub trait ArrayModule: fmt::Debug + Send + Sync {
    /// The device arrays built by this module live on.
    fn device(&self) -> Device;

    /// Build an array of `shape` from a flat row-major host buffer.
    ///
    /// `data.len()` must equal `shape.elem_count()`.
    fn from_host(&self, data: Vec<f64>, shape: Shape) -> Result<Array>;

    /// Stack `items` along a new leading dimension.
    ///
    /// Every item must have the shape of the first one; the result has shape
    /// `[items.len(), ...item_shape]`.
    fn stack(&self, items: &[Array]) -> Result<Array> {
        let first = items.first().ok_or(Error::EmptyBatch)?;
        let item_shape = first.shape().clone();

        let mut data = Vec::with_capacity(items.len() * item_shape.elem_count());
        for (position, item) in items.iter().enumerate() {
            if item.shape() != &item_shape {
                return Err(Error::ShapeMismatch {
                    expected: item_shape,
                    got: item.shape().clone(),
                    position,
                });
            }
            data.extend(item.to_f64_vec()?);
        }

        self.from_host(data, item_shape.batched(items.len()))
    }
}

/// Builds arrays in host memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostModule;

impl ArrayModule for HostModule {
    fn device(&self) -> Device {
        Device::Cpu
    }

    fn from_host(&self, data: Vec<f64>, shape: Shape) -> Result<Array> {
        Array::from_vec(data, shape)
    }
}

/// Builds arrays in the memory of one CUDA device.
///
/// The host-to-device copy is synchronous; there is no timeout.
#[cfg(feature = "cuda")]
pub struct CudaModule {
    dev: Arc<cudarc::driver::CudaDevice>,
    ordinal: usize,
}

#[cfg(feature = "cuda")]
impl CudaModule {
    /// Open the CUDA device with the given ordinal (0, 1, ...).
    pub fn new(ordinal: usize) -> Result<Self> {
        let dev = cudarc::driver::CudaDevice::new(ordinal)
            .map_err(|e| Error::unavailable(Device::Cuda(ordinal).name(), e.to_string()))?;
        log::debug!("opened CUDA device {ordinal}");
        Ok(Self { dev, ordinal })
    }
}

#[cfg(feature = "cuda")]
impl fmt::Debug for CudaModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CudaModule")
            .field("ordinal", &self.ordinal)
            .finish()
    }
}

#[cfg(feature = "cuda")]
impl ArrayModule for CudaModule {
    fn device(&self) -> Device {
        Device::Cuda(self.ordinal)
    }

    fn from_host(&self, data: Vec<f64>, shape: Shape) -> Result<Array> {
        let expected = shape.elem_count();
        if data.len() != expected {
            return Err(Error::ElementCountMismatch {
                shape,
                expected,
                got: data.len(),
            });
        }
        let slice = self
            .dev
            .htod_copy(data)
            .map_err(|e| Error::msg(format!("htod f64: {e}")))?;
        Ok(Array::from_storage(
            Storage::Cuda {
                slice: Arc::new(slice),
                ordinal: self.ordinal,
            },
            shape,
        ))
    }
}

/// Resolves an array-construction module from a `gpu` flag.
pub trait BackendSelector: fmt::Debug + Send {
    /// The module for host memory (`gpu == false`) or accelerator memory
    /// (`gpu == true`).
    ///
    /// Fails with [`Error::BackendUnavailable`] when the accelerator cannot
    /// be used.
    fn select(&self, gpu: bool) -> Result<Arc<dyn ArrayModule>>;
}

/// Host memory for `false`, the CUDA device `ordinal` for `true`.
///
/// The CUDA device is opened on first use and kept for later calls. Without
/// the `cuda` feature every accelerator request fails.
#[derive(Debug)]
pub struct DefaultSelector {
    host: Arc<dyn ArrayModule>,
    ordinal: usize,
    accelerator: Mutex<Option<Arc<dyn ArrayModule>>>,
}

impl DefaultSelector {
    pub fn new() -> Self {
        Self::with_ordinal(0)
    }

    /// Select CUDA device `ordinal` for accelerator batches.
    pub fn with_ordinal(ordinal: usize) -> Self {
        Self {
            host: Arc::new(HostModule),
            ordinal,
            accelerator: Mutex::new(None),
        }
    }

    #[cfg(feature = "cuda")]
    fn open_accelerator(&self) -> Result<Arc<dyn ArrayModule>> {
        Ok(Arc::new(CudaModule::new(self.ordinal)?))
    }

    #[cfg(not(feature = "cuda"))]
    fn open_accelerator(&self) -> Result<Arc<dyn ArrayModule>> {
        Err(Error::unavailable(
            Device::Cuda(self.ordinal).name(),
            "tern-core was built without the `cuda` feature",
        ))
    }
}

impl Default for DefaultSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendSelector for DefaultSelector {
    fn select(&self, gpu: bool) -> Result<Arc<dyn ArrayModule>> {
        if !gpu {
            return Ok(self.host.clone());
        }
        let mut slot = self
            .accelerator
            .lock()
            .map_err(|_| Error::msg("accelerator slot poisoned"))?;
        if let Some(module) = slot.as_ref() {
            return Ok(module.clone());
        }
        log::debug!("opening accelerator module for {}", Device::Cuda(self.ordinal));
        let module = self.open_accelerator()?;
        *slot = Some(module.clone());
        Ok(module)
    }
}
