// Transform: per-example preprocessing applied on access

use std::sync::Arc;

use tern_core::Array;

/// A transform maps one raw example component to a processed one.
///
/// Any `Fn(Array) -> Array` closure is a transform.
pub trait Transform: Send + Sync {
    fn apply(&self, x: Array) -> Array;
}

impl<F> Transform for F
where
    F: Fn(Array) -> Array + Send + Sync,
{
    fn apply(&self, x: Array) -> Array {
        self(x)
    }
}

/// Returns its input unchanged. The default for every dataset slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Transform for Identity {
    fn apply(&self, x: Array) -> Array {
        x
    }
}

/// Chain multiple transforms, applied in order.
#[derive(Clone, Default)]
pub struct Compose {
    transforms: Vec<Arc<dyn Transform>>,
}

impl Compose {
    pub fn new(transforms: Vec<Arc<dyn Transform>>) -> Self {
        Self { transforms }
    }

    /// Append a transform to the end of the chain.
    pub fn then(mut self, t: impl Transform + 'static) -> Self {
        self.transforms.push(Arc::new(t));
        self
    }
}

impl Transform for Compose {
    fn apply(&self, mut x: Array) -> Array {
        for t in &self.transforms {
            x = t.apply(x);
        }
        x
    }
}

/// Collapse an example to one dimension, e.g. `[1, 28, 28]` → `[784]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Flatten;

impl Transform for Flatten {
    fn apply(&self, x: Array) -> Array {
        x.flatten()
    }
}

/// `(x - mean) / std` element-wise.
///
/// Image pixels in `[0, 255]` map to `[0, 1]` with `Normalize::new(0.0, 255.0)`.
#[derive(Debug, Clone, Copy)]
pub struct Normalize {
    pub mean: f64,
    pub std: f64,
}

impl Normalize {
    pub fn new(mean: f64, std: f64) -> Self {
        Self { mean, std }
    }
}

impl Transform for Normalize {
    fn apply(&self, x: Array) -> Array {
        let Normalize { mean, std } = *self;
        x.map(|v| (v - mean) / std)
    }
}

/// Reshape an example without changing its data.
///
/// Useful for turning flat vectors back into images, e.g. `[784]` → `[1, 28, 28]`.
#[derive(Debug, Clone)]
pub struct Reshape {
    pub new_shape: Vec<usize>,
}

impl Reshape {
    pub fn new(new_shape: Vec<usize>) -> Self {
        Self { new_shape }
    }
}

impl Transform for Reshape {
    fn apply(&self, x: Array) -> Array {
        let old = x.shape().clone();
        match x.reshape(self.new_shape.clone()) {
            Ok(reshaped) => reshaped,
            Err(_) => panic!("Reshape: shape {old} cannot become {:?}", self.new_shape),
        }
    }
}

/// One-hot encode a scalar class-index target into `[num_classes]`.
///
/// Out-of-range indices encode as all zeros.
#[derive(Debug, Clone, Copy)]
pub struct OneHot {
    pub num_classes: usize,
}

impl OneHot {
    pub fn new(num_classes: usize) -> Self {
        Self { num_classes }
    }
}

impl Transform for OneHot {
    fn apply(&self, t: Array) -> Array {
        let mut one_hot = vec![0.0; self.num_classes];
        if let Some(class) = t.as_scalar() {
            if class >= 0.0 && (class as usize) < self.num_classes {
                one_hot[class as usize] = 1.0;
            }
        }
        Array::vector(one_hot)
    }
}
