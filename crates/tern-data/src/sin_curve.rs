// SinCurve: next-step prediction over one period of a sine wave
//
// y is sampled at `num_data` evenly spaced points of [0, 2π]. The training
// split is sin(x) plus uniform noise in [-0.05, 0.05); the test split is the
// clean, phase-shifted cos(x). Example i is y[i] with target y[i + 1], so
// the dataset holds num_data - 1 examples of shape [1] and reading it in
// order walks the curve. Pair it with SeqDataLoader.

use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tern_core::{bail, Array, Result};

use crate::dataset::{DatasetConfig, Prepare, Prepared, PreparedDataset};

/// Half-width of the uniform noise added to the training curve.
pub const NOISE: f64 = 0.05;

#[derive(Debug, Clone, Copy)]
pub struct SinCurve {
    /// Number of curve samples (the dataset holds one fewer example).
    pub num_data: usize,
    /// Seed of the training-split noise.
    pub seed: u64,
}

impl Default for SinCurve {
    fn default() -> Self {
        Self {
            num_data: 1000,
            seed: 0,
        }
    }
}

impl SinCurve {
    /// Prepare the default curve's train or test split.
    pub fn dataset(train: bool) -> Result<PreparedDataset> {
        PreparedDataset::new(&SinCurve::default(), DatasetConfig::default().train(train))
    }

    /// The sampled curve, before it is split into inputs and targets.
    pub fn curve(&self, train: bool) -> Vec<f64> {
        let step = if self.num_data > 1 {
            2.0 * PI / (self.num_data - 1) as f64
        } else {
            0.0
        };
        let mut rng = StdRng::seed_from_u64(self.seed);
        (0..self.num_data)
            .map(|i| {
                let x = i as f64 * step;
                if train {
                    x.sin() + rng.gen_range(-NOISE..NOISE)
                } else {
                    x.cos()
                }
            })
            .collect()
    }
}

impl Prepare for SinCurve {
    fn name(&self) -> &str {
        "sin_curve"
    }

    fn prepare(&self, train: bool) -> Result<Prepared> {
        if self.num_data < 2 {
            bail!("SinCurve needs at least 2 samples, got {}", self.num_data);
        }
        let y = self.curve(train);
        let data = y[..y.len() - 1]
            .iter()
            .map(|&v| Array::vector(vec![v]))
            .collect();
        let label = y[1..].iter().map(|&v| Array::vector(vec![v])).collect();
        Prepared::labeled(data, label)
    }
}
