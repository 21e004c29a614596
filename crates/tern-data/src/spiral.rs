// Spiral: synthetic 2-D, 3-class classification toy dataset
//
// Class j traces the arm  r = i / N,  θ = 4j + 4r + ε,  ε ~ N(0, 0.2²)
// for i in 0..N, giving points (r sin θ, r cos θ). The generator is seeded
// per split, so both splits are reproducible and differ from each other.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use tern_core::{Array, Result};

use crate::dataset::{DatasetConfig, Prepare, Prepared, PreparedDataset};

/// Seed of the training split.
pub const TRAIN_SEED: u64 = 1984;
/// Seed of the test split.
pub const TEST_SEED: u64 = 2020;

/// Points per class.
pub const NUM_DATA: usize = 100;
/// Number of spiral arms.
pub const NUM_CLASS: usize = 3;
/// Dimensionality of each point.
pub const INPUT_DIM: usize = 2;

/// Generate the spiral points and their class labels, shuffled.
pub fn get_spiral(train: bool) -> (Vec<[f64; INPUT_DIM]>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(if train { TRAIN_SEED } else { TEST_SEED });

    let data_size = NUM_CLASS * NUM_DATA;
    let mut x = Vec::with_capacity(data_size);
    let mut t = Vec::with_capacity(data_size);

    for j in 0..NUM_CLASS {
        for i in 0..NUM_DATA {
            let rate = i as f64 / NUM_DATA as f64;
            let radius = rate;
            let noise: f64 = rng.sample(StandardNormal);
            let theta = j as f64 * 4.0 + 4.0 * rate + noise * 0.2;
            x.push([radius * theta.sin(), radius * theta.cos()]);
            t.push(j);
        }
    }

    let mut order: Vec<usize> = (0..data_size).collect();
    order.shuffle(&mut rng);
    let x = order.iter().map(|&i| x[i]).collect();
    let t = order.iter().map(|&i| t[i]).collect();
    (x, t)
}

/// The spiral dataset variant. Inputs are `[2]`, targets are scalar class
/// indices.
#[derive(Debug, Clone, Copy, Default)]
pub struct Spiral;

impl Spiral {
    /// Prepare the train or test split with identity transforms.
    pub fn dataset(train: bool) -> Result<PreparedDataset> {
        PreparedDataset::new(&Spiral, DatasetConfig::default().train(train))
    }
}

impl Prepare for Spiral {
    fn name(&self) -> &str {
        "spiral"
    }

    fn prepare(&self, train: bool) -> Result<Prepared> {
        let (x, t) = get_spiral(train);
        let data = x.into_iter().map(|p| Array::vector(p.to_vec())).collect();
        let label = t.into_iter().map(|c| Array::scalar(c as f64)).collect();
        Prepared::labeled(data, label)
    }
}
