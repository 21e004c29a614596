// DataLoader / SeqDataLoader: epoch state, sampling, batch assembly
//
// Both loaders are the same `Loader` with a different `Sampler`:
//
//   DataLoader     = Loader<PermutationSampler>  shuffled or identity order,
//                                                one permutation per epoch
//   SeqDataLoader  = Loader<StrideSampler>       position p reads
//                                                (p * jump + iteration) % N
//
// Usage:
//
//   let mut loader = DataLoader::new(&dataset, DataLoaderConfig::default().batch_size(30))?;
//   for epoch in 0..num_epochs {
//       for batch in loader.by_ref() {
//           let batch = batch?;
//           // train on batch ...
//       }
//   }
//
// The iterator yields `None` once per epoch and has already reset itself at
// that point, so the next pull starts a fresh epoch.

use std::fmt;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};

use tern_core::{Array, ArrayModule, BackendSelector, DefaultSelector, Device, Error, Result};

use crate::dataset::Dataset;

/// Configuration for the DataLoader.
#[derive(Debug, Clone)]
pub struct DataLoaderConfig {
    /// Number of examples per batch.
    pub batch_size: usize,
    /// Whether to draw a new permutation each epoch.
    pub shuffle: bool,
    /// Whether batches are built in accelerator memory.
    pub gpu: bool,
    /// Optional random seed for reproducible shuffling.
    pub seed: Option<u64>,
}

impl Default for DataLoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            shuffle: true,
            gpu: false,
            seed: None,
        }
    }
}

impl DataLoaderConfig {
    pub fn batch_size(mut self, bs: usize) -> Self {
        self.batch_size = bs;
        self
    }

    pub fn shuffle(mut self, s: bool) -> Self {
        self.shuffle = s;
        self
    }

    pub fn gpu(mut self, g: bool) -> Self {
        self.gpu = g;
        self
    }

    pub fn seed(mut self, s: u64) -> Self {
        self.seed = Some(s);
        self
    }
}

/// A stacked minibatch.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Inputs, shape `[len, ...input_shape]`.
    pub input: Array,
    /// Targets, shape `[len, ...target_shape]`; `None` for unlabeled data.
    pub target: Option<Array>,
    /// Dataset indices of the examples, in batch order.
    pub indices: Vec<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Where the batch arrays were built.
    pub fn device(&self) -> Device {
        self.input.device()
    }
}

/// A sampling policy: which dataset indices make up batch `iteration`.
pub trait Sampler: Send {
    /// Start a new epoch over `data_size` examples.
    fn reset(&mut self, data_size: usize, rng: &mut dyn RngCore);

    /// Indices of the batch at `iteration` of the current epoch.
    fn batch_index(&self, iteration: usize, batch_size: usize, data_size: usize) -> Vec<usize>;

    /// The epoch ordering, if the policy keeps one.
    fn index(&self) -> &[usize] {
        &[]
    }
}

/// Slices consecutive batches out of a per-epoch index ordering.
///
/// With `shuffle` the ordering is a uniformly random permutation drawn at
/// every reset; without it, the identity `0..data_size`. Either way every
/// example appears exactly once per epoch, and the last batch is short when
/// `batch_size` does not divide `data_size`.
#[derive(Debug, Clone)]
pub struct PermutationSampler {
    shuffle: bool,
    index: Vec<usize>,
}

impl PermutationSampler {
    pub fn new(shuffle: bool) -> Self {
        Self {
            shuffle,
            index: Vec::new(),
        }
    }

    pub fn shuffle(&self) -> bool {
        self.shuffle
    }
}

impl Sampler for PermutationSampler {
    fn reset(&mut self, data_size: usize, rng: &mut dyn RngCore) {
        self.index.clear();
        self.index.extend(0..data_size);
        if self.shuffle {
            self.index.shuffle(rng);
        }
    }

    fn batch_index(&self, iteration: usize, batch_size: usize, data_size: usize) -> Vec<usize> {
        let start = (iteration * batch_size).min(data_size);
        let end = ((iteration + 1) * batch_size).min(data_size);
        self.index[start..end].to_vec()
    }

    fn index(&self) -> &[usize] {
        &self.index
    }
}

/// Stride-sequential sampling for sequence models.
///
/// With `jump = data_size / batch_size`, batch position `p` at `iteration`
/// reads `(p * jump + iteration) % data_size`. Successive batches therefore
/// advance every position by one element, and position `p` walks the
/// contiguous run starting at `p * jump`. Batches always hold `batch_size`
/// examples. Deterministic; ignores the random source.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrideSampler;

impl StrideSampler {
    /// Offset between the starting points of adjacent batch positions.
    pub fn jump(batch_size: usize, data_size: usize) -> usize {
        data_size / batch_size
    }
}

impl Sampler for StrideSampler {
    fn reset(&mut self, _data_size: usize, _rng: &mut dyn RngCore) {}

    fn batch_index(&self, iteration: usize, batch_size: usize, data_size: usize) -> Vec<usize> {
        let jump = Self::jump(batch_size, data_size);
        (0..batch_size)
            .map(|p| (p * jump + iteration) % data_size)
            .collect()
    }
}

/// A restartable minibatch loader over a shared [`Dataset`].
///
/// Pull with [`Loader::next_batch`] or through `Iterator`. Mutable epoch
/// state (`iteration`, the sampler's ordering) is not synchronised; use one
/// loader per consumer.
pub struct Loader<'a, S: Sampler> {
    dataset: &'a dyn Dataset,
    sampler: S,
    batch_size: usize,
    data_size: usize,
    max_iter: usize,
    iteration: usize,
    gpu: bool,
    rng: Box<dyn RngCore + Send>,
    selector: Box<dyn BackendSelector>,
}

/// Shuffled (or in-order) minibatches, one permutation per epoch.
pub type DataLoader<'a> = Loader<'a, PermutationSampler>;

/// Stride-sequential minibatches; never shuffles.
pub type SeqDataLoader<'a> = Loader<'a, StrideSampler>;

impl<'a> Loader<'a, PermutationSampler> {
    /// Create a new DataLoader over a dataset.
    ///
    /// Fails if `config.batch_size` is zero.
    pub fn new(dataset: &'a dyn Dataset, config: DataLoaderConfig) -> Result<Self> {
        let sampler = PermutationSampler::new(config.shuffle);
        Self::build(dataset, config, sampler)
    }
}

impl<'a> Loader<'a, StrideSampler> {
    /// Create a new SeqDataLoader over a dataset.
    ///
    /// `config.shuffle` is ignored. Fails if `config.batch_size` is zero or
    /// larger than the dataset, since the stride between positions would be
    /// zero.
    pub fn new(dataset: &'a dyn Dataset, config: DataLoaderConfig) -> Result<Self> {
        if config.shuffle {
            log::debug!(
                "SeqDataLoader over '{}' never shuffles; ignoring shuffle = true",
                dataset.name()
            );
        }
        if config.batch_size > dataset.len() {
            return Err(Error::InvalidConfig(format!(
                "SeqDataLoader needs batch_size ({}) <= dataset size ({})",
                config.batch_size,
                dataset.len()
            )));
        }
        Self::build(dataset, config.shuffle(false), StrideSampler)
    }
}

impl<'a, S: Sampler> Loader<'a, S> {
    fn build(dataset: &'a dyn Dataset, config: DataLoaderConfig, sampler: S) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be positive".into()));
        }
        let rng: Box<dyn RngCore + Send> = match config.seed {
            Some(seed) => Box::new(StdRng::seed_from_u64(seed)),
            None => Box::new(StdRng::from_entropy()),
        };
        let data_size = dataset.len();
        let mut loader = Self {
            dataset,
            sampler,
            batch_size: config.batch_size,
            data_size,
            max_iter: data_size.div_ceil(config.batch_size),
            iteration: 0,
            gpu: config.gpu,
            rng,
            selector: Box::new(DefaultSelector::new()),
        };
        loader.reset();
        Ok(loader)
    }

    /// Replace the random source and start a fresh epoch drawn from it.
    pub fn with_rng(mut self, rng: impl RngCore + Send + 'static) -> Self {
        self.rng = Box::new(rng);
        self.reset();
        self
    }

    /// Replace the backend selector used for batch assembly.
    pub fn with_selector(mut self, selector: impl BackendSelector + 'static) -> Self {
        self.selector = Box::new(selector);
        self
    }

    /// Rewind to the start of a new epoch, discarding the current position.
    pub fn reset(&mut self) {
        self.iteration = 0;
        self.sampler.reset(self.data_size, &mut *self.rng);
        log::debug!(
            "'{}': new epoch, {} examples in {} batches",
            self.dataset.name(),
            self.data_size,
            self.max_iter
        );
    }

    /// Pull the next batch.
    ///
    /// Returns `None` at the end of an epoch, after resetting; the following
    /// pull starts the next epoch. On error the cursor does not advance.
    pub fn next_batch(&mut self) -> Option<Result<Batch>> {
        if self.iteration >= self.max_iter {
            self.reset();
            return None;
        }

        let indices = self
            .sampler
            .batch_index(self.iteration, self.batch_size, self.data_size);
        let batch = self
            .selector
            .select(self.gpu)
            .and_then(|module| self.assemble(module, indices));
        if batch.is_ok() {
            self.iteration += 1;
        }
        Some(batch)
    }

    /// Fetch `indices` from the dataset and stack them with `module`.
    fn assemble(&self, module: Arc<dyn ArrayModule>, indices: Vec<usize>) -> Result<Batch> {
        let mut inputs = Vec::with_capacity(indices.len());
        let mut targets = Vec::with_capacity(indices.len());
        let mut labeled = None;

        for &i in &indices {
            let example = self.dataset.get(i);
            let has_target = example.target.is_some();
            if *labeled.get_or_insert(has_target) != has_target {
                return Err(Error::MixedTargets { index: i });
            }
            inputs.push(example.input);
            targets.extend(example.target);
        }

        let input = module.stack(&inputs)?;
        let target = if labeled == Some(true) {
            Some(module.stack(&targets)?)
        } else {
            None
        };
        Ok(Batch {
            input,
            target,
            indices,
        })
    }

    /// Build future batches in host memory.
    pub fn to_cpu(&mut self) {
        log::debug!("'{}': batches now built on the host", self.dataset.name());
        self.gpu = false;
    }

    /// Build future batches in accelerator memory.
    pub fn to_gpu(&mut self) {
        log::debug!("'{}': batches now built on the accelerator", self.dataset.name());
        self.gpu = true;
    }

    pub fn is_gpu(&self) -> bool {
        self.gpu
    }

    /// Batches produced so far in the current epoch.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Batches per epoch: `ceil(data_size / batch_size)`.
    pub fn max_iter(&self) -> usize {
        self.max_iter
    }

    pub fn data_size(&self) -> usize {
        self.data_size
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// The current epoch ordering (empty for stride sampling).
    pub fn index(&self) -> &[usize] {
        self.sampler.index()
    }

    pub fn sampler(&self) -> &S {
        &self.sampler
    }
}

/// Iterates one epoch at a time; see [`Loader::next_batch`].
///
/// # Errors
/// A failed pull does not advance the cursor, so the next pull retries the
/// same batch. A persistent error (`MixedTargets`, or `BackendUnavailable`
/// until the caller switches backend) repeats forever; loops that skip
/// errors with `continue` must break or call `to_cpu` instead.
impl<S: Sampler> Iterator for Loader<'_, S> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch()
    }
}

impl<S: Sampler + fmt::Debug> fmt::Debug for Loader<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("dataset", &self.dataset.name())
            .field("sampler", &self.sampler)
            .field("batch_size", &self.batch_size)
            .field("data_size", &self.data_size)
            .field("iteration", &self.iteration)
            .field("max_iter", &self.max_iter)
            .field("gpu", &self.gpu)
            .finish()
    }
}
