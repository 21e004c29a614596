// Tests for tern-data: Dataset, DataLoader, SeqDataLoader, backends, MNIST

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use tern_core::{Array, ArrayModule, BackendSelector, Device, Error, HostModule, Result, Shape};
use tern_data::mnist::{build_idx1_bytes, build_idx3_bytes};
use tern_data::{
    Batch, DataLoader, DataLoaderConfig, Dataset, DatasetConfig, Example, Mnist, OneHot,
    PreparedDataset, SeqDataLoader, SinCurve, Spiral,
};

// Simple in-memory datasets for testing

struct ToyDataset {
    samples: Vec<(Vec<f64>, f64)>,
}

impl ToyDataset {
    fn new(n: usize) -> Self {
        let samples = (0..n)
            .map(|i| {
                let x = i as f64;
                (vec![x, x * 2.0], (i % 3) as f64)
            })
            .collect();
        Self { samples }
    }
}

impl Dataset for ToyDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn get(&self, index: usize) -> Example {
        let (ref features, label) = self.samples[index];
        Example {
            input: Array::vector(features.clone()),
            target: Some(Array::scalar(label)),
        }
    }

    fn name(&self) -> &str {
        "toy"
    }
}

/// `0..n` as scalars, no targets.
struct Unlabeled(usize);

impl Dataset for Unlabeled {
    fn len(&self) -> usize {
        self.0
    }

    fn get(&self, index: usize) -> Example {
        assert!(index < self.0);
        Example {
            input: Array::scalar(index as f64),
            target: None,
        }
    }
}

/// Only even indices carry a target.
struct HalfLabeled(usize);

impl Dataset for HalfLabeled {
    fn len(&self) -> usize {
        self.0
    }

    fn get(&self, index: usize) -> Example {
        Example {
            input: Array::scalar(index as f64),
            target: (index % 2 == 0).then(|| Array::scalar(1.0)),
        }
    }
}

// A fake accelerator: builds host arrays but counts how often it was used.

#[derive(Debug)]
struct CountingModule {
    calls: Arc<AtomicUsize>,
}

impl ArrayModule for CountingModule {
    fn device(&self) -> Device {
        Device::Cuda(0)
    }

    fn from_host(&self, data: Vec<f64>, shape: Shape) -> Result<Array> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Array::from_vec(data, shape)
    }
}

#[derive(Debug)]
struct FakeSelector {
    host_calls: Arc<AtomicUsize>,
    gpu_calls: Arc<AtomicUsize>,
}

impl FakeSelector {
    fn new() -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let host_calls = Arc::new(AtomicUsize::new(0));
        let gpu_calls = Arc::new(AtomicUsize::new(0));
        let selector = Self {
            host_calls: host_calls.clone(),
            gpu_calls: gpu_calls.clone(),
        };
        (selector, host_calls, gpu_calls)
    }
}

impl BackendSelector for FakeSelector {
    fn select(&self, gpu: bool) -> Result<Arc<dyn ArrayModule>> {
        let calls = if gpu {
            self.gpu_calls.clone()
        } else {
            self.host_calls.clone()
        };
        Ok(Arc::new(CountingModule { calls }))
    }
}

fn pull(loader: &mut DataLoader<'_>) -> Batch {
    loader
        .next_batch()
        .expect("epoch ended early")
        .expect("batch assembly failed")
}

fn seq_pull(loader: &mut SeqDataLoader<'_>) -> Batch {
    loader
        .next_batch()
        .expect("epoch ended early")
        .expect("batch assembly failed")
}

// DataLoader tests

#[test]
fn test_dataloader_max_iter() {
    let ds = ToyDataset::new(10);
    let config = DataLoaderConfig::default().batch_size(3).shuffle(false);
    let loader = DataLoader::new(&ds, config).unwrap();
    assert_eq!(loader.max_iter(), 4); // ceil(10/3)
    assert_eq!(loader.data_size(), 10);
    assert_eq!(loader.batch_size(), 3);
    assert_eq!(loader.iteration(), 0);
}

#[test]
fn test_dataloader_rejects_zero_batch_size() {
    let ds = ToyDataset::new(4);
    let err = DataLoader::new(&ds, DataLoaderConfig::default().batch_size(0)).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[test]
fn test_epoch_covers_every_example_once() {
    for n in 1..=23 {
        for bs in 1..=7 {
            let ds = ToyDataset::new(n);
            let config = DataLoaderConfig::default().batch_size(bs).seed(n as u64);
            let mut loader = DataLoader::new(&ds, config).unwrap();

            let mut total = 0;
            let mut seen = Vec::new();
            for _ in 0..n.div_ceil(bs) {
                let batch = pull(&mut loader);
                total += batch.len();
                seen.extend(batch.indices);
            }
            assert_eq!(total, n, "n={n} bs={bs}");
            seen.sort_unstable();
            assert_eq!(seen, (0..n).collect::<Vec<_>>(), "n={n} bs={bs}");
            assert!(loader.next_batch().is_none());
        }
    }
}

#[test]
fn test_final_batch_is_partial() {
    let ds = ToyDataset::new(5);
    let config = DataLoaderConfig::default().batch_size(3).shuffle(false);
    let mut loader = DataLoader::new(&ds, config).unwrap();

    let b0 = pull(&mut loader);
    assert_eq!(b0.input.dims(), &[3, 2]);
    assert_eq!(b0.target.as_ref().unwrap().dims(), &[3]);

    let b1 = pull(&mut loader);
    assert_eq!(b1.input.dims(), &[2, 2]);
    assert_eq!(b1.indices, vec![3, 4]);
}

#[test]
fn test_unshuffled_batches_stack_in_order() {
    let ds = ToyDataset::new(4);
    let config = DataLoaderConfig::default().batch_size(4).shuffle(false);
    let mut loader = DataLoader::new(&ds, config).unwrap();

    let batch = pull(&mut loader);
    assert_eq!(
        batch.input.to_f64_vec().unwrap(),
        vec![0.0, 0.0, 1.0, 2.0, 2.0, 4.0, 3.0, 6.0]
    );
    assert_eq!(
        batch.target.unwrap().to_f64_vec().unwrap(),
        vec![0.0, 1.0, 2.0, 0.0]
    );
}

#[test]
fn test_seeded_shuffle_is_exact_permutation() {
    let ds = ToyDataset::new(12);
    let config = DataLoaderConfig::default().batch_size(5).seed(7);
    let mut loader = DataLoader::new(&ds, config).unwrap();

    let mut expected: Vec<usize> = (0..12).collect();
    expected.shuffle(&mut StdRng::seed_from_u64(7));
    assert_eq!(loader.index(), expected.as_slice());

    assert_eq!(pull(&mut loader).indices, expected[0..5].to_vec());
    assert_eq!(pull(&mut loader).indices, expected[5..10].to_vec());
    assert_eq!(pull(&mut loader).indices, expected[10..12].to_vec());
}

#[test]
fn test_injected_rng_drives_permutation() {
    let ds = ToyDataset::new(9);
    let loader = DataLoader::new(&ds, DataLoaderConfig::default().batch_size(4))
        .unwrap()
        .with_rng(StdRng::seed_from_u64(99));

    let mut expected: Vec<usize> = (0..9).collect();
    expected.shuffle(&mut StdRng::seed_from_u64(99));
    assert_eq!(loader.index(), expected.as_slice());
}

#[test]
fn test_batch_values_follow_indices() {
    let ds = ToyDataset::new(8);
    let config = DataLoaderConfig::default().batch_size(3).seed(1);
    let mut loader = DataLoader::new(&ds, config).unwrap();

    let batch = pull(&mut loader);
    let xs = batch.input.to_f64_vec().unwrap();
    for (pos, &i) in batch.indices.iter().enumerate() {
        assert_eq!(xs[pos * 2], i as f64);
        assert_eq!(xs[pos * 2 + 1], 2.0 * i as f64);
    }
}

#[test]
fn test_exhaustion_resets_and_next_pull_starts_fresh_epoch() {
    let ds = ToyDataset::new(7);
    let config = DataLoaderConfig::default().batch_size(3).shuffle(false);
    let mut loader = DataLoader::new(&ds, config).unwrap();

    assert_eq!(loader.by_ref().count(), 3);
    // The end-of-epoch signal already reset the cursor.
    assert_eq!(loader.iteration(), 0);

    let first = pull(&mut loader);
    assert_eq!(first.indices, vec![0, 1, 2]);
    assert_eq!(loader.iteration(), 1);

    // A second full epoch through the Iterator interface.
    let sizes: Vec<usize> = loader.by_ref().map(|b| b.unwrap().len()).collect();
    assert_eq!(sizes, vec![3, 1]);
    assert_eq!(loader.by_ref().count(), 3);
}

#[test]
fn test_shuffle_draws_new_permutation_each_epoch() {
    let ds = ToyDataset::new(50);
    let config = DataLoaderConfig::default().batch_size(10).seed(2024);
    let mut loader = DataLoader::new(&ds, config).unwrap();

    let first = loader.index().to_vec();
    assert_eq!(loader.by_ref().count(), 5);
    let second = loader.index().to_vec();
    assert_ne!(first, second);

    let mut sorted = second.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, (0..50).collect::<Vec<_>>());
}

#[test]
fn test_manual_reset_discards_position() {
    let ds = ToyDataset::new(6);
    let config = DataLoaderConfig::default().batch_size(2).shuffle(false);
    let mut loader = DataLoader::new(&ds, config).unwrap();
    pull(&mut loader);
    pull(&mut loader);
    loader.reset();
    assert_eq!(loader.iteration(), 0);
    assert_eq!(pull(&mut loader).indices, vec![0, 1]);
}

#[test]
fn test_unlabeled_batches_have_no_target() {
    let ds = Unlabeled(5);
    let config = DataLoaderConfig::default().batch_size(2);
    let mut loader = DataLoader::new(&ds, config).unwrap();
    for batch in loader.by_ref() {
        let batch = batch.unwrap();
        assert!(batch.target.is_none());
        assert_eq!(batch.input.dims(), &[batch.len()]);
    }
}

#[test]
fn test_mixed_targets_fail_without_advancing() {
    let ds = HalfLabeled(4);
    let config = DataLoaderConfig::default().batch_size(4).shuffle(false);
    let mut loader = DataLoader::new(&ds, config).unwrap();
    let err = loader.next_batch().unwrap().unwrap_err();
    assert!(matches!(err, Error::MixedTargets { index: 1 }));
    assert_eq!(loader.iteration(), 0);
}

#[test]
fn test_failed_batch_is_retried_by_iterator() {
    let ds = HalfLabeled(4);
    let config = DataLoaderConfig::default().batch_size(4).shuffle(false);
    let mut loader = DataLoader::new(&ds, config).unwrap();
    let errors = loader.by_ref().take(3).filter(|b| b.is_err()).count();
    assert_eq!(errors, 3);
    assert_eq!(loader.iteration(), 0);
}

#[test]
fn test_empty_dataset_ends_immediately() {
    let ds = ToyDataset::new(0);
    let mut loader = DataLoader::new(&ds, DataLoaderConfig::default().batch_size(4)).unwrap();
    assert_eq!(loader.max_iter(), 0);
    assert!(loader.next_batch().is_none());
    assert!(loader.next_batch().is_none());
}

#[test]
fn test_loaders_share_one_dataset() {
    let ds = ToyDataset::new(6);
    let mut a = DataLoader::new(&ds, DataLoaderConfig::default().batch_size(2).seed(1)).unwrap();
    let mut b = DataLoader::new(&ds, DataLoaderConfig::default().batch_size(3).shuffle(false))
        .unwrap();
    assert_eq!(pull(&mut a).len(), 2);
    assert_eq!(pull(&mut b).indices, vec![0, 1, 2]);
    assert_eq!(a.iteration(), 1);
    assert_eq!(b.iteration(), 1);
}

// Backend switching

#[test]
fn test_to_gpu_affects_only_later_pulls() {
    let ds = ToyDataset::new(8);
    let (selector, host_calls, gpu_calls) = FakeSelector::new();
    let config = DataLoaderConfig::default().batch_size(2).shuffle(false);
    let mut loader = DataLoader::new(&ds, config)
        .unwrap()
        .with_selector(selector);

    let before = pull(&mut loader);
    // Inputs and targets are two stacking calls.
    assert_eq!(host_calls.load(Ordering::SeqCst), 2);
    assert_eq!(gpu_calls.load(Ordering::SeqCst), 0);

    loader.to_gpu();
    assert!(loader.is_gpu());
    let after = pull(&mut loader);
    assert_eq!(host_calls.load(Ordering::SeqCst), 2);
    assert_eq!(gpu_calls.load(Ordering::SeqCst), 2);

    // The earlier batch is untouched by the toggle.
    assert_eq!(before.input.to_f64_vec().unwrap(), vec![0.0, 0.0, 1.0, 2.0]);
    assert_eq!(after.indices, vec![2, 3]);

    loader.to_cpu();
    pull(&mut loader);
    assert_eq!(host_calls.load(Ordering::SeqCst), 4);
    assert_eq!(gpu_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_gpu_flag_from_config() {
    let ds = Unlabeled(3);
    let (selector, host_calls, gpu_calls) = FakeSelector::new();
    let config = DataLoaderConfig::default().batch_size(3).gpu(true);
    let mut loader = DataLoader::new(&ds, config)
        .unwrap()
        .with_selector(selector);
    pull(&mut loader);
    assert_eq!(host_calls.load(Ordering::SeqCst), 0);
    assert_eq!(gpu_calls.load(Ordering::SeqCst), 1);
}

#[cfg(not(feature = "cuda"))]
#[test]
fn test_missing_accelerator_fails_without_fallback() {
    let ds = ToyDataset::new(4);
    let config = DataLoaderConfig::default().batch_size(2).shuffle(false);
    let mut loader = DataLoader::new(&ds, config).unwrap();

    loader.to_gpu();
    let err = loader.next_batch().unwrap().unwrap_err();
    assert!(matches!(err, Error::BackendUnavailable { .. }));
    assert_eq!(loader.iteration(), 0);

    loader.to_cpu();
    let batch = pull(&mut loader);
    assert_eq!(batch.device(), Device::Cpu);
    assert_eq!(batch.indices, vec![0, 1]);
}

#[test]
fn test_host_module_is_default_for_cpu() {
    let ds = ToyDataset::new(2);
    let mut loader = DataLoader::new(&ds, DataLoaderConfig::default()).unwrap();
    let batch = pull(&mut loader);
    assert_eq!(batch.device(), HostModule.device());
}

// SeqDataLoader tests

#[test]
fn test_seq_stride_indices() {
    let ds = ToyDataset::new(20);
    let mut loader = SeqDataLoader::new(&ds, DataLoaderConfig::default().batch_size(4)).unwrap();

    assert_eq!(seq_pull(&mut loader).indices, vec![0, 5, 10, 15]);
    assert_eq!(seq_pull(&mut loader).indices, vec![1, 6, 11, 16]);
}

#[test]
fn test_seq_positions_walk_contiguous_runs() {
    let n = 20;
    let bs = 4;
    let jump = n / bs;
    let ds = ToyDataset::new(n);
    let mut loader = SeqDataLoader::new(&ds, DataLoaderConfig::default().batch_size(bs)).unwrap();

    let mut per_position = vec![Vec::new(); bs];
    for batch in loader.by_ref() {
        let xs = batch.unwrap().input.to_f64_vec().unwrap();
        for (p, run) in per_position.iter_mut().enumerate() {
            run.push(xs[p * 2]);
        }
    }
    for (p, run) in per_position.iter().enumerate() {
        let expected: Vec<f64> = (0..jump).map(|k| (p * jump + k) as f64).collect();
        assert_eq!(run, &expected);
    }
}

#[test]
fn test_seq_batches_are_always_full() {
    let ds = ToyDataset::new(10);
    let mut loader = SeqDataLoader::new(&ds, DataLoaderConfig::default().batch_size(3)).unwrap();
    assert_eq!(loader.max_iter(), 4);

    let batches: Vec<Batch> = loader.by_ref().map(|b| b.unwrap()).collect();
    assert_eq!(batches.len(), 4);
    assert!(batches.iter().all(|b| b.len() == 3));
    // jump = 3: position p walks p*3, p*3 + 1, ...
    assert_eq!(batches[0].indices, vec![0, 3, 6]);
    assert_eq!(batches[3].indices, vec![3, 6, 9]);
}

#[test]
fn test_seq_ignores_shuffle_and_is_reproducible() {
    let ds = ToyDataset::new(12);
    let config = DataLoaderConfig::default().batch_size(3).shuffle(true);
    let mut a = SeqDataLoader::new(&ds, config.clone()).unwrap();
    let mut b = SeqDataLoader::new(&ds, config).unwrap();
    assert!(a.index().is_empty());

    let ea: Vec<Vec<usize>> = a.by_ref().map(|x| x.unwrap().indices).collect();
    let eb: Vec<Vec<usize>> = b.by_ref().map(|x| x.unwrap().indices).collect();
    assert_eq!(ea, eb);
    assert_eq!(ea[0], vec![0, 4, 8]);

    // Next epoch repeats exactly.
    let ea2: Vec<Vec<usize>> = a.by_ref().map(|x| x.unwrap().indices).collect();
    assert_eq!(ea, ea2);
}

#[test]
fn test_seq_rejects_batch_larger_than_dataset() {
    let ds = ToyDataset::new(3);
    let err = SeqDataLoader::new(&ds, DataLoaderConfig::default().batch_size(4)).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[test]
fn test_seq_backend_switching() {
    let ds = ToyDataset::new(8);
    let (selector, host_calls, gpu_calls) = FakeSelector::new();
    let mut loader = SeqDataLoader::new(&ds, DataLoaderConfig::default().batch_size(2))
        .unwrap()
        .with_selector(selector);
    seq_pull(&mut loader);
    loader.to_gpu();
    seq_pull(&mut loader);
    assert_eq!(host_calls.load(Ordering::SeqCst), 2);
    assert_eq!(gpu_calls.load(Ordering::SeqCst), 2);
}

// Built-in datasets through the loaders

#[test]
fn test_spiral_with_dataloader() {
    let ds = Spiral::dataset(true).unwrap();
    let mut loader = DataLoader::new(&ds, DataLoaderConfig::default().batch_size(30)).unwrap();
    assert_eq!(loader.max_iter(), 10);
    for batch in loader.by_ref() {
        let batch = batch.unwrap();
        assert_eq!(batch.input.dims(), &[30, 2]);
        assert_eq!(batch.target.unwrap().dims(), &[30]);
    }
}

#[test]
fn test_spiral_with_onehot_targets() {
    let config = DatasetConfig::default().target_transform(OneHot::new(3));
    let ds = PreparedDataset::new(&Spiral, config).unwrap();
    let mut loader = DataLoader::new(&ds, DataLoaderConfig::default().batch_size(4)).unwrap();
    let t = pull(&mut loader).target.unwrap();
    assert_eq!(t.dims(), &[4, 3]);
    let rows = t.to_f64_vec().unwrap();
    for row in rows.chunks(3) {
        assert_eq!(row.iter().sum::<f64>(), 1.0);
    }
}

#[test]
fn test_sin_curve_with_seq_loader() {
    let ds = SinCurve::dataset(false).unwrap();
    let mut loader = SeqDataLoader::new(&ds, DataLoaderConfig::default().batch_size(3)).unwrap();
    let b0 = seq_pull(&mut loader);
    let b1 = seq_pull(&mut loader);
    assert_eq!(b0.input.dims(), &[3, 1]);
    // Each position's target is the next pull's input at that position.
    assert_eq!(
        b0.target.unwrap().to_f64_vec().unwrap(),
        b1.input.to_f64_vec().unwrap()
    );
}

#[test]
fn test_mnist_gz_dir_with_dataloader() {
    let dir = tempfile::tempdir().unwrap();
    let images = build_idx3_bytes(&[&[0u8; 4], &[255u8; 4], &[51u8; 4]], 2, 2);
    let labels = build_idx1_bytes(&[1, 7, 3]);
    for (name, bytes) in [
        ("t10k-images-idx3-ubyte.gz", &images),
        ("t10k-labels-idx1-ubyte.gz", &labels),
    ] {
        let file = std::fs::File::create(dir.path().join(name)).unwrap();
        let mut enc = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        enc.write_all(bytes).unwrap();
        enc.finish().unwrap();
    }

    let ds = Mnist::from_dir(dir.path()).dataset(false).unwrap();
    assert_eq!(ds.len(), 3);

    let config = DataLoaderConfig::default().batch_size(3).shuffle(false);
    let mut loader = DataLoader::new(&ds, config).unwrap();
    let batch = pull(&mut loader);
    assert_eq!(batch.input.dims(), &[3, 4]);
    assert_eq!(
        batch.target.unwrap().to_f64_vec().unwrap(),
        vec![1.0, 7.0, 3.0]
    );
    let x = batch.input.to_f64_vec().unwrap();
    assert_eq!(x[4], 1.0);
    assert!((x[8] - 0.2).abs() < 1e-12);

    // The training split is not on disk.
    assert!(Mnist::from_dir(dir.path()).dataset(true).is_err());
}
