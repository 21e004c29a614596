// Dataset: random access to examples, plus the shared prepare-once dataset

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use tern_core::{bail, Array, Result};

use crate::transform::{Identity, Transform};

/// One example: an input and, for supervised data, its target.
#[derive(Debug, Clone)]
pub struct Example {
    pub input: Array,
    /// `None` for unlabeled (unsupervised) data.
    pub target: Option<Array>,
}

/// A dataset is an indexed collection of examples.
///
/// This is the capability loaders consume. Implementations must be
/// `Send + Sync` so a dataset can be shared by several loaders.
pub trait Dataset: Send + Sync {
    /// Total number of examples in the dataset.
    fn len(&self) -> usize;

    /// Whether the dataset is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retrieve the example at position `index`.
    ///
    /// # Panics
    /// Panics if `index >= self.len()`.
    fn get(&self, index: usize) -> Example;

    /// Optional human-readable name.
    fn name(&self) -> &str {
        "dataset"
    }
}

/// An index into a dataset as a caller may spell it.
///
/// Only [`DatasetIndex::Scalar`] is a valid element access; the other forms
/// exist so that [`PreparedDataset::at`] can reject them explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetIndex {
    Scalar(usize),
    Range(Range<usize>),
    Many(Vec<usize>),
}

impl From<usize> for DatasetIndex {
    fn from(i: usize) -> Self {
        DatasetIndex::Scalar(i)
    }
}

impl From<Range<usize>> for DatasetIndex {
    fn from(r: Range<usize>) -> Self {
        DatasetIndex::Range(r)
    }
}

impl From<Vec<usize>> for DatasetIndex {
    fn from(v: Vec<usize>) -> Self {
        DatasetIndex::Many(v)
    }
}

impl From<&[usize]> for DatasetIndex {
    fn from(v: &[usize]) -> Self {
        DatasetIndex::Many(v.to_vec())
    }
}

/// Raw storage produced by a dataset variant.
#[derive(Debug, Clone)]
pub struct Prepared {
    data: Vec<Array>,
    label: Option<Vec<Array>>,
}

impl Prepared {
    /// Labeled storage. `label` must be parallel to `data`.
    pub fn labeled(data: Vec<Array>, label: Vec<Array>) -> Result<Self> {
        if data.len() != label.len() {
            bail!(
                "prepared {} inputs but {} labels; they must be parallel",
                data.len(),
                label.len()
            );
        }
        Ok(Self {
            data,
            label: Some(label),
        })
    }

    /// Unlabeled storage.
    pub fn unlabeled(data: Vec<Array>) -> Self {
        Self { data, label: None }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A dataset variant: the population step plus its default transforms.
///
/// Variants only say how their raw examples are produced. Element access and
/// transform application live in [`PreparedDataset`] and are the same for
/// every variant.
pub trait Prepare {
    /// Name used in logs and by [`Dataset::name`].
    fn name(&self) -> &str;

    /// Produce the raw examples of the train or test split.
    fn prepare(&self, train: bool) -> Result<Prepared>;

    /// Input transform used when the config does not supply one.
    fn default_transform(&self) -> Arc<dyn Transform> {
        Arc::new(Identity)
    }

    /// Target transform used when the config does not supply one.
    fn default_target_transform(&self) -> Arc<dyn Transform> {
        Arc::new(Identity)
    }
}

/// Configuration for a [`PreparedDataset`].
#[derive(Clone)]
pub struct DatasetConfig {
    /// Which split to prepare.
    pub train: bool,
    /// Input transform; `None` means the variant's default.
    pub transform: Option<Arc<dyn Transform>>,
    /// Target transform; `None` means the variant's default.
    pub target_transform: Option<Arc<dyn Transform>>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            train: true,
            transform: None,
            target_transform: None,
        }
    }
}

impl fmt::Debug for DatasetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetConfig")
            .field("train", &self.train)
            .field("transform", &self.transform.is_some())
            .field("target_transform", &self.target_transform.is_some())
            .finish()
    }
}

impl DatasetConfig {
    pub fn train(mut self, train: bool) -> Self {
        self.train = train;
        self
    }

    pub fn transform(mut self, t: impl Transform + 'static) -> Self {
        self.transform = Some(Arc::new(t));
        self
    }

    pub fn target_transform(mut self, t: impl Transform + 'static) -> Self {
        self.target_transform = Some(Arc::new(t));
        self
    }
}

/// A dataset populated once by a [`Prepare`] variant and read-only afterwards.
pub struct PreparedDataset {
    name: String,
    train: bool,
    data: Vec<Array>,
    label: Option<Vec<Array>>,
    transform: Arc<dyn Transform>,
    target_transform: Arc<dyn Transform>,
}

impl PreparedDataset {
    /// Run `variant.prepare` exactly once and keep the result.
    pub fn new<P: Prepare + ?Sized>(variant: &P, config: DatasetConfig) -> Result<Self> {
        let Prepared { data, label } = variant.prepare(config.train)?;

        log::info!(
            "prepared dataset '{}' ({} split): {} examples, {}",
            variant.name(),
            if config.train { "train" } else { "test" },
            data.len(),
            if label.is_some() { "labeled" } else { "unlabeled" },
        );

        Ok(Self {
            name: variant.name().to_string(),
            train: config.train,
            data,
            label,
            transform: config
                .transform
                .unwrap_or_else(|| variant.default_transform()),
            target_transform: config
                .target_transform
                .unwrap_or_else(|| variant.default_target_transform()),
        })
    }

    /// Element access with the scalar-index precondition.
    ///
    /// # Panics
    /// Panics if `index` is a range or a list of indices, or out of range.
    pub fn at(&self, index: impl Into<DatasetIndex>) -> Example {
        match index.into() {
            DatasetIndex::Scalar(i) => self.get(i),
            other => panic!(
                "dataset '{}' index must be a scalar, got {:?}",
                self.name, other
            ),
        }
    }

    /// Whether this is the training split.
    pub fn train(&self) -> bool {
        self.train
    }

    /// The raw (untransformed) inputs.
    pub fn data(&self) -> &[Array] {
        &self.data
    }

    /// The raw (untransformed) targets, if the dataset is labeled.
    pub fn label(&self) -> Option<&[Array]> {
        self.label.as_deref()
    }
}

impl fmt::Debug for PreparedDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedDataset")
            .field("name", &self.name)
            .field("train", &self.train)
            .field("len", &self.data.len())
            .field("labeled", &self.label.is_some())
            .finish()
    }
}

impl Dataset for PreparedDataset {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn get(&self, index: usize) -> Example {
        let input = self.transform.apply(self.data[index].clone());
        let target = self
            .label
            .as_ref()
            .map(|label| self.target_transform.apply(label[index].clone()));
        Example { input, target }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
