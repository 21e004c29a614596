// MNIST dataset: IDX file format parser
//
// The MNIST database consists of 4 files:
//   - train-images-idx3-ubyte  (60,000  28×28 images)
//   - train-labels-idx1-ubyte  (60,000  labels 0-9)
//   - t10k-images-idx3-ubyte   (10,000  28×28 images)
//   - t10k-labels-idx1-ubyte   (10,000  labels 0-9)
//
// IDX format (all values big-endian):
//   images: magic(2051) | count(u32) | rows(u32) | cols(u32) | pixel_data(u8...)
//   labels: magic(2049) | count(u32) | label_data(u8...)
//
// Files may be gzip-compressed (.gz); they are decompressed on the fly.
// Fetching the files is up to the caller.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::GzDecoder;

use tern_core::{Array, Result};

use crate::dataset::{DatasetConfig, Prepare, Prepared, PreparedDataset};
use crate::transform::{Compose, Flatten, Normalize, Transform};

/// Error type for MNIST loading.
#[derive(Debug)]
pub enum MnistError {
    Io(io::Error),
    InvalidMagic { expected: u32, got: u32 },
    Truncated { what: &'static str, expected: usize, got: usize },
    CountMismatch { images: usize, labels: usize },
    /// Header dimensions whose byte size does not fit in `usize`.
    HeaderOverflow { what: &'static str },
    MissingFile(PathBuf),
}

impl std::fmt::Display for MnistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MnistError::Io(e) => write!(f, "MNIST I/O error: {e}"),
            MnistError::InvalidMagic { expected, got } => write!(
                f,
                "MNIST invalid magic: expected {expected:#06x}, got {got:#06x}"
            ),
            MnistError::Truncated {
                what,
                expected,
                got,
            } => write!(
                f,
                "MNIST {what} truncated: expected {expected} bytes, got {got}"
            ),
            MnistError::CountMismatch { images, labels } => write!(
                f,
                "MNIST count mismatch: {images} images vs {labels} labels"
            ),
            MnistError::HeaderOverflow { what } => {
                write!(f, "MNIST {what} header dimensions overflow")
            }
            MnistError::MissingFile(p) => write!(f, "MNIST file not found: {}", p.display()),
        }
    }
}

impl std::error::Error for MnistError {}

impl From<io::Error> for MnistError {
    fn from(e: io::Error) -> Self {
        MnistError::Io(e)
    }
}

impl From<MnistError> for tern_core::Error {
    fn from(e: MnistError) -> Self {
        tern_core::Error::Dataset(Box::new(e))
    }
}

/// Human-readable class names, indexed by label.
pub const CLASS_NAMES: [&str; 10] = ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"];

/// Pixel values are divided by this in the default transform.
pub const PIXEL_MAX: f64 = 255.0;

#[derive(Debug, Clone)]
enum Source {
    Dir(PathBuf),
    Raw {
        images: Arc<Vec<u8>>,
        labels: Arc<Vec<u8>>,
    },
}

/// The MNIST dataset variant.
///
/// Inputs are `[1, rows, cols]` pixel arrays in `[0, 255]`, targets are
/// scalar digit labels. The default input transform flattens and scales
/// pixels to `[0, 1]`.
#[derive(Debug, Clone)]
pub struct Mnist {
    source: Source,
}

impl Mnist {
    /// Read the standard IDX files from `dir`.
    ///
    /// Expects the standard filenames (or `.gz` compressed versions):
    ///   - `train-images-idx3-ubyte` / `train-images-idx3-ubyte.gz`
    ///   - `train-labels-idx1-ubyte` / `train-labels-idx1-ubyte.gz`
    ///   - `t10k-images-idx3-ubyte`  / `t10k-images-idx3-ubyte.gz`
    ///   - `t10k-labels-idx1-ubyte`  / `t10k-labels-idx1-ubyte.gz`
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            source: Source::Dir(dir.as_ref().to_path_buf()),
        }
    }

    /// Use in-memory IDX bytes for both splits (useful for embedded/testing).
    pub fn from_raw(image_bytes: Vec<u8>, label_bytes: Vec<u8>) -> Self {
        Self {
            source: Source::Raw {
                images: Arc::new(image_bytes),
                labels: Arc::new(label_bytes),
            },
        }
    }

    /// Prepare a split with the default transforms.
    pub fn dataset(&self, train: bool) -> Result<PreparedDataset> {
        PreparedDataset::new(self, DatasetConfig::default().train(train))
    }

    /// Class name of a label, if it is a digit.
    pub fn class_name(label: usize) -> Option<&'static str> {
        CLASS_NAMES.get(label).copied()
    }

    fn read_split(&self, train: bool) -> std::result::Result<MnistSplit, MnistError> {
        let (img_bytes, lbl_bytes) = match &self.source {
            Source::Dir(dir) => {
                let (img_name, lbl_name) = if train {
                    ("train-images-idx3-ubyte", "train-labels-idx1-ubyte")
                } else {
                    ("t10k-images-idx3-ubyte", "t10k-labels-idx1-ubyte")
                };
                (read_maybe_gz(dir, img_name)?, read_maybe_gz(dir, lbl_name)?)
            }
            Source::Raw { images, labels } => (images.to_vec(), labels.to_vec()),
        };

        let (images, rows, cols) = parse_idx3_images(&img_bytes)?;
        let labels = parse_idx1_labels(&lbl_bytes)?;

        if images.len() != labels.len() {
            return Err(MnistError::CountMismatch {
                images: images.len(),
                labels: labels.len(),
            });
        }

        Ok(MnistSplit {
            images,
            labels,
            rows,
            cols,
        })
    }
}

struct MnistSplit {
    images: Vec<Vec<u8>>,
    labels: Vec<u8>,
    rows: usize,
    cols: usize,
}

impl Prepare for Mnist {
    fn name(&self) -> &str {
        "mnist"
    }

    fn prepare(&self, train: bool) -> Result<Prepared> {
        let split = self.read_split(train)?;
        let shape = vec![1, split.rows, split.cols];

        let data = split
            .images
            .into_iter()
            .map(|pixels| Array::from_vec(pixels.into_iter().map(f64::from).collect(), shape.clone()))
            .collect::<Result<Vec<_>>>()?;
        let label = split
            .labels
            .into_iter()
            .map(|l| Array::scalar(f64::from(l)))
            .collect();
        Prepared::labeled(data, label)
    }

    fn default_transform(&self) -> Arc<dyn Transform> {
        Arc::new(
            Compose::default()
                .then(Flatten)
                .then(Normalize::new(0.0, PIXEL_MAX)),
        )
    }
}

// IDX file format parsing

/// Read a file, trying plain first then `.gz` extension.
fn read_maybe_gz(dir: &Path, base_name: &str) -> std::result::Result<Vec<u8>, MnistError> {
    let plain = dir.join(base_name);
    let gz = dir.join(format!("{base_name}.gz"));

    if plain.exists() {
        Ok(fs::read(&plain)?)
    } else if gz.exists() {
        let mut out = Vec::new();
        GzDecoder::new(fs::File::open(&gz)?).read_to_end(&mut out)?;
        log::debug!("decompressed {} ({} bytes)", gz.display(), out.len());
        Ok(out)
    } else {
        Err(MnistError::MissingFile(plain))
    }
}

/// Parse an IDX3 file (images): magic=2051, count, rows, cols, data.
fn parse_idx3_images(data: &[u8]) -> std::result::Result<(Vec<Vec<u8>>, usize, usize), MnistError> {
    if data.len() < 16 {
        return Err(MnistError::Truncated {
            what: "IDX3 header",
            expected: 16,
            got: data.len(),
        });
    }

    let magic = read_u32_be(data, 0);
    if magic != 2051 {
        return Err(MnistError::InvalidMagic {
            expected: 2051,
            got: magic,
        });
    }

    let count = read_u32_be(data, 4) as usize;
    let rows = read_u32_be(data, 8) as usize;
    let cols = read_u32_be(data, 12) as usize;
    let overflow = || MnistError::HeaderOverflow { what: "IDX3" };
    let pixels_per_image = rows.checked_mul(cols).ok_or_else(overflow)?;
    let expected_len = count
        .checked_mul(pixels_per_image)
        .and_then(|n| n.checked_add(16))
        .ok_or_else(overflow)?;
    if data.len() < expected_len {
        return Err(MnistError::Truncated {
            what: "IDX3 file",
            expected: expected_len,
            got: data.len(),
        });
    }

    let images = (0..count)
        .map(|i| {
            let start = 16 + i * pixels_per_image;
            data[start..start + pixels_per_image].to_vec()
        })
        .collect();

    Ok((images, rows, cols))
}

/// Parse an IDX1 file (labels): magic=2049, count, data.
fn parse_idx1_labels(data: &[u8]) -> std::result::Result<Vec<u8>, MnistError> {
    if data.len() < 8 {
        return Err(MnistError::Truncated {
            what: "IDX1 header",
            expected: 8,
            got: data.len(),
        });
    }

    let magic = read_u32_be(data, 0);
    if magic != 2049 {
        return Err(MnistError::InvalidMagic {
            expected: 2049,
            got: magic,
        });
    }

    let count = read_u32_be(data, 4) as usize;
    let expected_len = count
        .checked_add(8)
        .ok_or(MnistError::HeaderOverflow { what: "IDX1" })?;
    if data.len() < expected_len {
        return Err(MnistError::Truncated {
            what: "IDX1 file",
            expected: expected_len,
            got: data.len(),
        });
    }

    Ok(data[8..expected_len].to_vec())
}

/// Read a big-endian u32 from `data` at byte offset `off`.
fn read_u32_be(data: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

// Builder helpers

/// Build IDX3 image bytes from raw image data (useful for tests).
pub fn build_idx3_bytes(images: &[&[u8]], rows: u32, cols: u32) -> Vec<u8> {
    let count = images.len() as u32;
    let mut buf = Vec::new();
    buf.extend_from_slice(&2051u32.to_be_bytes());
    buf.extend_from_slice(&count.to_be_bytes());
    buf.extend_from_slice(&rows.to_be_bytes());
    buf.extend_from_slice(&cols.to_be_bytes());
    for img in images {
        buf.extend_from_slice(img);
    }
    buf
}

/// Build IDX1 label bytes (useful for tests).
pub fn build_idx1_bytes(labels: &[u8]) -> Vec<u8> {
    let count = labels.len() as u32;
    let mut buf = Vec::new();
    buf.extend_from_slice(&2049u32.to_be_bytes());
    buf.extend_from_slice(&count.to_be_bytes());
    buf.extend_from_slice(labels);
    buf
}
