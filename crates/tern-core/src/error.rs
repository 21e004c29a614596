use crate::shape::Shape;

/// All errors that can occur within tern.
///
/// Precondition violations (a non-scalar or out-of-range dataset index) are
/// not represented here: they panic at the call site. Everything that can go
/// wrong while building or stacking arrays, or while configuring a loader,
/// is reported through this single enum.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An example in a batch does not have the shape of the first example.
    #[error("shape mismatch at batch position {position}: expected {expected}, got {got}")]
    ShapeMismatch {
        expected: Shape,
        got: Shape,
        position: usize,
    },

    /// Element count mismatch when creating an array from a flat buffer.
    #[error("element count mismatch: shape {shape} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    /// Cannot reshape because element counts differ.
    #[error(
        "cannot reshape: source has {src} elements, target shape {dst_shape} has {dst} elements"
    )]
    ReshapeElementMismatch {
        src: usize,
        dst: usize,
        dst_shape: Shape,
    },

    /// Stacking was asked to build a batch from zero examples.
    #[error("cannot stack an empty batch")]
    EmptyBatch,

    /// Some examples of a batch carry a target and some do not.
    #[error("batch mixes labeled and unlabeled examples (first mismatch at dataset index {index})")]
    MixedTargets { index: usize },

    /// The requested array backend cannot be used. There is no fallback.
    #[error("backend '{backend}' unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    /// A loader or dataset was configured with values it cannot honor.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A dataset variant failed to load its source data. The original error
    /// is kept so callers can downcast it.
    #[error(transparent)]
    Dataset(Box<dyn std::error::Error + Send + Sync>),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    pub fn unavailable(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::BackendUnavailable {
            backend: backend.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience Result type used throughout tern.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
