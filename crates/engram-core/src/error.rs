use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum CoreError {
    /// A vector's length did not match the codebook dimension.
    DimensionMismatch { expected: usize, actual: usize },
    /// An input vector carried NaN or an infinity.
    NonFiniteComponent { index: usize },
    /// A code outside `[0, K)`.
    CodeOutOfRange { code: u32, size: usize },
    /// An imported snapshot is internally inconsistent or does not fit its target.
    SnapshotMismatch(String),
    InvalidConfig(String),
    /// An edge list that would break a graph invariant.
    InvalidGraph(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::DimensionMismatch { expected, actual } => {
                write!(f, "dimension mismatch: expected {expected}, got {actual}")
            }
            CoreError::NonFiniteComponent { index } => {
                write!(f, "non-finite component at index {index}")
            }
            CoreError::CodeOutOfRange { code, size } => {
                write!(f, "code {code} out of range for codebook of size {size}")
            }
            CoreError::SnapshotMismatch(msg) => write!(f, "snapshot mismatch: {msg}"),
            CoreError::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            CoreError::InvalidGraph(msg) => write!(f, "invalid graph: {msg}"),
        }
    }
}

impl std::error::Error for CoreError {}

pub type Result<T> = std::result::Result<T, CoreError>;
