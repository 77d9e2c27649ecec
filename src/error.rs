use thiserror::Error;

pub type Result<T> = std::result::Result<T, ShrinkError>;

/// Fatal failure modes of the shrink pipeline.
///
/// Recoverable conditions (dropped ways, unsupported restrictions) are not
/// errors: they are counted by reason in [`crate::stats::Stats`] and
/// processing continues. Anything surfacing here aborts the run and makes
/// partially produced output unusable.
#[derive(Debug, Error)]
pub enum ShrinkError {
    /// Structural corruption in the input stream. Fail-fast: never repaired,
    /// never skipped.
    #[error("corrupt input: {0}")]
    CorruptInput(String),

    /// The disk-backed node index failed to read or write.
    #[error("node index storage failure: {0}")]
    IndexStorage(String),

    /// Rejected configuration, raised before any record is processed.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// I/O failure outside the index store (temp directories, output sink).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<lmdb::Error> for ShrinkError {
    fn from(e: lmdb::Error) -> Self {
        ShrinkError::IndexStorage(e.to_string())
    }
}
