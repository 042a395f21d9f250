//! Error types for the IFR pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, IfrError>;

/// Main error type for the IFR pipeline.
///
/// The variants map onto the pipeline's failure semantics:
///
/// - `StorageUnavailable` and `Database` are transient: the caller must not
///   advance a file's status and should leave it for the next cycle.
/// - `Decode` is fatal for the affected file and costs one retry.
/// - Reference-lookup misses and unclassifiable rows are *not* errors; they
///   are logged (or silently skipped) inside the decoder.
#[derive(Error, Debug)]
pub enum IfrError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("failed to decode worksheet: {0}")]
    Decode(String),

    #[error("worksheet {0:?} not found in workbook")]
    SheetNotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown file status: {0}")]
    UnknownStatus(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IfrError::StorageUnavailable("connection refused".to_string());
        assert_eq!(
            err.to_string(),
            "object storage unavailable: connection refused"
        );

        let err = IfrError::SheetNotFound("IFR".to_string());
        assert_eq!(err.to_string(), "worksheet \"IFR\" not found in workbook");
    }
}
