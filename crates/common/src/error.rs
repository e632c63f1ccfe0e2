//! The application-wide error type.
//!
//! `OmError` consolidates the error taxonomy described for the monitor:
//! configuration problems, missing extractor functions, data extraction
//! failures, reference-array I/O, transport failures, and protocol
//! violations. Every crate in the workspace returns `OmResult<T>` at its
//! public boundary and converts into one of these variants with `?`.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type OmResult<T> = std::result::Result<T, OmError>;

#[derive(Error, Debug)]
pub enum OmError {
    /// A configuration file could not be parsed or merged.
    #[error("configuration error: {0}")]
    Config(String),

    /// A configuration value passed parsing but failed semantic validation
    /// (wrong type, missing required field, out-of-range value).
    #[error("configuration validation error: {0}")]
    Configuration(String),

    /// An `EventSource` or extractor dependency (file, instrument, library)
    /// could not be reached or initialized.
    #[error("dependency error: {0}")]
    Dependency(String),

    /// A worker required an extractor function that was never registered.
    #[error("missing extractor function: {0}")]
    MissingFunction(String),

    /// Extraction of a named data item from an open event failed; the
    /// frame that triggered it is meant to be skipped, not fatal to the
    /// whole run.
    #[error("data extraction error: {0}")]
    DataExtraction(String),

    /// A reference array (mask, dark, gain, geometry) could not be read
    /// from disk or had an incompatible shape.
    #[error("reference array I/O error: {0}")]
    ReferenceArrayIo(String),

    /// The broadcast transport (socket bind, send) failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// A worker or collector received a message that violated the
    /// parallelization protocol (unexpected tag, message out of order).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Wraps `std::io::Error` for filesystem operations that don't fit a
    /// more specific variant above.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OmError::MissingFunction("detector_data".to_string());
        assert_eq!(
            err.to_string(),
            "missing extractor function: detector_data"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err: OmError = io_err.into();
        assert!(matches!(err, OmError::Io(_)));
    }
}
