//! Error types for omniflow core operations

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading workflow documents
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid workflow JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_error_names_path() {
        let err = Error::Read {
            path: PathBuf::from("/tmp/flow.json"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert_eq!(err.to_string(), "Cannot read /tmp/flow.json: missing");
    }
}
