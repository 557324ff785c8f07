//! Error types for configuration loading.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the common error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures while loading or validating the configuration file.
#[derive(Error, Debug)]
pub enum Error {
    /// A setting the scanner cannot run with
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read config from {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config from {}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_parse_error_keeps_source() {
        let source = serde_json::from_str::<serde_json::Value>("{ nope").unwrap_err();
        let err = Error::Json {
            path: PathBuf::from("/etc/krx/config.json"),
            source,
        };
        assert_eq!(
            err.to_string(),
            "Failed to parse config from /etc/krx/config.json"
        );
        assert!(err.source().is_some());
    }
}
