//! Error types for confsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while loading configuration or descriptors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure, annotated with the offending path.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed descriptor TOML.
    #[error("cannot process template resource {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The descriptor has no `src` template.
    #[error("empty src template in {path}")]
    EmptySrc { path: PathBuf },

    /// The descriptor's `mode` is not octal, hex, or decimal.
    #[error("invalid file mode {0:?}")]
    InvalidMode(String),
}

/// Convenience constructor for [`ConfigError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
