//! Error types for confsync-renderer.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while rendering a template.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Parse or execution failure in the template engine.
    #[error("template error: {0}")]
    Template(#[from] tera::Error),

    /// Underlying I/O failure, annotated with the offending path.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A `c*` function could not decode an encrypted value.
    #[error("cannot decode secret value: {0}")]
    Decrypt(String),
}

/// Convenience constructor for [`RenderError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io {
        path: path.into(),
        source,
    }
}
