//! Error types for confsync-sync.

use std::path::PathBuf;

use thiserror::Error;

use confsync_core::{BackendError, ConfigError};
use confsync_renderer::RenderError;

use crate::command::CommandError;

/// All errors that can arise while processing a template resource.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed descriptor, empty `src`, unparsable mode.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Failure talking to the key/value backend.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Template parse or execution failure, including secret decoding.
    #[error("render error: {0}")]
    Render(#[from] RenderError),

    /// Filesystem failure, annotated with the offending path.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `check_cmd` exited non-zero; the destination was left untouched.
    #[error("config check failed: {0}")]
    CheckFailed(CommandError),

    /// `reload_cmd` exited non-zero; the destination was already updated.
    #[error("reload command failed: {0}")]
    ReloadFailed(CommandError),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
