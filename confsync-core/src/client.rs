//! Backend client contract consumed by the engine.
//!
//! Concrete drivers (process environment, TOML file, networked stores)
//! implement [`StoreClient`]; the engine only sees this trait.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::kvstore::normalize_key;

/// Errors surfaced by backend drivers.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("{0}")]
    Other(String),
}

/// A key/value backend.
///
/// Keys are `/`-separated; values are opaque strings.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Whether [`StoreClient::watch_prefix`] is meaningful for this driver.
    fn watch_enabled(&self) -> bool;

    /// Bulk fetch. Every input key is a prefix scan; the union of all
    /// scans is returned. An empty result is not an error.
    async fn get_values(&self, keys: &[String]) -> Result<HashMap<String, String>, BackendError>;

    /// Block until a key under `prefix` whose full key also has one of
    /// `keys` as a prefix changes, or `stop` fires.
    ///
    /// `wait_index == 0` must return `1` immediately to force an initial
    /// pull. Drivers without watch support block on `stop` and return `0`
    /// when it fires. `stop` must cancel any in-flight network operation.
    async fn watch_prefix(
        &self,
        prefix: &str,
        keys: &[String],
        wait_index: u64,
        stop: &mut broadcast::Receiver<()>,
    ) -> Result<u64, BackendError>;
}

/// Join `prefix` onto each relative key, normalizing separators.
pub fn append_prefix(prefix: &str, keys: &[String]) -> Vec<String> {
    keys.iter()
        .map(|key| normalize_key(&format!("{prefix}/{key}")))
        .collect()
}
