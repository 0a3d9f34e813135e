//! TOML-file backend driver.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::broadcast;

use confsync_core::{BackendError, StoreClient};

/// Serves values from a single TOML document.
///
/// Nested tables flatten into `/`-separated keys: `[db] port = 5432`
/// becomes `/db/port = "5432"`; arrays index their elements.
#[derive(Debug, Clone)]
pub struct FileClient {
    path: PathBuf,
}

impl FileClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<HashMap<String, String>, BackendError> {
        let contents = std::fs::read_to_string(&self.path)?;
        let document: toml::Value = contents.parse().map_err(|err: toml::de::Error| {
            BackendError::Other(format!(
                "cannot parse backend file {}: {err}",
                self.path.display()
            ))
        })?;

        let mut vars = HashMap::new();
        flatten("", &document, &mut vars);
        Ok(vars)
    }
}

fn flatten(prefix: &str, value: &toml::Value, out: &mut HashMap<String, String>) {
    match value {
        toml::Value::Table(table) => {
            for (name, child) in table {
                flatten(&format!("{prefix}/{name}"), child, out);
            }
        }
        toml::Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                flatten(&format!("{prefix}/{index}"), child, out);
            }
        }
        toml::Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

#[async_trait]
impl StoreClient for FileClient {
    fn watch_enabled(&self) -> bool {
        false
    }

    async fn get_values(&self, keys: &[String]) -> Result<HashMap<String, String>, BackendError> {
        let all = self.load()?;
        let mut vars = HashMap::new();
        for key in keys {
            for (name, value) in &all {
                if name.starts_with(key.as_str()) {
                    vars.insert(name.clone(), value.clone());
                }
            }
        }
        tracing::debug!(path = %self.path.display(), count = vars.len(), "pulled file values");
        Ok(vars)
    }

    async fn watch_prefix(
        &self,
        _prefix: &str,
        _keys: &[String],
        _wait_index: u64,
        stop: &mut broadcast::Receiver<()>,
    ) -> Result<u64, BackendError> {
        let _ = stop.recv().await;
        Ok(0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
