//! Process-environment backend driver.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::broadcast;

use confsync_core::{BackendError, StoreClient};

/// Serves keys from the process environment.
///
/// `/database/url` scans variables starting with `DATABASE_URL`; matching
/// variable names map back to lowercase `/`-separated keys.
#[derive(Debug, Default, Clone)]
pub struct EnvClient;

impl EnvClient {
    pub fn new() -> Self {
        Self
    }
}

fn env_name(key: &str) -> String {
    key.trim_start_matches('/').replace('/', "_").to_uppercase()
}

fn key_name(var: &str) -> String {
    format!("/{}", var.replace('_', "/")).to_lowercase()
}

#[async_trait]
impl StoreClient for EnvClient {
    fn watch_enabled(&self) -> bool {
        false
    }

    async fn get_values(&self, keys: &[String]) -> Result<HashMap<String, String>, BackendError> {
        let environ: Vec<(String, String)> = std::env::vars().collect();
        let mut vars = HashMap::new();
        for key in keys {
            let wanted = env_name(key);
            for (name, value) in &environ {
                if name.starts_with(&wanted) {
                    vars.insert(key_name(name), value.clone());
                }
            }
        }
        tracing::debug!(count = vars.len(), "pulled environment values");
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
