//! # confsync-core
//!
//! Domain types for the confsync engine:
//! - [`kvstore`] — the per-resource ordered key/value snapshot templates read from
//! - [`descriptor`] — `[template]` TOML descriptors, one per managed file
//! - [`config`] — static engine configuration and observer hooks
//! - [`client`] — the backend client contract ([`StoreClient`])
//! - [`error`] — [`ConfigError`]

pub mod client;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod kvstore;

pub use client::{append_prefix, BackendError, StoreClient};
pub use config::{Config, Hooks, DEFAULT_INTERVAL_SECS};
pub use descriptor::{parse_file_mode, TemplateDescriptor, TemplateResourceConfig};
pub use error::ConfigError;
pub use kvstore::{normalize_key, KvError, KvPair, KvStore};
