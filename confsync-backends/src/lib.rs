//! # confsync-backends
//!
//! Local backend drivers: the process environment ([`EnvClient`]) and a
//! TOML document ([`FileClient`]). Networked drivers implement
//! [`confsync_core::StoreClient`] the same way.

pub mod env;
pub mod file;

pub use env::EnvClient;
pub use file::FileClient;
