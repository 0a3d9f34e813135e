//! # confsync-renderer
//!
//! Tera template engine wired with the confsync function environment:
//! snapshot access (`exists`, `ls`, `lsdir`, `get`, `gets`, `getv`,
//! `getvs`), the utility set (`base`, `split`, `seq`, `base64Encode`, …),
//! and — when an OpenPGP private key is configured — the decrypting
//! variants (`cget`, `cgets`, `cgetv`, `cgetvs`).
//!
//! Snapshot pairs appear to templates as `{ key, value }` objects.

pub mod crypt;
pub mod engine;
pub mod error;
pub mod funcs;
pub mod kv;
pub mod secconf;

pub use engine::TemplateEngine;
pub use error::RenderError;
pub use kv::SharedStore;
