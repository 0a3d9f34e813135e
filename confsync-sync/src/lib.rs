//! # confsync-sync
//!
//! The per-resource render pipeline: pull the watched keys into the
//! snapshot, render the template, stage next to the destination, validate
//! with the check command, and swap atomically. [`TemplateResource`] is
//! the unit the processor drives.

pub mod command;
pub mod error;
pub mod resource;

pub use error::SyncError;
pub use resource::TemplateResource;
