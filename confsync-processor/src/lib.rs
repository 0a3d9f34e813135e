//! # confsync-processor
//!
//! The processor owns every template resource and drives the render
//! pipeline in one of three modes: a single pass (onetime), a periodic
//! timer (interval), or one long-lived watcher per resource reacting to
//! backend changes (watch). Shutdown is cooperative: a broadcast signal
//! fans out to every watcher and `stop` waits for them to drain.

mod processor;

pub use processor::Processor;
