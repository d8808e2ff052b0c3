//! Durable observation log
//!
//! ## Design
//!
//! - **Append-only**: records are never rewritten or deleted
//! - **Newline-delimited JSON**: one [`AggregatedSample`] per line
//! - **Best-effort**: write failures are logged by callers and skipped, the
//!   log is not a correctness-critical store for the current run
//!
//! No compaction or rotation is performed; retention belongs to the
//! surrounding deployment.

pub mod error;
pub mod log;
pub mod schema;

pub use error::{StorageError, StorageResult};
pub use log::DurableLog;
pub use schema::AggregatedSample;
