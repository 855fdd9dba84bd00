//! Append-only JSONL record store with rebuildable secondary indexes.
//!
//! Each record type gets its own collection file (one JSON object per line).
//! The store keeps a small in-memory index over a handful of fields declared
//! by `Record::indexed_fields`, rebuilt from disk on open. Writers append;
//! the latest line for a given id wins on replay.

mod error;
mod filter;
mod record;
mod store;

pub use error::StoreError;
pub use filter::{Filter, FilterOp, IndexValue};
pub use record::Record;
pub use store::Store;

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
