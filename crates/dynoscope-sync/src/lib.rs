//! Resource cache and reconciliation engine for dynoscope
//!
//! Consumes typed events from the log stream multiplexer and tracked-set
//! diffs from the outside, and keeps the per-application resource tree
//! (dynos, formations, add-ons) synchronized, falling back to authoritative
//! re-fetches when a log-referenced resource is not yet visible.

mod cache;
mod engine;
mod snapshot;

pub use cache::ResourceCache;
pub use engine::{
    ADDON_PASS_DEBOUNCE, FETCH_RETRY_ATTEMPTS, FETCH_RETRY_DELAY, SyncEngine,
};
pub use snapshot::{SnapshotError, SnapshotStore};

// Re-export types used in our public API
pub use dynoscope_types::{AppSetDiff, Change, StreamEvent, SyncPhase};
