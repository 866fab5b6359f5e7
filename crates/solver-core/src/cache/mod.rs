//! ============================================================================
//! Label Cache - Content-addressed picture labels
//! ============================================================================
//! Maps picture digests to the person's name, with reverse (name) and
//! first-letter indices kept consistent on every write.
//!
//! Persistence is tiered:
//! - JSON snapshot file (durable, atomically replaced on save)
//! - redb fast store (optional, batched, best-effort)
//! ============================================================================

pub mod fast_store;
pub mod index;
pub mod service;
pub mod snapshot;
pub mod storage;
pub mod types;

pub use fast_store::{FastStore, RedbFastStore};
pub use index::LabelIndex;
pub use service::LabelCache;
pub use snapshot::{parse_snapshot, JsonSnapshotStore, SnapshotStore};
pub use storage::LabelStorage;
pub use types::*;
