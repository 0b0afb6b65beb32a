//! Bookie Core — entry storage for a ledger storage node
//!
//! Entries are addressed by `(ledger_id, entry_id)` and stored in an engine
//! that journals every write. Durability is group-committed: many concurrent
//! `Storage::put` calls are covered by a single journal sync issued by one
//! background thread, and each caller observes its own `Completion`.
//!
//! # Architecture
//!
//! - **Apply**: `put` appends to the journal and updates the RAM index on the caller's thread
//! - **Commit**: the journal thread drains queued completions, syncs once, settles them all
//! - **Backpressure**: the completion queue is bounded; a full queue blocks writers
//! - **Throttle**: a rate source caps journal syncs per second
//! - **Checkpoint**: the index is snapshotted into the data directory so old journal files can go

pub mod checkpoint;
pub mod completion;
pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod journal;
pub mod key;
pub mod rate;
pub mod storage;

// Re-export key types for convenience
pub use completion::{completion_pair, Completion, Resolver};
pub use config::Config;
pub use engine::{EntryLogEngine, PersistentEngine};
pub use error::{StorageError, StorageResult};
pub use key::EntryKey;
pub use rate::{RateLimiter, RateSource, Unlimited};
pub use storage::{Storage, StorageStats};
