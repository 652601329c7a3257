//! protee-sync — the local-first synchronization engine of the Protee
//! health tracker.
//!
//! The engine reconciles an on-device SQLite store with a remote store for
//! one authenticated user across several record collections: incremental
//! pull cursors, idempotent last-write-wins merge, soft-delete propagation,
//! and selective exclusion of device-local fields from sync. The app layer
//! provides the network transport ([`sync::types::RemoteClient`]) and reads
//! and writes through [`storage::LocalStore`]; sync being unavailable never
//! blocks local tracking.

pub mod error;
pub mod types;

pub mod records;
pub mod storage;
pub mod sync;

pub use error::{ProteeError, Result};
pub use storage::{LocalStore, SqliteBackend};
pub use sync::{SyncManager, SyncOrchestrator};
pub use types::{Collection, LocalId, SyncConfig, SyncId, SyncStatus};
