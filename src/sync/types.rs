//! Sync wire types and the transport seam.
//!
//! `RemoteClient` is the app-provided network layer (the real app speaks to
//! its cloud backend under the current session); the engine only ever sees
//! this contract. Outbound payload field sets exclude device-local fields by
//! construction — the transport never receives them at all.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::types::{Collection, SyncId};

// ============================================================================
// RemoteClient — app-provided transport
// ============================================================================

#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Remote records for the authenticated user with
    /// `updated_at > since` (`None` = epoch, full history), ordered
    /// ascending by `updated_at`, at most `page_size` rows.
    async fn list_changed_since(
        &self,
        collection: Collection,
        since: Option<DateTime<Utc>>,
        page_size: usize,
    ) -> Result<RemotePage, TransportError>;

    /// Create or update one record. Creates (no `sync_id`) are acked with
    /// the server-assigned identity; updates are rejected as stale when the
    /// server copy is newer than `base_updated_at`.
    async fn upsert(
        &self,
        collection: Collection,
        record: &OutboundRecord,
    ) -> Result<UpsertAck, TransportError>;
}

/// Transport-level error. `kind` decides whether the cycle aborts.
#[derive(Debug, Clone)]
pub struct TransportError {
    pub message: String,
    pub kind: SyncErrorKind,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: SyncErrorKind::Transient,
        }
    }

    pub fn with_kind(message: impl Into<String>, kind: SyncErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TransportError {}

// ============================================================================
// Outbound / Inbound Types
// ============================================================================

/// Record being pushed to the server.
#[derive(Debug, Clone)]
pub struct OutboundRecord {
    /// Absent for the first push of a record (a create).
    pub sync_id: Option<SyncId>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    /// Synced fields only — device-local fields are stripped before this
    /// struct is built.
    pub payload: Value,
    /// The remote `updated_at` this device last observed, used by the server
    /// for stale detection. `None` for creates.
    pub base_updated_at: Option<DateTime<Utc>>,
}

/// Server acknowledgement for an upsert.
#[derive(Debug, Clone)]
pub enum UpsertAck {
    /// Create accepted; the server assigned the stable identity.
    Created { sync_id: SyncId, owner_id: String },
    /// Update accepted.
    Updated,
    /// The server copy is newer than `base_updated_at` — this device lost a
    /// race to another. Not an error: repull, then resolve.
    RejectedStale { remote_updated_at: DateTime<Utc> },
}

/// Record received from the server.
#[derive(Debug, Clone)]
pub struct RemoteRecord {
    pub sync_id: SyncId,
    pub owner_id: String,
    pub updated_at: DateTime<Utc>,
    /// Present when the record is a tombstone.
    pub deleted_at: Option<DateTime<Utc>>,
    pub payload: Value,
}

/// One page of a pull, ascending by `updated_at`. A page shorter than the
/// requested size marks the end of the backlog.
#[derive(Debug, Clone, Default)]
pub struct RemotePage {
    pub records: Vec<RemoteRecord>,
}

// ============================================================================
// Sync results
// ============================================================================

/// Which phase of sync an error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Pull,
    Push,
}

/// Classification of sync errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorKind {
    /// Retriable on the next cycle (network, temporary failures).
    Transient,
    /// Not retriable (malformed payload, validation).
    Permanent,
    /// Authentication failed — aborts the whole cycle.
    Auth,
}

/// A sync error event — collected in `SyncReport.errors`, never thrown.
#[derive(Debug, Clone)]
pub struct SyncErrorEvent {
    pub phase: SyncPhase,
    pub collection: Collection,
    pub sync_id: Option<SyncId>,
    pub error: String,
    pub kind: SyncErrorKind,
}

/// Aggregated result of a sync cycle (pull, push, or both).
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub pulled: usize,
    pub pushed: usize,
    /// Records where both sides had changed and last-write-wins decided.
    pub conflicts: usize,
    pub errors: Vec<SyncErrorEvent>,
}

impl SyncReport {
    pub fn merge(&mut self, other: SyncReport) {
        self.pulled += other.pulled;
        self.pushed += other.pushed;
        self.conflicts += other.conflicts;
        self.errors.extend(other.errors);
    }

    /// Whether a cycle-level failure occurred (transport, auth, storage —
    /// recorded without a `sync_id`). Record-level errors carry the record's
    /// `sync_id` and never abort the cycle.
    pub fn has_cycle_failure(&self) -> bool {
        self.errors.iter().any(|e| e.sync_id.is_none())
    }

    /// Summary for the status surface: the first error message, if any.
    pub fn first_error(&self) -> Option<&str> {
        self.errors.first().map(|e| e.error.as_str())
    }
}
