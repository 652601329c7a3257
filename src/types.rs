use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Identifier newtypes
// ============================================================================

/// Device-local identity — the SQLite rowid. Stable only within this device
/// and never sent remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalId(pub i64);

impl std::fmt::Display for LocalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Globally stable identity assigned by the server on first push. Once
/// assigned it never changes and is the only join key between devices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SyncId(pub String);

impl SyncId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SyncId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Collections
// ============================================================================

/// The synced collections. Each maps to its own table and carries the list
/// of payload fields that must never leave the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collection {
    Food,
    Sleep,
    Training,
    Goals,
    Settings,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Food,
        Collection::Sleep,
        Collection::Training,
        Collection::Goals,
        Collection::Settings,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            Collection::Food => "food_entries",
            Collection::Sleep => "sleep_entries",
            Collection::Training => "training_entries",
            Collection::Goals => "daily_goals",
            Collection::Settings => "user_settings",
        }
    }

    /// Payload fields excluded from both push and pull. They never appear in
    /// an outbound payload and are never assigned from an inbound one.
    pub fn device_local_fields(&self) -> &'static [&'static str] {
        match self {
            Collection::Settings => &["assistant_api_key"],
            _ => &[],
        }
    }

    /// The settings collection holds exactly one row per device.
    pub fn is_singleton(&self) -> bool {
        matches!(self, Collection::Settings)
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.table())
    }
}

// ============================================================================
// Record envelope
// ============================================================================

/// Collection-agnostic record envelope as held in storage. `payload` is the
/// serialized type-specific fields; the typed view lives in `records`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub local_id: LocalId,
    pub sync_id: Option<SyncId>,
    /// Server-enforced owner. Populated from pulls and create acks.
    pub owner_id: Option<String>,
    pub updated_at: DateTime<Utc>,
    /// Watermark: the `updated_at` value last confirmed as pushed.
    pub pushed_at: Option<DateTime<Utc>>,
    /// Presence marks a tombstone.
    pub deleted_at: Option<DateTime<Utc>>,
    pub payload: Value,
}

impl RawRecord {
    /// A record needs push when it has never been pushed or has local edits
    /// past the push watermark. Pure function of the envelope.
    pub fn is_dirty(&self) -> bool {
        match (&self.sync_id, self.pushed_at) {
            (None, _) => true,
            (Some(_), None) => true,
            (Some(_), Some(pushed)) => self.updated_at > pushed,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Typed view of a record, returned by the `LocalStore` read API.
#[derive(Debug, Clone)]
pub struct Stored<P> {
    pub local_id: LocalId,
    pub sync_id: Option<SyncId>,
    pub owner_id: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub payload: P,
}

// ============================================================================
// Timestamps
// ============================================================================

/// Fixed-width RFC 3339 format stored in SQLite. Lexicographic order on the
/// stored strings matches chronological order.
pub const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Next `updated_at` for a local write: strictly greater than the previous
/// value even if the wall clock has not advanced (or moved backwards).
pub fn bump_updated_at(prev: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match prev {
        Some(p) if now <= p => p + Duration::microseconds(1),
        _ => now,
    }
}

// ============================================================================
// Sync configuration & status
// ============================================================================

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Remote page size for incremental pull. Bounded so memory and request
    /// size stay constant regardless of history length.
    pub page_size: usize,
    /// Number of dirty records sent per push request.
    pub push_batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            push_batch_size: 50,
        }
    }
}

/// Status surface consumed by the UI layer.
#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    pub last_sync_time: Option<DateTime<Utc>>,
    pub is_syncing: bool,
    pub sync_error: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================
