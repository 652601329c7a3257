//! Remote change decision logic — conflict resolution and tombstone
//! application for the pull path.
//!
//! `resolve_remote` is a pure function of `(local, remote)` keyed by
//! `sync_id`, which is what makes pull idempotent: re-applying an
//! already-applied record resolves to `Skip`.
//!
//! Policy is whole-record last-write-wins by `updated_at`. On an exact tie
//! the remote wins only when the local record has no unpushed edits; a
//! device never silently discards a change the user made. Device-local
//! fields are preserved from the local copy regardless of which side wins.

use serde_json::Value;

use crate::records::{preserve_device_local, strip_device_local};
use crate::types::{Collection, LocalId, RawRecord};

use super::types::RemoteRecord;

// ============================================================================
// Decision Types
// ============================================================================

/// The action the pull engine should take for one remote record.
#[derive(Debug)]
pub enum MergeDecision {
    /// No local record with this `sync_id` — insert the remote version.
    Insert(RawRecord),
    /// Remote wins — replace the local row (tombstone application and
    /// undelete both land here; `deleted_at` comes from the remote).
    Update(RawRecord),
    /// Already applied (same `sync_id`, same `updated_at`, no local edits)
    /// or remote is stale — nothing to do.
    Skip,
    /// Local wins the conflict — the local row is left untouched and stays
    /// dirty, so the next push uploads it.
    KeepLocal,
}

/// Decision plus whether both sides had changed (for cycle reporting).
#[derive(Debug)]
pub struct MergeOutcome {
    pub decision: MergeDecision,
    pub conflicted: bool,
}

// ============================================================================
// Decision Matrix
// ============================================================================

/// Decide what to do with a remote record given the local state.
///
/// The remote payload must already be sanitized via [`sanitize_remote`];
/// this function additionally preserves the local copy's device-local
/// fields when the remote wins.
pub fn resolve_remote(
    collection: Collection,
    local: Option<&RawRecord>,
    remote: &RemoteRecord,
) -> MergeOutcome {
    let Some(local) = local else {
        // Fresh record (or tombstone) from another device.
        let mut payload = remote.payload.clone();
        strip_device_local(collection, &mut payload);
        return MergeOutcome {
            decision: MergeDecision::Insert(remote_as_row(remote, payload)),
            conflicted: false,
        };
    };

    if remote.updated_at > local.updated_at {
        // Remote newer — last write wins. Covers tombstone propagation and
        // the legitimate undelete (newer remote with `deleted_at` absent).
        let mut payload = remote.payload.clone();
        preserve_device_local(collection, &local.payload, &mut payload);
        let mut row = remote_as_row(remote, payload);
        row.local_id = local.local_id;
        MergeOutcome {
            decision: MergeDecision::Update(row),
            conflicted: local.is_dirty(),
        }
    } else if remote.updated_at < local.updated_at {
        if local.is_dirty() {
            // Local edit raced ahead; it uploads on the next push.
            MergeOutcome {
                decision: MergeDecision::KeepLocal,
                conflicted: true,
            }
        } else {
            // Re-applied history from an earlier cursor.
            MergeOutcome {
                decision: MergeDecision::Skip,
                conflicted: false,
            }
        }
    } else {
        // Exact timestamp tie.
        if local.is_dirty() {
            MergeOutcome {
                decision: MergeDecision::KeepLocal,
                conflicted: true,
            }
        } else {
            // Same version already applied — idempotent re-apply.
            MergeOutcome {
                decision: MergeDecision::Skip,
                conflicted: false,
            }
        }
    }
}

/// Strip device-local fields from an inbound payload. They should never be
/// present, but a misbehaving server must not be able to plant them.
pub fn sanitize_remote(collection: Collection, remote: &mut RemoteRecord) {
    strip_device_local(collection, &mut remote.payload);
}

/// Build a local row from a remote record. The row is clean: `pushed_at`
/// equals the remote `updated_at`, so it is not picked up by the next push.
fn remote_as_row(remote: &RemoteRecord, payload: Value) -> RawRecord {
    RawRecord {
        local_id: LocalId(0), // assigned on insert, overridden on update
        sync_id: Some(remote.sync_id.clone()),
        owner_id: Some(remote.owner_id.clone()),
        updated_at: remote.updated_at,
        pushed_at: Some(remote.updated_at),
        deleted_at: remote.deleted_at,
        payload,
    }
}

// ============================================================================
// Tests
// ============================================================================
