//! PushEngine — upload local dirty records and confirm their `sync_id`.
//!
//! Each record's `updated_at` is snapshotted before the upsert; the push
//! confirmation only advances the `pushed_at` watermark to that snapshot,
//! so a record edited while its push was in flight stays dirty and goes out
//! again next cycle. A crash mid-push leaves records dirty, which is safe —
//! re-sending an unchanged record is a harmless no-op update.

use tracing::{debug, warn};

use crate::records::strip_device_local;
use crate::storage::LocalStore;
use crate::types::{Collection, RawRecord};

use super::types::{
    OutboundRecord, RemoteClient, SyncErrorEvent, SyncErrorKind, SyncPhase, SyncReport, UpsertAck,
};

/// Result of pushing one collection.
pub(crate) struct PushOutcome {
    pub report: SyncReport,
    /// A stale rejection could not be resolved locally — the collection
    /// needs a follow-up pull before the record can be re-pushed.
    pub needs_repull: bool,
}

pub(crate) struct PushEngine<'a> {
    pub store: &'a LocalStore,
    pub client: &'a dyn RemoteClient,
    pub batch_size: usize,
}

impl PushEngine<'_> {
    /// Push every dirty record of one collection.
    pub async fn push_collection(&self, collection: Collection) -> PushOutcome {
        let mut report = SyncReport::default();
        let mut needs_repull = false;

        let dirty = match self.store.dirty_records(collection) {
            Ok(d) => d,
            Err(e) => {
                report.errors.push(cycle_error(collection, &e.to_string()));
                return PushOutcome {
                    report,
                    needs_repull,
                };
            }
        };
        if dirty.is_empty() {
            return PushOutcome {
                report,
                needs_repull,
            };
        }

        let total = dirty.len();
        for batch in dirty.chunks(self.batch_size.max(1)) {
            for record in batch {
                // A record created and tombstoned before its first push was
                // never seen by any other device; there is nothing to
                // propagate.
                if record.sync_id.is_none() && record.is_tombstone() {
                    continue;
                }

                let snapshot = record.updated_at;
                let outbound = build_outbound(collection, record);

                let ack = match self.client.upsert(collection, &outbound).await {
                    Ok(ack) => ack,
                    Err(e) => {
                        // Stop this collection, keep partial progress.
                        report.errors.push(SyncErrorEvent {
                            phase: SyncPhase::Push,
                            collection,
                            sync_id: record.sync_id.clone(),
                            error: e.message,
                            kind: e.kind,
                        });
                        return PushOutcome {
                            report,
                            needs_repull,
                        };
                    }
                };

                match ack {
                    UpsertAck::Created { sync_id, owner_id } => {
                        match self.store.backend().mark_pushed(
                            collection,
                            record.local_id,
                            &sync_id,
                            Some(&owner_id),
                            snapshot,
                        ) {
                            Ok(()) => report.pushed += 1,
                            Err(e) => report.errors.push(record_error(
                                collection,
                                record,
                                &e.to_string(),
                            )),
                        }
                    }
                    UpsertAck::Updated => {
                        self.confirm_update(collection, record, snapshot, &mut report);
                    }
                    UpsertAck::RejectedStale { remote_updated_at } => {
                        // Lost a race to another device. If our edit is still
                        // the last write, resend against the version we just
                        // learned about; otherwise the newer remote version
                        // must be pulled and resolved first.
                        if snapshot >= remote_updated_at {
                            let retry = OutboundRecord {
                                base_updated_at: Some(remote_updated_at),
                                ..outbound
                            };
                            match self.client.upsert(collection, &retry).await {
                                Ok(UpsertAck::Updated) => {
                                    report.conflicts += 1;
                                    self.confirm_update(collection, record, snapshot, &mut report);
                                }
                                Ok(UpsertAck::Created { sync_id, owner_id }) => {
                                    // Defensive: a server that re-creates on
                                    // retry still hands back the identity.
                                    report.conflicts += 1;
                                    if let Err(e) = self.store.backend().mark_pushed(
                                        collection,
                                        record.local_id,
                                        &sync_id,
                                        Some(&owner_id),
                                        snapshot,
                                    ) {
                                        report.errors.push(record_error(
                                            collection,
                                            record,
                                            &e.to_string(),
                                        ));
                                    } else {
                                        report.pushed += 1;
                                    }
                                }
                                Ok(UpsertAck::RejectedStale { .. }) => {
                                    debug!(%collection, local_id = %record.local_id,
                                        "stale again after retry, deferring to pull");
                                    needs_repull = true;
                                }
                                Err(e) => {
                                    report.errors.push(SyncErrorEvent {
                                        phase: SyncPhase::Push,
                                        collection,
                                        sync_id: record.sync_id.clone(),
                                        error: e.message,
                                        kind: e.kind,
                                    });
                                    return PushOutcome {
                                        report,
                                        needs_repull,
                                    };
                                }
                            }
                        } else {
                            debug!(%collection, local_id = %record.local_id,
                                "remote is newer, deferring to pull");
                            needs_repull = true;
                        }
                    }
                }
            }
            debug!(%collection, pushed = report.pushed, total, "push progress");
        }

        PushOutcome {
            report,
            needs_repull,
        }
    }

    fn confirm_update(
        &self,
        collection: Collection,
        record: &RawRecord,
        snapshot: chrono::DateTime<chrono::Utc>,
        report: &mut SyncReport,
    ) {
        // An update ack implies the record already had its identity.
        let Some(sync_id) = record.sync_id.as_ref() else {
            warn!(%collection, local_id = %record.local_id, "update ack for record without sync_id");
            return;
        };
        match self.store.backend().mark_pushed(
            collection,
            record.local_id,
            sync_id,
            None,
            snapshot,
        ) {
            Ok(()) => report.pushed += 1,
            Err(e) => report
                .errors
                .push(record_error(collection, record, &e.to_string())),
        }
    }
}

/// Build the wire form of a dirty record. Device-local fields are stripped
/// here, before the transport ever sees the payload.
pub(crate) fn build_outbound(collection: Collection, record: &RawRecord) -> OutboundRecord {
    let mut payload = record.payload.clone();
    strip_device_local(collection, &mut payload);
    OutboundRecord {
        sync_id: record.sync_id.clone(),
        updated_at: record.updated_at,
        deleted_at: record.deleted_at,
        payload,
        base_updated_at: record.pushed_at,
    }
}

fn cycle_error(collection: Collection, error: &str) -> SyncErrorEvent {
    SyncErrorEvent {
        phase: SyncPhase::Push,
        collection,
        sync_id: None,
        error: error.to_string(),
        kind: SyncErrorKind::Transient,
    }
}

fn record_error(collection: Collection, record: &RawRecord, error: &str) -> SyncErrorEvent {
    SyncErrorEvent {
        phase: SyncPhase::Push,
        collection,
        sync_id: record.sync_id.clone(),
        error: error.to_string(),
        kind: SyncErrorKind::Transient,
    }
}
