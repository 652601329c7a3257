//! PullEngine — bring remote changes into the local store.
//!
//! Pages ascending by `updated_at` from the per-collection cursor. Each
//! page's row writes and the cursor advance commit in one backend
//! transaction, so a crash between them is impossible: either the whole
//! page applied and the cursor moved, or neither. Re-running a page is
//! safe because the merge is idempotent.

use tracing::{debug, warn};

use crate::storage::LocalStore;
use crate::types::{Collection, RawRecord};

use super::merge::{resolve_remote, sanitize_remote, MergeDecision};
use super::types::{
    RemoteClient, RemoteRecord, SyncErrorEvent, SyncErrorKind, SyncPhase, SyncReport,
};

pub(crate) struct PullEngine<'a> {
    pub store: &'a LocalStore,
    pub client: &'a dyn RemoteClient,
    pub page_size: usize,
}

impl PullEngine<'_> {
    /// Pull one collection to the end of its backlog.
    pub async fn pull_collection(&self, collection: Collection) -> SyncReport {
        let mut report = SyncReport::default();

        loop {
            let since = match self.store.cursor(collection) {
                Ok(c) => c,
                Err(e) => {
                    report.errors.push(cycle_error(collection, &e.to_string()));
                    return report;
                }
            };

            let page = match self
                .client
                .list_changed_since(collection, since, self.page_size)
                .await
            {
                Ok(p) => p,
                Err(e) => {
                    // Cursor untouched — the next cycle resumes from here.
                    report.errors.push(SyncErrorEvent {
                        phase: SyncPhase::Pull,
                        collection,
                        sync_id: None,
                        error: e.message,
                        kind: e.kind,
                    });
                    return report;
                }
            };

            let fetched = page.records.len();
            debug!(%collection, fetched, "pulled page");

            // The cursor target: every record in the page counts, including
            // ones we skip, so a malformed record cannot wedge the backlog.
            let max_seen = page.records.iter().map(|r| r.updated_at).max();

            let mut decisions: Vec<(MergeDecision, bool)> = Vec::with_capacity(fetched);
            for mut remote in page.records {
                sanitize_remote(collection, &mut remote);

                if remote.deleted_at.is_none() && !collection.validate_payload(&remote.payload) {
                    warn!(%collection, sync_id = %remote.sync_id, "skipping malformed remote payload");
                    report.errors.push(SyncErrorEvent {
                        phase: SyncPhase::Pull,
                        collection,
                        sync_id: Some(remote.sync_id.clone()),
                        error: "malformed remote payload".to_string(),
                        kind: SyncErrorKind::Permanent,
                    });
                    continue;
                }

                let local = match self.lookup_local(collection, &remote) {
                    Ok(l) => l,
                    Err(e) => {
                        report.errors.push(cycle_error(collection, &e.to_string()));
                        return report;
                    }
                };

                let outcome = resolve_remote(collection, local.as_ref(), &remote);

                // Singleton adoption: when the local settings row predates its
                // first sync and wins the merge, it must still take over the
                // remote identity so the next push updates instead of
                // creating a second remote row.
                if let (MergeDecision::KeepLocal, Some(l)) = (&outcome.decision, &local) {
                    if collection.is_singleton() && l.sync_id.is_none() {
                        let adopted = RawRecord {
                            sync_id: Some(remote.sync_id.clone()),
                            owner_id: Some(remote.owner_id.clone()),
                            ..l.clone()
                        };
                        decisions.push((MergeDecision::Update(adopted), outcome.conflicted));
                        continue;
                    }
                }

                decisions.push((outcome.decision, outcome.conflicted));
            }

            // Durable apply: rows and cursor in the same transaction.
            let advanced = max_seen.map_or(false, |m| since.map_or(true, |s| m > s));
            let mut applied = 0usize;
            let mut conflicts = 0usize;
            let backend = self.store.backend();
            let commit = backend.transaction(|b| {
                for (decision, conflicted) in &decisions {
                    match decision {
                        MergeDecision::Insert(row) => {
                            b.insert_raw(collection, row)?;
                            applied += 1;
                        }
                        MergeDecision::Update(row) => {
                            b.update_raw(collection, row)?;
                            applied += 1;
                        }
                        MergeDecision::Skip | MergeDecision::KeepLocal => {}
                    }
                    if *conflicted {
                        conflicts += 1;
                    }
                }
                if advanced {
                    // max_seen is Some whenever advanced is true.
                    b.set_cursor(collection, max_seen.expect("non-empty page"))?;
                }
                Ok(())
            });

            if let Err(e) = commit {
                // Rolled back: rows and cursor both unchanged.
                report.errors.push(cycle_error(collection, &e.to_string()));
                return report;
            }

            report.pulled += applied;
            report.conflicts += conflicts;

            // Stop on the short page that ends the backlog, and refuse to
            // spin if a full page failed to advance the cursor.
            if fetched < self.page_size || !advanced {
                break;
            }
        }

        report
    }

    /// Find the local counterpart of a remote record. Joins on `sync_id`
    /// only; for the settings singleton, a never-synced local row is the
    /// counterpart even without one.
    fn lookup_local(
        &self,
        collection: Collection,
        remote: &RemoteRecord,
    ) -> crate::error::Result<Option<RawRecord>> {
        if let Some(local) = self.store.find_by_sync_id(collection, &remote.sync_id)? {
            return Ok(Some(local));
        }
        if collection.is_singleton() {
            let first = self
                .store
                .backend()
                .scan_raw(collection, true)?
                .into_iter()
                .next();
            if let Some(row) = first {
                if row.sync_id.is_none() {
                    return Ok(Some(row));
                }
            }
        }
        Ok(None)
    }
}

fn cycle_error(collection: Collection, error: &str) -> SyncErrorEvent {
    SyncErrorEvent {
        phase: SyncPhase::Pull,
        collection,
        sync_id: None,
        error: error.to_string(),
        kind: SyncErrorKind::Transient,
    }
}
