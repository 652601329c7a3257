//! SyncManager — one pull-then-push cycle across the synced collections.
//!
//! Pull always runs before push per collection, so a local edit that raced
//! against an incoming remote change is resolved against the latest remote
//! state before being uploaded. Errors are collected in `SyncReport` —
//! public methods never return `Err` for per-record problems; cycle-level
//! failures (transport, auth, storage) abort the cycle and surface through
//! the report.

use std::sync::Arc;

use tracing::{debug, error};

use crate::storage::LocalStore;
use crate::types::{Collection, RawRecord, SyncConfig};

use super::pull::PullEngine;
use super::push::PushEngine;
use super::types::{RemoteClient, RemoteRecord, SyncReport, TransportError};

pub struct SyncManager {
    store: Arc<LocalStore>,
    client: Arc<dyn RemoteClient>,
    config: SyncConfig,
}

impl SyncManager {
    pub fn new(store: Arc<LocalStore>, client: Arc<dyn RemoteClient>, config: SyncConfig) -> Self {
        Self {
            store,
            client,
            config,
        }
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Run one full sync cycle: pull then push, per collection.
    ///
    /// A push rejected as stale triggers one follow-up pull and one more
    /// push for that collection inside the same cycle — bounded, never a
    /// retry loop. A cycle-level failure stops the cycle; the next trigger
    /// resumes from the last durable cursor.
    pub async fn run_cycle(&self) -> SyncReport {
        let mut total = SyncReport::default();

        for collection in Collection::ALL {
            let pull = self.pull_engine();
            let push = self.push_engine();

            let report = pull.pull_collection(collection).await;
            if merge_and_check(&mut total, report) {
                error!(%collection, "sync cycle aborted during pull");
                return total;
            }

            let outcome = push.push_collection(collection).await;
            let needs_repull = outcome.needs_repull;
            if merge_and_check(&mut total, outcome.report) {
                error!(%collection, "sync cycle aborted during push");
                return total;
            }

            if needs_repull {
                debug!(%collection, "follow-up pull after stale rejection");
                let report = pull.pull_collection(collection).await;
                if merge_and_check(&mut total, report) {
                    return total;
                }
                let outcome = push.push_collection(collection).await;
                if merge_and_check(&mut total, outcome.report) {
                    return total;
                }
            }
        }

        debug!(
            pulled = total.pulled,
            pushed = total.pushed,
            conflicts = total.conflicts,
            errors = total.errors.len(),
            "sync cycle finished"
        );
        total
    }

    fn pull_engine(&self) -> PullEngine<'_> {
        PullEngine {
            store: &self.store,
            client: self.client.as_ref(),
            page_size: self.config.page_size,
        }
    }

    fn push_engine(&self) -> PushEngine<'_> {
        PushEngine {
            store: &self.store,
            client: self.client.as_ref(),
            batch_size: self.config.push_batch_size,
        }
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    /// Every local row of a collection, tombstones included.
    pub fn inspect_local(&self, collection: Collection) -> crate::error::Result<Vec<RawRecord>> {
        self.store.inspect_raw(collection)
    }

    /// Enumerate the remote store for the authenticated user from epoch.
    /// Read-only — no merge side effects, cursors untouched.
    pub async fn inspect_remote(
        &self,
        collection: Collection,
    ) -> Result<Vec<RemoteRecord>, TransportError> {
        let mut all = Vec::new();
        let mut since = None;
        loop {
            let page = self
                .client
                .list_changed_since(collection, since, self.config.page_size)
                .await?;
            let fetched = page.records.len();
            since = page.records.iter().map(|r| r.updated_at).max().or(since);
            all.extend(page.records);
            if fetched < self.config.page_size {
                return Ok(all);
            }
        }
    }
}

/// Fold a sub-report into the total; true means the cycle must stop.
fn merge_and_check(total: &mut SyncReport, report: SyncReport) -> bool {
    let failed = report.has_cycle_failure();
    total.merge(report);
    failed
}
