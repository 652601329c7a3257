//! SyncOrchestrator — trigger coalescing and the cycle state machine.
//!
//! `Idle → Syncing → (Success | Error) → Idle`. A trigger while a cycle is
//! running queues at most one follow-up cycle; every waiter that arrived
//! during the run shares that cycle's result. A failed cycle parks the
//! status in its error state and waits for the next trigger — there is no
//! retry loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{ProteeError, Result};
use crate::types::SyncStatus;

use super::manager::SyncManager;
use super::types::SyncReport;

type Waiter = oneshot::Sender<Result<SyncReport, String>>;

/// What the caller should do after checking the slot state.
enum TriggerAction {
    /// Idle — caller runs the cycle now.
    Run,
    /// A cycle is in flight — caller awaits the queued follow-up's result.
    Wait(oneshot::Receiver<Result<SyncReport, String>>),
}

struct Slot {
    syncing: bool,
    /// Waiters for the next cycle — they all share its result.
    queued: Vec<Waiter>,
    status: SyncStatus,
}

pub struct SyncOrchestrator {
    manager: Arc<SyncManager>,
    slot: Arc<Mutex<Slot>>,
    /// Set by `force_full_resync`; consumed right before the next cycle runs.
    reset_requested: Arc<AtomicBool>,
    disposed: Arc<AtomicBool>,
}

impl SyncOrchestrator {
    pub fn new(manager: Arc<SyncManager>) -> Self {
        Self {
            manager,
            slot: Arc::new(Mutex::new(Slot {
                syncing: false,
                queued: Vec::new(),
                status: SyncStatus::default(),
            })),
            reset_requested: Arc::new(AtomicBool::new(false)),
            disposed: Arc::new(AtomicBool::new(false)),
        }
    }

    // -----------------------------------------------------------------------
    // Public API
    // -----------------------------------------------------------------------

    /// Request a sync cycle. Coalesced: if a cycle is already running, this
    /// waits for the single queued follow-up instead of starting another.
    pub async fn trigger_sync(&self) -> Result<SyncReport> {
        self.check_disposed()?;

        let action = {
            let mut slot = self.slot.lock();
            if slot.syncing {
                let (tx, rx) = oneshot::channel();
                slot.queued.push(tx);
                TriggerAction::Wait(rx)
            } else {
                slot.syncing = true;
                slot.status.is_syncing = true;
                TriggerAction::Run
            }
        };

        match action {
            TriggerAction::Wait(rx) => {
                // Waiters only ever see Err on disposal (sender dropped or
                // an explicit rejection).
                return rx
                    .await
                    .map_err(|_| ProteeError::Disposed)?
                    .map_err(|_| ProteeError::Disposed);
            }
            TriggerAction::Run => {}
        }

        let report = self.run_one_cycle().await;

        // Collect waiters that arrived during the run. The slot stays
        // `Syncing` when a follow-up is owed, so a trigger landing in the
        // handoff window still coalesces instead of racing a second cycle.
        let queued = {
            let mut slot = self.slot.lock();
            let queued = std::mem::take(&mut slot.queued);
            if queued.is_empty() {
                slot.syncing = false;
                slot.status.is_syncing = false;
            }
            queued
        };

        if !queued.is_empty() {
            self.spawn_follow_up(queued);
        }

        Ok(report)
    }

    /// Clear all cursors, then sync. The next cycle re-derives local state
    /// entirely from the remote store.
    pub async fn force_full_resync(&self) -> Result<SyncReport> {
        self.reset_requested.store(true, Ordering::SeqCst);
        self.trigger_sync().await
    }

    /// Current status for the UI: `{ last_sync_time, is_syncing, sync_error }`.
    pub fn status(&self) -> SyncStatus {
        self.slot.lock().status.clone()
    }

    /// Reject queued waiters and refuse further triggers.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        let queued = {
            let mut slot = self.slot.lock();
            std::mem::take(&mut slot.queued)
        };
        for waiter in queued {
            let _ = waiter.send(Err("sync orchestrator disposed".to_string()));
        }
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn check_disposed(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(ProteeError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Run one cycle (honoring a pending cursor reset) and fold its outcome
    /// into the status surface.
    async fn run_one_cycle(&self) -> SyncReport {
        run_cycle_inner(
            &self.manager,
            &self.slot,
            &self.reset_requested,
        )
        .await
    }

    /// Run queued follow-up cycles on a background task. Waiters that arrive
    /// while a follow-up is running get one more cycle; the chain ends when
    /// a cycle finishes with nobody waiting.
    fn spawn_follow_up(&self, mut waiters: Vec<Waiter>) {
        let manager = self.manager.clone();
        let slot = self.slot.clone();
        let reset_requested = self.reset_requested.clone();
        let disposed = self.disposed.clone();

        // The slot is still `Syncing` — ownership of it passes to this task.
        tokio::spawn(async move {
            loop {
                if disposed.load(Ordering::SeqCst) {
                    let mut s = slot.lock();
                    s.syncing = false;
                    s.status.is_syncing = false;
                    drop(s);
                    for waiter in waiters {
                        let _ = waiter.send(Err("sync orchestrator disposed".to_string()));
                    }
                    return;
                }

                debug!(waiters = waiters.len(), "running coalesced sync cycle");
                let report = run_cycle_inner(&manager, &slot, &reset_requested).await;

                let next = {
                    let mut s = slot.lock();
                    let next = std::mem::take(&mut s.queued);
                    if next.is_empty() {
                        s.syncing = false;
                        s.status.is_syncing = false;
                    }
                    next
                };

                for waiter in waiters {
                    let _ = waiter.send(Ok(report.clone()));
                }

                if next.is_empty() {
                    return;
                }
                waiters = next;
            }
        });
    }
}

/// Shared cycle body for the inline run and the spawned follow-up task.
async fn run_cycle_inner(
    manager: &SyncManager,
    slot: &Mutex<Slot>,
    reset_requested: &AtomicBool,
) -> SyncReport {
    if reset_requested.swap(false, Ordering::SeqCst) {
        if let Err(e) = manager.store().reset_cursors() {
            let mut s = slot.lock();
            s.status.sync_error = Some(e.to_string());
            return SyncReport::default();
        }
    }

    let report = manager.run_cycle().await;

    let mut s = slot.lock();
    if report.has_cycle_failure() {
        s.status.sync_error = report.first_error().map(|e| e.to_string());
    } else {
        s.status.sync_error = None;
        s.status.last_sync_time = Some(Utc::now());
    }
    report
}
