//! LocalStore — typed facade over the SQLite backend.
//!
//! Source of truth for the UI. Every write bumps `updated_at` past the
//! previous value, which is what makes the record dirty for the next push
//! (the change tracker is a pure query over the watermark — no flags to
//! maintain). Active-record reads always filter tombstones.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use crate::error::{ProteeError, Result, StorageError};
use crate::records::{DailyGoal, SyncedPayload, UserSettings};
use crate::types::{bump_updated_at, Collection, LocalId, RawRecord, Stored, SyncId};

use super::sqlite::SqliteBackend;

pub struct LocalStore {
    backend: SqliteBackend,
}

impl LocalStore {
    /// Wrap an initialized backend.
    pub fn new(backend: SqliteBackend) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &SqliteBackend {
        &self.backend
    }

    // -----------------------------------------------------------------------
    // Conversions
    // -----------------------------------------------------------------------

    fn to_stored<P: SyncedPayload>(raw: RawRecord) -> Result<Stored<P>> {
        let payload = serde_json::from_value(raw.payload).map_err(|e| {
            ProteeError::Storage(StorageError::Corruption {
                collection: P::COLLECTION.table().to_string(),
                local_id: raw.local_id.0,
                field: "payload".to_string(),
                source: Box::new(e),
            })
        })?;
        Ok(Stored {
            local_id: raw.local_id,
            sync_id: raw.sync_id,
            owner_id: raw.owner_id,
            updated_at: raw.updated_at,
            deleted_at: raw.deleted_at,
            payload,
        })
    }

    fn to_value<P: SyncedPayload>(payload: &P) -> Result<Value> {
        serde_json::to_value(payload)
            .map_err(|e| ProteeError::Internal(format!("serialize payload: {e}")))
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Create a record. It has no `sync_id` yet and is therefore dirty.
    pub fn insert<P: SyncedPayload>(&self, payload: &P) -> Result<Stored<P>> {
        self.insert_at(payload, Utc::now())
    }

    /// `insert` with an explicit clock (for deterministic tests).
    pub fn insert_at<P: SyncedPayload>(
        &self,
        payload: &P,
        now: DateTime<Utc>,
    ) -> Result<Stored<P>> {
        let raw = RawRecord {
            local_id: LocalId(0), // assigned by the backend
            sync_id: None,
            owner_id: None,
            updated_at: bump_updated_at(None, now),
            pushed_at: None,
            deleted_at: None,
            payload: Self::to_value(payload)?,
        };
        let local_id = self.backend.insert_raw(P::COLLECTION, &raw)?;
        Ok(Stored {
            local_id,
            sync_id: None,
            owner_id: None,
            updated_at: raw.updated_at,
            deleted_at: None,
            payload: payload.clone(),
        })
    }

    /// Replace a record's payload, bumping `updated_at` strictly past the
    /// previous value. Tombstoned records are not updatable.
    pub fn update<P: SyncedPayload>(&self, local_id: LocalId, payload: &P) -> Result<Stored<P>> {
        self.update_at(local_id, payload, Utc::now())
    }

    /// `update` with an explicit clock (for deterministic tests).
    pub fn update_at<P: SyncedPayload>(
        &self,
        local_id: LocalId,
        payload: &P,
        now: DateTime<Utc>,
    ) -> Result<Stored<P>> {
        let not_found = || {
            ProteeError::Storage(StorageError::NotFound {
                collection: P::COLLECTION.table().to_string(),
                local_id: local_id.0,
            })
        };
        let existing = self
            .backend
            .get_raw(P::COLLECTION, local_id)?
            .ok_or_else(not_found)?;
        if existing.is_tombstone() {
            return Err(not_found());
        }

        let updated = RawRecord {
            updated_at: bump_updated_at(Some(existing.updated_at), now),
            payload: Self::to_value(payload)?,
            ..existing
        };
        self.backend.update_raw(P::COLLECTION, &updated)?;
        Self::to_stored(updated)
    }

    /// Soft delete: set `deletedAt`, bump `updatedAt`, keep the row so the
    /// deletion can propagate. Idempotent.
    pub fn soft_delete(&self, collection: Collection, local_id: LocalId) -> Result<()> {
        self.soft_delete_at(collection, local_id, Utc::now())
    }

    /// `soft_delete` with an explicit clock (for deterministic tests).
    pub fn soft_delete_at(
        &self,
        collection: Collection,
        local_id: LocalId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let existing = self.backend.get_raw(collection, local_id)?.ok_or_else(|| {
            ProteeError::Storage(StorageError::NotFound {
                collection: collection.table().to_string(),
                local_id: local_id.0,
            })
        })?;
        if existing.is_tombstone() {
            return Ok(());
        }
        let updated_at = bump_updated_at(Some(existing.updated_at), now);
        let tombstone = RawRecord {
            updated_at,
            deleted_at: Some(updated_at),
            ..existing
        };
        self.backend.update_raw(collection, &tombstone)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Fetch one active record. Tombstones read as absent.
    pub fn get<P: SyncedPayload>(&self, local_id: LocalId) -> Result<Option<Stored<P>>> {
        match self.backend.get_raw(P::COLLECTION, local_id)? {
            Some(raw) if !raw.is_tombstone() => Self::to_stored(raw).map(Some),
            _ => Ok(None),
        }
    }

    /// All active records of a collection.
    pub fn list_active<P: SyncedPayload>(&self) -> Result<Vec<Stored<P>>> {
        self.backend
            .scan_raw(P::COLLECTION, false)?
            .into_iter()
            .map(Self::to_stored)
            .collect()
    }

    /// Active records for one calendar date.
    pub fn entries_for_date<P: SyncedPayload>(&self, date: NaiveDate) -> Result<Vec<Stored<P>>> {
        self.backend
            .scan_by_date_raw(P::COLLECTION, date)?
            .into_iter()
            .map(Self::to_stored)
            .collect()
    }

    /// Active records for an inclusive date range.
    pub fn entries_in_range<P: SyncedPayload>(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Stored<P>>> {
        self.backend
            .scan_date_range_raw(P::COLLECTION, start, end)?
            .into_iter()
            .map(Self::to_stored)
            .collect()
    }

    // -----------------------------------------------------------------------
    // Daily goals
    // -----------------------------------------------------------------------

    pub fn goal_for_date(&self, date: NaiveDate) -> Result<Option<Stored<DailyGoal>>> {
        Ok(self.entries_for_date::<DailyGoal>(date)?.into_iter().next())
    }

    /// Upsert the goal for a date: one goal row per day.
    pub fn set_goal_for_date(&self, date: NaiveDate, protein_grams: f64) -> Result<Stored<DailyGoal>> {
        let goal = DailyGoal {
            date,
            protein_grams,
        };
        match self.goal_for_date(date)? {
            Some(existing) => self.update(existing.local_id, &goal),
            None => self.insert(&goal),
        }
    }

    // -----------------------------------------------------------------------
    // Settings singleton
    // -----------------------------------------------------------------------

    /// The settings row, if one has been created on this device.
    pub fn settings(&self) -> Result<Option<Stored<UserSettings>>> {
        Ok(self
            .backend
            .scan_raw(Collection::Settings, false)?
            .into_iter()
            .next()
            .map(Self::to_stored)
            .transpose()?)
    }

    /// Create or replace the settings singleton.
    pub fn put_settings(&self, settings: &UserSettings) -> Result<Stored<UserSettings>> {
        match self.settings()? {
            Some(existing) => self.update(existing.local_id, settings),
            None => self.insert(settings),
        }
    }

    // -----------------------------------------------------------------------
    // Change tracker
    // -----------------------------------------------------------------------

    /// Records requiring push: no `sync_id`, or `updated_at` past the last
    /// confirmed push watermark. Pure query, no side effects.
    pub fn dirty_records(&self, collection: Collection) -> Result<Vec<RawRecord>> {
        self.backend.scan_dirty_raw(collection)
    }

    // -----------------------------------------------------------------------
    // Sync metadata
    // -----------------------------------------------------------------------

    pub fn cursor(&self, collection: Collection) -> Result<Option<DateTime<Utc>>> {
        self.backend.get_cursor(collection)
    }

    pub fn reset_cursors(&self) -> Result<()> {
        self.backend.reset_cursors()
    }

    /// User-initiated "clear all data": wipes every table and resets every
    /// cursor so the next sync re-derives local state from the cloud instead
    /// of re-uploading deletions.
    pub fn wipe_all(&self) -> Result<()> {
        self.backend.wipe_all()
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    /// Every row of a collection, tombstones included. Debug/inspection only.
    pub fn inspect_raw(&self, collection: Collection) -> Result<Vec<RawRecord>> {
        self.backend.scan_raw(collection, true)
    }

    /// Look up a record by sync id (tombstones included).
    pub fn find_by_sync_id(
        &self,
        collection: Collection,
        sync_id: &SyncId,
    ) -> Result<Option<RawRecord>> {
        self.backend.get_by_sync_id(collection, sync_id)
    }
}
