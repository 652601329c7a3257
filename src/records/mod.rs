//! Typed payloads for the synced collections.
//!
//! Each collection is a concrete struct tagged by [`Collection`] — the
//! envelope fields (ids, timestamps, tombstone) live in
//! [`crate::types::RawRecord`], the type-specific fields here. The sync
//! engine itself operates on untyped `serde_json::Value` payloads; these
//! types are the contract at the `LocalStore` API and the shape malformed
//! remote payloads are validated against.

mod food;
mod goal;
mod settings;
mod sleep;
mod training;

pub use food::{Confidence, EntrySource, FoodEntry};
pub use goal::DailyGoal;
pub use settings::{Theme, UserSettings};
pub use sleep::{SleepEntry, SleepQuality};
pub use training::{MuscleGroup, TrainingEntry};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::types::Collection;

/// Contract implemented by each concrete collection payload.
pub trait SyncedPayload:
    Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
    const COLLECTION: Collection;
}

impl SyncedPayload for FoodEntry {
    const COLLECTION: Collection = Collection::Food;
}

impl SyncedPayload for SleepEntry {
    const COLLECTION: Collection = Collection::Sleep;
}

impl SyncedPayload for TrainingEntry {
    const COLLECTION: Collection = Collection::Training;
}

impl SyncedPayload for DailyGoal {
    const COLLECTION: Collection = Collection::Goals;
}

impl SyncedPayload for UserSettings {
    const COLLECTION: Collection = Collection::Settings;
}

impl Collection {
    /// Check that a payload deserializes into this collection's type.
    /// Used by the pull path to skip malformed remote records.
    pub fn validate_payload(&self, payload: &Value) -> bool {
        fn check<P: DeserializeOwned>(v: &Value) -> bool {
            serde_json::from_value::<P>(v.clone()).is_ok()
        }
        match self {
            Collection::Food => check::<FoodEntry>(payload),
            Collection::Sleep => check::<SleepEntry>(payload),
            Collection::Training => check::<TrainingEntry>(payload),
            Collection::Goals => check::<DailyGoal>(payload),
            Collection::Settings => check::<UserSettings>(payload),
        }
    }
}

/// Remove this collection's device-local fields from a payload. Applied to
/// every outbound payload, and defensively to inbound ones.
pub fn strip_device_local(collection: Collection, payload: &mut Value) {
    if let Value::Object(map) = payload {
        for field in collection.device_local_fields() {
            map.remove(*field);
        }
    }
}

/// Carry device-local fields from the local copy into an incoming payload,
/// so a remote value can never overwrite them.
pub fn preserve_device_local(collection: Collection, local: &Value, incoming: &mut Value) {
    strip_device_local(collection, incoming);
    let (Value::Object(incoming_map), Value::Object(local_map)) = (incoming, local) else {
        return;
    };
    for field in collection.device_local_fields() {
        if let Some(v) = local_map.get(*field) {
            if !v.is_null() {
                incoming_map.insert((*field).to_string(), v.clone());
            }
        }
    }
}
