//! LocalStore tests — typed CRUD, tombstones, singleton settings, dirty
//! tracking.

use protee_sync::error::{ProteeError, StorageError};
use protee_sync::records::{
    Confidence, DailyGoal, EntrySource, FoodEntry, SleepEntry, UserSettings,
};
use protee_sync::Collection;

use crate::common::{make_store, ts};

fn food(day: &str, grams: f64) -> FoodEntry {
    FoodEntry {
        date: day.parse().unwrap(),
        source: EntrySource::Manual,
        food_name: "Chicken".to_string(),
        protein_grams: grams,
        confidence: Confidence::High,
        image_data: None,
    }
}

#[test]
fn insert_creates_a_dirty_record() {
    let store = make_store();
    let stored = store.insert(&food("2026-08-01", 30.0)).expect("insert");
    assert!(stored.sync_id.is_none(), "no sync_id until first push");

    let dirty = store.dirty_records(Collection::Food).expect("dirty");
    assert_eq!(dirty.len(), 1);
    assert_eq!(dirty[0].local_id, stored.local_id);
}

#[test]
fn get_returns_the_typed_payload() {
    let store = make_store();
    let stored = store.insert(&food("2026-08-01", 30.0)).expect("insert");
    let got = store
        .get::<FoodEntry>(stored.local_id)
        .expect("get")
        .expect("some");
    assert_eq!(got.payload, food("2026-08-01", 30.0));
}

#[test]
fn update_strictly_bumps_updated_at_even_on_a_stuck_clock() {
    let store = make_store();
    let stored = store
        .insert_at(&food("2026-08-01", 30.0), ts(10))
        .expect("insert");
    // Same wall-clock instant: updated_at must still advance.
    let updated = store
        .update_at(stored.local_id, &food("2026-08-01", 40.0), ts(10))
        .expect("update");
    assert!(updated.updated_at > stored.updated_at);
}

#[test]
fn soft_delete_keeps_the_row_and_hides_it() {
    let store = make_store();
    let stored = store
        .insert_at(&food("2026-08-01", 30.0), ts(10))
        .expect("insert");
    store
        .soft_delete_at(Collection::Food, stored.local_id, ts(11))
        .expect("delete");

    // Hidden from active reads.
    assert!(store
        .get::<FoodEntry>(stored.local_id)
        .expect("get")
        .is_none());
    assert!(store.list_active::<FoodEntry>().expect("list").is_empty());

    // Row retained, tombstoned, updated_at bumped past the create.
    let raw = &store.inspect_raw(Collection::Food).expect("inspect")[0];
    assert!(raw.is_tombstone());
    assert_eq!(raw.deleted_at, Some(raw.updated_at));
    assert!(raw.updated_at > ts(10));
    assert!(raw.is_dirty(), "the deletion itself must propagate");
}

#[test]
fn soft_delete_is_idempotent() {
    let store = make_store();
    let stored = store
        .insert_at(&food("2026-08-01", 30.0), ts(10))
        .expect("insert");
    store
        .soft_delete_at(Collection::Food, stored.local_id, ts(11))
        .expect("delete");
    let first = store.inspect_raw(Collection::Food).expect("inspect")[0].clone();

    store
        .soft_delete_at(Collection::Food, stored.local_id, ts(12))
        .expect("redelete");
    let second = &store.inspect_raw(Collection::Food).expect("inspect")[0];
    assert_eq!(second.updated_at, first.updated_at, "no-op on a tombstone");
}

#[test]
fn updating_a_tombstone_is_not_found() {
    let store = make_store();
    let stored = store.insert(&food("2026-08-01", 30.0)).expect("insert");
    store
        .soft_delete(Collection::Food, stored.local_id)
        .expect("delete");
    let err = store
        .update(stored.local_id, &food("2026-08-01", 50.0))
        .unwrap_err();
    assert!(matches!(
        err,
        ProteeError::Storage(StorageError::NotFound { .. })
    ));
}

#[test]
fn date_reads_filter_by_payload_date() {
    let store = make_store();
    store.insert(&food("2026-08-01", 10.0)).expect("insert");
    store.insert(&food("2026-08-02", 20.0)).expect("insert");
    store.insert(&food("2026-08-04", 40.0)).expect("insert");

    let day = store
        .entries_for_date::<FoodEntry>("2026-08-02".parse().unwrap())
        .expect("day");
    assert_eq!(day.len(), 1);
    assert_eq!(day[0].payload.protein_grams, 20.0);

    let range = store
        .entries_in_range::<FoodEntry>(
            "2026-08-01".parse().unwrap(),
            "2026-08-02".parse().unwrap(),
        )
        .expect("range");
    assert_eq!(range.len(), 2);
}

#[test]
fn goal_for_date_upserts_a_single_row() {
    let store = make_store();
    store
        .set_goal_for_date("2026-08-01".parse().unwrap(), 150.0)
        .expect("set");
    store
        .set_goal_for_date("2026-08-01".parse().unwrap(), 180.0)
        .expect("reset");

    let all = store.list_active::<DailyGoal>().expect("list");
    assert_eq!(all.len(), 1, "one goal row per day");
    assert_eq!(all[0].payload.protein_grams, 180.0);
}

#[test]
fn settings_is_a_singleton() {
    let store = make_store();
    assert!(store.settings().expect("settings").is_none());

    store
        .put_settings(&UserSettings::default())
        .expect("create");
    let mut custom = UserSettings::default();
    custom.default_goal = 200.0;
    custom.assistant_api_key = Some("sk-local".to_string());
    store.put_settings(&custom).expect("update");

    let rows = store.inspect_raw(Collection::Settings).expect("inspect");
    assert_eq!(rows.len(), 1, "put_settings must never create a second row");
    let settings = store.settings().expect("settings").expect("some");
    assert_eq!(settings.payload.default_goal, 200.0);
    assert_eq!(settings.payload.assistant_api_key.as_deref(), Some("sk-local"));
}

#[test]
fn dirty_query_has_no_side_effects() {
    let store = make_store();
    store.insert(&SleepEntry {
        date: "2026-08-01".parse().unwrap(),
        duration_minutes: 480,
        quality: None,
    })
    .expect("insert");

    let first = store.dirty_records(Collection::Sleep).expect("dirty");
    let second = store.dirty_records(Collection::Sleep).expect("dirty");
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1, "querying must not consume dirtiness");
}

#[test]
fn wipe_all_leaves_an_empty_store() {
    let store = make_store();
    store.insert(&food("2026-08-01", 30.0)).expect("insert");
    store
        .put_settings(&UserSettings::default())
        .expect("settings");

    store.wipe_all().expect("wipe");

    assert!(store.list_active::<FoodEntry>().expect("list").is_empty());
    assert!(store.settings().expect("settings").is_none());
    assert!(store.cursor(Collection::Food).expect("cursor").is_none());
}
