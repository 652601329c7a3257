//! SyncManager tests — push/pull cycles against the in-memory remote store.

use std::sync::Arc;

use protee_sync::records::{Confidence, EntrySource, FoodEntry, Theme, UserSettings};
use protee_sync::sync::types::{RemoteClient, SyncErrorKind, TransportError};
use protee_sync::{Collection, LocalStore, SyncConfig, SyncId, SyncManager};
use serde_json::json;

use crate::common::{make_store, ts, MockServer, ServerRecord, OWNER};

fn manager(store: &Arc<LocalStore>, server: &Arc<MockServer>) -> SyncManager {
    SyncManager::new(
        store.clone(),
        server.clone() as Arc<dyn RemoteClient>,
        SyncConfig::default(),
    )
}

fn food(day: &str, grams: f64) -> FoodEntry {
    FoodEntry {
        date: day.parse().unwrap(),
        source: EntrySource::Text,
        food_name: "Salmon".to_string(),
        protein_grams: grams,
        confidence: Confidence::Medium,
        image_data: None,
    }
}

fn food_payload(grams: f64) -> serde_json::Value {
    serde_json::to_value(food("2026-08-01", grams)).unwrap()
}

fn seed_food(server: &MockServer, sync_id: &str, updated: i64, grams: f64) {
    server.seed(
        Collection::Food,
        ServerRecord {
            sync_id: SyncId::new(sync_id),
            owner_id: OWNER.to_string(),
            updated_at: ts(updated),
            deleted_at: None,
            payload: food_payload(grams),
        },
    );
}

// ============================================================================
// Push
// ============================================================================

#[tokio::test]
async fn push_assigns_sync_id_and_clears_dirty_state() {
    let store = make_store();
    let server = MockServer::new();
    let sm = manager(&store, &server);

    store.insert_at(&food("2026-08-01", 30.0), ts(10)).expect("insert");
    let report = sm.run_cycle().await;

    assert_eq!(report.pushed, 1);
    assert!(report.errors.is_empty());

    let local = &store.inspect_raw(Collection::Food).expect("inspect")[0];
    assert!(local.sync_id.is_some(), "create ack must assign the sync_id");
    assert_eq!(local.owner_id.as_deref(), Some(OWNER));
    assert!(!local.is_dirty(), "confirmed push clears dirty state");

    let remote = server.dump(Collection::Food);
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].updated_at, ts(10));
}

#[tokio::test]
async fn never_pushed_tombstone_is_not_uploaded() {
    let store = make_store();
    let server = MockServer::new();
    let sm = manager(&store, &server);

    let stored = store.insert_at(&food("2026-08-01", 30.0), ts(10)).expect("insert");
    store
        .soft_delete_at(Collection::Food, stored.local_id, ts(11))
        .expect("delete");

    let report = sm.run_cycle().await;
    assert_eq!(report.pushed, 0);
    assert!(server.dump(Collection::Food).is_empty(), "nothing to propagate");
}

#[tokio::test]
async fn push_transport_failure_keeps_records_dirty() {
    let store = make_store();
    let server = MockServer::new();
    let sm = manager(&store, &server);

    store.insert_at(&food("2026-08-01", 30.0), ts(10)).expect("insert");
    server.fail_pushes(TransportError::new("connection reset"));

    let report = sm.run_cycle().await;
    assert!(report.has_cycle_failure());
    assert_eq!(store.dirty_records(Collection::Food).expect("dirty").len(), 1);

    // Next cycle retries and succeeds.
    server.heal();
    let report = sm.run_cycle().await;
    assert_eq!(report.pushed, 1);
    assert!(store.dirty_records(Collection::Food).expect("dirty").is_empty());
}

// ============================================================================
// Pull
// ============================================================================

#[tokio::test]
async fn pull_inserts_remote_records_clean() {
    let store = make_store();
    let server = MockServer::new();
    let sm = manager(&store, &server);

    seed_food(&server, "s1", 10, 42.0);
    let report = sm.run_cycle().await;

    assert_eq!(report.pulled, 1);
    let local = &store.inspect_raw(Collection::Food).expect("inspect")[0];
    assert_eq!(local.sync_id, Some(SyncId::new("s1")));
    assert!(!local.is_dirty(), "pulled rows must not bounce back on push");
    assert_eq!(store.cursor(Collection::Food).expect("cursor"), Some(ts(10)));
}

#[tokio::test]
async fn pull_is_idempotent_from_an_earlier_cursor() {
    let store = make_store();
    let server = MockServer::new();
    let sm = manager(&store, &server);

    seed_food(&server, "s1", 10, 42.0);
    seed_food(&server, "s2", 11, 17.0);
    sm.run_cycle().await;
    let before = store.inspect_raw(Collection::Food).expect("inspect");

    // As if the cursor write had been lost: re-apply full history.
    store.reset_cursors().expect("reset");
    let report = sm.run_cycle().await;
    assert!(report.errors.is_empty());

    let after = store.inspect_raw(Collection::Food).expect("inspect");
    assert_eq!(after.len(), before.len(), "no duplicates keyed by sync_id");
    for (a, b) in before.iter().zip(after.iter()) {
        assert_eq!(a.local_id, b.local_id);
        assert_eq!(a.updated_at, b.updated_at);
        assert_eq!(a.payload, b.payload);
        assert_eq!(a.pushed_at, b.pushed_at);
    }
    assert_eq!(store.cursor(Collection::Food).expect("cursor"), Some(ts(11)));
}

#[tokio::test]
async fn pull_pages_through_a_long_backlog() {
    let store = make_store();
    let server = MockServer::new();
    let sm = SyncManager::new(
        store.clone(),
        server.clone() as Arc<dyn RemoteClient>,
        SyncConfig {
            page_size: 2,
            ..Default::default()
        },
    );

    for i in 1..=5 {
        seed_food(&server, &format!("s{i}"), i, i as f64);
    }
    let report = sm.run_cycle().await;

    assert_eq!(report.pulled, 5);
    assert_eq!(store.inspect_raw(Collection::Food).expect("inspect").len(), 5);
    assert_eq!(store.cursor(Collection::Food).expect("cursor"), Some(ts(5)));

    // Pages of 2, 2, 1 — the short page ends the loop.
    let food_pulls: Vec<_> = server
        .pull_calls()
        .into_iter()
        .filter(|(c, _)| *c == Collection::Food)
        .collect();
    assert_eq!(food_pulls.len(), 3);
    assert_eq!(food_pulls[0].1, None);
    assert_eq!(food_pulls[1].1, Some(ts(2)));
    assert_eq!(food_pulls[2].1, Some(ts(4)));
}

#[tokio::test]
async fn malformed_remote_record_does_not_block_the_page() {
    let store = make_store();
    let server = MockServer::new();
    let sm = manager(&store, &server);

    server.seed(
        Collection::Food,
        ServerRecord {
            sync_id: SyncId::new("bad"),
            owner_id: OWNER.to_string(),
            updated_at: ts(10),
            deleted_at: None,
            payload: json!({"garbage": true}),
        },
    );
    seed_food(&server, "good", 11, 30.0);

    let report = sm.run_cycle().await;

    assert_eq!(report.pulled, 1, "the good record still applies");
    let errors: Vec<_> = report
        .errors
        .iter()
        .filter(|e| e.kind == SyncErrorKind::Permanent)
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].sync_id, Some(SyncId::new("bad")));
    assert!(!report.has_cycle_failure());

    // The cursor moves past the bad record so the backlog cannot wedge.
    assert_eq!(store.cursor(Collection::Food).expect("cursor"), Some(ts(11)));
}

#[tokio::test]
async fn pull_transport_failure_aborts_cycle_and_keeps_cursor() {
    let store = make_store();
    let server = MockServer::new();
    let sm = manager(&store, &server);

    seed_food(&server, "s1", 10, 42.0);
    store.insert_at(&food("2026-08-02", 5.0), ts(20)).expect("insert");
    server.fail_pulls(TransportError::with_kind("401", SyncErrorKind::Auth));

    let report = sm.run_cycle().await;

    assert!(report.has_cycle_failure());
    assert!(store.cursor(Collection::Food).expect("cursor").is_none());
    assert!(
        server.push_log().is_empty(),
        "a failed pull must abort before any push"
    );
}

// ============================================================================
// Conflicts
// ============================================================================

#[tokio::test]
async fn stale_rejection_with_newer_local_edit_retries_and_wins() {
    let store = make_store();
    let server = MockServer::new();
    let sm = manager(&store, &server);

    let stored = store.insert_at(&food("2026-08-01", 30.0), ts(10)).expect("insert");
    sm.run_cycle().await;
    let sync_id = store
        .inspect_raw(Collection::Food)
        .expect("inspect")[0]
        .sync_id
        .clone()
        .expect("synced");

    // Another device updated the record at t=11; we edit at t=12.
    server.overwrite(Collection::Food, &sync_id, ts(11), None, food_payload(77.0));
    store
        .update_at(stored.local_id, &food("2026-08-01", 90.0), ts(12))
        .expect("update");

    let report = sm.run_cycle().await;

    assert!(report.conflicts >= 1);
    assert!(!report.has_cycle_failure());

    // Last write wins: our t=12 edit ends up on the server.
    let remote = server.dump(Collection::Food);
    assert_eq!(remote[0].updated_at, ts(12));
    assert_eq!(remote[0].payload["protein_grams"], 90.0);
    assert!(store.dirty_records(Collection::Food).expect("dirty").is_empty());
}

#[tokio::test]
async fn newer_remote_version_wins_over_local_edit() {
    let store = make_store();
    let server = MockServer::new();
    let sm = manager(&store, &server);

    let stored = store.insert_at(&food("2026-08-01", 30.0), ts(10)).expect("insert");
    sm.run_cycle().await;
    let sync_id = store
        .inspect_raw(Collection::Food)
        .expect("inspect")[0]
        .sync_id
        .clone()
        .expect("synced");

    // We edit at t=11; another device already wrote t=12.
    store
        .update_at(stored.local_id, &food("2026-08-01", 90.0), ts(11))
        .expect("update");
    server.overwrite(Collection::Food, &sync_id, ts(12), None, food_payload(77.0));

    let report = sm.run_cycle().await;
    assert!(report.conflicts >= 1);

    // Pull-first resolved the race before upload: the remote edit stands.
    let local = &store.inspect_raw(Collection::Food).expect("inspect")[0];
    assert_eq!(local.updated_at, ts(12));
    assert_eq!(local.payload["protein_grams"], 77.0);
    assert!(!local.is_dirty(), "the losing edit must not be re-uploaded");
    assert_eq!(server.dump(Collection::Food)[0].payload["protein_grams"], 77.0);
}

#[tokio::test]
async fn persistent_stale_rejection_defers_to_next_cycle_without_looping() {
    let store = make_store();
    let server = MockServer::new();
    let sm = manager(&store, &server);

    let stored = store.insert_at(&food("2026-08-01", 30.0), ts(10)).expect("insert");
    sm.run_cycle().await;

    store
        .update_at(stored.local_id, &food("2026-08-01", 90.0), ts(12))
        .expect("update");
    server.reject_updates(true);

    let report = sm.run_cycle().await;

    // Not an error — the record simply stays dirty for the next cycle.
    assert!(!report.has_cycle_failure());
    assert_eq!(store.dirty_records(Collection::Food).expect("dirty").len(), 1);

    // One pull in the first cycle, then initial + one follow-up in the
    // second — the cycle moved on instead of retrying unboundedly.
    let food_pulls = server
        .pull_calls()
        .into_iter()
        .filter(|(c, _)| *c == Collection::Food)
        .count();
    assert_eq!(food_pulls, 3);
}

// ============================================================================
// Device-local partition
// ============================================================================

#[tokio::test]
async fn api_credential_never_reaches_the_transport() {
    let store = make_store();
    let server = MockServer::new();
    let sm = manager(&store, &server);

    let settings = UserSettings {
        default_goal: 160.0,
        theme: Theme::Dark,
        assistant_api_key: Some("sk-very-secret".to_string()),
        ..Default::default()
    };
    store.put_settings(&settings).expect("settings");
    sm.run_cycle().await;

    for (_, outbound) in server.push_log() {
        assert!(
            outbound.payload.get("assistant_api_key").is_none(),
            "device-local field leaked into an outbound payload"
        );
        assert!(!outbound.payload.to_string().contains("sk-very-secret"));
    }
    let remote = server.dump(Collection::Settings);
    assert!(remote[0].payload.get("assistant_api_key").is_none());

    // And the local copy still has it.
    let local = store.settings().expect("settings").expect("some");
    assert_eq!(local.payload.assistant_api_key.as_deref(), Some("sk-very-secret"));
}

#[tokio::test]
async fn remote_settings_merge_into_the_local_singleton() {
    let store = make_store();
    let server = MockServer::new();
    let sm = manager(&store, &server);

    // Local settings created before first sync, with a local credential.
    let mut settings = UserSettings::default();
    settings.assistant_api_key = Some("sk-local".to_string());
    store.put_settings(&settings).expect("settings");
    // Pretend the row predates this test's remote edit.
    let row = store.inspect_raw(Collection::Settings).expect("inspect")[0].clone();

    // Another device already synced its settings (newer).
    let mut remote_settings = UserSettings::default();
    remote_settings.default_goal = 200.0;
    remote_settings.theme = Theme::Dark;
    server.seed(
        Collection::Settings,
        ServerRecord {
            sync_id: SyncId::new("st1"),
            owner_id: OWNER.to_string(),
            updated_at: row.updated_at + chrono::Duration::seconds(60),
            deleted_at: None,
            payload: serde_json::to_value(&remote_settings).unwrap(),
        },
    );

    sm.run_cycle().await;

    let rows = store.inspect_raw(Collection::Settings).expect("inspect");
    assert_eq!(rows.len(), 1, "no second settings row on pull");
    assert_eq!(rows[0].sync_id, Some(SyncId::new("st1")), "remote identity adopted");

    let merged = store.settings().expect("settings").expect("some");
    assert_eq!(merged.payload.default_goal, 200.0);
    assert_eq!(
        merged.payload.assistant_api_key.as_deref(),
        Some("sk-local"),
        "device-local credential survives a remote win"
    );
}

// ============================================================================
// Diagnostics
// ============================================================================

#[tokio::test]
async fn inspect_remote_has_no_merge_side_effects() {
    let store = make_store();
    let server = MockServer::new();
    let sm = manager(&store, &server);

    seed_food(&server, "s1", 10, 42.0);
    seed_food(&server, "s2", 11, 17.0);

    let remote = sm.inspect_remote(Collection::Food).await.expect("inspect");
    assert_eq!(remote.len(), 2);

    assert!(store.inspect_raw(Collection::Food).expect("inspect").is_empty());
    assert!(store.cursor(Collection::Food).expect("cursor").is_none());
}
