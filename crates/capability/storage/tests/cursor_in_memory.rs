use chrono::{TimeZone, Utc};
use dgw_storage::{CursorStore, InMemoryCursorStore};
use domain::CursorKey;

fn key() -> CursorKey {
    CursorKey::new("south-1", "item-1", "every10s")
}

#[tokio::test]
async fn upsert_never_regresses() {
    let store = InMemoryCursorStore::new();
    let later = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let earlier = Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap();

    store.upsert(&key(), later).await.expect("upsert");
    store.upsert(&key(), earlier).await.expect("upsert");

    let record = store.get(&key()).await.expect("get").expect("record");
    assert_eq!(record.last_max_instant, later);
}

#[tokio::test]
async fn reset_removes_record() {
    let store = InMemoryCursorStore::new();
    let instant = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    store.upsert(&key(), instant).await.expect("upsert");
    store.reset(&key()).await.expect("reset");
    assert!(store.get(&key()).await.expect("get").is_none());
}

#[tokio::test]
async fn delete_for_connector_scopes_by_connector() {
    let store = InMemoryCursorStore::new();
    let instant = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let other = CursorKey::new("south-2", "item-1", "every10s");
    store.upsert(&key(), instant).await.expect("upsert");
    store.upsert(&other, instant).await.expect("upsert");

    store
        .delete_for_connector("south-1")
        .await
        .expect("delete");

    assert!(store.get(&key()).await.expect("get").is_none());
    assert!(store.get(&other).await.expect("get").is_some());
}
