use dgw_cache::{ArchiveDisposition, ArchiveService, CacheLayout};
use domain::ArchivePolicy;
use std::path::Path;

async fn plant_file(dir: &Path, name: &str) -> std::path::PathBuf {
    tokio::fs::create_dir_all(dir).await.expect("dir");
    let path = dir.join(name);
    tokio::fs::write(&path, "delivered").await.expect("write");
    path
}

#[tokio::test]
async fn disabled_archive_deletes_delivered_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = CacheLayout::new(dir.path());
    let service = ArchiveService::open(&layout, "north-1", ArchivePolicy::default())
        .await
        .expect("open");

    let path = plant_file(&dir.path().join("staging"), "done.csv").await;
    let disposition = service.archive_or_delete(&path).await.expect("dispose");
    assert_eq!(disposition, ArchiveDisposition::Deleted);
    assert!(!tokio::fs::try_exists(&path).await.expect("exists"));
}

#[tokio::test]
async fn enabled_archive_moves_file_into_archive_dir() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = CacheLayout::new(dir.path());
    let policy = ArchivePolicy {
        enabled: true,
        retention_hours: 72,
    };
    let service = ArchiveService::open(&layout, "north-1", policy)
        .await
        .expect("open");

    let path = plant_file(&dir.path().join("staging"), "done.csv").await;
    let disposition = service.archive_or_delete(&path).await.expect("dispose");

    let ArchiveDisposition::Archived(archived) = disposition else {
        panic!("expected archive");
    };
    assert!(!tokio::fs::try_exists(&path).await.expect("exists"));
    assert!(tokio::fs::try_exists(&archived).await.expect("exists"));
    assert!(archived.starts_with(layout.archive_dir("north-1")));
    assert_eq!(service.archived_files().await.len(), 1);
}

#[tokio::test]
async fn refresh_rebuilds_listing_from_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = CacheLayout::new(dir.path());
    let archive_dir = layout.archive_dir("north-1");
    tokio::fs::create_dir_all(&archive_dir).await.expect("dir");
    tokio::fs::write(archive_dir.join("old-1.csv"), "x")
        .await
        .expect("write");
    tokio::fs::write(archive_dir.join("old-2.csv"), "y")
        .await
        .expect("write");

    let policy = ArchivePolicy {
        enabled: true,
        retention_hours: 72,
    };
    // open 内部即做启动对账
    let service = ArchiveService::open(&layout, "north-1", policy)
        .await
        .expect("open");
    assert_eq!(service.archived_files().await.len(), 2);
}

#[tokio::test]
async fn sweep_removes_only_expired_entries() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = CacheLayout::new(dir.path());
    let archive_dir = layout.archive_dir("north-1");
    tokio::fs::create_dir_all(&archive_dir).await.expect("dir");

    let expired = archive_dir.join("expired.csv");
    tokio::fs::write(&expired, "x").await.expect("write");
    // 把 mtime 拨回保留期之前
    let stale = std::time::SystemTime::now() - std::time::Duration::from_secs(7200);
    let file = std::fs::File::options()
        .write(true)
        .open(&expired)
        .expect("open");
    file.set_modified(stale).expect("set mtime");
    drop(file);

    let fresh = archive_dir.join("fresh.csv");
    tokio::fs::write(&fresh, "y").await.expect("write");

    let policy = ArchivePolicy {
        enabled: true,
        retention_hours: 1,
    };
    let service = ArchiveService::open(&layout, "north-1", policy)
        .await
        .expect("open");

    let purged = service.remove_files_if_too_old().await.expect("sweep");
    assert_eq!(purged, 1);
    assert!(!tokio::fs::try_exists(&expired).await.expect("exists"));
    assert!(tokio::fs::try_exists(&fresh).await.expect("exists"));
}
