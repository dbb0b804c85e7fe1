use dgw_cache::{CacheError, CacheLayout, FileCache};
use domain::CachingPolicy;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn policy() -> CachingPolicy {
    CachingPolicy {
        group_count: 2,
        max_send_count: 100,
        max_size_bytes: 64 * 1024,
        retry_interval_ms: 50,
        retry_count: 2,
        send_file_immediately: true,
    }
}

async fn open_cache(root: &Path, policy: CachingPolicy) -> Arc<FileCache> {
    let layout = CacheLayout::new(root);
    Arc::new(
        FileCache::open(&layout, "north-1", policy, Arc::new(Notify::new()))
            .await
            .expect("open"),
    )
}

async fn drop_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let inbox = dir.join("inbox");
    tokio::fs::create_dir_all(&inbox).await.expect("inbox");
    let path = inbox.join(name);
    tokio::fs::write(&path, content).await.expect("write");
    path
}

#[tokio::test]
async fn cache_file_moves_atomically_and_wakes_loop() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = open_cache(dir.path(), policy()).await;
    let signal = cache.signal();

    let source = drop_file(dir.path(), "report.csv", "a,b\n1,2\n").await;
    let cached = cache.cache_file(&source).await.expect("cache");

    // 移动而非复制：源文件消失，缓存目录出现编码后的名字
    assert!(!tokio::fs::try_exists(&source).await.expect("exists"));
    assert!(tokio::fs::try_exists(&cached).await.expect("exists"));
    let name = cached.file_name().and_then(|n| n.to_str()).expect("name");
    assert!(name.starts_with("report-") && name.ends_with(".csv"));

    // send_file_immediately=true：入队即唤醒
    tokio::time::timeout(Duration::from_millis(100), signal.notified())
        .await
        .expect("woken");
}

#[tokio::test]
async fn single_file_in_flight_at_a_time() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = open_cache(dir.path(), policy()).await;

    let first = drop_file(dir.path(), "one.txt", "1").await;
    let second = drop_file(dir.path(), "two.txt", "2").await;
    cache.cache_file(&first).await.expect("cache");
    cache.cache_file(&second).await.expect("cache");

    let picked = cache.get_file_to_send().await.expect("get").expect("file");
    // 第一个仍在途，第二个不会被取走
    assert!(cache.get_file_to_send().await.expect("get").is_none());

    cache.remove_sent_file(&picked.path).await.expect("remove");
    let next = cache.get_file_to_send().await.expect("get").expect("file");
    assert_ne!(next.path, picked.path);
}

// 场景 B 的缓存侧：retryCount=2，两次失败后第三次成功，
// 文件不在隔离目录，队列为空。
#[tokio::test]
async fn two_failures_then_success_leaves_no_quarantine() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = open_cache(dir.path(), policy()).await;

    let source = drop_file(dir.path(), "data.bin", "payload").await;
    cache.cache_file(&source).await.expect("cache");

    for _ in 0..2 {
        let picked = cache.get_file_to_send().await.expect("get").expect("file");
        cache.manage_errored_file(&picked.path).await.expect("errored");
        assert!(cache.error_file_names().await.is_empty());
        tokio::time::sleep(Duration::from_millis(60)).await;
    }

    let picked = cache.get_file_to_send().await.expect("get").expect("file");
    let delivered = cache.remove_sent_file(&picked.path).await.expect("remove");
    assert!(cache.is_empty().await);
    assert!(cache.error_file_names().await.is_empty());
    assert!(tokio::fs::try_exists(&delivered).await.expect("exists"));
}

#[tokio::test]
async fn third_failure_quarantines_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cache = open_cache(dir.path(), policy()).await;

    let source = drop_file(dir.path(), "poison.bin", "x").await;
    cache.cache_file(&source).await.expect("cache");

    for _ in 0..3 {
        let picked = cache.get_file_to_send().await.expect("get").expect("file");
        cache.manage_errored_file(&picked.path).await.expect("errored");
        tokio::time::sleep(Duration::from_millis(60)).await;
    }

    assert!(cache.is_empty().await);
    let quarantined = cache.error_file_names().await;
    assert_eq!(quarantined.len(), 1);
    assert!(quarantined[0].starts_with("poison-"));

    // 操作员放回后重新可发
    cache.retry_all_error_files().await.expect("retry");
    assert!(cache.error_file_names().await.is_empty());
    assert!(cache.get_file_to_send().await.expect("get").is_some());
}

// 隔离目录不可写时，预算耗尽的文件留在队列里继续退避。
#[tokio::test]
async fn quarantine_move_failure_keeps_file_in_queue() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fast = CachingPolicy {
        retry_count: 0,
        retry_interval_ms: 1,
        ..policy()
    };
    let cache = open_cache(dir.path(), fast).await;

    let source = drop_file(dir.path(), "data.bin", "payload").await;
    cache.cache_file(&source).await.expect("cache");

    let errors_dir = CacheLayout::new(dir.path()).file_errors_dir("north-1");
    tokio::fs::remove_dir_all(&errors_dir).await.expect("remove");

    let picked = cache.get_file_to_send().await.expect("get").expect("file");
    cache.manage_errored_file(&picked.path).await.expect("errored");

    assert!(cache.error_file_names().await.is_empty());
    assert_eq!(cache.queued_file_count().await, 1);

    tokio::fs::create_dir_all(&errors_dir).await.expect("recreate");
    tokio::time::sleep(Duration::from_millis(10)).await;
    let picked = cache.get_file_to_send().await.expect("get").expect("file");
    cache.manage_errored_file(&picked.path).await.expect("errored");
    assert_eq!(cache.error_file_names().await.len(), 1);
    assert!(cache.is_empty().await);
}

// 场景 C：重启时缓存目录里已有 5 个文件，队列恰好是这 5 个，
// 按 mtime 排序，没有来自过期索引的重复。
#[tokio::test]
async fn restart_rebuilds_queue_from_directory_listing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = CacheLayout::new(dir.path());
    let files_dir = layout.files_dir("north-1");
    tokio::fs::create_dir_all(&files_dir).await.expect("dir");
    for index in 0..5 {
        tokio::fs::write(files_dir.join(format!("f{index}.dat")), "x")
            .await
            .expect("write");
        // mtime 粒度保护：确保顺序可区分
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    // 复制中断的残留不会进入队列
    tokio::fs::write(files_dir.join("leftover.dat.tmp"), "x")
        .await
        .expect("write");

    let cache = open_cache(dir.path(), policy()).await;
    assert_eq!(cache.queued_file_count().await, 5);
    assert_eq!(
        cache.queued_file_names().await,
        ["f0.dat", "f1.dat", "f2.dat", "f3.dat", "f4.dat"]
    );
}

#[tokio::test]
async fn cache_full_rejects_oversized_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let tight = CachingPolicy {
        max_size_bytes: 4,
        ..policy()
    };
    let cache = open_cache(dir.path(), tight).await;

    let source = drop_file(dir.path(), "big.bin", "way too large").await;
    let err = cache.cache_file(&source).await.expect_err("over budget");
    assert!(matches!(err, CacheError::CacheFull(_)));
    // 拒绝时源文件留在原地，由生产方决定如何处理
    assert!(tokio::fs::try_exists(&source).await.expect("exists"));
}
