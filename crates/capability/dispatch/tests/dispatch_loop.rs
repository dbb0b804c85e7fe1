use async_trait::async_trait;
use chrono::Utc;
use dgw_cache::{ArchiveService, CacheLayout, FileCache, ValueCache};
use dgw_dispatch::{DispatchLoop, DispatchState, NorthConnector, SendFailure};
use domain::{ArchivePolicy, CachingPolicy, TimeValue, TimeValueData};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

fn policy() -> CachingPolicy {
    CachingPolicy {
        group_count: 2,
        max_send_count: 100,
        max_size_bytes: 64 * 1024,
        retry_interval_ms: 20,
        retry_count: 2,
        send_file_immediately: true,
    }
}

/// 前 N 次调用失败、之后成功的测试连接器。
struct FlakyNorth {
    failures_left: AtomicU32,
    value_calls: AtomicU32,
    file_calls: AtomicU32,
    delivered_values: Mutex<Vec<String>>,
}

impl FlakyNorth {
    fn new(failures: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            value_calls: AtomicU32::new(0),
            file_calls: AtomicU32::new(0),
            delivered_values: Mutex::new(Vec::new()),
        }
    }

    fn fail_or_pass(&self) -> Result<(), SendFailure> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            Err(SendFailure::retryable("induced network error"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl NorthConnector for FlakyNorth {
    async fn handle_values(&self, values: &[TimeValue]) -> Result<(), SendFailure> {
        self.value_calls.fetch_add(1, Ordering::SeqCst);
        self.fail_or_pass()?;
        let mut delivered = self.delivered_values.lock().await;
        delivered.extend(values.iter().map(|value| value.reference.clone()));
        Ok(())
    }

    async fn handle_file(&self, _path: &Path) -> Result<(), SendFailure> {
        self.file_calls.fetch_add(1, Ordering::SeqCst);
        self.fail_or_pass()
    }

    async fn test_connection(&self) -> Result<(), SendFailure> {
        Ok(())
    }
}

/// 投递前长时间占用连接的测试连接器，用于压停机收尾路径。
struct SlowNorth {
    delay: Duration,
    started: AtomicU32,
    delivered_values: Mutex<Vec<String>>,
}

impl SlowNorth {
    fn new(delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            started: AtomicU32::new(0),
            delivered_values: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl NorthConnector for SlowNorth {
    async fn handle_values(&self, values: &[TimeValue]) -> Result<(), SendFailure> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let mut delivered = self.delivered_values.lock().await;
        delivered.extend(values.iter().map(|value| value.reference.clone()));
        Ok(())
    }

    async fn handle_file(&self, _path: &Path) -> Result<(), SendFailure> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    async fn test_connection(&self) -> Result<(), SendFailure> {
        Ok(())
    }
}

struct Rig {
    values: Arc<ValueCache>,
    files: Arc<FileCache>,
    archive: Arc<ArchiveService>,
    signal: Arc<Notify>,
}

async fn rig(root: &Path, caching: CachingPolicy, archive: ArchivePolicy) -> Rig {
    let layout = CacheLayout::new(root);
    let signal = Arc::new(Notify::new());
    let values = Arc::new(
        ValueCache::open(&layout, "north-1", caching.clone(), Arc::clone(&signal))
            .await
            .expect("values"),
    );
    let files = Arc::new(
        FileCache::open(&layout, "north-1", caching, Arc::clone(&signal))
            .await
            .expect("files"),
    );
    let archive = Arc::new(
        ArchiveService::open(&layout, "north-1", archive)
            .await
            .expect("archive"),
    );
    Rig {
        values,
        files,
        archive,
        signal,
    }
}

fn spawn_loop(rig: &Rig, connector: Arc<dyn NorthConnector>) -> dgw_dispatch::DispatchHandle {
    DispatchLoop::new(
        "north-1",
        connector,
        Arc::clone(&rig.values),
        Arc::clone(&rig.files),
        Arc::clone(&rig.archive),
        policy(),
        Duration::from_millis(50),
        Arc::clone(&rig.signal),
    )
    .spawn()
}

fn sample_values(tags: &[&str]) -> Vec<TimeValue> {
    tags.iter()
        .map(|tag| TimeValue::new(*tag, Utc::now(), TimeValueData::I64(1)))
        .collect()
}

async fn wait_until<F>(mut condition: F)
where
    F: AsyncFnMut() -> bool,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn values_flow_to_destination_and_cache_drains() {
    let dir = tempfile::tempdir().expect("tempdir");
    let rig = rig(dir.path(), policy(), ArchivePolicy::default()).await;
    let north = Arc::new(FlakyNorth::new(0));
    let handle = spawn_loop(&rig, north.clone() as Arc<dyn NorthConnector>);

    rig.values
        .cache_values(&sample_values(&["a", "b"]))
        .await
        .expect("cache");

    let values = Arc::clone(&rig.values);
    wait_until(async || values.is_empty().await).await;
    let delivered = north.delivered_values.lock().await.clone();
    assert_eq!(delivered, ["a", "b"]);
    handle.stop().await;
}

// at-least-once：目的端确认前条目留在缓存，失败后重试的是同一内容。
#[tokio::test]
async fn failed_values_are_retried_not_lost() {
    let dir = tempfile::tempdir().expect("tempdir");
    let rig = rig(dir.path(), policy(), ArchivePolicy::default()).await;
    let north = Arc::new(FlakyNorth::new(1));
    let handle = spawn_loop(&rig, north.clone() as Arc<dyn NorthConnector>);

    rig.values
        .cache_values(&sample_values(&["a", "b"]))
        .await
        .expect("cache");

    let values = Arc::clone(&rig.values);
    wait_until(async || values.is_empty().await).await;
    assert!(north.value_calls.load(Ordering::SeqCst) >= 2);
    let delivered = north.delivered_values.lock().await.clone();
    assert_eq!(delivered, ["a", "b"]);
    handle.stop().await;
}

// 场景 B：文件投递失败两次（retryCount=2），第三次成功 →
// 文件进入归档目录，隔离目录为空，恰好 2 次失败。
#[tokio::test]
async fn file_failing_twice_then_succeeding_is_archived() {
    let dir = tempfile::tempdir().expect("tempdir");
    let archive_policy = ArchivePolicy {
        enabled: true,
        retention_hours: 72,
    };
    let rig = rig(dir.path(), policy(), archive_policy).await;
    let north = Arc::new(FlakyNorth::new(2));
    let handle = spawn_loop(&rig, north.clone() as Arc<dyn NorthConnector>);

    let inbox = dir.path().join("inbox");
    tokio::fs::create_dir_all(&inbox).await.expect("inbox");
    let source = inbox.join("measurements.csv");
    tokio::fs::write(&source, "t,v\n1,2\n").await.expect("write");
    rig.files.cache_file(&source).await.expect("cache");

    let files = Arc::clone(&rig.files);
    wait_until(async || files.is_empty().await).await;
    let archive = Arc::clone(&rig.archive);
    wait_until(async || !archive.archived_files().await.is_empty()).await;

    assert_eq!(north.file_calls.load(Ordering::SeqCst), 3);
    assert!(rig.files.error_file_names().await.is_empty());
    let archived = rig.archive.archived_files().await;
    assert_eq!(archived.len(), 1);
    assert!(tokio::fs::try_exists(&archived[0]).await.expect("exists"));
    handle.stop().await;
}

#[tokio::test]
async fn exhausted_retry_budget_quarantines_and_loop_continues() {
    let dir = tempfile::tempdir().expect("tempdir");
    let rig = rig(dir.path(), policy(), ArchivePolicy::default()).await;
    // 永远失败
    let north = Arc::new(FlakyNorth::new(u32::MAX));
    let handle = spawn_loop(&rig, north.clone() as Arc<dyn NorthConnector>);

    rig.values
        .cache_values(&sample_values(&["poison"]))
        .await
        .expect("cache");

    let values = Arc::clone(&rig.values);
    wait_until(async || !values.error_entry_ids().await.is_empty()).await;
    assert!(rig.values.is_empty().await);
    // retry_count=2：第 3 次失败后隔离
    assert_eq!(north.value_calls.load(Ordering::SeqCst), 3);
    handle.stop().await;
}

// 停止时有一批数据正在慢速投递：stop 返回前该批必须投完，
// 缓存排空，不得半途丢下在途内容。
#[tokio::test]
async fn stop_drains_in_flight_delivery_before_stopping() {
    let dir = tempfile::tempdir().expect("tempdir");
    let rig = rig(dir.path(), policy(), ArchivePolicy::default()).await;
    let north = Arc::new(SlowNorth::new(200));
    let handle = spawn_loop(&rig, north.clone() as Arc<dyn NorthConnector>);

    rig.values
        .cache_values(&sample_values(&["a", "b"]))
        .await
        .expect("cache");

    let in_flight = Arc::clone(&north);
    wait_until(async || in_flight.started.load(Ordering::SeqCst) >= 1).await;
    assert!(north.delivered_values.lock().await.is_empty());
    assert_ne!(handle.state(), DispatchState::Stopped);

    handle.stop().await;

    let delivered = north.delivered_values.lock().await.clone();
    assert_eq!(delivered, ["a", "b"]);
    assert!(rig.values.is_empty().await);
}
