//! 日志初始化与管线计数指标。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 管线指标快照。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub values_cached: u64,
    pub values_sent: u64,
    pub values_errored: u64,
    pub values_quarantined: u64,
    pub files_cached: u64,
    pub files_sent: u64,
    pub files_errored: u64,
    pub files_quarantined: u64,
    pub cache_full_rejections: u64,
    pub files_archived: u64,
    pub archive_purged: u64,
    pub dispatch_retries: u64,
    pub scan_ticks: u64,
    pub scan_queries: u64,
    pub scan_errors: u64,
}

/// 管线计数指标。
pub struct TelemetryMetrics {
    values_cached: AtomicU64,
    values_sent: AtomicU64,
    values_errored: AtomicU64,
    values_quarantined: AtomicU64,
    files_cached: AtomicU64,
    files_sent: AtomicU64,
    files_errored: AtomicU64,
    files_quarantined: AtomicU64,
    cache_full_rejections: AtomicU64,
    files_archived: AtomicU64,
    archive_purged: AtomicU64,
    dispatch_retries: AtomicU64,
    scan_ticks: AtomicU64,
    scan_queries: AtomicU64,
    scan_errors: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            values_cached: AtomicU64::new(0),
            values_sent: AtomicU64::new(0),
            values_errored: AtomicU64::new(0),
            values_quarantined: AtomicU64::new(0),
            files_cached: AtomicU64::new(0),
            files_sent: AtomicU64::new(0),
            files_errored: AtomicU64::new(0),
            files_quarantined: AtomicU64::new(0),
            cache_full_rejections: AtomicU64::new(0),
            files_archived: AtomicU64::new(0),
            archive_purged: AtomicU64::new(0),
            dispatch_retries: AtomicU64::new(0),
            scan_ticks: AtomicU64::new(0),
            scan_queries: AtomicU64::new(0),
            scan_errors: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            values_cached: self.values_cached.load(Ordering::Relaxed),
            values_sent: self.values_sent.load(Ordering::Relaxed),
            values_errored: self.values_errored.load(Ordering::Relaxed),
            values_quarantined: self.values_quarantined.load(Ordering::Relaxed),
            files_cached: self.files_cached.load(Ordering::Relaxed),
            files_sent: self.files_sent.load(Ordering::Relaxed),
            files_errored: self.files_errored.load(Ordering::Relaxed),
            files_quarantined: self.files_quarantined.load(Ordering::Relaxed),
            cache_full_rejections: self.cache_full_rejections.load(Ordering::Relaxed),
            files_archived: self.files_archived.load(Ordering::Relaxed),
            archive_purged: self.archive_purged.load(Ordering::Relaxed),
            dispatch_retries: self.dispatch_retries.load(Ordering::Relaxed),
            scan_ticks: self.scan_ticks.load(Ordering::Relaxed),
            scan_queries: self.scan_queries.load(Ordering::Relaxed),
            scan_errors: self.scan_errors.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 记录缓存的值数量。
pub fn record_values_cached(count: u64) {
    metrics().values_cached.fetch_add(count, Ordering::Relaxed);
}

/// 记录投递成功的值数量。
pub fn record_values_sent(count: u64) {
    metrics().values_sent.fetch_add(count, Ordering::Relaxed);
}

/// 记录投递失败的值条目次数。
pub fn record_values_errored() {
    metrics().values_errored.fetch_add(1, Ordering::Relaxed);
}

/// 记录进入隔离区的值条目数。
pub fn record_values_quarantined() {
    metrics()
        .values_quarantined
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录缓存的文件数。
pub fn record_file_cached() {
    metrics().files_cached.fetch_add(1, Ordering::Relaxed);
}

/// 记录投递成功的文件数。
pub fn record_file_sent() {
    metrics().files_sent.fetch_add(1, Ordering::Relaxed);
}

/// 记录投递失败的文件次数。
pub fn record_file_errored() {
    metrics().files_errored.fetch_add(1, Ordering::Relaxed);
}

/// 记录进入隔离区的文件数。
pub fn record_file_quarantined() {
    metrics()
        .files_quarantined
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录因缓存已满被拒绝的写入次数。
pub fn record_cache_full_rejection() {
    metrics()
        .cache_full_rejections
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录归档的文件数。
pub fn record_file_archived() {
    metrics().files_archived.fetch_add(1, Ordering::Relaxed);
}

/// 记录归档清理删除的过期条目数。
pub fn record_archive_purged(count: u64) {
    metrics().archive_purged.fetch_add(count, Ordering::Relaxed);
}

/// 记录发送循环的重试次数。
pub fn record_dispatch_retry() {
    metrics().dispatch_retries.fetch_add(1, Ordering::Relaxed);
}

/// 记录扫描模式触发次数。
pub fn record_scan_tick() {
    metrics().scan_ticks.fetch_add(1, Ordering::Relaxed);
}

/// 记录南向历史查询次数（含子窗口）。
pub fn record_scan_query() {
    metrics().scan_queries.fetch_add(1, Ordering::Relaxed);
}

/// 记录南向查询失败次数。
pub fn record_scan_error() {
    metrics().scan_errors.fetch_add(1, Ordering::Relaxed);
}
