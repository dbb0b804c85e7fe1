//! 文件引用的落盘 FIFO 缓存。
//!
//! 队列就是缓存目录本身：进入缓存是一次原子 rename（同文件系统，
//! 绝不 copy+delete），崩溃不会产生重复或半写条目；启动时仅靠列目录
//! 按修改时间重建队列，不存在可能过期的索引文件。

use crate::entry::{TMP_SUFFIX, epoch_ms, free_slot};
use crate::error::CacheError;
use crate::layout::CacheLayout;
use chrono::{DateTime, Duration, Utc};
use domain::{CachingPolicy, FileMeta};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, Notify};
use tracing::{info, warn};

#[derive(Debug, Clone)]
struct FileEntry {
    /// 条目 ID 即缓存目录中的文件名
    name: String,
    path: PathBuf,
    size_bytes: u64,
    modified_at: DateTime<Utc>,
    attempt_count: u32,
    not_before: Option<DateTime<Utc>>,
    in_flight: bool,
}

#[derive(Default)]
struct FileCacheState {
    queue: VecDeque<FileEntry>,
    quarantine: Vec<FileEntry>,
    total_bytes: u64,
}

/// 一个北向连接器的文件缓存。
pub struct FileCache {
    connector_id: String,
    dir: PathBuf,
    errors_dir: PathBuf,
    policy: CachingPolicy,
    signal: Arc<Notify>,
    seq: AtomicU64,
    state: Mutex<FileCacheState>,
}

impl FileCache {
    /// 打开缓存：建目录并从目录内容恢复队列（mtime 顺序）。
    pub async fn open(
        layout: &CacheLayout,
        connector_id: &str,
        policy: CachingPolicy,
        signal: Arc<Notify>,
    ) -> Result<Self, CacheError> {
        let dir = layout.files_dir(connector_id);
        let errors_dir = layout.file_errors_dir(connector_id);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::create_dir_all(&errors_dir).await?;

        let cache = Self {
            connector_id: connector_id.to_string(),
            dir,
            errors_dir,
            policy: policy.sanitized(),
            signal,
            seq: AtomicU64::new(1),
            state: Mutex::new(FileCacheState::default()),
        };
        let recovered = cache.recover().await?;
        if recovered > 0 {
            info!(
                target: "dgw.cache",
                connector_id = %cache.connector_id,
                files = recovered,
                "file cache recovered from disk"
            );
        }
        Ok(cache)
    }

    async fn recover(&self) -> Result<usize, CacheError> {
        let queue = scan_files(&self.dir).await?;
        let quarantine = scan_files(&self.errors_dir).await?;

        let mut state = self.state.lock().await;
        state.total_bytes = queue.iter().map(|entry| entry.size_bytes).sum();
        let recovered = queue.len();
        state.queue = queue.into();
        state.quarantine = quarantine;
        Ok(recovered)
    }

    /// 将到达的文件移入缓存目录（原子 rename），目标名编码原名与
    /// 入缓存时刻。`send_file_immediately` 时立即唤醒发送循环。
    pub async fn cache_file(&self, source: &Path) -> Result<PathBuf, CacheError> {
        let meta = tokio::fs::metadata(source).await?;
        let mut state = self.state.lock().await;
        if state.total_bytes + meta.len() > self.policy.max_size_bytes {
            dgw_telemetry::record_cache_full_rejection();
            return Err(CacheError::CacheFull(format!(
                "{} bytes queued, {} incoming, limit {}",
                state.total_bytes,
                meta.len(),
                self.policy.max_size_bytes
            )));
        }

        let ms = epoch_ms();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let (target, _) = free_slot(&self.dir, source, ms, seq).await;
        move_into_cache(source, &target).await?;

        let name = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        state.total_bytes += meta.len();
        state.queue.push_back(FileEntry {
            name,
            path: target.clone(),
            size_bytes: meta.len(),
            modified_at: Utc::now(),
            attempt_count: 0,
            not_before: None,
            in_flight: false,
        });
        drop(state);

        dgw_telemetry::record_file_cached();
        if self.policy.send_file_immediately {
            self.signal.notify_one();
        }
        Ok(target)
    }

    /// 取最旧的已到期文件并标记在途；同一连接器同时至多一个文件在途。
    /// 已消失的文件按本地 IO 错误跳过，队列继续。
    pub async fn get_file_to_send(&self) -> Result<Option<FileMeta>, CacheError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        if state.queue.iter().any(|entry| entry.in_flight) {
            return Ok(None);
        }

        let mut vanished: Vec<String> = Vec::new();
        let mut picked: Option<FileMeta> = None;
        for entry in state.queue.iter_mut() {
            if entry.not_before.is_some_and(|instant| instant > now) {
                continue;
            }
            match tokio::fs::metadata(&entry.path).await {
                Ok(meta) => {
                    entry.in_flight = true;
                    picked = Some(FileMeta {
                        path: entry.path.clone(),
                        size_bytes: meta.len(),
                        modified_at: entry.modified_at,
                    });
                    break;
                }
                Err(err) => {
                    warn!(
                        target: "dgw.cache",
                        connector_id = %self.connector_id,
                        file = %entry.name,
                        "cached file vanished, dropped: {}", err
                    );
                    vanished.push(entry.name.clone());
                }
            }
        }
        for name in vanished {
            if let Some(pos) = state.queue.iter().position(|entry| entry.name == name)
                && let Some(entry) = state.queue.remove(pos)
            {
                state.total_bytes = state.total_bytes.saturating_sub(entry.size_bytes);
            }
        }
        Ok(picked)
    }

    /// 投递确认成功：条目出队，文件交由归档服务处置。
    pub async fn remove_sent_file(&self, path: &Path) -> Result<PathBuf, CacheError> {
        let mut state = self.state.lock().await;
        let Some(pos) = state.queue.iter().position(|entry| entry.path == path) else {
            return Err(CacheError::UnknownEntry(path.display().to_string()));
        };
        let Some(entry) = state.queue.remove(pos) else {
            return Err(CacheError::UnknownEntry(path.display().to_string()));
        };
        state.total_bytes = state.total_bytes.saturating_sub(entry.size_bytes);
        drop(state);
        dgw_telemetry::record_file_sent();
        Ok(entry.path)
    }

    /// 投递失败：预算内回到队首等待 retry_interval，超出移入隔离目录。
    pub async fn manage_errored_file(&self, path: &Path) -> Result<(), CacheError> {
        let retry_after = Utc::now() + Duration::milliseconds(self.policy.retry_interval_ms as i64);
        let mut state = self.state.lock().await;
        let Some(pos) = state.queue.iter().position(|entry| entry.path == path) else {
            return Err(CacheError::UnknownEntry(path.display().to_string()));
        };
        let Some(mut entry) = state.queue.remove(pos) else {
            return Err(CacheError::UnknownEntry(path.display().to_string()));
        };
        entry.attempt_count += 1;
        entry.in_flight = false;
        dgw_telemetry::record_file_errored();

        if entry.attempt_count > self.policy.retry_count {
            let target = self.errors_dir.join(&entry.name);
            match tokio::fs::rename(&entry.path, &target).await {
                Ok(()) => {
                    state.total_bytes = state.total_bytes.saturating_sub(entry.size_bytes);
                    warn!(
                        target: "dgw.cache",
                        connector_id = %self.connector_id,
                        file = %entry.name,
                        attempts = entry.attempt_count,
                        retryable = false,
                        "file quarantined after exhausting retry budget"
                    );
                    entry.path = target;
                    state.quarantine.push(entry);
                    dgw_telemetry::record_file_quarantined();
                }
                // 隔离目录不可写是本地 IO 错误：文件留在队列里继续退避
                Err(err) => {
                    warn!(
                        target: "dgw.cache",
                        connector_id = %self.connector_id,
                        file = %entry.name,
                        "quarantine move failed, file kept in queue: {}", err
                    );
                    entry.not_before = Some(retry_after);
                    state.queue.push_front(entry);
                }
            }
        } else {
            entry.not_before = Some(retry_after);
            state.queue.push_front(entry);
        }
        Ok(())
    }

    /// 操作员动作：把隔离文件放回主队列，尝试次数清零。
    pub async fn retry_error_files(&self, names: &[String]) -> Result<(), CacheError> {
        let mut state = self.state.lock().await;
        for name in names {
            let Some(pos) = state.quarantine.iter().position(|entry| entry.name == *name)
            else {
                return Err(CacheError::UnknownEntry(name.clone()));
            };
            let mut entry = state.quarantine.remove(pos);
            if state.total_bytes + entry.size_bytes > self.policy.max_size_bytes {
                state.quarantine.insert(pos, entry);
                dgw_telemetry::record_cache_full_rejection();
                return Err(CacheError::CacheFull(format!(
                    "no room to re-enqueue quarantined file {name}"
                )));
            }
            let target = self.dir.join(&entry.name);
            if let Err(err) = tokio::fs::rename(&entry.path, &target).await {
                // 移动失败时文件回到隔离列表，不能两边都不在
                state.quarantine.insert(pos, entry);
                return Err(err.into());
            }
            info!(
                target: "dgw.cache",
                connector_id = %self.connector_id,
                file = %name,
                "quarantined file re-enqueued by operator"
            );
            entry.path = target;
            entry.attempt_count = 0;
            entry.not_before = None;
            entry.in_flight = false;
            entry.modified_at = Utc::now();
            state.total_bytes += entry.size_bytes;
            state.queue.push_back(entry);
        }
        drop(state);
        self.signal.notify_one();
        Ok(())
    }

    /// 操作员动作：放回全部隔离文件。
    pub async fn retry_all_error_files(&self) -> Result<(), CacheError> {
        let names: Vec<String> = {
            let state = self.state.lock().await;
            state
                .quarantine
                .iter()
                .map(|entry| entry.name.clone())
                .collect()
        };
        self.retry_error_files(&names).await
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.queue.is_empty()
    }

    pub async fn queued_file_count(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn size_bytes(&self) -> u64 {
        self.state.lock().await.total_bytes
    }

    /// 队列中的文件名（FIFO 顺序，用于诊断与测试）。
    pub async fn queued_file_names(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .queue
            .iter()
            .map(|entry| entry.name.clone())
            .collect()
    }

    /// 隔离区文件名。
    pub async fn error_file_names(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .quarantine
            .iter()
            .map(|entry| entry.name.clone())
            .collect()
    }

    pub fn signal(&self) -> Arc<Notify> {
        Arc::clone(&self.signal)
    }

    pub fn connector_id(&self) -> &str {
        &self.connector_id
    }
}

/// 把源文件移入缓存目录。同文件系统直接 rename；跨文件系统时
/// 先复制到缓存目录内的临时名再 rename，最后删除源文件，
/// 缓存目录里始终不会出现半写条目。
async fn move_into_cache(source: &Path, target: &Path) -> Result<(), CacheError> {
    if tokio::fs::rename(source, target).await.is_ok() {
        return Ok(());
    }
    let mut tmp_name = target
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    tmp_name.push(TMP_SUFFIX);
    let tmp = target.with_file_name(tmp_name);
    tokio::fs::copy(source, &tmp).await?;
    tokio::fs::rename(&tmp, target).await?;
    tokio::fs::remove_file(source).await?;
    Ok(())
}

/// 列出目录中的常规文件，按 (mtime, 文件名) 排序。
async fn scan_files(dir: &Path) -> Result<Vec<FileEntry>, CacheError> {
    let mut found: Vec<FileEntry> = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(dirent) = entries.next_entry().await? {
        let name = dirent.file_name().to_string_lossy().into_owned();
        if name.ends_with(TMP_SUFFIX) {
            // 跨文件系统复制中断的残留，安全丢弃
            let _ = tokio::fs::remove_file(dirent.path()).await;
            continue;
        }
        let meta = match dirent.metadata().await {
            Ok(meta) if meta.is_file() => meta,
            _ => continue,
        };
        let modified_at = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        found.push(FileEntry {
            name,
            path: dirent.path(),
            size_bytes: meta.len(),
            modified_at,
            attempt_count: 0,
            not_before: None,
            in_flight: false,
        });
    }
    found.sort_by(|a, b| {
        (a.modified_at, a.name.as_str()).cmp(&(b.modified_at, b.name.as_str()))
    });
    Ok(found)
}
