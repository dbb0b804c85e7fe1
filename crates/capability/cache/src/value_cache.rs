//! 时序值批次的落盘 FIFO 缓存。
//!
//! 每个入队批次是目录下的一个 JSON 条目文件，文件名编码连接器与
//! 入队时刻，重启后仅靠目录列表即可恢复队列顺序。条目在成功投递
//! 前不会被删除；失败条目按 retry_interval 退避重试，超出
//! retry_count 后移入隔离目录，由操作员显式放回。

use crate::entry::{
    TMP_SUFFIX, epoch_ms, parse_value_entry_name, value_entry_name, write_atomically,
};
use crate::error::CacheError;
use crate::layout::CacheLayout;
use chrono::{DateTime, Duration, Utc};
use domain::{CachingPolicy, TimeValue};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, Notify};
use tracing::{info, warn};

/// 已出队待发送的一个条目及其载荷。
#[derive(Debug, Clone)]
pub struct ValueBatch {
    pub id: String,
    pub values: Vec<TimeValue>,
}

#[derive(Debug, Clone)]
struct ValueEntry {
    /// 条目 ID 即文件名
    id: String,
    path: PathBuf,
    value_count: usize,
    size_bytes: u64,
    attempt_count: u32,
    not_before: Option<DateTime<Utc>>,
    in_flight: bool,
}

#[derive(Default)]
struct ValueCacheState {
    queue: VecDeque<ValueEntry>,
    quarantine: Vec<ValueEntry>,
    total_bytes: u64,
}

/// 一个北向连接器的值缓存。
pub struct ValueCache {
    connector_id: String,
    dir: PathBuf,
    errors_dir: PathBuf,
    policy: CachingPolicy,
    signal: Arc<Notify>,
    seq: AtomicU64,
    state: Mutex<ValueCacheState>,
}

impl ValueCache {
    /// 打开缓存：建目录、清理半写临时文件、从目录内容恢复队列。
    pub async fn open(
        layout: &CacheLayout,
        connector_id: &str,
        policy: CachingPolicy,
        signal: Arc<Notify>,
    ) -> Result<Self, CacheError> {
        let dir = layout.values_dir(connector_id);
        let errors_dir = layout.value_errors_dir(connector_id);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::create_dir_all(&errors_dir).await?;

        let cache = Self {
            connector_id: connector_id.to_string(),
            dir,
            errors_dir,
            policy: policy.sanitized(),
            signal,
            seq: AtomicU64::new(0),
            state: Mutex::new(ValueCacheState::default()),
        };
        let recovered = cache.recover().await?;
        if recovered > 0 {
            info!(
                target: "dgw.cache",
                connector_id = %cache.connector_id,
                entries = recovered,
                "value cache recovered from disk"
            );
        }
        Ok(cache)
    }

    /// 重新扫描主目录与隔离目录，重建内存队列。返回恢复的条目数。
    async fn recover(&self) -> Result<usize, CacheError> {
        let mut max_seq = 0u64;
        let queue = self
            .scan_dir(&self.dir, &mut max_seq)
            .await?
            .into_iter()
            .collect::<VecDeque<_>>();
        let quarantine = self.scan_dir(&self.errors_dir, &mut max_seq).await?;
        self.seq.store(max_seq + 1, Ordering::Relaxed);

        let mut state = self.state.lock().await;
        state.total_bytes = queue.iter().map(|entry| entry.size_bytes).sum();
        let recovered = queue.len();
        state.queue = queue;
        state.quarantine = quarantine;
        Ok(recovered)
    }

    async fn scan_dir(
        &self,
        dir: &PathBuf,
        max_seq: &mut u64,
    ) -> Result<Vec<ValueEntry>, CacheError> {
        let mut found: Vec<(i64, u64, ValueEntry)> = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(dirent) = entries.next_entry().await? {
            let name = dirent.file_name().to_string_lossy().into_owned();
            if name.ends_with(TMP_SUFFIX) {
                // 崩溃残留的半写条目，安全丢弃
                let _ = tokio::fs::remove_file(dirent.path()).await;
                continue;
            }
            let Some((ms, seq)) = parse_value_entry_name(&self.connector_id, &name) else {
                warn!(
                    target: "dgw.cache",
                    connector_id = %self.connector_id,
                    file = %name,
                    "foreign file in value cache dir, ignored"
                );
                continue;
            };
            *max_seq = (*max_seq).max(seq);
            let path = dirent.path();
            let value_count = match tokio::fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<Vec<TimeValue>>(&bytes) {
                    Ok(values) => values.len(),
                    Err(err) => {
                        warn!(
                            target: "dgw.cache",
                            connector_id = %self.connector_id,
                            file = %name,
                            "corrupt value entry skipped at recovery: {}", err
                        );
                        continue;
                    }
                },
                Err(err) => {
                    warn!(
                        target: "dgw.cache",
                        connector_id = %self.connector_id,
                        file = %name,
                        "unreadable value entry skipped at recovery: {}", err
                    );
                    continue;
                }
            };
            let size_bytes = dirent.metadata().await.map(|meta| meta.len()).unwrap_or(0);
            found.push((
                ms,
                seq,
                ValueEntry {
                    id: name,
                    path,
                    value_count,
                    size_bytes,
                    attempt_count: 0,
                    not_before: None,
                    in_flight: false,
                },
            ));
        }
        found.sort_by_key(|(ms, seq, _)| (*ms, *seq));
        Ok(found.into_iter().map(|(_, _, entry)| entry).collect())
    }

    /// 持久化追加一个批次；累计值数达到 group_count 或字节占用
    /// 达到上限时唤醒发送循环。
    pub async fn cache_values(&self, values: &[TimeValue]) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(values)?;
        let mut state = self.state.lock().await;
        if state.total_bytes + bytes.len() as u64 > self.policy.max_size_bytes {
            dgw_telemetry::record_cache_full_rejection();
            return Err(CacheError::CacheFull(format!(
                "{} bytes queued, {} incoming, limit {}",
                state.total_bytes,
                bytes.len(),
                self.policy.max_size_bytes
            )));
        }

        let ms = epoch_ms();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let id = value_entry_name(&self.connector_id, ms, seq);
        let path = self.dir.join(&id);
        write_atomically(&path, &bytes).await?;

        state.total_bytes += bytes.len() as u64;
        state.queue.push_back(ValueEntry {
            id,
            path,
            value_count: values.len(),
            size_bytes: bytes.len() as u64,
            attempt_count: 0,
            not_before: None,
            in_flight: false,
        });

        let queued: usize = state
            .queue
            .iter()
            .filter(|entry| !entry.in_flight)
            .map(|entry| entry.value_count)
            .sum();
        let full = state.total_bytes >= self.policy.max_size_bytes;
        drop(state);

        dgw_telemetry::record_values_cached(values.len() as u64);
        if queued >= self.policy.group_count || full {
            self.signal.notify_one();
        }
        Ok(())
    }

    /// 取最旧的、已到期且不在途的条目并标记为在途，累计值数不超过
    /// `limit`（至少返回一个条目）。读不到的条目按本地 IO 错误跳过。
    pub async fn get_values_to_send(&self, limit: usize) -> Result<Vec<ValueBatch>, CacheError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;

        let mut batches = Vec::new();
        let mut taken = 0usize;
        let mut dropped: Vec<String> = Vec::new();
        for entry in state.queue.iter_mut() {
            if entry.in_flight {
                continue;
            }
            if entry.not_before.is_some_and(|instant| instant > now) {
                continue;
            }
            if !batches.is_empty() && taken + entry.value_count > limit {
                break;
            }
            match tokio::fs::read(&entry.path).await {
                Ok(bytes) => match serde_json::from_slice::<Vec<TimeValue>>(&bytes) {
                    Ok(values) => {
                        entry.in_flight = true;
                        taken += values.len();
                        batches.push(ValueBatch {
                            id: entry.id.clone(),
                            values,
                        });
                        if taken >= limit {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(
                            target: "dgw.cache",
                            connector_id = %self.connector_id,
                            entry_id = %entry.id,
                            "corrupt value entry dropped: {}", err
                        );
                        dropped.push(entry.id.clone());
                    }
                },
                Err(err) => {
                    warn!(
                        target: "dgw.cache",
                        connector_id = %self.connector_id,
                        entry_id = %entry.id,
                        "value entry vanished, dropped: {}", err
                    );
                    dropped.push(entry.id.clone());
                }
            }
        }

        for id in dropped {
            if let Some(pos) = state.queue.iter().position(|entry| entry.id == id)
                && let Some(entry) = state.queue.remove(pos)
            {
                state.total_bytes = state.total_bytes.saturating_sub(entry.size_bytes);
                let _ = tokio::fs::remove_file(&entry.path).await;
            }
        }
        Ok(batches)
    }

    /// 投递确认成功后永久删除条目。
    pub async fn remove_sent_values(&self, ids: &[String]) -> Result<(), CacheError> {
        let mut state = self.state.lock().await;
        let mut sent_values = 0u64;
        for id in ids {
            let Some(pos) = state.queue.iter().position(|entry| entry.id == *id) else {
                return Err(CacheError::UnknownEntry(id.clone()));
            };
            if let Some(entry) = state.queue.remove(pos) {
                state.total_bytes = state.total_bytes.saturating_sub(entry.size_bytes);
                sent_values += entry.value_count as u64;
                if let Err(err) = tokio::fs::remove_file(&entry.path).await {
                    if err.kind() != std::io::ErrorKind::NotFound {
                        warn!(
                            target: "dgw.cache",
                            connector_id = %self.connector_id,
                            entry_id = %id,
                            "sent value entry cleanup failed: {}", err
                        );
                    }
                }
            }
        }
        drop(state);
        dgw_telemetry::record_values_sent(sent_values);
        Ok(())
    }

    /// 投递失败：尝试次数 +1。预算内回到队首并在 retry_interval 后
    /// 重新可发；超出预算移入隔离目录。
    pub async fn manage_errored_values(&self, ids: &[String]) -> Result<(), CacheError> {
        let retry_after = Utc::now() + Duration::milliseconds(self.policy.retry_interval_ms as i64);
        let mut state = self.state.lock().await;

        // 逆序 push_front 保持这些条目之间的相对顺序
        for id in ids.iter().rev() {
            let Some(pos) = state.queue.iter().position(|entry| entry.id == *id) else {
                return Err(CacheError::UnknownEntry(id.clone()));
            };
            let Some(mut entry) = state.queue.remove(pos) else {
                continue;
            };
            entry.attempt_count += 1;
            entry.in_flight = false;
            dgw_telemetry::record_values_errored();

            if entry.attempt_count > self.policy.retry_count {
                let target = self.errors_dir.join(&entry.id);
                match tokio::fs::rename(&entry.path, &target).await {
                    Ok(()) => {
                        state.total_bytes = state.total_bytes.saturating_sub(entry.size_bytes);
                        warn!(
                            target: "dgw.cache",
                            connector_id = %self.connector_id,
                            entry_id = %entry.id,
                            attempts = entry.attempt_count,
                            retryable = false,
                            "value entry quarantined after exhausting retry budget"
                        );
                        entry.path = target;
                        state.quarantine.push(entry);
                        dgw_telemetry::record_values_quarantined();
                    }
                    // 隔离目录不可写是本地 IO 错误：条目留在队列里
                    // 继续退避，下次预算耗尽时重试移动
                    Err(err) => {
                        warn!(
                            target: "dgw.cache",
                            connector_id = %self.connector_id,
                            entry_id = %entry.id,
                            "quarantine move failed, entry kept in queue: {}", err
                        );
                        entry.not_before = Some(retry_after);
                        state.queue.push_front(entry);
                    }
                }
            } else {
                entry.not_before = Some(retry_after);
                state.queue.push_front(entry);
            }
        }
        Ok(())
    }

    /// 操作员动作：把隔离条目放回主队列，尝试次数清零。
    pub async fn retry_error_values(&self, ids: &[String]) -> Result<(), CacheError> {
        let mut state = self.state.lock().await;
        for id in ids {
            let Some(pos) = state.quarantine.iter().position(|entry| entry.id == *id) else {
                return Err(CacheError::UnknownEntry(id.clone()));
            };
            let mut entry = state.quarantine.remove(pos);
            if state.total_bytes + entry.size_bytes > self.policy.max_size_bytes {
                state.quarantine.insert(pos, entry);
                dgw_telemetry::record_cache_full_rejection();
                return Err(CacheError::CacheFull(format!(
                    "no room to re-enqueue quarantined entry {id}"
                )));
            }
            let ms = epoch_ms();
            let seq = self.seq.fetch_add(1, Ordering::Relaxed);
            let new_id = value_entry_name(&self.connector_id, ms, seq);
            let target = self.dir.join(&new_id);
            if let Err(err) = tokio::fs::rename(&entry.path, &target).await {
                // 移动失败时条目回到隔离列表，不能两边都不在
                state.quarantine.insert(pos, entry);
                return Err(err.into());
            }
            info!(
                target: "dgw.cache",
                connector_id = %self.connector_id,
                entry_id = %id,
                retried_as = %new_id,
                "quarantined value entry re-enqueued by operator"
            );
            entry.id = new_id;
            entry.path = target;
            entry.attempt_count = 0;
            entry.not_before = None;
            entry.in_flight = false;
            state.total_bytes += entry.size_bytes;
            state.queue.push_back(entry);
        }
        drop(state);
        self.signal.notify_one();
        Ok(())
    }

    /// 操作员动作：放回全部隔离条目。
    pub async fn retry_all_error_values(&self) -> Result<(), CacheError> {
        let ids: Vec<String> = {
            let state = self.state.lock().await;
            state
                .quarantine
                .iter()
                .map(|entry| entry.id.clone())
                .collect()
        };
        self.retry_error_values(&ids).await
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.queue.is_empty()
    }

    /// 不在途条目的累计值数。
    pub async fn queued_value_count(&self) -> usize {
        self.state
            .lock()
            .await
            .queue
            .iter()
            .filter(|entry| !entry.in_flight)
            .map(|entry| entry.value_count)
            .sum()
    }

    pub async fn size_bytes(&self) -> u64 {
        self.state.lock().await.total_bytes
    }

    /// 隔离区条目 ID（入队顺序）。
    pub async fn error_entry_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .quarantine
            .iter()
            .map(|entry| entry.id.clone())
            .collect()
    }

    /// 发送循环等待的唤醒信号。
    pub fn signal(&self) -> Arc<Notify> {
        Arc::clone(&self.signal)
    }

    pub fn connector_id(&self) -> &str {
        &self.connector_id
    }
}
