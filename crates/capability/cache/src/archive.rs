//! 投递成功后的文件处置：归档或删除，外加过期清理。
//!
//! 归档目录同样只靠磁盘内容恢复：启动时 `refresh_archive_folder`
//! 以目录实际内容重建内存列表。

use crate::entry::{epoch_ms, free_slot};
use crate::error::CacheError;
use crate::layout::CacheLayout;
use chrono::{DateTime, Utc};
use domain::ArchivePolicy;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// 一次成功投递后文件的去向。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveDisposition {
    Archived(PathBuf),
    Deleted,
}

/// 一个北向连接器的归档服务。
pub struct ArchiveService {
    connector_id: String,
    dir: PathBuf,
    policy: ArchivePolicy,
    entries: Mutex<Vec<PathBuf>>,
}

impl ArchiveService {
    pub async fn open(
        layout: &CacheLayout,
        connector_id: &str,
        policy: ArchivePolicy,
    ) -> Result<Self, CacheError> {
        let dir = layout.archive_dir(connector_id);
        tokio::fs::create_dir_all(&dir).await?;
        let service = Self {
            connector_id: connector_id.to_string(),
            dir,
            policy,
            entries: Mutex::new(Vec::new()),
        };
        service.refresh_archive_folder().await?;
        Ok(service)
    }

    /// 以目录实际内容重建内存列表（启动对账）。
    pub async fn refresh_archive_folder(&self) -> Result<(), CacheError> {
        let mut found = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(dirent) = entries.next_entry().await? {
            if dirent.metadata().await.map(|meta| meta.is_file()).unwrap_or(false) {
                found.push(dirent.path());
            }
        }
        found.sort();
        let mut listing = self.entries.lock().await;
        *listing = found;
        Ok(())
    }

    /// 投递确认成功后的处置：启用归档则原子移入归档目录，否则删除。
    pub async fn archive_or_delete(&self, path: &Path) -> Result<ArchiveDisposition, CacheError> {
        if !self.policy.enabled {
            tokio::fs::remove_file(path).await?;
            return Ok(ArchiveDisposition::Deleted);
        }
        let (target, _) = free_slot(&self.dir, path, epoch_ms(), 0).await;
        tokio::fs::rename(path, &target).await?;
        self.entries.lock().await.push(target.clone());
        dgw_telemetry::record_file_archived();
        info!(
            target: "dgw.cache",
            connector_id = %self.connector_id,
            archived = %target.display(),
            "delivered file archived"
        );
        Ok(ArchiveDisposition::Archived(target))
    }

    /// 删除超过保留期的归档条目，返回删除数量。
    pub async fn remove_files_if_too_old(&self) -> Result<usize, CacheError> {
        let cutoff = Utc::now() - self.policy.retention();
        let mut listing = self.entries.lock().await;
        let mut kept = Vec::with_capacity(listing.len());
        let mut purged = 0usize;
        for path in listing.drain(..) {
            match tokio::fs::metadata(&path).await {
                Ok(meta) => {
                    let modified: DateTime<Utc> = meta
                        .modified()
                        .map(DateTime::<Utc>::from)
                        .unwrap_or_else(|_| Utc::now());
                    if modified < cutoff {
                        if let Err(err) = tokio::fs::remove_file(&path).await {
                            warn!(
                                target: "dgw.cache",
                                connector_id = %self.connector_id,
                                file = %path.display(),
                                "archive purge failed: {}", err
                            );
                            kept.push(path);
                        } else {
                            purged += 1;
                        }
                    } else {
                        kept.push(path);
                    }
                }
                // 外部已删除，从列表移除即可
                Err(_) => {}
            }
        }
        *listing = kept;
        drop(listing);
        if purged > 0 {
            dgw_telemetry::record_archive_purged(purged as u64);
            info!(
                target: "dgw.cache",
                connector_id = %self.connector_id,
                purged = purged,
                "expired archive entries removed"
            );
        }
        Ok(purged)
    }

    /// 当前归档条目列表（用于诊断与测试）。
    pub async fn archived_files(&self) -> Vec<PathBuf> {
        self.entries.lock().await.clone()
    }

    pub fn enabled(&self) -> bool {
        self.policy.enabled
    }
}

/// 周期运行归档清理的后台任务，stop 信号到达后退出。
pub fn spawn_archive_sweep(
    service: Arc<ArchiveService>,
    interval: StdDuration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = service.remove_files_if_too_old().await {
                        warn!(
                            target: "dgw.cache",
                            connector_id = %service.connector_id,
                            "archive sweep failed: {}", err
                        );
                    }
                }
                _ = stop.changed() => {
                    if *stop.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
