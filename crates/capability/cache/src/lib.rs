//! 北向缓存能力
//!
//! 南向采集与北向投递之间的持久化管道：
//! - `ValueCache`：时序值批次的落盘 FIFO 队列
//! - `FileCache`：文件引用的落盘 FIFO 队列（目录即队列，无索引）
//! - `ArchiveService`：投递成功后的归档/删除与过期清理
//! - `ContentSink`：南向产出写入缓存的统一入口
//!
//! 不变式：
//! - 每个缓存保持 FIFO；条目在主队列、在途、隔离区、归档四者中
//!   恰好占据一处
//! - 缓存占用字节不超过 max_size_bytes，超出的写入被拒绝
//! - 条目只有在目的端确认成功后才会被删除（at-least-once）

mod archive;
mod entry;
mod error;
mod file_cache;
mod layout;
mod value_cache;

use async_trait::async_trait;
use domain::TimeValue;
use std::path::Path;
use std::sync::Arc;

pub use archive::{ArchiveDisposition, ArchiveService, spawn_archive_sweep};
pub use entry::epoch_ms;
pub use error::CacheError;
pub use file_cache::FileCache;
pub use layout::CacheLayout;
pub use value_cache::{ValueBatch, ValueCache};

/// 南向产出的写入端：一个北向目的地的值/文件缓存对。
#[async_trait]
pub trait ContentSink: Send + Sync {
    async fn add_values(&self, values: Vec<TimeValue>) -> Result<(), CacheError>;
    async fn add_file(&self, path: &Path) -> Result<(), CacheError>;
}

/// 一个北向连接器的缓存对。
#[derive(Clone)]
pub struct NorthCaches {
    pub values: Arc<ValueCache>,
    pub files: Arc<FileCache>,
}

impl NorthCaches {
    pub fn new(values: Arc<ValueCache>, files: Arc<FileCache>) -> Self {
        Self { values, files }
    }
}

#[async_trait]
impl ContentSink for NorthCaches {
    async fn add_values(&self, values: Vec<TimeValue>) -> Result<(), CacheError> {
        if values.is_empty() {
            return Ok(());
        }
        self.values.cache_values(&values).await
    }

    async fn add_file(&self, path: &Path) -> Result<(), CacheError> {
        self.files.cache_file(path).await.map(|_| ())
    }
}
