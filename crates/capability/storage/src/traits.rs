//! 游标存储接口 Trait 定义
//!
//! 设计原则：
//! - 所有接口返回 StorageError
//! - 使用 async_trait 支持动态分发
//! - upsert 自带单调保护：传入更早的时刻不会回退已存的游标

use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{CursorKey, CursorRecord};

/// 游标存储接口。
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// 读取指定键的游标
    async fn get(&self, key: &CursorKey) -> Result<Option<CursorRecord>, StorageError>;

    /// 写入游标；仅当新时刻晚于已存时刻时才更新（单调不回退）
    async fn upsert(
        &self,
        key: &CursorKey,
        instant: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// 显式重置指定键的游标（删除记录）
    async fn reset(&self, key: &CursorKey) -> Result<(), StorageError>;

    /// 采集项被移除时清理其全部游标
    async fn delete_for_item(
        &self,
        connector_id: &str,
        item_id: &str,
    ) -> Result<(), StorageError>;

    /// 连接器被移除时清理其全部游标
    async fn delete_for_connector(&self, connector_id: &str) -> Result<(), StorageError>;

    /// 列出某个连接器的全部游标（用于诊断）
    async fn list_for_connector(
        &self,
        connector_id: &str,
    ) -> Result<Vec<CursorRecord>, StorageError>;
}
