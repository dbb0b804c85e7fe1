//! 游标存储内存实现
//!
//! 仅用于本地测试和占位。

use crate::error::StorageError;
use crate::traits::CursorStore;
use chrono::{DateTime, Utc};
use domain::{CursorKey, CursorRecord};
use std::collections::HashMap;
use std::sync::RwLock;

/// 游标内存存储。
pub struct InMemoryCursorStore {
    cursors: RwLock<HashMap<CursorKey, DateTime<Utc>>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self {
            cursors: RwLock::new(HashMap::new()),
        }
    }

    /// 当前游标数量（用于测试）
    pub fn len(&self) -> usize {
        self.cursors.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryCursorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn get(&self, key: &CursorKey) -> Result<Option<CursorRecord>, StorageError> {
        let cursors = self
            .cursors
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(cursors.get(key).map(|instant| CursorRecord {
            key: key.clone(),
            last_max_instant: *instant,
        }))
    }

    async fn upsert(
        &self,
        key: &CursorKey,
        instant: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut cursors = self
            .cursors
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        match cursors.get_mut(key) {
            Some(existing) if *existing >= instant => {}
            Some(existing) => *existing = instant,
            None => {
                cursors.insert(key.clone(), instant);
            }
        }
        Ok(())
    }

    async fn reset(&self, key: &CursorKey) -> Result<(), StorageError> {
        let mut cursors = self
            .cursors
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        cursors.remove(key);
        Ok(())
    }

    async fn delete_for_item(
        &self,
        connector_id: &str,
        item_id: &str,
    ) -> Result<(), StorageError> {
        let mut cursors = self
            .cursors
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        cursors.retain(|key, _| !(key.connector_id == connector_id && key.item_id == item_id));
        Ok(())
    }

    async fn delete_for_connector(&self, connector_id: &str) -> Result<(), StorageError> {
        let mut cursors = self
            .cursors
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        cursors.retain(|key, _| key.connector_id != connector_id);
        Ok(())
    }

    async fn list_for_connector(
        &self,
        connector_id: &str,
    ) -> Result<Vec<CursorRecord>, StorageError> {
        let cursors = self
            .cursors
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut records: Vec<CursorRecord> = cursors
            .iter()
            .filter(|(key, _)| key.connector_id == connector_id)
            .map(|(key, instant)| CursorRecord {
                key: key.clone(),
                last_max_instant: *instant,
            })
            .collect();
        records.sort_by(|a, b| {
            (&a.key.item_id, &a.key.scan_mode_id).cmp(&(&b.key.item_id, &b.key.scan_mode_id))
        });
        Ok(records)
    }
}
