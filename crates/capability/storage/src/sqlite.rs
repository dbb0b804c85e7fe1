//! 游标存储 SQLite 实现
//!
//! 游标表随网关本地落盘（south_cache），重启后增量采集从上次
//! 处理到的时刻继续。
//!
//! 设计要点：
//! - 时刻以 RFC 3339（UTC、微秒精度）文本存储，字典序即时间序，
//!   单调保护可以直接在 SQL 中用字符串比较表达
//! - upsert 通过 ON CONFLICT 实现，回退写入被 WHERE 过滤掉

use crate::error::StorageError;
use crate::traits::CursorStore;
use chrono::{DateTime, SecondsFormat, Utc};
use domain::{CursorKey, CursorRecord};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;

const SCHEMA: &str = "create table if not exists south_cache (\
     connector_id text not null, \
     item_id text not null, \
     scan_mode_id text not null, \
     last_max_instant text not null, \
     primary key (connector_id, item_id, scan_mode_id))";

/// 游标 SQLite 存储。
pub struct SqliteCursorStore {
    pool: SqlitePool,
}

impl SqliteCursorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 打开（必要时创建）游标库并确保表结构存在。
    pub async fn connect(db_path: &Path) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }
}

fn encode_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_instant(text: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(text)
        .map(|instant| instant.with_timezone(&Utc))
        .map_err(|err| StorageError::new(format!("bad instant '{text}': {err}")))
}

#[async_trait::async_trait]
impl CursorStore for SqliteCursorStore {
    async fn get(&self, key: &CursorKey) -> Result<Option<CursorRecord>, StorageError> {
        let row = sqlx::query(
            "select last_max_instant from south_cache \
             where connector_id = ?1 and item_id = ?2 and scan_mode_id = ?3",
        )
        .bind(&key.connector_id)
        .bind(&key.item_id)
        .bind(&key.scan_mode_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let text: String = row.try_get("last_max_instant")?;
        Ok(Some(CursorRecord {
            key: key.clone(),
            last_max_instant: decode_instant(&text)?,
        }))
    }

    async fn upsert(
        &self,
        key: &CursorKey,
        instant: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "insert into south_cache (connector_id, item_id, scan_mode_id, last_max_instant) \
             values (?1, ?2, ?3, ?4) \
             on conflict (connector_id, item_id, scan_mode_id) \
             do update set last_max_instant = excluded.last_max_instant \
             where excluded.last_max_instant > south_cache.last_max_instant",
        )
        .bind(&key.connector_id)
        .bind(&key.item_id)
        .bind(&key.scan_mode_id)
        .bind(encode_instant(instant))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reset(&self, key: &CursorKey) -> Result<(), StorageError> {
        sqlx::query(
            "delete from south_cache \
             where connector_id = ?1 and item_id = ?2 and scan_mode_id = ?3",
        )
        .bind(&key.connector_id)
        .bind(&key.item_id)
        .bind(&key.scan_mode_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_for_item(
        &self,
        connector_id: &str,
        item_id: &str,
    ) -> Result<(), StorageError> {
        sqlx::query("delete from south_cache where connector_id = ?1 and item_id = ?2")
            .bind(connector_id)
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_for_connector(&self, connector_id: &str) -> Result<(), StorageError> {
        sqlx::query("delete from south_cache where connector_id = ?1")
            .bind(connector_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_for_connector(
        &self,
        connector_id: &str,
    ) -> Result<Vec<CursorRecord>, StorageError> {
        let rows = sqlx::query(
            "select item_id, scan_mode_id, last_max_instant from south_cache \
             where connector_id = ?1 order by item_id, scan_mode_id",
        )
        .bind(connector_id)
        .fetch_all(&self.pool)
        .await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let item_id: String = row.try_get("item_id")?;
            let scan_mode_id: String = row.try_get("scan_mode_id")?;
            let text: String = row.try_get("last_max_instant")?;
            records.push(CursorRecord {
                key: CursorKey::new(connector_id, item_id, scan_mode_id),
                last_max_instant: decode_instant(&text)?,
            });
        }
        Ok(records)
    }
}
