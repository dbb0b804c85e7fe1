use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 时序值的数据类型。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum TimeValueData {
    I64(i64),
    F64(f64),
    Bool(bool),
    String(String),
}

/// 南向采集到的单个时序值。
///
/// `reference` 是点位/字段标识；游标只依据被标记为参考时间戳
/// 字段的 `timestamp` 推进。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeValue {
    pub reference: String,
    pub timestamp: DateTime<Utc>,
    pub data: TimeValueData,
}

impl TimeValue {
    pub fn new(
        reference: impl Into<String>,
        timestamp: DateTime<Utc>,
        data: TimeValueData,
    ) -> Self {
        Self {
            reference: reference.into(),
            timestamp,
            data,
        }
    }
}

/// 待投递文件的元信息（路径 + 大小 + 修改时间）。
#[derive(Debug, Clone, PartialEq)]
pub struct FileMeta {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
}
