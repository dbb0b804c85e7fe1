use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 游标键：(南向连接器, 采集项, 扫描模式) 三元组。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorKey {
    pub connector_id: String,
    pub item_id: String,
    pub scan_mode_id: String,
}

impl CursorKey {
    pub fn new(
        connector_id: impl Into<String>,
        item_id: impl Into<String>,
        scan_mode_id: impl Into<String>,
    ) -> Self {
        Self {
            connector_id: connector_id.into(),
            item_id: item_id.into(),
            scan_mode_id: scan_mode_id.into(),
        }
    }
}

/// 游标记录：某个键已处理到的最大时刻。
///
/// 除显式 reset 外单调不回退。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorRecord {
    pub key: CursorKey,
    pub last_max_instant: DateTime<Utc>,
}
