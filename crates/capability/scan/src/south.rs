//! 南向连接器接口与内置实现
//!
//! `SouthConnector` 只暴露按窗口的历史查询；产出通过 `ContentSink`
//! 直接写入北向缓存，返回值是本窗口参考时间戳字段的最大值。

use crate::ScanError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dgw_cache::{CacheError, ContentSink};
use domain::{ScanItem, TimeValue, TimeValueData};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// 南向连接器：按时间窗口抽取增量数据。
///
/// `history_query` 把窗口内的数据写入 `sink`，并返回窗口内
/// 参考时间戳字段的最大值；窗口内无数据时返回 `None`。
#[async_trait]
pub trait SouthConnector: Send + Sync {
    /// 连接器标识，用于日志与游标键
    fn connector_id(&self) -> &str;

    /// 是否支持历史窗口查询；不支持的连接器不会被调度
    fn supports_history(&self) -> bool;

    /// 抽取 `[start, end)` 窗口内指定采集项的数据
    async fn history_query(
        &self,
        items: &[ScanItem],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        sink: &dyn ContentSink,
    ) -> Result<Option<DateTime<Utc>>, ScanError>;
}

/// 把一份南向产出扇出到多个北向缓存。
///
/// 某个目的地缓存已满时记录并继续其余目的地，
/// 最后把第一个错误返回给连接器自行决策。
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ContentSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn ContentSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl ContentSink for FanoutSink {
    async fn add_values(&self, values: Vec<TimeValue>) -> Result<(), CacheError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(err) = sink.add_values(values.clone()).await {
                warn!(target: "dgw.scan", error = %err, "north cache rejected values");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn add_file(&self, path: &Path) -> Result<(), CacheError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(err) = sink.add_file(path).await {
                warn!(target: "dgw.scan", error = %err, "north cache rejected file");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// 内置模拟南向：按固定步长在窗口内生成正弦波读数。
///
/// 用于无真实设备时跑通整条管线。
pub struct SimulatorSouth {
    connector_id: String,
    step: Duration,
}

impl SimulatorSouth {
    pub fn new(connector_id: impl Into<String>, step_ms: u64) -> Self {
        Self {
            connector_id: connector_id.into(),
            step: Duration::milliseconds(step_ms.max(1) as i64),
        }
    }
}

#[async_trait]
impl SouthConnector for SimulatorSouth {
    fn connector_id(&self) -> &str {
        &self.connector_id
    }

    fn supports_history(&self) -> bool {
        true
    }

    async fn history_query(
        &self,
        items: &[ScanItem],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        sink: &dyn ContentSink,
    ) -> Result<Option<DateTime<Utc>>, ScanError> {
        let mut values = Vec::new();
        let mut max_instant = None;

        let mut at = start;
        while at < end {
            let phase = at.timestamp_millis() as f64 / 10_000.0;
            for item in items {
                values.push(TimeValue::new(
                    item.reference_field.clone(),
                    at,
                    TimeValueData::F64(phase.sin()),
                ));
            }
            max_instant = Some(at);
            at += self.step;
        }

        if values.is_empty() {
            return Ok(None);
        }
        sink.add_values(values).await?;
        Ok(max_instant)
    }
}
