//! 缓存与采集策略类型
//!
//! 这些类型是配置层产出、核心管线消费的参数面：
//! - CachingPolicy：北向缓存的分组/限额/重试参数
//! - ArchivePolicy：文件投递成功后的归档/保留策略
//! - ScanMode / ScanItem / ScanSettings：南向增量采集的调度参数

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// 北向缓存策略。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachingPolicy {
    /// 累计多少个值后触发一次自动发送
    pub group_count: usize,
    /// 单次发送的值数量上限
    pub max_send_count: usize,
    /// 缓存占用字节上限，超出后拒绝新内容
    pub max_size_bytes: u64,
    /// 失败条目重新尝试前的等待时长（毫秒）
    pub retry_interval_ms: u64,
    /// 进入隔离区前允许的尝试次数
    pub retry_count: u32,
    /// 新到文件是否绕过批次等待、立即请求发送
    pub send_file_immediately: bool,
}

impl Default for CachingPolicy {
    fn default() -> Self {
        Self {
            group_count: 1000,
            max_send_count: 10_000,
            max_size_bytes: 1024 * 1024 * 1024,
            retry_interval_ms: 5_000,
            retry_count: 3,
            send_file_immediately: true,
        }
    }
}

impl CachingPolicy {
    /// 归一化非法取值（0 分组、上限小于分组数等）。
    pub fn sanitized(mut self) -> Self {
        if self.group_count == 0 {
            self.group_count = 1;
        }
        if self.max_send_count < self.group_count {
            self.max_send_count = self.group_count;
        }
        if self.max_size_bytes == 0 {
            self.max_size_bytes = 1;
        }
        self
    }
}

/// 归档策略：投递成功后文件的去向。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivePolicy {
    /// true 则移入归档目录，false 则直接删除
    pub enabled: bool,
    /// 归档条目的保留时长（小时），到期由后台清理
    pub retention_hours: u32,
}

impl Default for ArchivePolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            retention_hours: 72,
        }
    }
}

impl ArchivePolicy {
    pub fn retention(&self) -> Duration {
        Duration::hours(i64::from(self.retention_hours))
    }
}

/// 扫描模式：连接器间共享的命名 cron 调度。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanMode {
    pub id: String,
    pub cron_expression: String,
}

/// 南向采集项：连接器在某个扫描模式下抽取的一个条目。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanItem {
    pub item_id: String,
    pub scan_mode_id: String,
    /// 驱动游标推进的参考时间戳字段
    pub reference_field: String,
}

/// 南向增量采集的窗口参数。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSettings {
    /// 窗口终点相对 now 的回退量（毫秒），避开尚未稳定的数据
    pub read_delay_ms: u64,
    /// 窗口起点向前的安全重叠量（毫秒），边界数据可能重复
    pub overlap_ms: u64,
    /// 单次查询窗口的最大跨度（秒），超出则切分为连续子窗口
    pub max_read_interval_s: u64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            read_delay_ms: 200,
            overlap_ms: 0,
            max_read_interval_s: 3600,
        }
    }
}
