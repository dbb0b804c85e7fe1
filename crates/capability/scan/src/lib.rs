//! 南向采集调度能力
//!
//! 按扫描模式（scan mode）的 cron 表达式触发增量抽取：
//! - `ScanModeClock`：解析 cron 并按触发时刻驱动 tick
//! - `SouthConnector`：南向历史查询接口（按窗口抽取）
//! - `SouthWorker`：每个南向连接器一个工作器，负责窗口计算、
//!   子窗口切分与游标推进
//!
//! 不变式：
//! - 同一扫描模式同一时刻至多一次查询在执行；并发 tick 合并为
//!   一次补跑（rerun）
//! - 游标只依据参考时间戳字段的最大值推进，失败的查询不动游标

mod clock;
mod south;
mod worker;

use thiserror::Error;

pub use clock::ScanModeClock;
pub use south::{FanoutSink, SimulatorSouth, SouthConnector};
pub use worker::{SouthHandle, SouthWorker};

/// 采集调度错误。
#[derive(Debug, Error)]
pub enum ScanError {
    /// cron 表达式无法解析
    #[error("scan mode {0} has invalid cron expression: {1}")]
    BadCron(String, String),

    /// 南向查询失败（连接器侧错误）
    #[error("history query failed: {0}")]
    Query(String),

    /// 产出写入缓存失败
    #[error("cache rejected scan output: {0}")]
    Cache(#[from] dgw_cache::CacheError),

    /// 游标读写失败
    #[error("cursor store error: {0}")]
    Cursor(#[from] dgw_storage::StorageError),
}
