//! 扫描模式时钟
//!
//! 每个扫描模式一个时钟：解析 cron 表达式，
//! 在每个触发时刻向工作器发出一次 tick。

use crate::ScanError;
use chrono::{DateTime, Utc};
use cron::Schedule;
use domain::ScanMode;
use std::str::FromStr;

/// 扫描模式时钟：cron 表达式的解析结果与下次触发时刻计算。
#[derive(Debug, Clone)]
pub struct ScanModeClock {
    mode: ScanMode,
    schedule: Schedule,
}

impl ScanModeClock {
    /// 解析扫描模式的 cron 表达式。表达式非法时拒绝整个模式，
    /// 而不是静默跳过。
    pub fn new(mode: ScanMode) -> Result<Self, ScanError> {
        let schedule = Schedule::from_str(&mode.cron_expression)
            .map_err(|err| ScanError::BadCron(mode.id.clone(), err.to_string()))?;
        Ok(Self { mode, schedule })
    }

    pub fn mode_id(&self) -> &str {
        &self.mode.id
    }

    /// 严格晚于 `after` 的下一次触发时刻。
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn mode(expr: &str) -> ScanMode {
        ScanMode {
            id: "every-10s".into(),
            cron_expression: expr.into(),
        }
    }

    #[test]
    fn parses_valid_cron_and_yields_increasing_fires() {
        let clock = ScanModeClock::new(mode("*/10 * * * * *")).unwrap();
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let first = clock.next_fire(base).unwrap();
        let second = clock.next_fire(first).unwrap();

        assert!(first > base);
        assert!(second > first);
        assert_eq!((second - first).num_seconds(), 10);
    }

    #[test]
    fn rejects_malformed_cron() {
        let err = ScanModeClock::new(mode("not a cron")).unwrap_err();
        assert!(matches!(err, ScanError::BadCron(id, _) if id == "every-10s"));
    }
}
