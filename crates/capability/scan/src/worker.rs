//! 南向采集工作器
//!
//! 每个南向连接器一个工作器。扫描模式时钟触发 tick 后：
//! 1. 重入保护：该模式已有查询在跑时只置一次补跑标记
//! 2. 对模式下每个采集项计算窗口 `[cursor - overlap, now - read_delay)`
//! 3. 窗口超过 max_read_interval 时切分为连续子窗口逐个查询
//! 4. 查询成功且有数据时，以返回的最大参考时刻推进游标；
//!    失败的查询记日志计数，游标保持原值

use crate::ScanError;
use crate::clock::ScanModeClock;
use crate::south::SouthConnector;
use chrono::{Duration, Utc};
use dgw_cache::ContentSink;
use dgw_storage::CursorStore;
use dgw_telemetry::{record_scan_error, record_scan_query, record_scan_tick};
use domain::{CursorKey, ScanItem, ScanMode, ScanSettings};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 扫描模式的重入状态。
#[derive(Debug, Default)]
struct TickGuard {
    running: bool,
    rerun: bool,
}

/// 南向采集工作器。
pub struct SouthWorker {
    connector: Arc<dyn SouthConnector>,
    items: Vec<ScanItem>,
    clocks: Vec<ScanModeClock>,
    settings: ScanSettings,
    cursors: Arc<dyn CursorStore>,
    sink: Arc<dyn ContentSink>,
    guards: Mutex<HashMap<String, TickGuard>>,
    tick_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SouthWorker {
    /// 构建工作器；任一扫描模式的 cron 非法即拒绝整个连接器。
    pub fn new(
        connector: Arc<dyn SouthConnector>,
        items: Vec<ScanItem>,
        scan_modes: &[ScanMode],
        settings: ScanSettings,
        cursors: Arc<dyn CursorStore>,
        sink: Arc<dyn ContentSink>,
    ) -> Result<Arc<Self>, ScanError> {
        let mut clocks = Vec::new();
        for mode in scan_modes {
            if items.iter().any(|item| item.scan_mode_id == mode.id) {
                clocks.push(ScanModeClock::new(mode.clone())?);
            }
        }
        Ok(Arc::new(Self {
            connector,
            items,
            clocks,
            settings,
            cursors,
            sink,
            guards: Mutex::new(HashMap::new()),
            tick_tasks: Mutex::new(Vec::new()),
        }))
    }

    /// 为每个有采集项的扫描模式启动一个时钟任务。
    pub fn spawn(self: Arc<Self>) -> SouthHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks = Vec::new();
        for clock in self.clocks.clone() {
            let worker = Arc::clone(&self);
            let stop_rx = stop_rx.clone();
            tasks.push(tokio::spawn(worker.clock_loop(clock, stop_rx)));
        }
        info!(
            target: "dgw.scan",
            connector_id = %self.connector.connector_id(),
            scan_modes = tasks.len(),
            "south worker started"
        );
        SouthHandle {
            stop_tx,
            tasks,
            worker: self,
        }
    }

    async fn clock_loop(self: Arc<Self>, clock: ScanModeClock, mut stop_rx: watch::Receiver<bool>) {
        loop {
            let now = Utc::now();
            let Some(next) = clock.next_fire(now) else {
                warn!(
                    target: "dgw.scan",
                    scan_mode_id = %clock.mode_id(),
                    "cron schedule has no future fire, clock stopping"
                );
                return;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    record_scan_tick();
                    // tick 派生为独立任务：扫描仍在跑时新 tick 立即
                    // 返回并置补跑标记，而不是在时钟上排队。
                    // 句柄登记到工作器，停止时逐一等待收尾。
                    let worker = Arc::clone(&self);
                    let mode_id = clock.mode_id().to_string();
                    let task = tokio::spawn(async move { worker.run_tick(&mode_id).await });
                    let mut ticks = self.tick_tasks.lock().await;
                    ticks.retain(|task| !task.is_finished());
                    ticks.push(task);
                }
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// 执行一次该扫描模式的采集；已有查询在跑时合并为一次补跑。
    pub async fn run_tick(&self, scan_mode_id: &str) {
        {
            let mut guards = self.guards.lock().await;
            let guard = guards.entry(scan_mode_id.to_string()).or_default();
            if guard.running {
                guard.rerun = true;
                debug!(
                    target: "dgw.scan",
                    scan_mode_id,
                    "scan already running, coalesced into rerun"
                );
                return;
            }
            guard.running = true;
        }

        loop {
            self.scan_mode_once(scan_mode_id).await;

            let mut guards = self.guards.lock().await;
            let guard = guards.entry(scan_mode_id.to_string()).or_default();
            if guard.rerun {
                guard.rerun = false;
                continue;
            }
            guard.running = false;
            return;
        }
    }

    async fn scan_mode_once(&self, scan_mode_id: &str) {
        if !self.connector.supports_history() {
            return;
        }
        let items: Vec<ScanItem> = self
            .items
            .iter()
            .filter(|item| item.scan_mode_id == scan_mode_id)
            .cloned()
            .collect();
        for item in items {
            if let Err(err) = self.scan_item(&item).await {
                record_scan_error();
                warn!(
                    target: "dgw.scan",
                    connector_id = %self.connector.connector_id(),
                    item_id = %item.item_id,
                    error = %err,
                    "scan failed, cursor left unchanged"
                );
            }
        }
    }

    /// 对单个采集项跑完整个待读窗口。
    async fn scan_item(&self, item: &ScanItem) -> Result<(), ScanError> {
        let key = CursorKey::new(
            self.connector.connector_id(),
            item.item_id.clone(),
            item.scan_mode_id.clone(),
        );
        let end = Utc::now() - Duration::milliseconds(self.settings.read_delay_ms as i64);
        let max_span = Duration::seconds(self.settings.max_read_interval_s.max(1) as i64);

        // 无游标时从一个窗口跨度前开始，避免首跑抽取无界历史
        let base = match self.cursors.get(&key).await? {
            Some(record) => record.last_max_instant,
            None => end - max_span,
        };
        let mut start = base - Duration::milliseconds(self.settings.overlap_ms as i64);
        if start >= end {
            return Ok(());
        }

        while start < end {
            let sub_end = std::cmp::min(start + max_span, end);
            record_scan_query();
            let updated = self
                .connector
                .history_query(std::slice::from_ref(item), start, sub_end, self.sink.as_ref())
                .await?;
            match updated {
                Some(instant) => {
                    self.cursors.upsert(&key, instant).await?;
                    debug!(
                        target: "dgw.scan",
                        item_id = %item.item_id,
                        last_max_instant = %instant,
                        "cursor advanced"
                    );
                    // 返回的最大时刻成为下一子窗口起点；
                    // 未前进时退回子窗口终点保证收敛
                    start = if instant > start { instant } else { sub_end };
                }
                // 子窗口无数据：窗口继续前进，游标不动
                None => start = sub_end,
            }
        }
        Ok(())
    }
}

/// 南向工作器句柄：停止信号 + 时钟任务。
pub struct SouthHandle {
    stop_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    worker: Arc<SouthWorker>,
}

impl SouthHandle {
    /// 先停时钟（不再派生新 tick），再等待已派生的采集任务
    /// 完整跑完（含游标写入）后返回。
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        let ticks: Vec<JoinHandle<()>> = {
            let mut ticks = self.worker.tick_tasks.lock().await;
            ticks.drain(..).collect()
        };
        for task in ticks {
            let _ = task.await;
        }
    }
}
