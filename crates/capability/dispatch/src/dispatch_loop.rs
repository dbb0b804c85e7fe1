//! 每个北向连接器一个的发送循环。
//!
//! 状态机：IDLE → RUNNING → (成功→IDLE | 退避→RETRY_WAIT→RUNNING |
//! 条目隔离后继续 RUNNING)，任何状态可经显式停止请求进入 STOPPED，
//! 停止前先让在途尝试完整结束。同一目的地同时至多一个在途尝试，
//! 保证不乱序。
//!
//! 循环的唤醒来自缓存的 Notify（有新内容/批次凑齐），无唤醒时按
//! send_interval 兜底扫描，不忙轮询。

use crate::north::NorthConnector;
use dgw_cache::{ArchiveService, FileCache, ValueCache};
use domain::CachingPolicy;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// 发送循环的可观测状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Running,
    RetryWait,
    Stopped,
}

/// 单个发送周期的结果。
enum CycleOutcome {
    /// 投递了内容（或隔离了耗尽预算的条目），立即进入下一周期
    Progressed,
    /// 有失败条目进入退避等待
    RetryScheduled,
    /// 没有到期内容
    Nothing,
}

/// 一个北向连接器的发送循环。
pub struct DispatchLoop {
    connector_id: String,
    connector: Arc<dyn NorthConnector>,
    values: Arc<ValueCache>,
    files: Arc<FileCache>,
    archive: Arc<ArchiveService>,
    policy: CachingPolicy,
    send_interval: Duration,
    signal: Arc<Notify>,
}

/// 已启动循环的句柄：状态观察与停止（先排空在途尝试）。
pub struct DispatchHandle {
    stop_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<DispatchState>,
    task: JoinHandle<()>,
}

impl DispatchHandle {
    pub fn state(&self) -> DispatchState {
        *self.state_rx.borrow()
    }

    /// 请求停止并等待循环退出；在途尝试会先完整结束。
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.task.await;
    }
}

impl DispatchLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connector_id: impl Into<String>,
        connector: Arc<dyn NorthConnector>,
        values: Arc<ValueCache>,
        files: Arc<FileCache>,
        archive: Arc<ArchiveService>,
        policy: CachingPolicy,
        send_interval: Duration,
        signal: Arc<Notify>,
    ) -> Self {
        Self {
            connector_id: connector_id.into(),
            connector,
            values,
            files,
            archive,
            policy: policy.sanitized(),
            send_interval,
            signal,
        }
    }

    /// 启动循环任务。
    pub fn spawn(self) -> DispatchHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(DispatchState::Idle);
        let task = tokio::spawn(self.run(stop_rx, state_tx));
        DispatchHandle {
            stop_tx,
            state_rx,
            task,
        }
    }

    async fn run(self, mut stop_rx: watch::Receiver<bool>, state_tx: watch::Sender<DispatchState>) {
        info!(
            target: "dgw.dispatch",
            connector_id = %self.connector_id,
            "dispatch loop started"
        );
        loop {
            if *stop_rx.borrow() {
                break;
            }
            let _ = state_tx.send(DispatchState::Running);
            match self.run_cycle().await {
                CycleOutcome::Progressed => continue,
                CycleOutcome::RetryScheduled => {
                    let _ = state_tx.send(DispatchState::RetryWait);
                    let wait = Duration::from_millis(self.policy.retry_interval_ms);
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = self.signal.notified() => {}
                        _ = stop_rx.changed() => {}
                    }
                }
                CycleOutcome::Nothing => {
                    let _ = state_tx.send(DispatchState::Idle);
                    tokio::select! {
                        _ = self.signal.notified() => {}
                        _ = tokio::time::sleep(self.send_interval) => {}
                        _ = stop_rx.changed() => {}
                    }
                }
            }
        }
        let _ = state_tx.send(DispatchState::Stopped);
        info!(
            target: "dgw.dispatch",
            connector_id = %self.connector_id,
            "dispatch loop stopped"
        );
    }

    /// 一个周期：先发一批到期的值，再（立即发文件模式或无值可发时）
    /// 发一个到期文件。缓存层的本地 IO 错误只记日志，循环继续。
    async fn run_cycle(&self) -> CycleOutcome {
        let mut progressed = false;
        let mut failed = false;
        let mut values_due = false;

        match self.values.get_values_to_send(self.policy.max_send_count).await {
            Ok(batches) if !batches.is_empty() => {
                values_due = true;
                let ids: Vec<String> = batches.iter().map(|batch| batch.id.clone()).collect();
                let all: Vec<domain::TimeValue> = batches
                    .into_iter()
                    .flat_map(|batch| batch.values)
                    .collect();
                match self.connector.handle_values(&all).await {
                    Ok(()) => {
                        if let Err(err) = self.values.remove_sent_values(&ids).await {
                            warn!(
                                target: "dgw.dispatch",
                                connector_id = %self.connector_id,
                                "sent values cleanup failed: {}", err
                            );
                        }
                        info!(
                            target: "dgw.dispatch",
                            connector_id = %self.connector_id,
                            values = all.len(),
                            entries = ids.len(),
                            "values delivered"
                        );
                        progressed = true;
                    }
                    Err(failure) => {
                        warn!(
                            target: "dgw.dispatch",
                            connector_id = %self.connector_id,
                            retryable = failure.retryable,
                            "values delivery failed: {}", failure
                        );
                        dgw_telemetry::record_dispatch_retry();
                        if let Err(err) = self.values.manage_errored_values(&ids).await {
                            warn!(
                                target: "dgw.dispatch",
                                connector_id = %self.connector_id,
                                "errored values bookkeeping failed: {}", err
                            );
                        }
                        failed = true;
                    }
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!(
                    target: "dgw.dispatch",
                    connector_id = %self.connector_id,
                    "value cache read failed: {}", err
                );
            }
        }

        if self.policy.send_file_immediately || !values_due {
            match self.files.get_file_to_send().await {
                Ok(Some(file)) => match self.connector.handle_file(&file.path).await {
                    Ok(()) => match self.files.remove_sent_file(&file.path).await {
                        Ok(delivered) => {
                            if let Err(err) = self.archive.archive_or_delete(&delivered).await {
                                warn!(
                                    target: "dgw.dispatch",
                                    connector_id = %self.connector_id,
                                    "archive disposition failed: {}", err
                                );
                            }
                            info!(
                                target: "dgw.dispatch",
                                connector_id = %self.connector_id,
                                file = %file.path.display(),
                                "file delivered"
                            );
                            progressed = true;
                        }
                        Err(err) => {
                            warn!(
                                target: "dgw.dispatch",
                                connector_id = %self.connector_id,
                                "sent file cleanup failed: {}", err
                            );
                        }
                    },
                    Err(failure) => {
                        warn!(
                            target: "dgw.dispatch",
                            connector_id = %self.connector_id,
                            file = %file.path.display(),
                            retryable = failure.retryable,
                            "file delivery failed: {}", failure
                        );
                        dgw_telemetry::record_dispatch_retry();
                        if let Err(err) = self.files.manage_errored_file(&file.path).await {
                            warn!(
                                target: "dgw.dispatch",
                                connector_id = %self.connector_id,
                                "errored file bookkeeping failed: {}", err
                            );
                        }
                        failed = true;
                    }
                },
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        target: "dgw.dispatch",
                        connector_id = %self.connector_id,
                        "file cache read failed: {}", err
                    );
                }
            }
        }

        if progressed {
            CycleOutcome::Progressed
        } else if failed {
            CycleOutcome::RetryScheduled
        } else {
            CycleOutcome::Nothing
        }
    }
}
