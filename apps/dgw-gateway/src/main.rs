//! 网关运行时：南向采集 -> 北向缓存 -> 发送循环的完整接线。

use dgw_cache::{
    ArchiveService, CacheLayout, ContentSink, FileCache, NorthCaches, ValueCache,
    spawn_archive_sweep,
};
use dgw_config::GatewayConfig;
use dgw_dispatch::{DispatchLoop, MqttNorthConfig, NorthConnectorKind, build_north};
use dgw_scan::{FanoutSink, SimulatorSouth, SouthWorker};
use dgw_storage::SqliteCursorStore;
use dgw_telemetry::init_tracing;
use domain::{ScanItem, ScanMode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tracing::{info, warn};

const NORTH_ID: &str = "north-1";
const SOUTH_ID: &str = "south-sim";
const SCAN_MODE_ID: &str = "default";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 从环境变量加载运行配置
    let config = GatewayConfig::from_env()?;
    // 初始化结构化日志
    init_tracing();

    tokio::fs::create_dir_all(&config.cache_root).await?;

    // 游标库（SQLite，随网关本地落盘）
    let cursors = Arc::new(SqliteCursorStore::connect(&config.cursor_db_path).await?);

    // 北向缓存对：值与文件共用一个唤醒信号
    let layout = CacheLayout::new(&config.cache_root);
    let signal = Arc::new(Notify::new());
    let values = Arc::new(
        ValueCache::open(&layout, NORTH_ID, config.caching.clone(), Arc::clone(&signal)).await?,
    );
    let files = Arc::new(
        FileCache::open(&layout, NORTH_ID, config.caching.clone(), Arc::clone(&signal)).await?,
    );
    let archive = Arc::new(ArchiveService::open(&layout, NORTH_ID, config.archive.clone()).await?);

    // 北向连接器
    let kind = match config.north_kind.as_str() {
        "file" => NorthConnectorKind::FileWriter {
            output_dir: config.north_output_dir.clone(),
        },
        "mqtt" => NorthConnectorKind::Mqtt(MqttNorthConfig {
            host: config.mqtt_host.clone(),
            port: config.mqtt_port,
            username: config.mqtt_username.clone(),
            password: config.mqtt_password.clone(),
            topic_prefix: config.mqtt_topic_prefix.clone(),
            qos: config.mqtt_qos,
        }),
        _ => NorthConnectorKind::Noop,
    };
    let (north, mqtt_task) = build_north(NORTH_ID, &kind).await?;
    match north.test_connection().await {
        Ok(()) => info!(target: "dgw", connector_id = NORTH_ID, "north connection ok"),
        Err(err) => warn!(
            target: "dgw",
            connector_id = NORTH_ID,
            error = %err,
            "north connection test failed, cached content will wait"
        ),
    }

    // 发送循环与归档清理
    let dispatch = DispatchLoop::new(
        NORTH_ID,
        north,
        Arc::clone(&values),
        Arc::clone(&files),
        Arc::clone(&archive),
        config.caching.clone(),
        Duration::from_millis(config.send_interval_ms),
        Arc::clone(&signal),
    )
    .spawn();
    let (sweep_stop_tx, sweep_stop_rx) = watch::channel(false);
    let sweep = spawn_archive_sweep(
        Arc::clone(&archive),
        Duration::from_secs(config.archive_sweep_interval_s),
        sweep_stop_rx,
    );

    // 南向：内置模拟连接器按 cron 增量采集
    let scan_modes = vec![ScanMode {
        id: SCAN_MODE_ID.to_string(),
        cron_expression: config.scan_cron.clone(),
    }];
    let items = vec![ScanItem {
        item_id: "sine".to_string(),
        scan_mode_id: SCAN_MODE_ID.to_string(),
        reference_field: "sine".to_string(),
    }];
    // 采集产出经扇出进各北向缓存对；新增北向目的端时在此追加
    let sink = Arc::new(FanoutSink::new(vec![
        Arc::new(NorthCaches::new(Arc::clone(&values), Arc::clone(&files))) as Arc<dyn ContentSink>,
    ]));
    let south = SouthWorker::new(
        Arc::new(SimulatorSouth::new(SOUTH_ID, config.simulator_step_ms)),
        items,
        &scan_modes,
        config.scan.clone(),
        cursors,
        sink,
    )?
    .spawn();

    info!(target: "dgw", cache_root = %config.cache_root.display(), "gateway started");
    tokio::signal::ctrl_c().await?;
    info!(target: "dgw", "shutdown requested");

    // 先停南向（不再产生新内容），再排空发送循环
    south.stop().await;
    dispatch.stop().await;
    let _ = sweep_stop_tx.send(true);
    let _ = sweep.await;
    if let Some(task) = mqtt_task {
        task.abort();
    }
    info!(target: "dgw", "gateway stopped");
    Ok(())
}
