//! 网关运行配置加载。

use domain::{ArchivePolicy, CachingPolicy, ScanSettings};
use std::env;
use std::path::PathBuf;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 网关运行配置。
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// 所有缓存目录的根（values/files/errors/archive 在其下）
    pub cache_root: PathBuf,
    /// 游标库路径（SQLite）
    pub cursor_db_path: PathBuf,
    pub caching: CachingPolicy,
    pub archive: ArchivePolicy,
    pub scan: ScanSettings,
    /// 发送循环在无唤醒时的兜底扫描周期（毫秒）
    pub send_interval_ms: u64,
    /// 归档清理周期（秒）
    pub archive_sweep_interval_s: u64,
    /// 北向协议：noop / file / mqtt
    pub north_kind: String,
    /// file 北向的输出目录
    pub north_output_dir: PathBuf,
    /// 内置模拟南向的扫描 cron
    pub scan_cron: String,
    /// 模拟南向的采样步长（毫秒）
    pub simulator_step_ms: u64,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_topic_prefix: String,
    pub mqtt_qos: u8,
}

impl GatewayConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let cache_root = PathBuf::from(
            env::var("DGW_CACHE_ROOT").unwrap_or_else(|_| "./cache".to_string()),
        );
        let cursor_db_path = match env::var("DGW_CURSOR_DB") {
            Ok(path) => PathBuf::from(path),
            Err(_) => cache_root.join("south_cache.db"),
        };

        let caching = CachingPolicy {
            group_count: read_usize_with_default("DGW_GROUP_COUNT", 1000)?,
            max_send_count: read_usize_with_default("DGW_MAX_SEND_COUNT", 10_000)?,
            max_size_bytes: read_u64_with_default(
                "DGW_CACHE_MAX_SIZE_BYTES",
                1024 * 1024 * 1024,
            )?,
            retry_interval_ms: read_u64_with_default("DGW_RETRY_INTERVAL_MS", 5_000)?,
            retry_count: read_u32_with_default("DGW_RETRY_COUNT", 3)?,
            send_file_immediately: read_bool_with_default("DGW_SEND_FILE_IMMEDIATELY", true),
        }
        .sanitized();

        let archive = ArchivePolicy {
            enabled: read_bool_with_default("DGW_ARCHIVE_ENABLED", false),
            retention_hours: read_u32_with_default("DGW_ARCHIVE_RETENTION_HOURS", 72)?,
        };

        let scan = ScanSettings {
            read_delay_ms: read_u64_with_default("DGW_READ_DELAY_MS", 200)?,
            overlap_ms: read_u64_with_default("DGW_OVERLAP_MS", 0)?,
            max_read_interval_s: read_u64_with_default("DGW_MAX_READ_INTERVAL_S", 3600)?,
        };

        let send_interval_ms = read_u64_with_default("DGW_SEND_INTERVAL_MS", 10_000)?;
        let archive_sweep_interval_s =
            read_u64_with_default("DGW_ARCHIVE_SWEEP_INTERVAL_S", 3600)?;

        let north_kind = env::var("DGW_NORTH").unwrap_or_else(|_| "noop".to_string());
        let north_output_dir = match env::var("DGW_NORTH_OUTPUT_DIR") {
            Ok(path) => PathBuf::from(path),
            Err(_) => cache_root.join("out"),
        };
        let scan_cron =
            env::var("DGW_SCAN_CRON").unwrap_or_else(|_| "0 * * * * *".to_string());
        let simulator_step_ms = read_u64_with_default("DGW_SIM_STEP_MS", 1_000)?;

        let mqtt_host = env::var("DGW_MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let mqtt_port = read_u16_with_default("DGW_MQTT_PORT", 1883)?;
        let mqtt_username = read_optional("DGW_MQTT_USERNAME");
        let mqtt_password = read_optional("DGW_MQTT_PASSWORD");
        let mqtt_topic_prefix =
            env::var("DGW_MQTT_TOPIC_PREFIX").unwrap_or_else(|_| "dgw/values".to_string());
        let mqtt_qos = read_u8_with_default("DGW_MQTT_QOS", 1)?;

        Ok(Self {
            cache_root,
            cursor_db_path,
            caching,
            archive,
            scan,
            send_interval_ms,
            archive_sweep_interval_s,
            north_kind,
            north_output_dir,
            scan_cron,
            simulator_step_ms,
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_topic_prefix,
            mqtt_qos,
        })
    }
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_usize_with_default(key: &str, default: usize) -> Result<usize, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<usize>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u32_with_default(key: &str, default: u32) -> Result<u32, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u32>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u16_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u8_with_default(key: &str, default: u8) -> Result<u8, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u8>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}
