//! 北向连接器：能力接口与各协议实现。
//!
//! 失败分类由协议实现给出（retryable 标记网络类错误），但两类失败
//! 共享同一 retry_count 预算：凭据过期这类"永久"错误也可能被外部
//! 修复，不做静默丢弃。

use crate::DispatchError;
use async_trait::async_trait;
use domain::TimeValue;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

/// 一次投递失败：给发送循环的分类结果。
#[derive(Debug, Clone)]
pub struct SendFailure {
    pub message: String,
    pub retryable: bool,
}

impl SendFailure {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl std::fmt::Display for SendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// 北向目的地的能力接口。
#[async_trait]
pub trait NorthConnector: Send + Sync {
    async fn handle_values(&self, values: &[TimeValue]) -> Result<(), SendFailure>;
    async fn handle_file(&self, path: &Path) -> Result<(), SendFailure>;
    async fn test_connection(&self) -> Result<(), SendFailure>;
}

/// 协议选择：以带标签的枚举代替深继承层次。
#[derive(Debug, Clone)]
pub enum NorthConnectorKind {
    Noop,
    FileWriter { output_dir: PathBuf },
    Mqtt(MqttNorthConfig),
}

/// 按协议构建具体连接器。MQTT 返回其事件循环任务句柄。
pub async fn build_north(
    connector_id: &str,
    kind: &NorthConnectorKind,
) -> Result<(Arc<dyn NorthConnector>, Option<JoinHandle<()>>), DispatchError> {
    match kind {
        NorthConnectorKind::Noop => Ok((Arc::new(NoopNorth), None)),
        NorthConnectorKind::FileWriter { output_dir } => {
            let connector = FileWriterNorth::new(output_dir.clone());
            Ok((Arc::new(connector), None))
        }
        NorthConnectorKind::Mqtt(config) => {
            let (connector, handle) = MqttNorth::connect(connector_id, config.clone())?;
            Ok((Arc::new(connector), Some(handle)))
        }
    }
}

/// 空连接器（用于接线与测试）。
#[derive(Debug, Default)]
pub struct NoopNorth;

#[async_trait]
impl NorthConnector for NoopNorth {
    async fn handle_values(&self, _values: &[TimeValue]) -> Result<(), SendFailure> {
        Ok(())
    }

    async fn handle_file(&self, _path: &Path) -> Result<(), SendFailure> {
        Ok(())
    }

    async fn test_connection(&self) -> Result<(), SendFailure> {
        Ok(())
    }
}

/// 文件落地目的地：值批次写成 JSON 文件，文件复制到输出目录。
#[derive(Debug, Clone)]
pub struct FileWriterNorth {
    output_dir: PathBuf,
}

impl FileWriterNorth {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }
}

#[async_trait]
impl NorthConnector for FileWriterNorth {
    async fn handle_values(&self, values: &[TimeValue]) -> Result<(), SendFailure> {
        let bytes = serde_json::to_vec(values)
            .map_err(|err| SendFailure::permanent(format!("serialize failed: {err}")))?;
        let name = format!(
            "values-{}-{}.json",
            dgw_cache::epoch_ms(),
            uuid::Uuid::new_v4()
        );
        tokio::fs::write(self.output_dir.join(name), bytes)
            .await
            .map_err(|err| SendFailure::retryable(format!("write failed: {err}")))
    }

    async fn handle_file(&self, path: &Path) -> Result<(), SendFailure> {
        let name = path
            .file_name()
            .ok_or_else(|| SendFailure::permanent("file has no name"))?;
        // 复制而非移动：缓存仍拥有该文件，成功确认后才由归档处置
        tokio::fs::copy(path, self.output_dir.join(name))
            .await
            .map(|_| ())
            .map_err(|err| SendFailure::retryable(format!("copy failed: {err}")))
    }

    async fn test_connection(&self) -> Result<(), SendFailure> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|err| SendFailure::retryable(format!("output dir unavailable: {err}")))
    }
}

/// MQTT 目的地配置。
#[derive(Debug, Clone)]
pub struct MqttNorthConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
    pub qos: u8,
}

/// MQTT 目的地：值批次以 JSON 发布到 `{prefix}/{connector_id}`。
#[derive(Clone)]
pub struct MqttNorth {
    client: AsyncClient,
    topic: String,
    qos: QoS,
}

impl MqttNorth {
    pub fn connect(
        connector_id: &str,
        config: MqttNorthConfig,
    ) -> Result<(Self, JoinHandle<()>), DispatchError> {
        let client_id = format!("dgw-north-{}-{}", connector_id, uuid::Uuid::new_v4());
        let mut options = MqttOptions::new(client_id, config.host, config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) = (config.username, config.password) {
            options.set_credentials(username, password);
        }
        let (client, mut eventloop) = AsyncClient::new(options, 10);
        let handle = tokio::spawn(async move {
            loop {
                if let Err(err) = eventloop.poll().await {
                    warn!(target: "dgw.dispatch", "mqtt north eventloop error: {}", err);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        });
        let topic = format!(
            "{}/{}",
            config.topic_prefix.trim_end_matches('/'),
            connector_id
        );
        Ok((
            Self {
                client,
                topic,
                qos: qos_from_u8(config.qos),
            },
            handle,
        ))
    }
}

#[async_trait]
impl NorthConnector for MqttNorth {
    async fn handle_values(&self, values: &[TimeValue]) -> Result<(), SendFailure> {
        let payload = serde_json::to_vec(values)
            .map_err(|err| SendFailure::permanent(format!("serialize failed: {err}")))?;
        self.client
            .publish(self.topic.clone(), self.qos, false, payload)
            .await
            .map_err(|err| SendFailure::retryable(format!("publish failed: {err}")))
    }

    async fn handle_file(&self, _path: &Path) -> Result<(), SendFailure> {
        Err(SendFailure::permanent("mqtt north does not handle files"))
    }

    async fn test_connection(&self) -> Result<(), SendFailure> {
        Ok(())
    }
}

fn qos_from_u8(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}
