//! 北向投递能力
//!
//! - `NorthConnector`：目的地协议适配器的能力接口
//!   （handleValues / handleFile / testConnection）
//! - `NorthConnectorKind`：按协议枚举选择具体实现
//! - `DispatchLoop`：每个目的地一个的发送循环，驱动条目走向
//!   成功 / 退避重试 / 隔离

mod dispatch_loop;
mod north;

pub use dispatch_loop::{DispatchHandle, DispatchLoop, DispatchState};
pub use north::{
    FileWriterNorth, MqttNorth, MqttNorthConfig, NoopNorth, NorthConnector, NorthConnectorKind,
    SendFailure, build_north,
};

/// 投递层错误（连接器构建/连接阶段）。
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("connect error: {0}")]
    Connect(String),
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for DispatchError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
