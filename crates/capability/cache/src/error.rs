/// 缓存层错误。
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// 接收该内容将突破 max_size_bytes，生产方需要减速或丢弃
    #[error("cache full: {0}")]
    CacheFull(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("corrupt entry: {0}")]
    Corrupt(String),
    #[error("unknown entry: {0}")]
    UnknownEntry(String),
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}
