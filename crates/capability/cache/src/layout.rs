use std::path::{Path, PathBuf};

/// 缓存目录布局。
///
/// 所有队列状态都能从这些目录的内容单独恢复：
/// - `values/<connector>/`：待投递的值批次条目
/// - `files/<connector>/`：待投递的文件
/// - `errors/values/<connector>/`、`errors/files/<connector>/`：隔离区
/// - `archive/<connector>/`：投递成功后保留的文件
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn values_dir(&self, connector_id: &str) -> PathBuf {
        self.root.join("values").join(connector_id)
    }

    pub fn files_dir(&self, connector_id: &str) -> PathBuf {
        self.root.join("files").join(connector_id)
    }

    pub fn value_errors_dir(&self, connector_id: &str) -> PathBuf {
        self.root.join("errors").join("values").join(connector_id)
    }

    pub fn file_errors_dir(&self, connector_id: &str) -> PathBuf {
        self.root.join("errors").join("files").join(connector_id)
    }

    pub fn archive_dir(&self, connector_id: &str) -> PathBuf {
        self.root.join("archive").join(connector_id)
    }
}
