//! 缓存条目的文件名编码与原子落盘。
//!
//! 文件名编码连接器与入队时刻，使队列可以只靠目录列表恢复：
//! `<connector>-<epoch_ms>-<seq>.json`。

use crate::error::CacheError;
use chrono::Utc;
use std::path::{Path, PathBuf};

/// 值条目文件扩展名。
pub const VALUE_ENTRY_EXT: &str = "json";
/// 落盘中间态后缀，恢复时跳过。
pub const TMP_SUFFIX: &str = ".tmp";

/// 当前 Unix 毫秒时刻。
pub fn epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// 值条目文件名：`<connector>-<ms>-<seq>.json`，seq 定宽保证同毫秒内有序。
pub fn value_entry_name(connector_id: &str, ms: i64, seq: u64) -> String {
    format!("{connector_id}-{ms}-{seq:06}.{VALUE_ENTRY_EXT}")
}

/// 从值条目文件名解析 (ms, seq)；不符合编码的文件返回 None。
pub fn parse_value_entry_name(connector_id: &str, name: &str) -> Option<(i64, u64)> {
    let stem = name.strip_suffix(&format!(".{VALUE_ENTRY_EXT}"))?;
    let rest = stem.strip_prefix(connector_id)?.strip_prefix('-')?;
    let (ms, seq) = rest.split_once('-')?;
    Some((ms.parse().ok()?, seq.parse().ok()?))
}

/// 进入文件缓存时的目标名：`<stem>-<ms>-<seq><.ext>`，保留原扩展名。
pub fn cached_file_name(original: &Path, ms: i64, seq: u64) -> String {
    let stem = original
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("file");
    match original.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!("{stem}-{ms}-{seq:06}.{ext}"),
        None => format!("{stem}-{ms}-{seq:06}"),
    }
}

/// 原子写入：写临时文件后 rename，崩溃不会留下半写条目。
pub async fn write_atomically(target: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let tmp = tmp_path(target);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, target).await?;
    Ok(())
}

fn tmp_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(TMP_SUFFIX);
    target.with_file_name(name)
}

/// 目标目录中尚未占用的条目路径；同名冲突时递增 seq。
pub async fn free_slot(dir: &Path, original: &Path, ms: i64, mut seq: u64) -> (PathBuf, u64) {
    loop {
        let candidate = dir.join(cached_file_name(original, ms, seq));
        if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            seq += 1;
            continue;
        }
        return (candidate, seq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_entry_name_round_trip() {
        let name = value_entry_name("north-1", 1_700_000_000_123, 42);
        assert_eq!(
            parse_value_entry_name("north-1", &name),
            Some((1_700_000_000_123, 42))
        );
    }

    #[test]
    fn foreign_names_are_rejected() {
        assert!(parse_value_entry_name("north-1", "north-1-abc-000001.json").is_none());
        assert!(parse_value_entry_name("north-1", "other-170-000001.json").is_none());
        assert!(parse_value_entry_name("north-1", "north-1-170-000001.json.tmp").is_none());
    }

    #[test]
    fn cached_file_name_keeps_extension() {
        let name = cached_file_name(Path::new("/in/report.csv"), 170, 1);
        assert_eq!(name, "report-170-000001.csv");
        let bare = cached_file_name(Path::new("/in/report"), 170, 1);
        assert_eq!(bare, "report-170-000001");
    }
}
