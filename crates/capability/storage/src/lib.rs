//! 游标持久化能力
//!
//! 南向增量采集依赖游标（last max instant）在进程重启后恢复：
//! - `CursorStore`：游标存取接口
//! - `InMemoryCursorStore`：内存实现（测试与接线）
//! - `SqliteCursorStore`：SQLite 实现（生产，随网关本地落盘）

mod error;
mod in_memory;
mod sqlite;
mod traits;

pub use error::StorageError;
pub use in_memory::InMemoryCursorStore;
pub use sqlite::SqliteCursorStore;
pub use traits::CursorStore;
