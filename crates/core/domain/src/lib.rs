pub mod cursor;
pub mod data;
pub mod policy;

pub use cursor::{CursorKey, CursorRecord};
pub use data::{FileMeta, TimeValue, TimeValueData};
pub use policy::{ArchivePolicy, CachingPolicy, ScanItem, ScanMode, ScanSettings};
