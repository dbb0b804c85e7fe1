use dgw_config::GatewayConfig;
use std::path::Path;

#[test]
fn load_config_from_env() {
    // Rust 2024 中 set_var 需要显式标注 unsafe（测试进程内可控）。
    unsafe {
        std::env::set_var("DGW_CACHE_ROOT", "/tmp/dgw-cache");
        std::env::set_var("DGW_GROUP_COUNT", "25");
        std::env::set_var("DGW_RETRY_COUNT", "5");
        std::env::set_var("DGW_ARCHIVE_ENABLED", "true");
        std::env::set_var("DGW_MAX_READ_INTERVAL_S", "1800");
    }

    let config = GatewayConfig::from_env().expect("config");
    assert_eq!(config.cache_root, Path::new("/tmp/dgw-cache"));
    assert_eq!(
        config.cursor_db_path,
        Path::new("/tmp/dgw-cache/south_cache.db")
    );
    assert_eq!(config.caching.group_count, 25);
    assert_eq!(config.caching.retry_count, 5);
    assert!(config.archive.enabled);
    assert_eq!(config.scan.max_read_interval_s, 1800);
}
