use dgw_config::GatewayConfig;

// 与 config.rs 分开的测试二进制，避免环境变量互相干扰。
#[test]
fn invalid_number_is_rejected() {
    unsafe {
        std::env::set_var("DGW_SEND_INTERVAL_MS", "soon");
    }
    let err = GatewayConfig::from_env().expect_err("invalid env");
    assert!(err.to_string().contains("DGW_SEND_INTERVAL_MS"));
}
