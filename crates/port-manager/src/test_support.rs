use crate::config::AppConfig;

pub(crate) fn base_config(persist_dir: &str) -> AppConfig {
    AppConfig {
        server_file: "/config/server".into(),
        device_cert_path: "/config/device.cert.pem".into(),
        device_key_path: "/config/device.key.pem".into(),
        onboard_cert_path: "/config/onboard.cert.pem".into(),
        onboard_key_path: "/config/onboard.key.pem".into(),
        api_version: 2,
        persist_dir: persist_dir.into(),
        network_test_interval_secs: 1,
        network_test_better_interval_secs: 2,
        network_test_duration_secs: 1,
        dpc_min_time_since_failure_secs: 1,
        geo_retry_secs: 1,
        geo_redo_secs: 5,
        geo_service_url: "http://localhost:49422".into(),
        metrics_host: "127.0.0.1".into(),
        metrics_port: 0,
    }
}
