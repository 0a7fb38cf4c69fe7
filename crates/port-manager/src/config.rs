use std::env;
use std::time::Duration;

use serde::Deserialize;

pub const ENV_PREFIX: &str = "DPCM";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// File holding the controller endpoint as `host[:port]`.
    pub server_file: String,
    /// Device certificate (PEM) presented when probing the controller.
    pub device_cert_path: String,
    /// Device private key (PEM).
    pub device_key_path: String,
    /// Onboarding certificate (PEM), used before the device certificate
    /// exists.
    pub onboard_cert_path: String,
    /// Onboarding private key (PEM).
    pub onboard_key_path: String,
    /// Controller API version for the ping endpoint (1 or 2).
    pub api_version: u8,
    /// Directory holding the persisted candidate list.
    pub persist_dir: String,
    pub network_test_interval_secs: u64,
    pub network_test_better_interval_secs: u64,
    pub network_test_duration_secs: u64,
    pub dpc_min_time_since_failure_secs: u64,
    pub geo_retry_secs: u64,
    pub geo_redo_secs: u64,
    /// Base URL of the geolocation service.
    pub geo_service_url: String,
    pub metrics_host: String,
    pub metrics_port: u16,
}

impl AppConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != 1 && self.api_version != 2 {
            anyhow::bail!("api_version must be 1 or 2, got {}", self.api_version);
        }
        if self.network_test_interval_secs == 0 {
            anyhow::bail!("network_test_interval_secs must be > 0");
        }
        if self.network_test_better_interval_secs == 0 {
            anyhow::bail!("network_test_better_interval_secs must be > 0");
        }
        if self.network_test_duration_secs == 0 {
            anyhow::bail!("network_test_duration_secs must be > 0");
        }
        if self.server_file.trim().is_empty() {
            anyhow::bail!("server_file cannot be empty");
        }
        Ok(())
    }

    /// Interval snapshot handed to the manager; re-derived whenever the
    /// runtime configuration changes.
    pub fn timings(&self) -> Timings {
        Timings {
            network_test_interval: Duration::from_secs(self.network_test_interval_secs),
            network_test_better_interval: Duration::from_secs(
                self.network_test_better_interval_secs,
            ),
            network_test_duration: Duration::from_secs(self.network_test_duration_secs),
            min_time_since_failure: Duration::from_secs(self.dpc_min_time_since_failure_secs),
            geo_retry: Duration::from_secs(self.geo_retry_secs),
            geo_redo: Duration::from_secs(self.geo_redo_secs),
        }
    }
}

/// Intervals governing verification, retesting and geolocation cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Periodic retest of the active configuration.
    pub network_test_interval: Duration,
    /// Periodic re-attempt to climb back to a higher-priority entry.
    pub network_test_better_interval: Duration,
    /// Upper bound on a single probing attempt, shared with the IP/DNS and
    /// reconciler-async waits.
    pub network_test_duration: Duration,
    /// Hysteresis before a freshly failed configuration is probed again.
    pub min_time_since_failure: Duration,
    /// Minimum delay between geolocation attempts for an address after a
    /// failure.
    pub geo_retry: Duration,
    /// Refresh period for successfully geolocated addresses.
    pub geo_redo: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            network_test_interval: Duration::from_secs(300),
            network_test_better_interval: Duration::from_secs(600),
            network_test_duration: Duration::from_secs(30),
            min_time_since_failure: Duration::from_secs(60),
            geo_retry: Duration::from_secs(600),
            geo_redo: Duration::from_secs(3600),
        }
    }
}

// (ENV_NAME, config_key)
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("DPCM_SERVER_FILE", "server_file"),
    ("DPCM_DEVICE_CERT_PATH", "device_cert_path"),
    ("DPCM_DEVICE_KEY_PATH", "device_key_path"),
    ("DPCM_ONBOARD_CERT_PATH", "onboard_cert_path"),
    ("DPCM_ONBOARD_KEY_PATH", "onboard_key_path"),
    ("DPCM_API_VERSION", "api_version"),
    ("DPCM_PERSIST_DIR", "persist_dir"),
    (
        "DPCM_NETWORK_TEST_INTERVAL_SECS",
        "network_test_interval_secs",
    ),
    (
        "DPCM_NETWORK_TEST_BETTER_INTERVAL_SECS",
        "network_test_better_interval_secs",
    ),
    (
        "DPCM_NETWORK_TEST_DURATION_SECS",
        "network_test_duration_secs",
    ),
    (
        "DPCM_DPC_MIN_TIME_SINCE_FAILURE_SECS",
        "dpc_min_time_since_failure_secs",
    ),
    ("DPCM_GEO_RETRY_SECS", "geo_retry_secs"),
    ("DPCM_GEO_REDO_SECS", "geo_redo_secs"),
    ("DPCM_GEO_SERVICE_URL", "geo_service_url"),
    ("DPCM_METRICS_HOST", "metrics_host"),
    ("DPCM_METRICS_PORT", "metrics_port"),
];

pub fn load() -> anyhow::Result<AppConfig> {
    let mut builder = config::Config::builder()
        .add_source(config::File::with_name("config").required(false))
        .set_default("server_file", "/config/server")?
        .set_default("device_cert_path", "/config/device.cert.pem")?
        .set_default("device_key_path", "/config/device.key.pem")?
        .set_default("onboard_cert_path", "/config/onboard.cert.pem")?
        .set_default("onboard_key_path", "/config/onboard.key.pem")?
        .set_default("api_version", 2)?
        .set_default("persist_dir", "/persist/network-config")?
        .set_default("network_test_interval_secs", 300)?
        .set_default("network_test_better_interval_secs", 600)?
        .set_default("network_test_duration_secs", 30)?
        .set_default("dpc_min_time_since_failure_secs", 60)?
        .set_default("geo_retry_secs", 600)?
        .set_default("geo_redo_secs", 3600)?
        .set_default("geo_service_url", "https://ipinfo.io")?
        .set_default("metrics_host", "127.0.0.1")?
        .set_default("metrics_port", 9092)?;

    for (env_key, cfg_key) in ENV_OVERRIDES {
        if let Ok(value) = env::var(env_key) {
            builder = builder.set_override(*cfg_key, value)?;
        }
    }

    let app: AppConfig = builder.build()?.try_deserialize()?;
    app.validate()?;
    Ok(app)
}
