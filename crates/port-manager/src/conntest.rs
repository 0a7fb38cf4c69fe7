//! Controller connectivity testing.
//!
//! A tester walks the management ports of the current network status,
//! cheapest cost tier first, and probes the controller's ping endpoint
//! through each until enough ports succeed. Controller-side refusals are
//! classified as remote temporary failures and kept apart from local ones so
//! the manager never falls back over a healthy uplink.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::api::{missing_port_error, DeviceNetworkStatus, IntfStatusMap};
use crate::config::AppConfig;
use crate::{endpoint_hostname, read_controller_endpoint};

/// How many management ports must reach the controller. Hard-coded at 1 for
/// now; at least one uplink needs to work.
pub const REQUIRED_SUCCESS_COUNT: u32 = 1;

/// Verdict of a failed connectivity campaign.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectivityError {
    /// The controller was reached but cannot presently accept the device.
    /// Does not indicate a broken uplink.
    #[error("remote temporary failure talking to {endpoint}: {detail}")]
    RemoteTemporaryFailure { endpoint: String, detail: String },
    /// Too few ports passed and at least one failure was local.
    #[error("not enough working ports ({success_count}); failed with: [{}]", .errors.join(" "))]
    NotEnoughPorts {
        success_count: u32,
        errors: Vec<String>,
    },
    /// The campaign could not start at all.
    #[error("{0}")]
    Aborted(String),
}

impl ConnectivityError {
    /// True for the remote-temporary-failure sentinel.
    pub fn is_remote_temporary(&self) -> bool {
        matches!(self, ConnectivityError::RemoteTemporaryFailure { .. })
    }
}

/// Per-port results plus the global verdict of one campaign.
#[derive(Debug, Clone)]
pub struct ConnectivityReport {
    pub ports: IntfStatusMap,
    pub verdict: Result<(), ConnectivityError>,
}

/// Controller reachability testing, bound to HTTPS in production and to an
/// in-memory fake in tests.
#[async_trait]
pub trait ConnectivityTester: Send + Sync {
    async fn test_connectivity(&self, dns: &DeviceNetworkStatus) -> ConnectivityReport;
}

struct WalkOutcome {
    ports: IntfStatusMap,
    success_count: u32,
    errors: Vec<String>,
    local_failure: bool,
    rtf: Option<(String, String)>,
}

impl WalkOutcome {
    fn new() -> Self {
        Self {
            ports: IntfStatusMap::default(),
            success_count: 0,
            errors: Vec::new(),
            local_failure: false,
            rtf: None,
        }
    }

    fn record_local(&mut self, if_name: &str, err: String) {
        self.ports.record_failure(if_name, err.clone());
        self.errors.push(err);
        self.local_failure = true;
    }

    fn record_remote(&mut self, if_name: &str, endpoint: &str, detail: String) {
        let text = format!("remote temporary failure talking to {endpoint}: {detail}");
        self.ports.record_failure(if_name, text.clone());
        self.errors.push(text);
        self.rtf = Some((endpoint.to_string(), detail));
    }

    fn record_success(&mut self, if_name: &str) {
        self.ports.record_success(if_name);
        self.success_count += 1;
    }

    fn into_report(self) -> ConnectivityReport {
        let verdict = if self.success_count >= REQUIRED_SUCCESS_COUNT {
            Ok(())
        } else if self.local_failure || self.rtf.is_none() {
            Err(ConnectivityError::NotEnoughPorts {
                success_count: self.success_count,
                errors: self.errors,
            })
        } else {
            let (endpoint, detail) = self.rtf.expect("rtf recorded");
            Err(ConnectivityError::RemoteTemporaryFailure { endpoint, detail })
        };
        ConnectivityReport {
            ports: self.ports,
            verdict,
        }
    }
}

/// HTTPS tester probing `<server>/api/v{1|2}/edgeDevice/ping` with the
/// device certificate (onboarding certificate before the device one exists).
pub struct ControllerTester {
    server_file: PathBuf,
    api_version: u8,
    device_cert_path: PathBuf,
    device_key_path: PathBuf,
    onboard_cert_path: PathBuf,
    onboard_key_path: PathBuf,
    test_timeout: StdMutex<Duration>,
    iteration: AtomicU64,
    // Clients are kept across campaigns so TLS session resumption applies.
    // Keyed by local bind address and proxy; nothing else is shared.
    clients: StdMutex<HashMap<(IpAddr, Option<String>), reqwest::Client>>,
}

impl ControllerTester {
    pub fn new(cfg: &AppConfig, test_timeout: Duration) -> Self {
        Self {
            server_file: PathBuf::from(&cfg.server_file),
            api_version: cfg.api_version,
            device_cert_path: PathBuf::from(&cfg.device_cert_path),
            device_key_path: PathBuf::from(&cfg.device_key_path),
            onboard_cert_path: PathBuf::from(&cfg.onboard_cert_path),
            onboard_key_path: PathBuf::from(&cfg.onboard_key_path),
            test_timeout: StdMutex::new(test_timeout),
            iteration: AtomicU64::new(0),
            clients: StdMutex::new(HashMap::new()),
        }
    }

    /// Adjust the per-attempt timeout at run time.
    pub fn set_test_timeout(&self, timeout: Duration) {
        *self.test_timeout.lock().expect("lock") = timeout;
    }

    fn load_identity(&self) -> anyhow::Result<reqwest::Identity> {
        match read_key_pair(&self.device_cert_path, &self.device_key_path) {
            Ok(identity) => Ok(identity),
            Err(err) => {
                debug!(%err, "device certificate not found, using onboarding certificate");
                read_key_pair(&self.onboard_cert_path, &self.onboard_key_path).map_err(|err| {
                    anyhow::anyhow!("onboarding certificate cannot be loaded: {err}")
                })
            }
        }
    }

    fn client_for(
        &self,
        local_addr: IpAddr,
        proxy_url: Option<&str>,
        identity: &reqwest::Identity,
        timeout: Duration,
    ) -> anyhow::Result<reqwest::Client> {
        let key = (local_addr, proxy_url.map(str::to_string));
        let mut clients = self.clients.lock().expect("lock");
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder()
            .local_address(local_addr)
            .identity(identity.clone())
            .timeout(timeout);
        if let Some(proxy) = proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        let client = builder.build()?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl ConnectivityTester for ControllerTester {
    async fn test_connectivity(&self, dns: &DeviceNetworkStatus) -> ConnectivityReport {
        let iteration = self.iteration.fetch_add(1, Ordering::Relaxed) + 1;
        let timeout = *self.test_timeout.lock().expect("lock");
        debug!(
            iteration,
            required = REQUIRED_SUCCESS_COUNT,
            "starting connectivity campaign"
        );

        let mut outcome = WalkOutcome::new();

        let endpoint = match read_controller_endpoint(&self.server_file) {
            Ok(endpoint) => endpoint,
            Err(err) => {
                return ConnectivityReport {
                    ports: outcome.ports,
                    verdict: Err(ConnectivityError::Aborted(err.to_string())),
                };
            }
        };
        let identity = match self.load_identity() {
            Ok(identity) => identity,
            Err(err) => {
                return ConnectivityReport {
                    ports: outcome.ports,
                    verdict: Err(ConnectivityError::Aborted(err.to_string())),
                };
            }
        };
        let url = format!(
            "https://{}/api/v{}/edgeDevice/ping",
            endpoint, self.api_version
        );

        let sorted = dns.mgmt_ports_sorted_by_cost(iteration);
        if sorted.is_empty() {
            return ConnectivityReport {
                ports: outcome.ports,
                verdict: Err(ConnectivityError::Aborted(
                    "no management interfaces".to_string(),
                )),
            };
        }

        for if_name in sorted {
            if outcome.success_count >= REQUIRED_SUCCESS_COUNT {
                break;
            }
            let port = match dns.port(&if_name) {
                Some(port) if port.test_results.last_error != missing_port_error(&if_name) => port,
                _ => {
                    outcome.record_local(&if_name, format!("interface {if_name} is missing"));
                    continue;
                }
            };
            if !port.is_mgmt {
                continue;
            }
            let Some(local_addr) = port.addrs.first().map(|a| a.addr) else {
                outcome.record_local(&if_name, "no IP addresses".to_string());
                continue;
            };

            let client =
                match self.client_for(local_addr, port.proxy_url.as_deref(), &identity, timeout) {
                    Ok(client) => client,
                    Err(err) => {
                        outcome.record_local(
                            &if_name,
                            format!("failed to get network proxy for interface {if_name}: {err}"),
                        );
                        continue;
                    }
                };

            match client.get(&url).send().await {
                Ok(res) if res.status().is_success() => {
                    debug!(%if_name, "controller ping succeeded");
                    outcome.record_success(&if_name);
                }
                Ok(res)
                    if matches!(
                        res.status(),
                        reqwest::StatusCode::BAD_GATEWAY
                            | reqwest::StatusCode::SERVICE_UNAVAILABLE
                            | reqwest::StatusCode::GATEWAY_TIMEOUT
                    ) =>
                {
                    warn!(%if_name, status = %res.status(), "controller refused ping");
                    outcome.record_remote(
                        &if_name,
                        &endpoint,
                        format!("controller responded with status {}", res.status()),
                    );
                }
                Ok(res) => {
                    outcome.record_local(
                        &if_name,
                        format!(
                            "unexpected status {} from {} over {}",
                            res.status(),
                            endpoint_hostname(&endpoint),
                            if_name
                        ),
                    );
                }
                Err(err) => {
                    outcome.record_local(
                        &if_name,
                        format!("failed to reach {endpoint} over {if_name}: {err}"),
                    );
                }
            }
        }

        outcome.into_report()
    }
}

/// Error injected for one (configuration key, interface) pair of the mock
/// tester.
#[derive(Debug, Clone)]
pub enum InjectedError {
    Local(String),
    RemoteTemporary { endpoint: String, detail: String },
}

/// In-memory tester consulting an injected `(dpc_key, if_name) → error` map.
#[derive(Default)]
pub struct MockConnectivityTester {
    /// Simulated duration of each per-port probe.
    pub test_duration: Duration,
    iteration: AtomicU64,
    errors: StdMutex<HashMap<(String, String), InjectedError>>,
}

impl MockConnectivityTester {
    pub fn new(test_duration: Duration) -> Self {
        Self {
            test_duration,
            ..Self::default()
        }
    }

    /// Simulate failing connectivity for an interface under a given
    /// configuration. `None` removes a previously injected error.
    pub fn set_connectivity_error(
        &self,
        dpc_key: &str,
        if_name: &str,
        error: Option<InjectedError>,
    ) {
        let mut errors = self.errors.lock().expect("lock");
        let key = (dpc_key.to_string(), if_name.to_string());
        match error {
            Some(error) => {
                errors.insert(key, error);
            }
            None => {
                errors.remove(&key);
            }
        }
    }
}

#[async_trait]
impl ConnectivityTester for MockConnectivityTester {
    async fn test_connectivity(&self, dns: &DeviceNetworkStatus) -> ConnectivityReport {
        let iteration = self.iteration.fetch_add(1, Ordering::Relaxed) + 1;
        let mut outcome = WalkOutcome::new();

        let sorted = dns.mgmt_ports_sorted_by_cost(iteration);
        if sorted.is_empty() {
            return ConnectivityReport {
                ports: outcome.ports,
                verdict: Err(ConnectivityError::Aborted(
                    "no management interfaces".to_string(),
                )),
            };
        }

        for if_name in sorted {
            if outcome.success_count >= REQUIRED_SUCCESS_COUNT {
                break;
            }
            let port = match dns.port(&if_name) {
                Some(port) if port.test_results.last_error != missing_port_error(&if_name) => port,
                _ => {
                    outcome.record_local(&if_name, format!("interface {if_name} is missing"));
                    continue;
                }
            };
            if !port.is_mgmt {
                continue;
            }
            if port.addrs.is_empty() {
                outcome.record_local(&if_name, "no IP addresses".to_string());
                continue;
            }

            tokio::time::sleep(self.test_duration).await;
            let injected = {
                let errors = self.errors.lock().expect("lock");
                errors
                    .get(&(dns.dpc_key.clone(), if_name.clone()))
                    .cloned()
            };
            match injected {
                None => outcome.record_success(&if_name),
                Some(InjectedError::Local(err)) => outcome.record_local(&if_name, err),
                Some(InjectedError::RemoteTemporary { endpoint, detail }) => {
                    outcome.record_remote(&if_name, &endpoint, detail)
                }
            }
        }

        outcome.into_report()
    }
}

fn read_key_pair(cert_path: &Path, key_path: &Path) -> anyhow::Result<reqwest::Identity> {
    let mut pem = std::fs::read(cert_path)?;
    pem.extend_from_slice(&std::fs::read(key_path)?);
    reqwest::Identity::from_pem(&pem).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{AddrInfo, DpcState, PortStatus};

    fn mgmt_port(if_name: &str, addrs: &[&str]) -> PortStatus {
        PortStatus {
            if_name: if_name.into(),
            is_mgmt: true,
            addrs: addrs
                .iter()
                .map(|a| AddrInfo {
                    addr: a.parse().expect("ip"),
                    geo: None,
                    last_geo_at: None,
                })
                .collect(),
            ..PortStatus::default()
        }
    }

    fn dns_with(dpc_key: &str, ports: Vec<PortStatus>) -> DeviceNetworkStatus {
        DeviceNetworkStatus {
            dpc_key: dpc_key.into(),
            state: DpcState::Verifying,
            ports,
            ..DeviceNetworkStatus::default()
        }
    }

    #[tokio::test]
    async fn mock_tester_succeeds_with_one_working_port() {
        let tester = MockConnectivityTester::default();
        let dns = dns_with("zedagent", vec![mgmt_port("eth0", &["192.168.10.5"])]);

        let report = tester.test_connectivity(&dns).await;
        assert!(report.verdict.is_ok());
        assert!(report.ports.get("eth0").expect("results").was_working());
    }

    #[tokio::test]
    async fn mock_tester_reports_missing_interface() {
        let tester = MockConnectivityTester::default();
        let mut missing = mgmt_port("eth1", &[]);
        missing.test_results.last_error = missing_port_error("eth1");
        let dns = dns_with("zedagent", vec![missing]);

        let report = tester.test_connectivity(&dns).await;
        let err = report.verdict.expect_err("verdict");
        assert_eq!(
            err.to_string(),
            "not enough working ports (0); failed with: [interface eth1 is missing]"
        );
    }

    #[tokio::test]
    async fn mock_tester_reports_no_ip_addresses() {
        let tester = MockConnectivityTester::default();
        let dns = dns_with("zedagent", vec![mgmt_port("eth0", &[])]);

        let report = tester.test_connectivity(&dns).await;
        let err = report.verdict.expect_err("verdict");
        assert_eq!(
            err.to_string(),
            "not enough working ports (0); failed with: [no IP addresses]"
        );
        assert_eq!(
            report.ports.get("eth0").expect("results").last_error,
            "no IP addresses"
        );
    }

    #[tokio::test]
    async fn mock_tester_stops_after_required_successes() {
        let tester = MockConnectivityTester::default();
        tester.set_connectivity_error(
            "zedagent",
            "eth1",
            Some(InjectedError::Local("failed to connect over eth1".into())),
        );
        let dns = dns_with(
            "zedagent",
            vec![
                mgmt_port("eth0", &["192.168.10.5"]),
                mgmt_port("eth1", &["172.20.1.2"]),
            ],
        );

        // First campaign rotates eth1 to the front: its failure is recorded,
        // then eth0 succeeds and the walk stops.
        let report = tester.test_connectivity(&dns).await;
        assert!(report.verdict.is_ok());
        assert_eq!(
            report.ports.get("eth1").expect("results").last_error,
            "failed to connect over eth1"
        );
        assert!(report.ports.get("eth0").expect("results").was_working());
    }

    #[tokio::test]
    async fn mock_tester_distinguishes_rtf_only_failures() {
        let tester = MockConnectivityTester::default();
        tester.set_connectivity_error(
            "zedagent",
            "eth0",
            Some(InjectedError::RemoteTemporary {
                endpoint: "fake-url".into(),
                detail: "controller error".into(),
            }),
        );
        let dns = dns_with("zedagent", vec![mgmt_port("eth0", &["192.168.10.5"])]);

        let report = tester.test_connectivity(&dns).await;
        let err = report.verdict.expect_err("verdict");
        assert!(err.is_remote_temporary());
        assert!(err.to_string().contains("fake-url"));
    }

    #[tokio::test]
    async fn mock_tester_prefers_local_error_over_rtf() {
        let tester = MockConnectivityTester::default();
        tester.set_connectivity_error(
            "zedagent",
            "eth0",
            Some(InjectedError::RemoteTemporary {
                endpoint: "fake-url".into(),
                detail: "controller error".into(),
            }),
        );
        tester.set_connectivity_error(
            "zedagent",
            "eth1",
            Some(InjectedError::Local("failed to connect over eth1".into())),
        );
        let dns = dns_with(
            "zedagent",
            vec![
                mgmt_port("eth0", &["192.168.10.5"]),
                mgmt_port("eth1", &["172.20.1.2"]),
            ],
        );

        let report = tester.test_connectivity(&dns).await;
        let err = report.verdict.expect_err("verdict");
        assert!(!err.is_remote_temporary());
    }

    #[tokio::test]
    async fn mock_tester_clears_injected_errors() {
        let tester = MockConnectivityTester::default();
        tester.set_connectivity_error(
            "zedagent",
            "eth0",
            Some(InjectedError::Local("boom".into())),
        );
        tester.set_connectivity_error("zedagent", "eth0", None);

        let dns = dns_with("zedagent", vec![mgmt_port("eth0", &["192.168.10.5"])]);
        let report = tester.test_connectivity(&dns).await;
        assert!(report.verdict.is_ok());
    }

    #[tokio::test]
    async fn mock_tester_fails_without_mgmt_ports() {
        let tester = MockConnectivityTester::default();
        let dns = dns_with("zedagent", vec![]);

        let report = tester.test_connectivity(&dns).await;
        let err = report.verdict.expect_err("verdict");
        assert!(err.to_string().contains("no management interfaces"));
    }

    fn controller_tester(server_file: &std::path::Path) -> ControllerTester {
        let mut cfg = crate::test_support::base_config("/tmp");
        cfg.server_file = server_file.to_string_lossy().to_string();
        cfg.device_cert_path = "/no/such/device.cert.pem".into();
        cfg.device_key_path = "/no/such/device.key.pem".into();
        cfg.onboard_cert_path = "/no/such/onboard.cert.pem".into();
        cfg.onboard_key_path = "/no/such/onboard.key.pem".into();
        ControllerTester::new(&cfg, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn controller_tester_aborts_without_endpoint_file() {
        let tester = controller_tester(std::path::Path::new("/no/such/server"));
        let dns = dns_with("zedagent", vec![mgmt_port("eth0", &["192.168.10.5"])]);

        let report = tester.test_connectivity(&dns).await;
        let err = report.verdict.expect_err("verdict");
        assert!(!err.is_remote_temporary());
        assert!(err.to_string().contains("failed to read"));
    }

    #[tokio::test]
    async fn controller_tester_aborts_without_any_certificate() {
        use std::io::Write;
        let mut server_file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(server_file, "zedcloud.example.com:443").expect("write");

        let tester = controller_tester(server_file.path());
        let dns = dns_with("zedagent", vec![mgmt_port("eth0", &["192.168.10.5"])]);

        let report = tester.test_connectivity(&dns).await;
        let err = report.verdict.expect_err("verdict");
        assert!(err
            .to_string()
            .contains("onboarding certificate cannot be loaded"));
    }
}
