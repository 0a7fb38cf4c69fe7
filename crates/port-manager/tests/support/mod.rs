#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use port_manager::api::{
    AdapterUsage, AssignableAdapters, CellularConfig, DevicePortConfig, DhcpMode, IoAdapter,
    PortConfig, WifiConfig, WifiKeyScheme, WirelessConfig, DPC_VERSION,
};
use port_manager::config::{AppConfig, Timings};
use port_manager::conntest::MockConnectivityTester;
use port_manager::geoloc::MockGeoService;
use port_manager::manager::{Deps, ManagerHandle};
use port_manager::netmon::{DhcpInfo, DnsInfo, IfAttrs, InterfaceState, MockNetworkMonitor, RouteInfo};
use port_manager::reconciler::MockPortReconciler;
use port_manager::runner::{start_manager, ManagerOptions};
use port_manager::wwan::MockWwanAgent;

pub struct Harness {
    pub monitor: MockNetworkMonitor,
    pub reconciler: MockPortReconciler,
    pub tester: Arc<MockConnectivityTester>,
    pub geo: MockGeoService,
    pub wwan: MockWwanAgent,
    pub handle: ManagerHandle,
    _persist_dir: tempfile::TempDir,
}

pub fn base_config(persist_dir: &str) -> AppConfig {
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
        geo_redo_secs: 30,
        geo_service_url: "http://localhost:49422".into(),
        metrics_host: "127.0.0.1".into(),
        metrics_port: 0,
    }
}

/// Sub-second intervals so the scenarios finish quickly.
pub fn fast_timings() -> Timings {
    Timings {
        network_test_interval: Duration::from_millis(400),
        network_test_better_interval: Duration::from_millis(600),
        network_test_duration: Duration::from_millis(300),
        min_time_since_failure: Duration::from_millis(500),
        geo_retry: Duration::from_millis(200),
        geo_redo: Duration::from_secs(30),
    }
}

/// Like [`fast_timings`] but with a long probing deadline, for scenarios
/// that must observe the IP/DNS wait instead of racing past it.
pub fn patient_timings() -> Timings {
    Timings {
        network_test_duration: Duration::from_secs(5),
        ..fast_timings()
    }
}

pub async fn start(timings: Timings) -> Harness {
    let persist_dir = tempfile::tempdir().expect("tempdir");
    let cfg = base_config(persist_dir.path().to_str().expect("utf-8 path"));

    let monitor = MockNetworkMonitor::default();
    let reconciler = MockPortReconciler::default();
    let tester = Arc::new(MockConnectivityTester::new(Duration::from_millis(50)));
    let geo = MockGeoService::default();
    let wwan = MockWwanAgent::default();

    let deps = Deps {
        conn_tester: tester.clone(),
        reconciler: Arc::new(reconciler.clone()),
        net_monitor: Arc::new(monitor.clone()),
        geo_service: Arc::new(geo.clone()),
        wwan_agent: Arc::new(wwan.clone()),
    };
    let options = ManagerOptions {
        init_tracing: false,
        serve_metrics: false,
        metrics_handle: None,
        persist_list: true,
    };

    let handle = start_manager(cfg, deps, options).await.expect("start manager");
    handle.update_timings(timings).await.expect("update timings");

    Harness {
        monitor,
        reconciler,
        tester,
        geo,
        wwan,
        handle,
        _persist_dir: persist_dir,
    }
}

impl Harness {
    pub fn dpc_list(&self) -> (i32, Vec<DevicePortConfig>) {
        let snapshot = self.handle.dpc_list();
        (snapshot.current_index, snapshot.entries)
    }

    pub fn dpc(&self, index: usize) -> DevicePortConfig {
        let (_, entries) = self.dpc_list();
        entries.get(index).cloned().unwrap_or_default()
    }
}

/// Poll until the condition holds, panicking after ten seconds.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if condition() {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within 10s: {what}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// Assert the condition holds for longer than the retest interval.
pub async fn consistently(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(1300);
    while tokio::time::Instant::now() < deadline {
        assert!(condition(), "condition violated: {what}");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SelectedIfs {
    pub eth0: bool,
    pub eth1: bool,
    pub wlan0: bool,
    pub wwan0: bool,
}

pub fn mock_eth0() -> InterfaceState {
    InterfaceState {
        attrs: IfAttrs {
            if_index: 1,
            if_name: "eth0".into(),
            admin_up: true,
            lower_up: true,
            with_broadcast: true,
            mac_addr: "02:00:00:00:00:01".into(),
        },
        ip_addrs: vec!["192.168.10.5/24".parse().expect("addr")],
        dhcp: DhcpInfo {
            subnet: Some("192.168.10.0/24".parse().expect("subnet")),
            ntp_servers: vec!["132.163.96.5".parse().expect("ip")],
        },
        dns: DnsInfo {
            dns_servers: vec!["8.8.8.8".parse().expect("ip")],
            domains: vec!["eth-test-domain".into()],
        },
    }
}

pub fn mock_eth0_routes() -> Vec<RouteInfo> {
    vec![RouteInfo {
        if_index: 1,
        dst: None,
        gateway: Some("192.168.10.1".parse().expect("ip")),
        table: 254,
    }]
}

pub fn mock_eth1() -> InterfaceState {
    InterfaceState {
        attrs: IfAttrs {
            if_index: 2,
            if_name: "eth1".into(),
            admin_up: true,
            lower_up: true,
            with_broadcast: true,
            mac_addr: "02:00:00:00:00:02".into(),
        },
        ip_addrs: vec!["172.20.1.2/24".parse().expect("addr")],
        dhcp: DhcpInfo {
            subnet: Some("172.20.1.0/24".parse().expect("subnet")),
            ntp_servers: vec!["132.163.96.6".parse().expect("ip")],
        },
        dns: DnsInfo {
            dns_servers: vec!["1.1.1.1".parse().expect("ip")],
            domains: vec!["eth-test-domain".into()],
        },
    }
}

pub fn mock_eth1_routes() -> Vec<RouteInfo> {
    vec![RouteInfo {
        if_index: 2,
        dst: None,
        gateway: Some("172.20.1.1".parse().expect("ip")),
        table: 254,
    }]
}

pub fn mock_wlan0() -> InterfaceState {
    InterfaceState {
        attrs: IfAttrs {
            if_index: 3,
            if_name: "wlan0".into(),
            admin_up: true,
            lower_up: true,
            with_broadcast: true,
            mac_addr: "02:00:00:00:00:03".into(),
        },
        ip_addrs: vec!["192.168.77.2/24".parse().expect("addr")],
        dhcp: DhcpInfo {
            subnet: Some("192.168.77.0/24".parse().expect("subnet")),
            ntp_servers: vec!["129.6.15.32".parse().expect("ip")],
        },
        dns: DnsInfo {
            dns_servers: vec!["192.168.77.13".parse().expect("ip")],
            domains: vec!["wlan-test-domain".into()],
        },
    }
}

pub fn mock_wwan0() -> InterfaceState {
    InterfaceState {
        attrs: IfAttrs {
            if_index: 4,
            if_name: "wwan0".into(),
            admin_up: true,
            lower_up: true,
            with_broadcast: true,
            mac_addr: "02:00:00:00:00:04".into(),
        },
        ip_addrs: vec!["15.123.87.20/28".parse().expect("addr")],
        dhcp: DhcpInfo {
            subnet: Some("15.123.87.16/28".parse().expect("subnet")),
            ntp_servers: vec!["128.138.141.177".parse().expect("ip")],
        },
        dns: DnsInfo {
            dns_servers: vec!["208.67.222.222".parse().expect("ip")],
            domains: vec!["wwan-test-domain".into()],
        },
    }
}

pub fn make_dpc(key: &str, time_priority: DateTime<Utc>, ifs: SelectedIfs) -> DevicePortConfig {
    let mut ports = Vec::new();
    if ifs.eth0 {
        ports.push(PortConfig {
            if_name: "eth0".into(),
            phy_label: "eth0".into(),
            logical_label: "mock-eth0".into(),
            is_mgmt: true,
            is_l3_port: true,
            dhcp: DhcpMode::Client,
            ..PortConfig::default()
        });
    }
    if ifs.eth1 {
        ports.push(PortConfig {
            if_name: "eth1".into(),
            phy_label: "eth1".into(),
            logical_label: "mock-eth1".into(),
            is_mgmt: true,
            is_l3_port: true,
            dhcp: DhcpMode::Client,
            ..PortConfig::default()
        });
    }
    if ifs.wlan0 {
        ports.push(PortConfig {
            if_name: "wlan0".into(),
            phy_label: "wlan0".into(),
            logical_label: "mock-wlan0".into(),
            is_mgmt: true,
            is_l3_port: true,
            dhcp: DhcpMode::Client,
            wireless: WirelessConfig::Wifi(vec![WifiConfig {
                ssid: "ssid".into(),
                key_scheme: WifiKeyScheme::WpaPsk,
                identity: "user".into(),
                password: "password".into(),
            }]),
            ..PortConfig::default()
        });
    }
    if ifs.wwan0 {
        ports.push(PortConfig {
            if_name: "wwan0".into(),
            phy_label: "wwan0".into(),
            logical_label: "mock-wwan0".into(),
            is_mgmt: true,
            is_l3_port: true,
            dhcp: DhcpMode::Client,
            wireless: WirelessConfig::Cellular(vec![CellularConfig { apn: "apn".into() }]),
            ..PortConfig::default()
        });
    }

    DevicePortConfig {
        version: DPC_VERSION,
        key: key.into(),
        time_priority,
        ports,
        ..DevicePortConfig::default()
    }
}

pub fn make_aa(ifs: SelectedIfs) -> AssignableAdapters {
    let mut adapters = Vec::new();
    if ifs.eth0 {
        adapters.push(IoAdapter {
            phy_label: "eth0".into(),
            logical_label: "mock-eth0".into(),
            if_name: "eth0".into(),
            usage: AdapterUsage::MgmtAndApps,
            cost: 0,
            mac_addr: "02:00:00:00:00:01".into(),
            is_port: true,
            is_pci_back: false,
            used_by_uuid: None,
        });
    }
    if ifs.eth1 {
        adapters.push(IoAdapter {
            phy_label: "eth1".into(),
            logical_label: "mock-eth1".into(),
            if_name: "eth1".into(),
            usage: AdapterUsage::MgmtAndApps,
            cost: 0,
            mac_addr: "02:00:00:00:00:02".into(),
            is_port: true,
            is_pci_back: false,
            used_by_uuid: None,
        });
    }
    if ifs.wlan0 {
        adapters.push(IoAdapter {
            phy_label: "wlan0".into(),
            logical_label: "mock-wlan0".into(),
            if_name: "wlan0".into(),
            usage: AdapterUsage::MgmtOnly,
            cost: 0,
            mac_addr: "02:00:00:00:00:03".into(),
            is_port: true,
            is_pci_back: false,
            used_by_uuid: None,
        });
    }
    if ifs.wwan0 {
        adapters.push(IoAdapter {
            phy_label: "wwan0".into(),
            logical_label: "mock-wwan0".into(),
            if_name: "wwan0".into(),
            usage: AdapterUsage::MgmtOnly,
            cost: 0,
            mac_addr: "02:00:00:00:00:04".into(),
            is_port: true,
            is_pci_back: false,
            used_by_uuid: None,
        });
    }

    AssignableAdapters {
        initialized: true,
        adapters,
    }
}
