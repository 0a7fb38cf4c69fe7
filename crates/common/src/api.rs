//! Shared DTOs for the device port configuration manager.
//!
//! These types travel between the manager, its collaborators, and external
//! subscribers of the published device network status and candidate list.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Version stamp carried by port configurations and the network status.
pub const DPC_VERSION: u16 = 1;

/// Error text recorded for a configured port that is currently not present
/// in the network stack. Connectivity testers recognise this sentinel and
/// report the port as missing instead of probing it.
pub fn missing_port_error(if_name: &str) -> String {
    format!("port {if_name} does not exist - ignored")
}

/// DHCP behaviour requested for a port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DhcpMode {
    /// Run a DHCP client on the port.
    #[default]
    Client,
    /// Use the statically configured address.
    Static,
    /// Leave the port unconfigured at L3.
    None,
}

/// Address family a port is configured for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    /// IPv4.
    #[default]
    V4,
    /// IPv6.
    V6,
}

/// Key management scheme for a Wi-Fi network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WifiKeyScheme {
    /// WPA-PSK (pre-shared key).
    #[default]
    WpaPsk,
    /// WPA-EAP (enterprise).
    WpaEap,
}

/// Credentials and identity of one Wi-Fi network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WifiConfig {
    /// Network SSID.
    pub ssid: String,
    /// Key management scheme.
    pub key_scheme: WifiKeyScheme,
    /// EAP identity; empty for PSK networks.
    #[serde(default)]
    pub identity: String,
    /// Pre-shared key or EAP password.
    #[serde(default)]
    pub password: String,
}

/// One cellular access point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellularConfig {
    /// Access point name.
    pub apn: String,
}

/// Wireless sub-configuration of a port. Ethernet ports carry `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "config", rename_all = "lowercase")]
pub enum WirelessConfig {
    /// Wired port.
    #[default]
    None,
    /// Wi-Fi station with one or more candidate networks.
    Wifi(Vec<WifiConfig>),
    /// Cellular modem with one or more candidate access points.
    Cellular(Vec<CellularConfig>),
}

impl WirelessConfig {
    /// Wireless kind without the configuration payload.
    pub fn kind(&self) -> WirelessKind {
        match self {
            WirelessConfig::None => WirelessKind::None,
            WirelessConfig::Wifi(_) => WirelessKind::Wifi,
            WirelessConfig::Cellular(_) => WirelessKind::Cellular,
        }
    }
}

/// Wireless technology of a port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WirelessKind {
    /// Wired.
    #[default]
    None,
    /// Wi-Fi.
    Wifi,
    /// Cellular.
    Cellular,
}

/// Timestamps and error text of the most recent verification attempts, kept
/// per configuration and per port.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestResults {
    /// When the last successful test completed; Unix epoch if never.
    pub last_succeeded: DateTime<Utc>,
    /// When the last failed test completed; Unix epoch if never.
    pub last_failed: DateTime<Utc>,
    /// Error of the last failed test; empty after a newer success.
    pub last_error: String,
}

impl TestResults {
    /// Stamp a successful test and clear the recorded error.
    pub fn record_success(&mut self) {
        self.last_succeeded = Utc::now();
        self.last_error.clear();
    }

    /// Stamp a failed test with its error text.
    pub fn record_failure(&mut self, err: impl Into<String>) {
        self.last_failed = Utc::now();
        self.last_error = err.into();
    }

    /// Fold newer stamps from another result record into this one.
    pub fn update_from(&mut self, from: &TestResults) {
        if from.last_succeeded > self.last_succeeded {
            self.last_succeeded = from.last_succeeded;
        }
        if from.last_failed > self.last_failed {
            self.last_failed = from.last_failed;
        }
        if !from.last_error.is_empty() {
            self.last_error = from.last_error.clone();
        } else if from.last_succeeded > from.last_failed {
            self.last_error.clear();
        }
    }

    /// True when the last recorded verdict was a success.
    pub fn was_working(&self) -> bool {
        self.last_succeeded > self.last_failed
    }
}

/// Per-interface test results accumulated during one connectivity campaign.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntfStatusMap(pub BTreeMap<String, TestResults>);

impl IntfStatusMap {
    /// Record a successful probe for an interface.
    pub fn record_success(&mut self, if_name: &str) {
        self.0.entry(if_name.to_string()).or_default().record_success();
    }

    /// Record a failed probe for an interface.
    pub fn record_failure(&mut self, if_name: &str, err: impl Into<String>) {
        self.0
            .entry(if_name.to_string())
            .or_default()
            .record_failure(err);
    }

    /// Results recorded for an interface, if any.
    pub fn get(&self, if_name: &str) -> Option<&TestResults> {
        self.0.get(if_name)
    }

    /// Merge newer stamps from another campaign into this map.
    pub fn merge(&mut self, other: &IntfStatusMap) {
        for (if_name, results) in &other.0 {
            self.0
                .entry(if_name.clone())
                .or_default()
                .update_from(results);
        }
    }
}

/// Intended configuration for one network port.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortConfig {
    /// Kernel interface name.
    pub if_name: String,
    /// Physical label printed on the device enclosure.
    pub phy_label: String,
    /// Logical label assigned by the controller.
    pub logical_label: String,
    /// Whether the port may carry management traffic to the controller.
    pub is_mgmt: bool,
    /// Whether the port is configured at L3.
    pub is_l3_port: bool,
    /// Cost tier; 0 is free, higher tiers are probed later.
    pub cost: u8,
    /// DHCP behaviour.
    pub dhcp: DhcpMode,
    /// Address family.
    pub addr_family: AddressFamily,
    /// Static address when `dhcp` is [`DhcpMode::Static`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_addr: Option<IpNet>,
    /// Static default gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,
    /// Statically configured DNS servers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub static_dns_servers: Vec<IpAddr>,
    /// Statically configured NTP server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_ntp_server: Option<IpAddr>,
    /// Search domain.
    #[serde(default)]
    pub domain_name: String,
    /// Wireless sub-configuration.
    #[serde(default)]
    pub wireless: WirelessConfig,
    /// Verification history of this port.
    #[serde(default)]
    pub test_results: TestResults,
}

/// State of a device port configuration within the verification lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DpcState {
    /// Not yet processed.
    #[default]
    None,
    /// Waiting for a referenced port to be released from PCI passthrough.
    PciWait,
    /// Waiting for IP addresses and DNS resolvers to appear.
    IpDnsWait,
    /// Connectivity probing in progress.
    Verifying,
    /// Verified working.
    Success,
    /// Probing failed although IP addresses and DNS were present.
    FailWithIpDns,
    /// Probing failed without usable IP addresses or DNS.
    Fail,
    /// The reconciler reported pending asynchronous work.
    AsyncWait,
}

impl fmt::Display for DpcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DpcState::None => "none",
            DpcState::PciWait => "PCI wait",
            DpcState::IpDnsWait => "IP and DNS wait",
            DpcState::Verifying => "verifying",
            DpcState::Success => "success",
            DpcState::FailWithIpDns => "fail with IP and DNS",
            DpcState::Fail => "fail",
            DpcState::AsyncWait => "async wait",
        };
        f.write_str(label)
    }
}

/// A named, timestamped candidate network configuration (one entry of the
/// priority-ordered candidate list).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DevicePortConfig {
    /// Format version.
    pub version: u16,
    /// Source of the configuration, e.g. `"zedagent"` or `"lastresort"`.
    /// Not unique; (key, time_priority) is.
    pub key: String,
    /// Arrival timestamp used for priority ordering. The Unix epoch marks a
    /// permanent fallback entry which always sorts last.
    pub time_priority: DateTime<Utc>,
    /// Current verification state.
    pub state: DpcState,
    /// Verification history of the configuration as a whole.
    #[serde(default)]
    pub test_results: TestResults,
    /// Per-port configuration.
    pub ports: Vec<PortConfig>,
}

impl DevicePortConfig {
    /// True for the conventional zero-time fallback entry.
    pub fn is_last_resort(&self) -> bool {
        self.time_priority == DateTime::<Utc>::UNIX_EPOCH
    }

    /// True when the last verification verdict was a success.
    pub fn was_working(&self) -> bool {
        self.test_results.was_working()
    }

    /// Identity check on (key, time_priority).
    pub fn same_identity(&self, key: &str, time_priority: DateTime<Utc>) -> bool {
        self.key == key && self.time_priority == time_priority
    }

    /// Configuration of the named port, if present.
    pub fn port(&self, if_name: &str) -> Option<&PortConfig> {
        self.ports.iter().find(|p| p.if_name == if_name)
    }

    /// Stamp a successful verification verdict.
    pub fn record_success(&mut self) {
        self.test_results.record_success();
    }

    /// Stamp a failed verification verdict.
    pub fn record_failure(&mut self, err: impl Into<String>) {
        self.test_results.record_failure(err);
    }

    /// Fold per-port results from a connectivity campaign into the ports.
    pub fn record_port_results(&mut self, map: &IntfStatusMap) {
        for port in &mut self.ports {
            if let Some(results) = map.get(&port.if_name) {
                port.test_results.update_from(results);
            }
        }
    }
}

/// The persisted candidate list together with the active entry index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicePortConfigList {
    /// Index of the active entry, or −1 before any verification verdict.
    pub current_index: i32,
    /// Candidates, highest effective priority first.
    pub entries: Vec<DevicePortConfig>,
}

impl Default for DevicePortConfigList {
    fn default() -> Self {
        Self {
            current_index: -1,
            entries: Vec::new(),
        }
    }
}

/// Usage class of a physical adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterUsage {
    /// Usable for both management and application traffic.
    #[default]
    MgmtAndApps,
    /// Management traffic only.
    MgmtOnly,
    /// Reserved for applications.
    AppsOnly,
}

/// One entry of the hardware port inventory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IoAdapter {
    /// Physical label.
    pub phy_label: String,
    /// Logical label.
    pub logical_label: String,
    /// Kernel interface name when visible to the host.
    pub if_name: String,
    /// Usage class.
    pub usage: AdapterUsage,
    /// Cost tier of the underlying link.
    pub cost: u8,
    /// MAC address as printed by the kernel.
    pub mac_addr: String,
    /// Whether the adapter is a network port.
    pub is_port: bool,
    /// Whether the device is bound to the passthrough driver.
    pub is_pci_back: bool,
    /// Application holding the device while passed through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_by_uuid: Option<Uuid>,
}

/// Hardware inventory published by the domain manager.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssignableAdapters {
    /// False until the domain manager has enumerated the hardware.
    pub initialized: bool,
    /// Inventory entries.
    pub adapters: Vec<IoAdapter>,
}

impl AssignableAdapters {
    /// Look up an adapter by its logical label.
    pub fn by_logical_label(&self, label: &str) -> Option<&IoAdapter> {
        self.adapters.iter().find(|a| a.logical_label == label)
    }

    /// Look up an adapter by kernel interface name.
    pub fn by_if_name(&self, if_name: &str) -> Option<&IoAdapter> {
        self.adapters.iter().find(|a| a.if_name == if_name)
    }
}

/// Geolocation facts for one public address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoInfo {
    /// Public IP the lookup resolved.
    pub ip: String,
    /// Reverse DNS name.
    #[serde(default)]
    pub hostname: String,
    /// City.
    #[serde(default)]
    pub city: String,
    /// Region or state.
    #[serde(default)]
    pub region: String,
    /// Country.
    #[serde(default)]
    pub country: String,
    /// Latitude/longitude pair.
    #[serde(default)]
    pub loc: String,
    /// Owning organisation.
    #[serde(default)]
    pub org: String,
    /// Postal code.
    #[serde(default)]
    pub postal: String,
}

/// One assigned address with its geolocation, as published in the network
/// status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddrInfo {
    /// The assigned address.
    pub addr: IpAddr,
    /// Geolocation of the address, once looked up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoInfo>,
    /// When the geolocation was last refreshed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_geo_at: Option<DateTime<Utc>>,
}

/// Radio-silence intent and progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RadioSilence {
    /// Whether radio silence is (requested to be) in effect.
    pub imposed: bool,
    /// True while a change is waiting for the cellular agent to acknowledge.
    pub change_in_progress: bool,
    /// When the change was requested.
    pub change_requested_at: DateTime<Utc>,
    /// Error of the last change attempt; empty on success.
    #[serde(default)]
    pub config_error: String,
}

/// Control protocol spoken to a cellular module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WwanControlProtocol {
    /// Not reported.
    #[default]
    Unspecified,
    /// Qualcomm MSM Interface.
    Qmi,
    /// Mobile Broadband Interface Model.
    Mbim,
}

/// Operational mode reported by a cellular module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WwanOpMode {
    /// Not reported.
    #[default]
    Unspecified,
    /// Radio on, not attached.
    Online,
    /// Radio off (radio silence).
    RadioOff,
    /// Attached and connected.
    Connected,
}

/// Physical addresses identifying a cellular modem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WwanPhysAddrs {
    /// Kernel interface name.
    #[serde(default)]
    pub interface: String,
    /// USB bus address.
    #[serde(default)]
    pub usb: String,
    /// PCI bus address.
    #[serde(default)]
    pub pci: String,
}

/// Cellular module identity and state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WwanCellModule {
    /// Module name; filled from IMEI when the agent leaves it empty.
    #[serde(default)]
    pub name: String,
    /// IMEI.
    #[serde(default)]
    pub imei: String,
    /// Model string.
    #[serde(default)]
    pub model: String,
    /// Firmware revision.
    #[serde(default)]
    pub revision: String,
    /// Control protocol in use.
    #[serde(default)]
    pub control_protocol: WwanControlProtocol,
    /// Operational mode.
    #[serde(default)]
    pub op_mode: WwanOpMode,
}

/// One SIM card slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WwanSimCard {
    /// Slot name; filled from ICCID when the agent leaves it empty.
    #[serde(default)]
    pub name: String,
    /// ICCID.
    #[serde(default)]
    pub iccid: String,
    /// IMSI.
    #[serde(default)]
    pub imsi: String,
}

/// One network provider visible to the modem.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WwanProvider {
    /// PLMN code.
    pub plmn: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Whether the modem is currently served by this provider.
    #[serde(default)]
    pub current_serving: bool,
}

/// Per-modem configuration handed to the cellular agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WwanNetworkConfig {
    /// Logical label of the corresponding port.
    pub logical_label: String,
    /// Physical addresses of the modem.
    pub phys_addrs: WwanPhysAddrs,
    /// Candidate access point names.
    pub apns: Vec<String>,
}

/// Full configuration blob for the cellular agent. Serialised
/// deterministically; the checksum of the serialisation gates radio-silence
/// acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WwanConfig {
    /// Whether all radios must be off.
    pub radio_silence: bool,
    /// Per-modem configuration.
    pub networks: Vec<WwanNetworkConfig>,
}

/// Per-modem status published by the cellular agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WwanNetworkStatus {
    /// Logical label of the corresponding port.
    pub logical_label: String,
    /// Physical addresses of the modem.
    pub phys_addrs: WwanPhysAddrs,
    /// Module identity and state.
    pub module: WwanCellModule,
    /// SIM cards.
    #[serde(default)]
    pub sim_cards: Vec<WwanSimCard>,
    /// Visible providers.
    #[serde(default)]
    pub providers: Vec<WwanProvider>,
    /// Error applying the last configuration, if any.
    #[serde(default)]
    pub config_error: String,
    /// Error of the agent's own connectivity probe, if any.
    #[serde(default)]
    pub probe_error: String,
}

/// Status blob published by the cellular agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WwanStatus {
    /// Checksum of the configuration the agent has applied.
    #[serde(default)]
    pub config_checksum: String,
    /// Per-modem status.
    pub networks: Vec<WwanNetworkStatus>,
}

impl WwanStatus {
    /// Fill empty module and SIM names from IMEI and ICCID.
    pub fn sanitize(&mut self) {
        for network in &mut self.networks {
            if network.module.name.is_empty() {
                network.module.name = network.module.imei.clone();
            }
            for sim in &mut network.sim_cards {
                if sim.name.is_empty() {
                    sim.name = sim.iccid.clone();
                }
            }
        }
    }
}

/// Packet counters for one modem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WwanPacketStats {
    /// Received bytes.
    pub rx_bytes: u64,
    /// Received packets.
    pub rx_packets: u64,
    /// Transmitted bytes.
    pub tx_bytes: u64,
    /// Transmitted packets.
    pub tx_packets: u64,
}

/// Signal quality for one modem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WwanSignalInfo {
    /// Received signal strength indicator (dBm).
    pub rssi: i32,
    /// Reference signal received quality (dB).
    pub rsrq: i32,
    /// Reference signal received power (dBm).
    pub rsrp: i32,
    /// Signal to noise ratio (dB ×10).
    pub snr: i32,
}

/// Per-modem metrics published by the cellular agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WwanNetworkMetrics {
    /// Logical label of the corresponding port.
    pub logical_label: String,
    /// Physical addresses of the modem.
    pub phys_addrs: WwanPhysAddrs,
    /// Packet counters.
    pub packet_stats: WwanPacketStats,
    /// Signal quality.
    pub signal_info: WwanSignalInfo,
}

/// Metrics blob published by the cellular agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WwanMetrics {
    /// Per-modem metrics.
    pub networks: Vec<WwanNetworkMetrics>,
}

/// Wireless runtime state of one port in the network status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WirelessStatus {
    /// Wireless technology of the port.
    pub kind: WirelessKind,
    /// Cellular state, for cellular ports with a reporting modem.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cellular: Option<WwanNetworkStatus>,
}

/// Runtime state of one port as published in the network status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortStatus {
    /// Kernel interface name.
    pub if_name: String,
    /// Physical label.
    pub phy_label: String,
    /// Logical label.
    pub logical_label: String,
    /// Whether the port may carry management traffic.
    pub is_mgmt: bool,
    /// Whether the port is configured at L3.
    pub is_l3_port: bool,
    /// Cost tier.
    pub cost: u8,
    /// DHCP behaviour.
    pub dhcp: DhcpMode,
    /// Address family.
    pub addr_family: AddressFamily,
    /// Whether the interface is administratively and operationally up.
    pub up: bool,
    /// MAC address.
    #[serde(default)]
    pub mac_addr: String,
    /// Assigned addresses with geolocation.
    #[serde(default)]
    pub addrs: Vec<AddrInfo>,
    /// Default routers observed for this port.
    #[serde(default)]
    pub default_routers: Vec<IpAddr>,
    /// DNS resolvers in effect.
    #[serde(default)]
    pub dns_servers: Vec<IpAddr>,
    /// NTP servers learned from DHCP or configured statically.
    #[serde(default)]
    pub ntp_servers: Vec<IpAddr>,
    /// Subnet the port sits in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<IpNet>,
    /// Search domain.
    #[serde(default)]
    pub domain_name: String,
    /// HTTP proxy discovered for this port, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    /// Wireless runtime state.
    #[serde(default)]
    pub wireless: WirelessStatus,
    /// Verification history of this port.
    #[serde(default)]
    pub test_results: TestResults,
}

impl PortStatus {
    /// True when at least one address is assigned.
    pub fn has_ip(&self) -> bool {
        !self.addrs.is_empty()
    }

    /// True when at least one DNS resolver is known.
    pub fn has_dns(&self) -> bool {
        !self.dns_servers.is_empty()
    }
}

/// The externally published view of the device's network state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceNetworkStatus {
    /// Format version of the reporting configuration.
    pub version: u16,
    /// Strictly monotonic publication counter.
    pub sequence: u64,
    /// Verification state of the reporting configuration.
    pub state: DpcState,
    /// True while a verification attempt is in progress.
    pub testing: bool,
    /// Key of the reporting configuration.
    pub dpc_key: String,
    /// Index of the active entry in the candidate list, or −1.
    pub current_index: i32,
    /// Radio-silence state.
    pub radio_silence: RadioSilence,
    /// Per-port runtime state.
    pub ports: Vec<PortStatus>,
}

impl Default for DeviceNetworkStatus {
    fn default() -> Self {
        Self {
            version: DPC_VERSION,
            sequence: 0,
            state: DpcState::None,
            testing: false,
            dpc_key: String::new(),
            current_index: -1,
            radio_silence: RadioSilence::default(),
            ports: Vec::new(),
        }
    }
}

impl DeviceNetworkStatus {
    /// Runtime state of the named port, if present.
    pub fn port(&self, if_name: &str) -> Option<&PortStatus> {
        self.ports.iter().find(|p| p.if_name == if_name)
    }

    /// Management ports only.
    pub fn mgmt_ports(&self) -> impl Iterator<Item = &PortStatus> {
        self.ports.iter().filter(|p| p.is_mgmt)
    }

    /// Names of the management ports, cheapest cost tier first. Ports that
    /// share a cost tier are rotated by the iteration counter so repeated
    /// campaigns probe equal-cost links fairly.
    pub fn mgmt_ports_sorted_by_cost(&self, iteration: u64) -> Vec<String> {
        let mut by_cost: BTreeMap<u8, Vec<String>> = BTreeMap::new();
        for port in self.mgmt_ports() {
            by_cost
                .entry(port.cost)
                .or_default()
                .push(port.if_name.clone());
        }
        let mut sorted = Vec::new();
        for (_, mut group) in by_cost {
            if group.len() > 1 {
                let offset = (iteration as usize) % group.len();
                group.rotate_left(offset);
            }
            sorted.append(&mut group);
        }
        sorted
    }

    /// True when at least one management port has both an address and a DNS
    /// resolver, i.e. probing has a chance to succeed.
    pub fn has_ip_and_dns(&self) -> bool {
        self.mgmt_ports().any(|p| p.has_ip() && p.has_dns())
    }
}
