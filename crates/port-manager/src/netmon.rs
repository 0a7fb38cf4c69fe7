//! Network-stack observer contract.
//!
//! The manager consumes interface attributes, addresses, DHCP/DNS facts and
//! routes through this trait; the platform supplies the real observer. The
//! mock variant drives the manager in tests.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex as StdMutex};

use ipnet::IpNet;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Link-level attributes of one interface.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IfAttrs {
    pub if_index: u32,
    pub if_name: String,
    pub admin_up: bool,
    pub lower_up: bool,
    pub with_broadcast: bool,
    pub mac_addr: String,
}

/// Facts learned from the DHCP lease on one interface.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DhcpInfo {
    pub subnet: Option<IpNet>,
    pub ntp_servers: Vec<IpAddr>,
}

/// Resolver configuration in effect on one interface.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DnsInfo {
    pub dns_servers: Vec<IpAddr>,
    pub domains: Vec<String>,
}

/// Full observed state of one interface.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterfaceState {
    pub attrs: IfAttrs,
    pub ip_addrs: Vec<IpNet>,
    pub dhcp: DhcpInfo,
    pub dns: DnsInfo,
}

/// One observed route.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteInfo {
    pub if_index: u32,
    pub dst: Option<IpNet>,
    pub gateway: Option<IpAddr>,
    pub table: u32,
}

/// Change notifications emitted by the observer.
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    /// An interface appeared, changed or disappeared.
    InterfaceChange { if_name: String },
    /// The routing table changed.
    RouteChange,
}

/// Read-side contract of the network-stack observer.
pub trait NetworkMonitor: Send + Sync {
    /// Snapshot of all observed interfaces.
    fn interfaces(&self) -> Vec<InterfaceState>;

    /// Snapshot of all observed routes.
    fn routes(&self) -> Vec<RouteInfo>;

    /// Subscribe to change notifications.
    fn subscribe(&self) -> broadcast::Receiver<NetworkEvent>;
}

#[derive(Default)]
struct MockState {
    interfaces: BTreeMap<String, InterfaceState>,
    routes: Vec<RouteInfo>,
}

/// In-memory observer used in tests; interfaces and routes are injected
/// directly and every mutation emits the matching event.
#[derive(Clone)]
pub struct MockNetworkMonitor {
    state: Arc<StdMutex<MockState>>,
    events: broadcast::Sender<NetworkEvent>,
}

impl Default for MockNetworkMonitor {
    fn default() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(StdMutex::new(MockState::default())),
            events,
        }
    }
}

impl MockNetworkMonitor {
    pub fn add_or_update_interface(&self, interface: InterfaceState) {
        let if_name = interface.attrs.if_name.clone();
        {
            let mut state = self.state.lock().expect("lock");
            state.interfaces.insert(if_name.clone(), interface);
        }
        let _ = self.events.send(NetworkEvent::InterfaceChange { if_name });
    }

    pub fn del_interface(&self, if_name: &str) {
        {
            let mut state = self.state.lock().expect("lock");
            state.interfaces.remove(if_name);
        }
        let _ = self.events.send(NetworkEvent::InterfaceChange {
            if_name: if_name.to_string(),
        });
    }

    pub fn update_routes(&self, routes: Vec<RouteInfo>) {
        {
            let mut state = self.state.lock().expect("lock");
            state.routes = routes;
        }
        let _ = self.events.send(NetworkEvent::RouteChange);
    }
}

impl NetworkMonitor for MockNetworkMonitor {
    fn interfaces(&self) -> Vec<InterfaceState> {
        let state = self.state.lock().expect("lock");
        state.interfaces.values().cloned().collect()
    }

    fn routes(&self) -> Vec<RouteInfo> {
        let state = self.state.lock().expect("lock");
        state.routes.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events.subscribe()
    }
}
