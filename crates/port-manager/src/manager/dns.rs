//! Assembly of the published device network status.
//!
//! The status is recomposed on every relevant event from four sources: the
//! reporting configuration's intended ports, the observer's current
//! per-interface facts, the tester's per-port verdicts (already folded into
//! the configuration), and the wireless coordinator's cellular view.

use chrono::Utc;
use tokio::time::Instant;
use tracing::debug;

use crate::api::{
    missing_port_error, AddrInfo, DeviceNetworkStatus, DpcState, PortConfig, PortStatus,
    WirelessKind, WirelessStatus,
};
use crate::netmon::{InterfaceState, RouteInfo};
use crate::telemetry;

use super::{DpcManager, GeoOutcome};

impl DpcManager {
    /// Recompose the network status and publish it. Publications carry a
    /// strictly monotonic sequence number; only the reactor publishes, so no
    /// stale view can overwrite a newer one.
    pub(crate) fn publish_dns(&mut self) {
        let status = self.assemble_dns();
        self.dns = status.clone();
        telemetry::record_dns_publication();
        self.dns_tx.send_replace(status);
        self.maybe_launch_geo();
    }

    fn assemble_dns(&mut self) -> DeviceNetworkStatus {
        self.dns_sequence += 1;
        let mut status = DeviceNetworkStatus {
            sequence: self.dns_sequence,
            current_index: self.list.current_index(),
            radio_silence: self.wireless.rs.clone(),
            ..DeviceNetworkStatus::default()
        };

        let Some(index) = self.reporting_index() else {
            return status;
        };
        let Some(dpc) = self.list.get(index) else {
            return status;
        };
        if dpc.version != 0 {
            status.version = dpc.version;
        }
        status.state = dpc.state;
        status.testing = self.verify.is_some()
            && matches!(
                dpc.state,
                DpcState::Verifying | DpcState::IpDnsWait | DpcState::AsyncWait
            );
        status.dpc_key = dpc.key.clone();

        let interfaces = self.deps.net_monitor.interfaces();
        let routes = self.deps.net_monitor.routes();
        for port in &dpc.ports {
            status.ports.push(self.port_status(port, &interfaces, &routes));
        }
        status
    }

    fn port_status(
        &self,
        port: &PortConfig,
        interfaces: &[InterfaceState],
        routes: &[RouteInfo],
    ) -> PortStatus {
        let adapter = self
            .aa
            .by_logical_label(&port.logical_label)
            .or_else(|| self.aa.by_if_name(&port.if_name));
        let pci_back = adapter.map(|a| a.is_pci_back).unwrap_or(false);

        let mut status = PortStatus {
            if_name: port.if_name.clone(),
            phy_label: port.phy_label.clone(),
            logical_label: port.logical_label.clone(),
            is_mgmt: port.is_mgmt,
            is_l3_port: port.is_l3_port,
            cost: adapter.map(|a| a.cost).unwrap_or(0).max(port.cost),
            dhcp: port.dhcp,
            addr_family: port.addr_family,
            mac_addr: adapter.map(|a| a.mac_addr.clone()).unwrap_or_default(),
            dns_servers: port.static_dns_servers.clone(),
            ntp_servers: port.static_ntp_server.iter().copied().collect(),
            domain_name: port.domain_name.clone(),
            wireless: WirelessStatus {
                kind: port.wireless.kind(),
                cellular: None,
            },
            test_results: port.test_results.clone(),
            ..PortStatus::default()
        };
        if status.wireless.kind == WirelessKind::Cellular {
            status.wireless.cellular = self.wireless.cellular_status(&port.logical_label);
        }

        // a port held in PCI passthrough is invisible to the host stack
        let observed = if pci_back {
            None
        } else {
            interfaces.iter().find(|i| i.attrs.if_name == port.if_name)
        };
        match observed {
            Some(interface) => {
                status.up = interface.attrs.admin_up && interface.attrs.lower_up;
                if !interface.attrs.mac_addr.is_empty() {
                    status.mac_addr = interface.attrs.mac_addr.clone();
                }
                status.addrs = interface
                    .ip_addrs
                    .iter()
                    .map(|net| {
                        let addr = net.addr();
                        let entry = self.geo.get(&addr);
                        AddrInfo {
                            addr,
                            geo: entry.and_then(|e| e.info.clone()),
                            last_geo_at: entry.and_then(|e| e.fetched_at),
                        }
                    })
                    .collect();
                if !interface.dns.dns_servers.is_empty() {
                    status.dns_servers = interface.dns.dns_servers.clone();
                }
                if let Some(domain) = interface.dns.domains.first() {
                    status.domain_name = domain.clone();
                }
                if !interface.dhcp.ntp_servers.is_empty() {
                    status.ntp_servers = interface.dhcp.ntp_servers.clone();
                }
                status.subnet = interface.dhcp.subnet;
                status.default_routers = routes
                    .iter()
                    .filter(|r| r.if_index == interface.attrs.if_index && r.dst.is_none())
                    .filter_map(|r| r.gateway)
                    .collect();
            }
            None => {
                status.test_results.last_error = missing_port_error(&port.if_name);
            }
        }
        status
    }

    /// Dispatch geolocation lookups for addresses that are due one. Failed
    /// addresses are retried no sooner than `geo_retry`; successful entries
    /// are refreshed after `geo_redo`.
    pub(crate) fn maybe_launch_geo(&mut self) {
        let addrs: Vec<std::net::IpAddr> = self
            .dns
            .ports
            .iter()
            .flat_map(|p| p.addrs.iter().map(|a| a.addr))
            .collect();
        let now = Instant::now();
        for addr in addrs {
            let geo_retry = self.timings.geo_retry;
            let geo_redo = self.timings.geo_redo;
            let entry = self.geo.entry(addr).or_default();
            if entry.pending {
                continue;
            }
            let due = if entry.info.is_some() {
                entry
                    .last_success
                    .map(|at| now.duration_since(at) >= geo_redo)
                    .unwrap_or(true)
            } else {
                entry
                    .last_attempt
                    .map(|at| now.duration_since(at) >= geo_retry)
                    .unwrap_or(true)
            };
            if !due {
                continue;
            }
            entry.pending = true;
            entry.last_attempt = Some(now);

            let service = self.deps.geo_service.clone();
            let tx = self.geo_tx.clone();
            debug!(%addr, "dispatching geolocation lookup");
            tokio::spawn(async move {
                let result = service.lookup(addr).await;
                let _ = tx.send(GeoOutcome { addr, result }).await;
            });
        }
    }

    pub(crate) async fn handle_geo_outcome(&mut self, outcome: GeoOutcome) {
        let entry = self.geo.entry(outcome.addr).or_default();
        entry.pending = false;
        match outcome.result {
            Ok(Some(info)) => {
                telemetry::record_geo_lookup("success");
                entry.info = Some(info);
                entry.fetched_at = Some(Utc::now());
                entry.last_success = Some(Instant::now());
                self.publish_dns();
            }
            Ok(None) => {
                telemetry::record_geo_lookup("no_data");
            }
            Err(err) => {
                telemetry::record_geo_lookup("error");
                debug!(addr = %outcome.addr, %err, "geolocation lookup failed");
            }
        }
    }
}
