//! Wireless coordinator: projects the cellular configuration for the
//! modem-control agent and folds its acknowledgements back into the
//! radio-silence state.
//!
//! A radio-silence change stays `change_in_progress` until the agent reports
//! a status whose config checksum equals the checksum of the last-sent blob.
//! A per-modem config error in that report fails the change and reverts
//! `imposed` to its pre-change value.

use crate::api::{
    DevicePortConfig, RadioSilence, WirelessConfig, WwanConfig, WwanNetworkConfig,
    WwanNetworkStatus, WwanPhysAddrs, WwanStatus,
};

#[derive(Debug, Clone, Copy)]
struct PendingChange {
    target_imposed: bool,
    prev_imposed: bool,
}

#[derive(Debug, Default)]
pub(crate) struct WirelessCoordinator {
    /// Radio-silence view published in the network status.
    pub rs: RadioSilence,
    /// Last sanitized status from the agent.
    pub status: Option<WwanStatus>,
    last_sent: Option<(WwanConfig, String)>,
    pending: Option<PendingChange>,
}

impl WirelessCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Radio-silence value the intended configuration must carry: the target
    /// of an in-flight change, or the settled value.
    pub fn target_imposed(&self) -> bool {
        self.pending
            .map(|p| p.target_imposed)
            .unwrap_or(self.rs.imposed)
    }

    /// Process a radio-silence request. Returns false when the request only
    /// carried an error from a higher layer and the intended configuration
    /// must not change.
    pub fn handle_rs_request(&mut self, request: RadioSilence) -> bool {
        self.rs.change_requested_at = request.change_requested_at;
        if !request.config_error.is_empty() {
            self.rs.config_error = request.config_error;
            self.rs.change_in_progress = false;
            return false;
        }
        self.pending = Some(PendingChange {
            target_imposed: request.imposed,
            prev_imposed: self.rs.imposed,
        });
        self.rs.change_in_progress = true;
        self.rs.config_error.clear();
        true
    }

    /// Project the cellular configuration for the given port configuration.
    /// Wi-Fi is realised by the reconciler and does not appear here.
    pub fn build_config(&self, dpc: Option<&DevicePortConfig>) -> WwanConfig {
        let mut networks = Vec::new();
        if let Some(dpc) = dpc {
            for port in &dpc.ports {
                if let WirelessConfig::Cellular(cells) = &port.wireless {
                    networks.push(WwanNetworkConfig {
                        logical_label: port.logical_label.clone(),
                        phys_addrs: WwanPhysAddrs {
                            interface: port.if_name.clone(),
                            ..WwanPhysAddrs::default()
                        },
                        apns: cells.iter().map(|c| c.apn.clone()).collect(),
                    });
                }
            }
        }
        WwanConfig {
            radio_silence: self.target_imposed(),
            networks,
        }
    }

    /// True when the configuration differs from the last-sent blob.
    pub fn needs_send(&self, config: &WwanConfig) -> bool {
        match &self.last_sent {
            Some((sent, _)) => sent != config,
            None => true,
        }
    }

    /// Remember a successfully handed-over blob and its checksum.
    pub fn note_sent(&mut self, config: WwanConfig, checksum: String) {
        self.last_sent = Some((config, checksum));
    }

    /// Fold a status report from the agent.
    pub fn handle_status(&mut self, mut status: WwanStatus) {
        status.sanitize();
        self.status = Some(status);
        self.try_complete();
    }

    /// Close out an in-flight radio-silence change once the agent has
    /// acknowledged the last-sent configuration.
    pub fn try_complete(&mut self) {
        let Some(status) = &self.status else {
            return;
        };
        let Some((_, sent_checksum)) = &self.last_sent else {
            return;
        };
        if status.config_checksum != *sent_checksum {
            return;
        }
        let Some(pending) = self.pending.take() else {
            return;
        };

        match status.networks.iter().find(|n| !n.config_error.is_empty()) {
            Some(network) => {
                self.rs.imposed = pending.prev_imposed;
                self.rs.config_error =
                    format!("{}: {}", network.logical_label, network.config_error);
            }
            None => {
                self.rs.imposed = pending.target_imposed;
                self.rs.config_error.clear();
            }
        }
        self.rs.change_in_progress = false;
    }

    /// Cellular runtime state for a port, by logical label.
    pub fn cellular_status(&self, logical_label: &str) -> Option<WwanNetworkStatus> {
        self.status.as_ref().and_then(|status| {
            status
                .networks
                .iter()
                .find(|n| n.logical_label == logical_label)
                .cloned()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::CellularConfig;
    use crate::api::PortConfig;
    use crate::wwan::marshal_config;
    use chrono::Utc;

    fn cellular_dpc() -> DevicePortConfig {
        DevicePortConfig {
            key: "zedagent".into(),
            time_priority: Utc::now(),
            ports: vec![PortConfig {
                if_name: "wwan0".into(),
                logical_label: "mock-wwan0".into(),
                is_mgmt: true,
                wireless: WirelessConfig::Cellular(vec![CellularConfig { apn: "apn".into() }]),
                ..PortConfig::default()
            }],
            ..DevicePortConfig::default()
        }
    }

    fn ack_status(checksum: &str, config_error: &str) -> WwanStatus {
        WwanStatus {
            config_checksum: checksum.into(),
            networks: vec![WwanNetworkStatus {
                logical_label: "mock-wwan0".into(),
                config_error: config_error.into(),
                ..WwanNetworkStatus::default()
            }],
        }
    }

    #[test]
    fn build_config_projects_cellular_ports_only() {
        let coordinator = WirelessCoordinator::new();
        let mut dpc = cellular_dpc();
        dpc.ports.push(PortConfig {
            if_name: "eth0".into(),
            is_mgmt: true,
            ..PortConfig::default()
        });

        let config = coordinator.build_config(Some(&dpc));
        assert!(!config.radio_silence);
        assert_eq!(config.networks.len(), 1);
        assert_eq!(config.networks[0].logical_label, "mock-wwan0");
        assert_eq!(config.networks[0].phys_addrs.interface, "wwan0");
        assert_eq!(config.networks[0].apns, vec!["apn"]);
    }

    #[test]
    fn rs_round_trip_completes_on_matching_checksum() {
        let mut coordinator = WirelessCoordinator::new();
        let requested_at = Utc::now();
        assert!(coordinator.handle_rs_request(RadioSilence {
            imposed: true,
            change_in_progress: true,
            change_requested_at: requested_at,
            config_error: String::new(),
        }));
        assert!(coordinator.rs.change_in_progress);
        assert!(coordinator.target_imposed());

        let config = coordinator.build_config(Some(&cellular_dpc()));
        assert!(config.radio_silence);
        let (_, checksum) = marshal_config(&config).expect("marshal");
        coordinator.note_sent(config, checksum.clone());

        coordinator.handle_status(ack_status(&checksum, ""));
        assert!(coordinator.rs.imposed);
        assert!(!coordinator.rs.change_in_progress);
        assert!(coordinator.rs.config_error.is_empty());
        assert_eq!(coordinator.rs.change_requested_at, requested_at);
    }

    #[test]
    fn rs_change_fails_on_modem_config_error() {
        let mut coordinator = WirelessCoordinator::new();
        assert!(coordinator.handle_rs_request(RadioSilence {
            imposed: true,
            change_in_progress: true,
            change_requested_at: Utc::now(),
            config_error: String::new(),
        }));

        let config = coordinator.build_config(Some(&cellular_dpc()));
        let (_, checksum) = marshal_config(&config).expect("marshal");
        coordinator.note_sent(config, checksum.clone());

        coordinator.handle_status(ack_status(&checksum, "failed to impose RS"));
        assert!(!coordinator.rs.imposed);
        assert!(!coordinator.rs.change_in_progress);
        assert_eq!(
            coordinator.rs.config_error,
            "mock-wwan0: failed to impose RS"
        );
    }

    #[test]
    fn rs_request_with_upstream_error_is_recorded_not_propagated() {
        let mut coordinator = WirelessCoordinator::new();
        let requested_at = Utc::now();
        assert!(!coordinator.handle_rs_request(RadioSilence {
            imposed: true,
            change_in_progress: true,
            change_requested_at: requested_at,
            config_error: "Error from upper layers".into(),
        }));

        assert!(!coordinator.rs.imposed);
        assert!(!coordinator.rs.change_in_progress);
        assert_eq!(coordinator.rs.config_error, "Error from upper layers");
        assert_eq!(coordinator.rs.change_requested_at, requested_at);
        // the intended configuration keeps radio silence off
        assert!(!coordinator.target_imposed());
    }

    #[test]
    fn stale_checksum_does_not_complete_the_change() {
        let mut coordinator = WirelessCoordinator::new();
        assert!(coordinator.handle_rs_request(RadioSilence {
            imposed: true,
            change_in_progress: true,
            change_requested_at: Utc::now(),
            config_error: String::new(),
        }));

        let config = coordinator.build_config(Some(&cellular_dpc()));
        let (_, checksum) = marshal_config(&config).expect("marshal");
        coordinator.note_sent(config, checksum);

        coordinator.handle_status(ack_status("stale-checksum", ""));
        assert!(coordinator.rs.change_in_progress);
        assert!(!coordinator.rs.imposed);
    }

    #[test]
    fn repeated_identical_intent_needs_no_resend() {
        let mut coordinator = WirelessCoordinator::new();
        let config = coordinator.build_config(Some(&cellular_dpc()));
        let (_, checksum) = marshal_config(&config).expect("marshal");
        coordinator.note_sent(config.clone(), checksum);

        assert!(!coordinator.needs_send(&config));
        let rebuilt = coordinator.build_config(Some(&cellular_dpc()));
        assert!(!coordinator.needs_send(&rebuilt));
    }

    #[test]
    fn cellular_status_is_matched_by_logical_label() {
        let mut coordinator = WirelessCoordinator::new();
        coordinator.handle_status(ack_status("c1", ""));

        assert!(coordinator.cellular_status("mock-wwan0").is_some());
        assert!(coordinator.cellular_status("mock-wwan1").is_none());
    }
}
