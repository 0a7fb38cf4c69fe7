//! The port configuration manager: a single-threaded reactor that owns the
//! candidate list, the in-flight verification and the assembled network
//! status. All external inputs are serialised through channels; connectivity
//! probes and geolocation lookups run off-reactor and deliver results back
//! as events.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::{
    AssignableAdapters, DeviceNetworkStatus, DevicePortConfig, DevicePortConfigList, GeoInfo,
    RadioSilence, WwanMetrics,
};
use crate::config::Timings;
use crate::conntest::{ConnectivityReport, ConnectivityTester};
use crate::geoloc::GeoService;
use crate::netmon::{NetworkEvent, NetworkMonitor};
use crate::persist::DpcListStore;
use crate::reconciler::{PortReconciler, ReconcileIntent, ReconcilerEvent};
use crate::telemetry;
use crate::wwan::{self, WwanAgent, WwanEvent};

pub(crate) mod dns;
pub(crate) mod dpc_list;
pub(crate) mod verify;
pub(crate) mod wireless;

use dpc_list::DpcList;
use verify::VerifyReason;
use wireless::WirelessCoordinator;

const INPUT_CHANNEL_CAPACITY: usize = 64;
const RESULT_CHANNEL_CAPACITY: usize = 16;

/// Collaborators injected into the manager.
#[derive(Clone)]
pub struct Deps {
    pub conn_tester: Arc<dyn ConnectivityTester>,
    pub reconciler: Arc<dyn PortReconciler>,
    pub net_monitor: Arc<dyn NetworkMonitor>,
    pub geo_service: Arc<dyn GeoService>,
    pub wwan_agent: Arc<dyn WwanAgent>,
}

/// External inputs serialised onto the reactor.
#[derive(Debug)]
pub(crate) enum Input {
    AddDpc(DevicePortConfig),
    DelDpc {
        key: String,
        time_priority: DateTime<Utc>,
    },
    UpdateAa(AssignableAdapters),
    UpdateTimings(Timings),
    UpdateRadioSilence(RadioSilence),
}

/// Result of an off-reactor connectivity probe, tagged with the epoch it was
/// dispatched under so superseded campaigns are discarded on arrival.
pub(crate) struct ProbeOutcome {
    pub epoch: u64,
    pub report: ConnectivityReport,
}

/// Result of an off-reactor geolocation lookup.
pub(crate) struct GeoOutcome {
    pub addr: IpAddr,
    pub result: anyhow::Result<Option<GeoInfo>>,
}

/// In-flight verification of one list entry.
#[derive(Debug, Clone, Copy)]
pub(crate) struct VerifyAttempt {
    pub index: usize,
    pub reason: VerifyReason,
    /// Upper bound on IP/DNS and reconciler-async waits.
    pub deadline: Instant,
}

/// Geolocation bookkeeping for one address.
#[derive(Default)]
pub(crate) struct GeoEntry {
    pub info: Option<GeoInfo>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub last_attempt: Option<Instant>,
    pub last_success: Option<Instant>,
    pub pending: bool,
}

/// Handle through which the embedding process drives the manager and reads
/// its publications.
pub struct ManagerHandle {
    input_tx: mpsc::Sender<Input>,
    dns_rx: watch::Receiver<DeviceNetworkStatus>,
    list_rx: watch::Receiver<DevicePortConfigList>,
    wwan_metrics_rx: watch::Receiver<WwanMetrics>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ManagerHandle {
    /// Insert or update a candidate configuration.
    pub async fn add_dpc(&self, dpc: DevicePortConfig) -> anyhow::Result<()> {
        self.send(Input::AddDpc(dpc)).await
    }

    /// Remove a candidate configuration by identity.
    pub async fn del_dpc(&self, key: &str, time_priority: DateTime<Utc>) -> anyhow::Result<()> {
        self.send(Input::DelDpc {
            key: key.to_string(),
            time_priority,
        })
        .await
    }

    /// Update the hardware inventory.
    pub async fn update_aa(&self, aa: AssignableAdapters) -> anyhow::Result<()> {
        self.send(Input::UpdateAa(aa)).await
    }

    /// Re-read intervals from a changed runtime configuration.
    pub async fn update_timings(&self, timings: Timings) -> anyhow::Result<()> {
        self.send(Input::UpdateTimings(timings)).await
    }

    /// Request a radio-silence change.
    pub async fn update_radio_silence(&self, rs: RadioSilence) -> anyhow::Result<()> {
        self.send(Input::UpdateRadioSilence(rs)).await
    }

    /// Latest published network status.
    pub fn dns(&self) -> DeviceNetworkStatus {
        self.dns_rx.borrow().clone()
    }

    /// Watch network status publications.
    pub fn subscribe_dns(&self) -> watch::Receiver<DeviceNetworkStatus> {
        self.dns_rx.clone()
    }

    /// Latest published candidate list.
    pub fn dpc_list(&self) -> DevicePortConfigList {
        self.list_rx.borrow().clone()
    }

    /// Watch candidate list publications.
    pub fn subscribe_dpc_list(&self) -> watch::Receiver<DevicePortConfigList> {
        self.list_rx.clone()
    }

    /// Latest cellular metrics snapshot.
    pub fn wwan_metrics(&self) -> WwanMetrics {
        self.wwan_metrics_rx.borrow().clone()
    }

    /// Request a graceful shutdown and wait for the reactor to stop.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown_tx.send(true);
        self.task.await.map_err(|err| {
            anyhow::anyhow!("manager task terminated abnormally: {err}")
        })
    }

    async fn send(&self, input: Input) -> anyhow::Result<()> {
        self.input_tx
            .send(input)
            .await
            .map_err(|_| anyhow::anyhow!("manager reactor is gone"))
    }
}

pub(crate) struct Channels {
    pub input_rx: mpsc::Receiver<Input>,
    pub probe_rx: mpsc::Receiver<ProbeOutcome>,
    pub geo_rx: mpsc::Receiver<GeoOutcome>,
    pub shutdown_rx: watch::Receiver<bool>,
}

/// The reactor state. Only the reactor task touches these fields.
pub(crate) struct DpcManager {
    pub(crate) timings: Timings,
    pub(crate) timings_changed: bool,
    pub(crate) deps: Deps,
    pub(crate) list: DpcList,
    pub(crate) aa: AssignableAdapters,
    pub(crate) dns: DeviceNetworkStatus,
    pub(crate) dns_sequence: u64,
    pub(crate) verify: Option<VerifyAttempt>,
    pub(crate) probe_epoch: u64,
    pub(crate) probe_in_flight: bool,
    pub(crate) pending_retest: bool,
    pub(crate) wireless: WirelessCoordinator,
    pub(crate) geo: HashMap<IpAddr, GeoEntry>,
    pub(crate) store: Option<DpcListStore>,
    pub(crate) probe_tx: mpsc::Sender<ProbeOutcome>,
    pub(crate) geo_tx: mpsc::Sender<GeoOutcome>,
    pub(crate) dns_tx: watch::Sender<DeviceNetworkStatus>,
    pub(crate) list_tx: watch::Sender<DevicePortConfigList>,
    pub(crate) wwan_metrics_tx: watch::Sender<WwanMetrics>,
}

/// Construct the reactor and spawn it. Must run inside a tokio runtime.
pub(crate) fn spawn(
    timings: Timings,
    deps: Deps,
    persisted: Option<DevicePortConfigList>,
    store: Option<DpcListStore>,
) -> ManagerHandle {
    let (input_tx, input_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
    let (probe_tx, probe_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
    let (geo_tx, geo_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (dns_tx, dns_rx) = watch::channel(DeviceNetworkStatus::default());
    let list = persisted
        .map(DpcList::from_snapshot)
        .unwrap_or_else(DpcList::new);
    let (list_tx, list_rx) = watch::channel(list.snapshot());
    let (wwan_metrics_tx, wwan_metrics_rx) = watch::channel(WwanMetrics::default());

    let manager = DpcManager {
        timings,
        timings_changed: false,
        deps,
        list,
        aa: AssignableAdapters::default(),
        dns: DeviceNetworkStatus::default(),
        dns_sequence: 0,
        verify: None,
        probe_epoch: 0,
        probe_in_flight: false,
        pending_retest: false,
        wireless: WirelessCoordinator::new(),
        geo: HashMap::new(),
        store,
        probe_tx,
        geo_tx,
        dns_tx,
        list_tx,
        wwan_metrics_tx,
    };

    let channels = Channels {
        input_rx,
        probe_rx,
        geo_rx,
        shutdown_rx,
    };
    let task = tokio::spawn(manager.run(channels));

    ManagerHandle {
        input_tx,
        dns_rx,
        list_rx,
        wwan_metrics_rx,
        shutdown_tx,
        task,
    }
}

impl DpcManager {
    pub(crate) async fn run(mut self, mut channels: Channels) {
        let mut net_events = self.deps.net_monitor.subscribe();
        let mut reconciler_events = self.deps.reconciler.subscribe();
        let mut wwan_events = self.deps.wwan_agent.subscribe();
        let mut test_timer = tokio::time::interval(self.timings.network_test_interval);
        test_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut better_timer = tokio::time::interval(self.timings.network_test_better_interval);
        better_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        test_timer.tick().await;
        better_timer.tick().await;

        self.publish_dns();
        if !self.list.is_empty() {
            let index = self.list.current_index().max(0) as usize;
            self.start_verification(index, VerifyReason::Initial).await;
        }

        loop {
            if self.timings_changed {
                self.timings_changed = false;
                test_timer = tokio::time::interval(self.timings.network_test_interval);
                test_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                better_timer = tokio::time::interval(self.timings.network_test_better_interval);
                better_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                test_timer.tick().await;
                better_timer.tick().await;
            }
            let wait_deadline = self.wait_deadline();

            tokio::select! {
                _ = channels.shutdown_rx.changed() => break,
                maybe_input = channels.input_rx.recv() => match maybe_input {
                    Some(input) => self.handle_input(input).await,
                    None => break,
                },
                event = net_events.recv() => match event {
                    Ok(event) => self.handle_network_event(event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "network monitor events lagged; recomputing status");
                        self.publish_dns();
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
                event = reconciler_events.recv() => match event {
                    Ok(event) => self.handle_reconciler_event(event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "reconciler events lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
                event = wwan_events.recv() => match event {
                    Ok(event) => self.handle_wwan_event(event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "cellular agent events lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
                Some(outcome) = channels.probe_rx.recv() => self.handle_probe_outcome(outcome).await,
                Some(outcome) = channels.geo_rx.recv() => self.handle_geo_outcome(outcome).await,
                _ = test_timer.tick() => self.on_test_timer().await,
                _ = better_timer.tick() => self.on_better_timer().await,
                _ = maybe_sleep_until(wait_deadline) => self.on_wait_deadline().await,
            }
        }
        info!("manager reactor stopped");
    }

    async fn handle_input(&mut self, input: Input) {
        match input {
            Input::AddDpc(dpc) => self.handle_add_dpc(dpc).await,
            Input::DelDpc { key, time_priority } => self.handle_del_dpc(&key, time_priority).await,
            Input::UpdateAa(aa) => self.handle_update_aa(aa).await,
            Input::UpdateTimings(timings) => self.handle_update_timings(timings),
            Input::UpdateRadioSilence(rs) => self.handle_update_radio_silence(rs).await,
        }
    }

    async fn handle_add_dpc(&mut self, dpc: DevicePortConfig) {
        info!(key = %dpc.key, time_priority = %dpc.time_priority, "adding port configuration");
        let index = self.list.add(dpc);
        self.persist_and_publish_list();

        let supersedes = match &self.verify {
            Some(attempt) => index <= attempt.index,
            None => {
                self.list.current_index() < 0 || (index as i32) <= self.list.current_index()
            }
        };
        if supersedes {
            self.start_verification(index, VerifyReason::Initial).await;
        } else {
            self.publish_dns();
        }
    }

    async fn handle_del_dpc(&mut self, key: &str, time_priority: DateTime<Utc>) {
        let Some(removed) = self.list.delete(key, time_priority) else {
            warn!(key, "delete request for unknown port configuration");
            return;
        };
        info!(key, removed, "removed port configuration");
        self.persist_and_publish_list();

        if self.list.is_empty() {
            self.verify = None;
            self.probe_epoch += 1;
            self.publish_dns();
            return;
        }
        if self.verify.is_some() || self.list.current_index() < 0 {
            self.start_verification(0, VerifyReason::Initial).await;
        } else {
            self.publish_dns();
        }
    }

    async fn handle_update_aa(&mut self, aa: AssignableAdapters) {
        debug!(adapters = aa.adapters.len(), "updating assignable adapters");
        self.aa = aa;
        if self.verify.is_some() || !self.list.is_empty() {
            let index = match &self.verify {
                Some(attempt) => attempt.index,
                None => self.list.current_index().max(0) as usize,
            };
            self.start_verification(index, VerifyReason::Retest).await;
        } else {
            self.publish_dns();
        }
    }

    fn handle_update_timings(&mut self, timings: Timings) {
        if self.timings != timings {
            info!(?timings, "updating intervals");
            self.timings = timings;
            self.timings_changed = true;
        }
    }

    async fn handle_update_radio_silence(&mut self, request: RadioSilence) {
        info!(
            imposed = request.imposed,
            config_error = %request.config_error,
            "radio silence request"
        );
        let may_change_config = self.wireless.handle_rs_request(request);
        if may_change_config {
            self.sync_wireless_config().await;
            self.wireless.try_complete();
        }
        self.publish_dns();
    }

    async fn handle_wwan_event(&mut self, event: WwanEvent) {
        match event {
            WwanEvent::Status(status) => {
                debug!("cellular agent status update");
                self.wireless.handle_status(status);
                self.publish_dns();
            }
            WwanEvent::Metrics(metrics) => {
                self.wwan_metrics_tx.send_replace(metrics);
            }
        }
    }

    async fn handle_network_event(&mut self, event: NetworkEvent) {
        match &event {
            NetworkEvent::InterfaceChange { if_name } => debug!(%if_name, "interface change"),
            NetworkEvent::RouteChange => debug!("route change"),
        }
        self.publish_dns();
        self.resume_ip_dns_wait().await;
    }

    /// The configuration the published status reports on: the entry under
    /// verification, or else the active entry.
    pub(crate) fn reporting_index(&self) -> Option<usize> {
        if let Some(attempt) = &self.verify {
            return Some(attempt.index);
        }
        if self.list.current_index() >= 0 {
            return Some(self.list.current_index() as usize);
        }
        None
    }

    pub(crate) fn reporting_dpc(&self) -> Option<&DevicePortConfig> {
        self.list.get(self.reporting_index()?)
    }

    pub(crate) fn persist_and_publish_list(&mut self) {
        let snapshot = self.list.snapshot();
        if let Some(store) = &self.store {
            if let Err(err) = store.save(&snapshot) {
                warn!(%err, "failed to persist candidate list");
            }
        }
        telemetry::record_dpc_list_len(snapshot.entries.len());
        self.list_tx.send_replace(snapshot);
    }

    /// Rebuild the projected cellular configuration and hand it to the agent
    /// when it changed. Identical intents are never re-sent.
    pub(crate) async fn sync_wireless_config(&mut self) {
        let config = self.wireless.build_config(self.reporting_dpc());
        if !self.wireless.needs_send(&config) {
            return;
        }
        let checksum = match wwan::marshal_config(&config) {
            Ok((_, checksum)) => checksum,
            Err(err) => {
                warn!(%err, "failed to marshal cellular configuration");
                return;
            }
        };
        if let Err(err) = self.deps.wwan_agent.publish_config(&config).await {
            warn!(%err, "failed to hand configuration to the cellular agent");
            return;
        }
        telemetry::record_wwan_config_push();
        debug!(%checksum, "cellular configuration sent");
        self.wireless.note_sent(config, checksum);
    }

    async fn apply_current(&mut self) {
        let index = self.list.current_index();
        if index < 0 {
            return;
        }
        let Some(dpc) = self.list.get(index as usize).cloned() else {
            return;
        };
        let intent = ReconcileIntent {
            dpc,
            aa: self.aa.clone(),
            radio_silence: self.wireless.target_imposed(),
        };
        if let Err(err) = self.deps.reconciler.apply(intent).await {
            warn!(%err, "failed to re-apply the current configuration");
        }
    }

    async fn handle_reconciler_event(&mut self, event: ReconcilerEvent) {
        match event {
            ReconcilerEvent::AsyncDone { ok, error } => self.on_async_done(ok, error).await,
            ReconcilerEvent::CurrentStateChanged => self.publish_dns(),
        }
    }
}

async fn maybe_sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
