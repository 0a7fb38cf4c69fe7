//! Verification state machine.
//!
//! One list entry is verified at a time: PCI-passthrough checks first, then
//! the reconciler realises the intent, then the machine waits for addresses
//! and resolvers before dispatching a connectivity probe off-reactor. A
//! failed entry triggers a fallback walk down the list; a remote temporary
//! failure never does.

use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::DpcState;
use crate::conntest::ConnectivityReport;
use crate::reconciler::ReconcileIntent;
use crate::telemetry;

use super::{DpcManager, ProbeOutcome, VerifyAttempt};

/// Why a verification attempt was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VerifyReason {
    /// A new or changed configuration arrived.
    Initial,
    /// The previous entry failed and the walk moved down the list.
    Fallback,
    /// Periodic re-verification of the active entry.
    Retest,
    /// Periodic attempt to climb back to a higher-priority entry.
    TestBetter,
}

enum StepOutcome {
    /// Waiting for an external event (PCI release, addresses, async work).
    Waiting,
    /// A probe was dispatched; the verdict arrives as an event.
    Probing,
    /// The entry failed before probing.
    Failed,
}

enum PciCheck {
    Clear,
    Wait,
    UsedBy { if_name: String, uuid: Uuid },
}

impl DpcManager {
    /// Begin verifying the entry at `index`, abandoning any in-flight
    /// attempt. Walks down the list on immediate failures.
    pub(crate) async fn start_verification(&mut self, index: usize, reason: VerifyReason) {
        // invalidate any outstanding probe; its late result is discarded
        self.probe_epoch += 1;
        let mut index = index;
        let mut reason = reason;
        loop {
            if index >= self.list.len() {
                self.verify = None;
                self.publish_dns();
                return;
            }
            let key = self
                .list
                .get(index)
                .map(|d| d.key.clone())
                .unwrap_or_default();
            info!(index, ?reason, key = %key, "starting verification");
            self.verify = Some(VerifyAttempt {
                index,
                reason,
                deadline: Instant::now() + self.timings.network_test_duration,
            });

            match self.verify_step().await {
                StepOutcome::Waiting | StepOutcome::Probing => return,
                StepOutcome::Failed => match self.after_failure(index, reason).await {
                    Some((next_index, next_reason)) => {
                        index = next_index;
                        reason = next_reason;
                    }
                    None => return,
                },
            }
        }
    }

    /// One pass through the pre-probe stages of the machine.
    async fn verify_step(&mut self) -> StepOutcome {
        let Some(attempt) = self.verify else {
            return StepOutcome::Failed;
        };

        match self.check_pci_assignments(attempt.index) {
            PciCheck::UsedBy { if_name, uuid } => {
                let err = format!("port {if_name} in PCIBack is used by {uuid}");
                warn!(index = attempt.index, %err, "verification failed");
                if let Some(dpc) = self.list.get_mut(attempt.index) {
                    dpc.record_failure(err.clone());
                    dpc.state = DpcState::Fail;
                }
                return StepOutcome::Failed;
            }
            PciCheck::Wait => {
                info!(index = attempt.index, "waiting for PCI release");
                if let Some(dpc) = self.list.get_mut(attempt.index) {
                    dpc.state = DpcState::PciWait;
                }
                self.persist_and_publish_list();
                self.publish_dns();
                return StepOutcome::Waiting;
            }
            PciCheck::Clear => {}
        }

        let intent = ReconcileIntent {
            dpc: self.list.get(attempt.index).cloned().unwrap_or_default(),
            aa: self.aa.clone(),
            radio_silence: self.wireless.target_imposed(),
        };
        match self.deps.reconciler.apply(intent).await {
            Err(err) => {
                warn!(index = attempt.index, %err, "reconciler rejected the intent");
                if let Some(dpc) = self.list.get_mut(attempt.index) {
                    dpc.record_failure(err.to_string());
                    dpc.state = DpcState::Fail;
                }
                return StepOutcome::Failed;
            }
            Ok(status) if status.async_in_progress => {
                info!(index = attempt.index, "waiting for asynchronous reconciliation");
                if let Some(dpc) = self.list.get_mut(attempt.index) {
                    dpc.state = DpcState::AsyncWait;
                }
                self.persist_and_publish_list();
                self.publish_dns();
                return StepOutcome::Waiting;
            }
            Ok(status) => {
                for item in &status.failed_items {
                    warn!(item = %item.name, error = %item.error, "reconciler reported a failed item");
                }
            }
        }

        self.sync_wireless_config().await;

        if let Some(dpc) = self.list.get_mut(attempt.index) {
            dpc.state = DpcState::Verifying;
        }
        self.publish_dns();
        if !self.dns.has_ip_and_dns() && Instant::now() < attempt.deadline {
            debug!(index = attempt.index, "waiting for IP addresses and DNS");
            if let Some(dpc) = self.list.get_mut(attempt.index) {
                dpc.state = DpcState::IpDnsWait;
            }
            self.persist_and_publish_list();
            self.publish_dns();
            return StepOutcome::Waiting;
        }

        self.launch_probe();
        StepOutcome::Probing
    }

    /// Decide what follows a failed attempt at `index`. Returns the next
    /// entry to verify, or `None` when the campaign ends.
    async fn after_failure(
        &mut self,
        index: usize,
        reason: VerifyReason,
    ) -> Option<(usize, VerifyReason)> {
        self.verify = None;
        telemetry::record_verification_verdict("fail");

        if reason == VerifyReason::TestBetter {
            // the higher-priority entry is still broken; keep the current one
            self.apply_current().await;
            self.persist_and_publish_list();
            self.publish_dns();
            return None;
        }

        let next = index + 1;
        if next < self.list.len() {
            telemetry::record_fallback();
            info!(failed = index, next, "falling back to the next candidate");
            return Some((next, VerifyReason::Fallback));
        }

        // the list is exhausted; the failed entry stays active
        self.list.set_current(index);
        self.persist_and_publish_list();
        self.publish_dns();
        None
    }

    fn check_pci_assignments(&self, index: usize) -> PciCheck {
        let Some(dpc) = self.list.get(index) else {
            return PciCheck::Clear;
        };
        let mut wait = false;
        for port in &dpc.ports {
            let adapter = self
                .aa
                .by_logical_label(&port.logical_label)
                .or_else(|| self.aa.by_if_name(&port.if_name));
            let Some(adapter) = adapter else { continue };
            if !adapter.is_pci_back {
                continue;
            }
            if let Some(uuid) = adapter.used_by_uuid {
                return PciCheck::UsedBy {
                    if_name: port.if_name.clone(),
                    uuid,
                };
            }
            wait = true;
        }
        if wait {
            PciCheck::Wait
        } else {
            PciCheck::Clear
        }
    }

    /// Dispatch a connectivity probe off-reactor against the current status
    /// snapshot. At most one probe is meaningful at a time; the epoch makes
    /// superseded results discardable.
    pub(crate) fn launch_probe(&mut self) {
        self.probe_epoch += 1;
        self.probe_in_flight = true;
        let epoch = self.probe_epoch;
        let tester = self.deps.conn_tester.clone();
        let dns = self.dns.clone();
        let tx = self.probe_tx.clone();
        debug!(epoch, dpc_key = %dns.dpc_key, "dispatching connectivity probe");
        tokio::spawn(async move {
            let report = tester.test_connectivity(&dns).await;
            let _ = tx.send(ProbeOutcome { epoch, report }).await;
        });
    }

    pub(crate) async fn handle_probe_outcome(&mut self, outcome: ProbeOutcome) {
        if outcome.epoch != self.probe_epoch {
            debug!(epoch = outcome.epoch, "discarding stale probe result");
            return;
        }
        self.probe_in_flight = false;
        match self.verify {
            Some(attempt) => self.conclude_verification(attempt, outcome.report).await,
            None => self.handle_background_report(outcome.report).await,
        }
        if self.pending_retest && self.verify.is_none() && !self.probe_in_flight {
            self.pending_retest = false;
            self.on_test_timer().await;
        }
    }

    async fn conclude_verification(&mut self, attempt: VerifyAttempt, report: ConnectivityReport) {
        let has_ip_dns = self.dns.has_ip_and_dns();
        let Some(dpc) = self.list.get_mut(attempt.index) else {
            self.verify = None;
            return;
        };
        dpc.record_port_results(&report.ports);
        let key = dpc.key.clone();

        match report.verdict {
            Ok(()) => {
                telemetry::record_probe_result("success");
                telemetry::record_verification_verdict("success");
                dpc.state = DpcState::Success;
                dpc.record_success();
                info!(index = attempt.index, key = %key, "verification succeeded");
                self.finish_with_entry(attempt.index, true).await;
            }
            Err(err) if err.is_remote_temporary() => {
                telemetry::record_probe_result("remote_temporary_failure");
                // The controller answered, so the path works; a controller-side
                // refusal must not push the device to a worse configuration.
                warn!(index = attempt.index, key = %key, %err, "remote temporary failure");
                dpc.state = DpcState::Success;
                dpc.record_success();
                self.finish_with_entry(attempt.index, false).await;
            }
            Err(err) => {
                telemetry::record_probe_result("failure");
                let text = format!("network test failed: {err}");
                dpc.record_failure(text.clone());
                dpc.state = if has_ip_dns {
                    DpcState::FailWithIpDns
                } else {
                    DpcState::Fail
                };
                warn!(index = attempt.index, key = %key, error = %text, "verification failed");
                if let Some((next, reason)) = self.after_failure(attempt.index, attempt.reason).await
                {
                    self.start_verification(next, reason).await;
                }
            }
        }
    }

    /// Make the verified entry active, optionally compressing the list.
    async fn finish_with_entry(&mut self, index: usize, compress: bool) {
        self.verify = None;
        self.list.set_current(index);
        if compress && self.list.current_index() == 0 {
            let removed = self.list.compress();
            if removed > 0 {
                telemetry::record_compression(removed);
                info!(removed, "compressed superseded candidates");
            }
        }
        self.persist_and_publish_list();
        self.publish_dns();
        self.sync_wireless_config().await;
    }

    /// Outcome of a background probe of the active, previously working
    /// configuration.
    async fn handle_background_report(&mut self, report: ConnectivityReport) {
        let index = self.list.current_index();
        if index < 0 {
            return;
        }
        let index = index as usize;
        match report.verdict {
            Ok(()) => {
                telemetry::record_probe_result("success");
                if let Some(dpc) = self.list.get_mut(index) {
                    dpc.record_port_results(&report.ports);
                    dpc.state = DpcState::Success;
                    dpc.record_success();
                }
                self.persist_and_publish_list();
                self.publish_dns();
            }
            Err(err) if err.is_remote_temporary() => {
                telemetry::record_probe_result("remote_temporary_failure");
                debug!(%err, "background probe hit a remote temporary failure; keeping the configuration");
            }
            Err(err) => {
                telemetry::record_probe_result("failure");
                warn!(%err, "background probe failed; re-verifying the active configuration");
                self.start_verification(index, VerifyReason::Retest).await;
            }
        }
    }

    /// Periodic retest driver. A working active entry gets a quiet
    /// background probe; a failed one re-enters verification once the
    /// failure hysteresis has passed.
    pub(crate) async fn on_test_timer(&mut self) {
        self.maybe_launch_geo();
        if self.verify.is_some() || self.probe_in_flight {
            self.pending_retest = true;
            return;
        }
        let index = self.list.current_index();
        if index < 0 {
            if !self.list.is_empty() {
                self.start_verification(0, VerifyReason::Retest).await;
            }
            return;
        }
        let index = index as usize;
        let Some(dpc) = self.list.get(index) else {
            return;
        };
        if dpc.state == DpcState::Success {
            self.launch_probe();
            return;
        }
        let since_failure = (chrono::Utc::now() - dpc.test_results.last_failed)
            .to_std()
            .unwrap_or_default();
        if since_failure >= self.timings.min_time_since_failure {
            self.start_verification(index, VerifyReason::Retest).await;
        }
    }

    /// Periodic attempt to climb back to a higher-priority entry, skipping
    /// entries inside the failure hysteresis window.
    pub(crate) async fn on_better_timer(&mut self) {
        if self.verify.is_some() || self.probe_in_flight {
            return;
        }
        let current = self.list.current_index();
        if current <= 0 {
            return;
        }
        for index in 0..current as usize {
            let Some(dpc) = self.list.get(index) else {
                continue;
            };
            let since_failure = (chrono::Utc::now() - dpc.test_results.last_failed)
                .to_std()
                .unwrap_or_default();
            if since_failure >= self.timings.min_time_since_failure {
                info!(index, key = %dpc.key, "re-testing a higher-priority configuration");
                self.start_verification(index, VerifyReason::TestBetter)
                    .await;
                return;
            }
        }
    }

    /// Deadline for the event-driven waits; `None` while nothing is waiting.
    /// PCI waits have no deadline: only an inventory update can unblock them.
    pub(crate) fn wait_deadline(&self) -> Option<Instant> {
        let attempt = self.verify.as_ref()?;
        let state = self.list.get(attempt.index)?.state;
        matches!(state, DpcState::IpDnsWait | DpcState::AsyncWait).then_some(attempt.deadline)
    }

    pub(crate) async fn on_wait_deadline(&mut self) {
        let Some(attempt) = self.verify else {
            return;
        };
        match self.list.get(attempt.index).map(|d| d.state) {
            Some(DpcState::IpDnsWait) => {
                // run the probe anyway; it reports the missing addresses
                debug!(index = attempt.index, "IP/DNS wait expired");
                if let Some(dpc) = self.list.get_mut(attempt.index) {
                    dpc.state = DpcState::Verifying;
                }
                self.publish_dns();
                self.launch_probe();
            }
            Some(DpcState::AsyncWait) => {
                let err = "reconciler did not finish asynchronous operations in time";
                warn!(index = attempt.index, error = err, "asynchronous wait expired");
                if let Some(dpc) = self.list.get_mut(attempt.index) {
                    dpc.record_failure(err);
                    dpc.state = DpcState::Fail;
                }
                if let Some((next, reason)) = self.after_failure(attempt.index, attempt.reason).await
                {
                    self.start_verification(next, reason).await;
                }
            }
            _ => {}
        }
    }

    /// Resume an IP/DNS wait as soon as the observer shows usable addresses.
    pub(crate) async fn resume_ip_dns_wait(&mut self) {
        let Some(attempt) = self.verify else {
            return;
        };
        if self.list.get(attempt.index).map(|d| d.state) != Some(DpcState::IpDnsWait) {
            return;
        }
        if !self.dns.has_ip_and_dns() {
            return;
        }
        debug!(index = attempt.index, "addresses appeared; resuming verification");
        if let Some(dpc) = self.list.get_mut(attempt.index) {
            dpc.state = DpcState::Verifying;
        }
        self.publish_dns();
        self.launch_probe();
    }

    /// Completion of asynchronous reconciler work.
    pub(crate) async fn on_async_done(&mut self, ok: bool, error: String) {
        let Some(attempt) = self.verify else {
            return;
        };
        if self.list.get(attempt.index).map(|d| d.state) != Some(DpcState::AsyncWait) {
            return;
        }
        if ok {
            match self.verify_step().await {
                StepOutcome::Waiting | StepOutcome::Probing => {}
                StepOutcome::Failed => {
                    if let Some((next, reason)) =
                        self.after_failure(attempt.index, attempt.reason).await
                    {
                        self.start_verification(next, reason).await;
                    }
                }
            }
        } else {
            warn!(index = attempt.index, %error, "asynchronous reconciliation failed");
            if let Some(dpc) = self.list.get_mut(attempt.index) {
                dpc.record_failure(error.clone());
                dpc.state = DpcState::Fail;
            }
            if let Some((next, reason)) = self.after_failure(attempt.index, attempt.reason).await {
                self.start_verification(next, reason).await;
            }
        }
    }
}
