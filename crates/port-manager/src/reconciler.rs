//! Contract of the low-level port reconciler.
//!
//! The reconciler turns a selected port configuration into kernel state
//! (addresses, routes, DHCP clients, wireless supplicants). The manager only
//! hands it an intent and consumes the reported status; it never programs
//! hardware itself.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::api::{AssignableAdapters, DevicePortConfig};

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Intended state handed to the reconciler: the configuration under
/// verification plus the hardware inventory and the radio-silence flag it
/// must honour.
#[derive(Debug, Clone, Default)]
pub struct ReconcileIntent {
    pub dpc: DevicePortConfig,
    pub aa: AssignableAdapters,
    pub radio_silence: bool,
}

/// One configuration item the reconciler failed to realise.
#[derive(Debug, Clone)]
pub struct FailedItem {
    pub name: String,
    pub error: String,
}

/// Outcome of one `apply` call.
#[derive(Debug, Clone, Default)]
pub struct ReconcileStatus {
    /// True while the reconciler still has asynchronous work in flight
    /// (e.g. Wi-Fi association).
    pub async_in_progress: bool,
    /// Items that could not be realised.
    pub failed_items: Vec<FailedItem>,
}

/// Notifications emitted by the reconciler.
#[derive(Debug, Clone)]
pub enum ReconcilerEvent {
    /// Previously reported asynchronous work finished.
    AsyncDone {
        ok: bool,
        /// Error text when `ok` is false.
        error: String,
    },
    /// The realised state changed outside of an `apply` call.
    CurrentStateChanged,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ReconcilerError {
    #[error("failed to apply intended port state: {0}")]
    Apply(String),
}

/// Idempotent "apply intended state / observe current state" service.
#[async_trait]
pub trait PortReconciler: Send + Sync {
    /// Realise the intent. Repeated calls with the same intent are no-ops.
    async fn apply(&self, intent: ReconcileIntent) -> Result<ReconcileStatus, ReconcilerError>;

    /// Status of the last applied intent.
    fn current_state(&self) -> ReconcileStatus;

    /// Subscribe to reconciler notifications.
    fn subscribe(&self) -> broadcast::Receiver<ReconcilerEvent>;
}

#[derive(Default)]
struct MockState {
    applied: Vec<ReconcileIntent>,
    next_status: ReconcileStatus,
    next_error: Option<String>,
}

/// In-memory reconciler for tests: records intents and reports whatever
/// status the test injected.
#[derive(Clone)]
pub struct MockPortReconciler {
    state: Arc<StdMutex<MockState>>,
    events: broadcast::Sender<ReconcilerEvent>,
}

impl Default for MockPortReconciler {
    fn default() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(StdMutex::new(MockState::default())),
            events,
        }
    }
}

impl MockPortReconciler {
    /// Status returned by subsequent `apply` calls.
    pub fn set_next_status(&self, status: ReconcileStatus) {
        self.state.lock().expect("lock").next_status = status;
    }

    /// Make subsequent `apply` calls fail.
    pub fn set_next_error(&self, error: Option<String>) {
        self.state.lock().expect("lock").next_error = error;
    }

    /// Intents recorded so far.
    pub fn applied(&self) -> Vec<ReconcileIntent> {
        self.state.lock().expect("lock").applied.clone()
    }

    /// The most recently applied intent.
    pub fn last_applied(&self) -> Option<ReconcileIntent> {
        self.state.lock().expect("lock").applied.last().cloned()
    }

    /// Report completion of previously pending asynchronous work.
    pub fn complete_async(&self, ok: bool, error: &str) {
        {
            let mut state = self.state.lock().expect("lock");
            state.next_status.async_in_progress = false;
        }
        let _ = self.events.send(ReconcilerEvent::AsyncDone {
            ok,
            error: error.to_string(),
        });
    }
}

#[async_trait]
impl PortReconciler for MockPortReconciler {
    async fn apply(&self, intent: ReconcileIntent) -> Result<ReconcileStatus, ReconcilerError> {
        let mut state = self.state.lock().expect("lock");
        if let Some(err) = &state.next_error {
            return Err(ReconcilerError::Apply(err.clone()));
        }
        state.applied.push(intent);
        Ok(state.next_status.clone())
    }

    fn current_state(&self) -> ReconcileStatus {
        self.state.lock().expect("lock").next_status.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<ReconcilerEvent> {
        self.events.subscribe()
    }
}
