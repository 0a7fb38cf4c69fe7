//! Cellular-agent contract: intended configuration consumer plus the
//! status/metrics stream folded back into the network status.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;

use crate::api::{WwanConfig, WwanMetrics, WwanStatus};

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Notifications published by the cellular agent.
#[derive(Debug, Clone)]
pub enum WwanEvent {
    Status(WwanStatus),
    Metrics(WwanMetrics),
}

/// The cellular-modem control agent as seen by the manager.
#[async_trait]
pub trait WwanAgent: Send + Sync {
    /// Hand the projected configuration blob to the agent. The agent
    /// acknowledges asynchronously through a status event carrying the
    /// checksum of the applied configuration.
    async fn publish_config(&self, config: &WwanConfig) -> anyhow::Result<()>;

    /// Subscribe to status and metrics notifications.
    fn subscribe(&self) -> broadcast::Receiver<WwanEvent>;
}

/// Deterministic serialisation of the configuration blob plus its SHA-256
/// checksum. The checksum gates radio-silence acknowledgement: a status
/// report only counts once it carries the checksum of the last-sent blob.
pub fn marshal_config(config: &WwanConfig) -> anyhow::Result<(Vec<u8>, String)> {
    let data = serde_json::to_vec(config)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    let checksum = format!("{:x}", hasher.finalize());
    Ok((data, checksum))
}

/// In-memory cellular agent for tests: records published configurations and
/// lets the test inject status/metrics events.
#[derive(Clone)]
pub struct MockWwanAgent {
    configs: Arc<StdMutex<Vec<WwanConfig>>>,
    events: broadcast::Sender<WwanEvent>,
}

impl Default for MockWwanAgent {
    fn default() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            configs: Arc::new(StdMutex::new(Vec::new())),
            events,
        }
    }
}

impl MockWwanAgent {
    /// All configurations received so far.
    pub fn published_configs(&self) -> Vec<WwanConfig> {
        self.configs.lock().expect("lock").clone()
    }

    /// The most recently received configuration.
    pub fn last_config(&self) -> Option<WwanConfig> {
        self.configs.lock().expect("lock").last().cloned()
    }

    /// Inject a status report.
    pub fn update_status(&self, status: WwanStatus) {
        let _ = self.events.send(WwanEvent::Status(status));
    }

    /// Inject a metrics report.
    pub fn update_metrics(&self, metrics: WwanMetrics) {
        let _ = self.events.send(WwanEvent::Metrics(metrics));
    }
}

#[async_trait]
impl WwanAgent for MockWwanAgent {
    async fn publish_config(&self, config: &WwanConfig) -> anyhow::Result<()> {
        self.configs.lock().expect("lock").push(config.clone());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<WwanEvent> {
        self.events.subscribe()
    }
}
