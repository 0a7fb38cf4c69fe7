//! Geolocation lookup service contract and its HTTPS implementation.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::api::GeoInfo;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Geolocation lookups for assigned addresses. Lookups run off the manager
/// reactor; results are folded into the published address info.
#[async_trait]
pub trait GeoService: Send + Sync {
    /// Resolve geolocation facts for an address. `Ok(None)` means the
    /// service has no data for it (e.g. a private address).
    async fn lookup(&self, addr: IpAddr) -> anyhow::Result<Option<GeoInfo>>;
}

/// ipinfo-style HTTPS client: `GET <base>/<ip>/json`.
pub struct IpInfoClient {
    base_url: String,
    client: reqwest::Client,
}

impl IpInfoClient {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(LOOKUP_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }
}

#[async_trait]
impl GeoService for IpInfoClient {
    async fn lookup(&self, addr: IpAddr) -> anyhow::Result<Option<GeoInfo>> {
        let url = format!("{}/{}/json", self.base_url.trim_end_matches('/'), addr);
        let res = self.client.get(&url).send().await.map_err(|err| {
            warn!(%addr, %err, "geolocation request failed");
            err
        })?;

        if res.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !res.status().is_success() {
            anyhow::bail!("geolocation lookup for {addr} failed: {}", res.status());
        }

        let info = res.json::<GeoInfo>().await?;
        Ok(Some(info))
    }
}

/// In-memory geolocation service for tests.
#[derive(Clone, Default)]
pub struct MockGeoService {
    entries: Arc<StdMutex<HashMap<IpAddr, GeoInfo>>>,
}

impl MockGeoService {
    pub fn set_geolocation_info(&self, addr: IpAddr, info: GeoInfo) {
        self.entries.lock().expect("lock").insert(addr, info);
    }
}

#[async_trait]
impl GeoService for MockGeoService {
    async fn lookup(&self, addr: IpAddr) -> anyhow::Result<Option<GeoInfo>> {
        Ok(self.entries.lock().expect("lock").get(&addr).cloned())
    }
}
