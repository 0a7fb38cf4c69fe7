use std::path::Path;

use anyhow::Context;

pub mod api;
pub mod config;
pub mod conntest;
pub mod geoloc;
pub mod manager;
pub mod netmon;
pub mod persist;
pub mod reconciler;
pub mod runner;
pub mod telemetry;
pub mod wwan;

#[cfg(test)]
pub mod test_support;

/// Read the controller endpoint (`host[:port]`) from its well-known file.
/// The first non-whitespace line wins; surrounding whitespace is ignored.
pub fn read_controller_endpoint(path: &Path) -> anyhow::Result<String> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read controller endpoint file {}", path.display()))?;
    raw.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "controller endpoint file {} contains no endpoint",
                path.display()
            )
        })
}

/// Hostname part of a `host[:port]` endpoint, used for TLS server-name
/// verification.
pub fn endpoint_hostname(endpoint: &str) -> &str {
    endpoint.split(':').next().unwrap_or(endpoint)
}
