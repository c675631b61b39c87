//! HTTP heartbeat probe
//!
//! Polls the managed server's HTTP health endpoint and records a heartbeat
//! on every 2xx answer. This is the second of the two liveness signals the
//! health monitor triages; the probe itself never touches lifecycle state.

use std::sync::Arc;
use std::time::Duration;

use shared::HeartbeatSource;

use crate::monitor::HealthMonitor;

const PROBE_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Spawn the probe loop. Quiet while no process is alive.
pub fn spawn_http_probe(
    monitor: Arc<HealthMonitor>,
    url: String,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let client = match reqwest::Client::builder().timeout(PROBE_REQUEST_TIMEOUT).build() {
            Ok(client) => client,
            Err(e) => {
                tracing::error!("failed to build HTTP probe client: {e}");
                return;
            }
        };

        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;

            if !monitor.is_alive() {
                continue;
            }

            match client.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    monitor.record_heartbeat(HeartbeatSource::HttpProbe);
                }
                Ok(response) => {
                    tracing::debug!("HTTP probe answered {}", response.status());
                }
                Err(e) => {
                    tracing::debug!("HTTP probe failed: {e}");
                }
            }
        }
    })
}
