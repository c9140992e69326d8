//! Latency estimate from one timed request per endpoint.
//!
//! The elapsed time covers connection setup, TLS and the whole response head,
//! so this reads higher than an ICMP round trip.

use super::transport::Transport;
use super::{Provenance, Result};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::time::Instant;

pub struct PingTest {
    endpoints: Vec<String>,
    fallback_ms: u32,
    samples: Vec<f64>,
}

impl PingTest {
    pub fn new(endpoints: Vec<String>, fallback_ms: u32) -> Self {
        Self {
            endpoints,
            fallback_ms,
            samples: Vec::new(),
        }
    }

    pub async fn run(
        &mut self,
        transport: &dyn Transport,
        progress_tx: mpsc::Sender<PingProgress>,
    ) -> Result<PingResult> {
        self.samples.clear();

        for endpoint in &self.endpoints {
            let url = cache_busted(endpoint, unix_millis());
            let start = Instant::now();
            match transport.probe(&url).await {
                Ok(()) => {
                    let elapsed = start.elapsed().as_secs_f64() * 1000.0;
                    tracing::debug!(%endpoint, elapsed_ms = elapsed, "ping sample");
                    self.samples.push(elapsed);
                }
                Err(e) => {
                    tracing::debug!(%endpoint, error = %e, "ping endpoint skipped");
                }
            }

            let _ = progress_tx
                .send(PingProgress {
                    latest_ping: self.samples.last().copied(),
                })
                .await;
        }

        Ok(self.calculate_result())
    }

    fn calculate_result(&self) -> PingResult {
        if self.samples.is_empty() {
            tracing::info!(fallback_ms = self.fallback_ms, "no ping endpoint answered");
            return PingResult {
                ms: self.fallback_ms,
                provenance: Provenance::Fallback,
                samples: Vec::new(),
            };
        }

        let avg = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
        PingResult {
            ms: avg.round() as u32,
            provenance: Provenance::Measured,
            samples: self.samples.clone(),
        }
    }
}

/// Appends a `t=<millis>` query parameter so no cache answers the request.
pub fn cache_busted(url: &str, stamp_ms: u128) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}t={}", url, separator, stamp_ms)
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct PingProgress {
    pub latest_ping: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PingResult {
    pub ms: u32,
    pub provenance: Provenance,
    pub samples: Vec<f64>,
}
