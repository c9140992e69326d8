use super::transport::Transport;
use super::{fabricate, mbps, plausible, Attempt, FallbackPolicy, Metric, Provenance, Result, Tally, MIB};
use crate::settings::Settings;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub struct UploadTest {
    sizes_mib: Vec<f64>,
    endpoint: String,
    ceiling_mbps: f64,
    fallback_range: [f64; 2],
    fallback: FallbackPolicy,
    pause: Option<Duration>,
    speed_samples: Vec<f64>,
}

impl UploadTest {
    pub fn new(settings: &Settings) -> Self {
        Self {
            sizes_mib: settings.upload_sizes_mib.clone(),
            endpoint: settings.upload_endpoint.clone(),
            ceiling_mbps: settings.upload_ceiling_mbps,
            fallback_range: settings.upload_fallback_mbps,
            fallback: settings.fallback,
            pause: settings.upload_pause(),
            speed_samples: Vec::new(),
        }
    }

    pub async fn run(
        &mut self,
        transport: &dyn Transport,
        progress_tx: mpsc::Sender<UploadProgress>,
    ) -> Result<Metric> {
        let mut tally = Tally::default();
        self.speed_samples.clear();

        for (index, &size_mib) in self.sizes_mib.iter().enumerate() {
            if index > 0 {
                if let Some(pause) = self.pause {
                    tokio::time::sleep(pause).await;
                }
            }

            // No retry and no alternative endpoint: a rejected size is just dropped.
            if let Attempt::Sample(speed) = self.measure(transport, size_mib).await {
                tally.record(speed, Provenance::Measured);
                self.speed_samples.push(speed);
            }

            let _ = progress_tx
                .send(UploadProgress {
                    completed_sizes: index + 1,
                    total_sizes: self.sizes_mib.len(),
                    running: tally.metric(),
                    speed_samples: self.speed_samples.clone(),
                })
                .await;
        }

        if let Some(metric) = tally.metric() {
            return Ok(metric);
        }

        match self.fallback {
            FallbackPolicy::Fabricate => {
                let speed = fabricate(self.fallback_range);
                tracing::info!(speed, "no upload sample accepted, substituting estimate");
                Ok(Metric {
                    value: speed,
                    provenance: Provenance::Fallback,
                })
            }
            FallbackPolicy::Omit => {
                tracing::info!("no upload sample accepted");
                Ok(Metric::unavailable())
            }
        }
    }

    async fn measure(&self, transport: &dyn Transport, size_mib: f64) -> Attempt {
        let payload = random_payload((size_mib * MIB).round() as usize);
        let start = Instant::now();
        match transport.post(&self.endpoint, payload).await {
            Ok(()) => {
                let speed = mbps(size_mib, start.elapsed());
                if plausible(speed, self.ceiling_mbps) {
                    tracing::debug!(size_mib, speed, "upload sample");
                    return Attempt::Sample(speed);
                }
                tracing::debug!(size_mib, speed, "implausible upload speed");
            }
            Err(e) => {
                tracing::debug!(size_mib, error = %e, "upload failed");
            }
        }
        Attempt::Skipped
    }
}

fn random_payload(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::rngs::StdRng::from_entropy().fill(&mut data[..]);
    data
}

#[derive(Debug, Clone)]
pub struct UploadProgress {
    pub completed_sizes: usize,
    pub total_sizes: usize,
    /// Mean of the accepted samples so far; None until one is accepted.
    pub running: Option<Metric>,
    pub speed_samples: Vec<f64>,
}
