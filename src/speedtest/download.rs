use super::transport::Transport;
use super::{fabricate, mbps, plausible, Attempt, FallbackPolicy, Metric, Provenance, Result, Tally, MIB};
use crate::settings::Settings;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub struct DownloadTest {
    sizes_mib: Vec<u64>,
    candidates: Vec<String>,
    ceiling_mbps: f64,
    fallback_range: [f64; 2],
    fallback: FallbackPolicy,
    pause: Option<Duration>,
    speed_samples: Vec<f64>,
}

impl DownloadTest {
    pub fn new(settings: &Settings) -> Self {
        Self {
            sizes_mib: settings.download_sizes_mib.clone(),
            candidates: settings.download_candidates.clone(),
            ceiling_mbps: settings.download_ceiling_mbps,
            fallback_range: settings.download_fallback_mbps,
            fallback: settings.fallback,
            pause: settings.download_pause(),
            speed_samples: Vec::new(),
        }
    }

    pub async fn run(
        &mut self,
        transport: &dyn Transport,
        progress_tx: mpsc::Sender<DownloadProgress>,
    ) -> Result<Metric> {
        let mut tally = Tally::default();
        self.speed_samples.clear();

        for (index, &size_mib) in self.sizes_mib.iter().enumerate() {
            if index > 0 {
                if let Some(pause) = self.pause {
                    tokio::time::sleep(pause).await;
                }
            }

            let bytes = size_mib * MIB as u64;
            match self.measure(transport, bytes).await {
                Attempt::Sample(speed) => {
                    tally.record(speed, Provenance::Measured);
                    self.speed_samples.push(speed);
                }
                Attempt::Skipped => match self.fallback {
                    FallbackPolicy::Fabricate => {
                        let speed = fabricate(self.fallback_range);
                        tracing::info!(size_mib, speed, "no usable download candidate, substituting estimate");
                        tally.record(speed, Provenance::Fallback);
                        self.speed_samples.push(speed);
                    }
                    FallbackPolicy::Omit => {
                        tracing::info!(size_mib, "no usable download candidate");
                    }
                },
            }

            let _ = progress_tx
                .send(DownloadProgress {
                    completed_sizes: index + 1,
                    total_sizes: self.sizes_mib.len(),
                    running: tally.metric(),
                    speed_samples: self.speed_samples.clone(),
                })
                .await;
        }

        Ok(tally.metric().unwrap_or_else(Metric::unavailable))
    }

    /// Tries each candidate in order; the first plausible speed wins.
    async fn measure(&self, transport: &dyn Transport, bytes: u64) -> Attempt {
        for template in &self.candidates {
            let url = template.replace("{bytes}", &bytes.to_string());
            let start = Instant::now();
            match transport.fetch(&url).await {
                Ok(received) => {
                    let speed = mbps(received as f64 / MIB, start.elapsed());
                    if plausible(speed, self.ceiling_mbps) {
                        tracing::debug!(%url, received, speed, "download sample");
                        return Attempt::Sample(speed);
                    }
                    tracing::debug!(%url, received, speed, "implausible download speed");
                }
                Err(e) => {
                    tracing::debug!(%url, error = %e, "download candidate failed");
                }
            }
        }
        Attempt::Skipped
    }
}

#[derive(Debug, Clone)]
pub struct DownloadProgress {
    pub completed_sizes: usize,
    pub total_sizes: usize,
    /// Cumulative mean over the sizes finished so far.
    pub running: Option<Metric>,
    pub speed_samples: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speedtest::testing::{FakeTransport, Reply};

    fn settings() -> Settings {
        Settings {
            download_candidates: vec![
                "http://first.test/bytes/{bytes}".into(),
                "http://second.test/__down?bytes={bytes}".into(),
                "http://third.test/logo.png".into(),
            ],
            ..Settings::default()
        }
    }

    async fn run(settings: &Settings, transport: &FakeTransport) -> (Metric, Vec<DownloadProgress>) {
        let (tx, mut rx) = mpsc::channel(32);
        let mut test = DownloadTest::new(settings);
        let metric = test.run(transport, tx).await.unwrap();
        let mut progress = Vec::new();
        while let Some(p) = rx.recv().await {
            progress.push(p);
        }
        (metric, progress)
    }

    fn approx(actual: f64, expected: f64) -> bool {
        (actual - expected).abs() <= expected * 0.02
    }

    fn requested_bytes(url: &str) -> u64 {
        url.rsplit(['/', '=']).next().unwrap().parse().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn first_candidate_serves_every_size() {
        // 100 ms per request: 1 MiB -> 80, 5 MiB -> 400, 10 MiB -> 800 Mbps.
        let transport = FakeTransport::new(Duration::from_millis(100))
            .on_fetch(|url| Reply::Ok(requested_bytes(url)));
        let (metric, progress) = run(&settings(), &transport).await;

        assert_eq!(metric.provenance, Provenance::Measured);
        assert!(approx(metric.value, (80.0 + 400.0 + 800.0) / 3.0));
        assert_eq!(transport.calls().len(), 3);
        assert!(transport.calls()[0].ends_with("/bytes/1048576"));

        let running: Vec<f64> = progress.iter().map(|p| p.running.unwrap().value).collect();
        assert!(approx(running[0], 80.0));
        assert!(approx(running[1], 240.0));
        assert_eq!(progress[2].completed_sizes, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn implausible_speed_moves_to_next_candidate() {
        // 10 MiB in 50 ms is 1600 Mbps, over the ceiling; the logo is small but fine.
        let transport = FakeTransport::new(Duration::from_millis(50)).on_fetch(|url| {
            if url.contains("third.test") {
                Reply::Ok(5_000)
            } else if url.contains("first.test") {
                Reply::Fail
            } else {
                Reply::Ok(requested_bytes(url))
            }
        });
        let s = Settings {
            download_sizes_mib: vec![10],
            ..settings()
        };
        let (metric, _) = run(&s, &transport).await;

        assert_eq!(transport.calls().len(), 3);
        let expected = mbps(5_000.0 / MIB, Duration::from_millis(50));
        assert!(approx(metric.value, expected));
        assert_eq!(metric.provenance, Provenance::Measured);
    }

    #[tokio::test(start_paused = true)]
    async fn error_page_is_not_timed_as_a_payload() {
        let transport = FakeTransport::new(Duration::from_millis(100)).on_fetch(|url| {
            if url.contains("first.test") {
                Reply::Status(404)
            } else {
                Reply::Ok(requested_bytes(url))
            }
        });
        let s = Settings {
            download_sizes_mib: vec![1],
            ..settings()
        };
        let (metric, _) = run(&s, &transport).await;

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].contains("second.test"));
        assert!(approx(metric.value, 80.0));
        assert_eq!(metric.provenance, Provenance::Measured);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_bodies_fall_back_per_size() {
        let transport = FakeTransport::new(Duration::from_millis(20)).on_fetch(|_| Reply::Ok(0));
        let (metric, progress) = run(&settings(), &transport).await;

        assert_eq!(transport.calls().len(), 9);
        assert_eq!(metric.provenance, Provenance::Fallback);
        assert!((10.0..40.0).contains(&metric.value));
        for p in &progress {
            assert!((10.0..40.0).contains(&p.running.unwrap().value));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn omit_policy_reports_unavailable() {
        let transport = FakeTransport::offline();
        let s = Settings {
            fallback: FallbackPolicy::Omit,
            ..settings()
        };
        let (metric, progress) = run(&s, &transport).await;

        assert_eq!(metric, Metric::unavailable());
        assert!(progress.iter().all(|p| p.running.is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_waits_between_sizes_only() {
        let transport = FakeTransport::new(Duration::from_millis(100))
            .on_fetch(|url| Reply::Ok(requested_bytes(url)));
        let start = Instant::now();
        run(&settings(), &transport).await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(3 * 100 + 2 * 500));
        assert!(elapsed < Duration::from_millis(3 * 100 + 3 * 500));

        let unpaced = Settings {
            pacing: false,
            ..settings()
        };
        let start = Instant::now();
        run(&unpaced, &transport).await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(500));
    }
}
