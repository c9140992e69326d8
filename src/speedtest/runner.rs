use super::download::{DownloadProgress, DownloadTest};
use super::ping::{PingProgress, PingResult, PingTest};
use super::transport::Transport;
use super::upload::{UploadProgress, UploadTest};
use super::{Metric, Result, TestPhase};
use crate::settings::Settings;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Admits one run at a time. The slot frees itself when the guard drops,
/// whether the run finished, failed or panicked.
#[derive(Debug, Clone, Default)]
pub struct RunGate {
    busy: Arc<AtomicBool>,
}

impl RunGate {
    pub fn try_acquire(&self) -> Option<RunGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct RunGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub enum TestUpdate {
    PhaseStarted(TestPhase),
    PingProgress(PingProgress),
    PingComplete(PingResult),
    DownloadProgress(DownloadProgress),
    DownloadComplete(Metric),
    UploadProgress(UploadProgress),
    UploadComplete(Metric),
    Finished(Outcome),
}

/// Runs ping, download and upload back to back, reporting through `update_tx`.
/// Always ends with exactly one `Finished` update; `guard` is released right after it.
pub async fn run_speed_test(
    transport: Arc<dyn Transport>,
    settings: Settings,
    update_tx: mpsc::Sender<TestUpdate>,
    guard: RunGuard,
) -> Outcome {
    let outcome = match run_phases(transport, &settings, &update_tx).await {
        Ok(()) => {
            tracing::info!("speed test complete");
            Outcome::Completed
        }
        Err(e) => {
            tracing::error!(error = %e, "speed test failed");
            Outcome::Failed
        }
    };

    let _ = update_tx.send(TestUpdate::Finished(outcome)).await;
    drop(guard);
    outcome
}

async fn run_phases(
    transport: Arc<dyn Transport>,
    settings: &Settings,
    update_tx: &mpsc::Sender<TestUpdate>,
) -> Result<()> {
    // Ping
    let _ = update_tx.send(TestUpdate::PhaseStarted(TestPhase::Ping)).await;
    let (ping_tx, ping_rx) = mpsc::channel::<PingProgress>(32);
    let mut ping = PingTest::new(settings.ping_endpoints.clone(), settings.ping_fallback_ms);
    let phase_transport = Arc::clone(&transport);
    let ping_result = drive(
        async move { ping.run(phase_transport.as_ref(), ping_tx).await },
        ping_rx,
        update_tx,
        TestUpdate::PingProgress,
    )
    .await?;
    tracing::info!(ping_ms = ping_result.ms, provenance = ?ping_result.provenance, "ping phase done");
    let _ = update_tx.send(TestUpdate::PingComplete(ping_result)).await;

    // Download
    let _ = update_tx
        .send(TestUpdate::PhaseStarted(TestPhase::Download))
        .await;
    let (download_tx, download_rx) = mpsc::channel::<DownloadProgress>(32);
    let mut download = DownloadTest::new(settings);
    let phase_transport = Arc::clone(&transport);
    let download_result = drive(
        async move { download.run(phase_transport.as_ref(), download_tx).await },
        download_rx,
        update_tx,
        TestUpdate::DownloadProgress,
    )
    .await?;
    tracing::info!(mbps = download_result.value, provenance = ?download_result.provenance, "download phase done");
    let _ = update_tx
        .send(TestUpdate::DownloadComplete(download_result))
        .await;

    // Upload
    let _ = update_tx.send(TestUpdate::PhaseStarted(TestPhase::Upload)).await;
    let (upload_tx, upload_rx) = mpsc::channel::<UploadProgress>(32);
    let mut upload = UploadTest::new(settings);
    let upload_result = drive(
        async move { upload.run(transport.as_ref(), upload_tx).await },
        upload_rx,
        update_tx,
        TestUpdate::UploadProgress,
    )
    .await?;
    tracing::info!(mbps = upload_result.value, provenance = ?upload_result.provenance, "upload phase done");
    let _ = update_tx
        .send(TestUpdate::UploadComplete(upload_result))
        .await;

    Ok(())
}

/// Spawns one phase, forwards its progress until the phase drops its
/// sender, then yields the phase result. A panicking phase surfaces as
/// `SpeedTestError::Join`.
async fn drive<P, R>(
    phase: impl Future<Output = Result<R>> + Send + 'static,
    mut progress_rx: mpsc::Receiver<P>,
    update_tx: &mpsc::Sender<TestUpdate>,
    wrap: fn(P) -> TestUpdate,
) -> Result<R>
where
    R: Send + 'static,
{
    let handle = tokio::spawn(phase);

    while let Some(progress) = progress_rx.recv().await {
        let _ = update_tx.send(wrap(progress)).await;
    }

    handle.await?
}
