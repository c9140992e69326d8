pub mod download;
pub mod ping;
pub mod runner;
pub mod transport;
pub mod upload;

#[cfg(test)]
pub(crate) mod testing;

use rand::Rng;
use std::time::Duration;
use thiserror::Error;

/// Bytes per mebibyte; payload sizes and throughput math both use it.
pub const MIB: f64 = 1024.0 * 1024.0;

/// Progress checkpoints, in percent.
pub const PROGRESS_AFTER_PING: u8 = 20;
pub const PROGRESS_AFTER_DOWNLOAD: u8 = 60;
pub const PROGRESS_AFTER_UPLOAD: u8 = 100;

pub const STATUS_COMPLETE: &str = "Test Complete!";
pub const STATUS_FAILED: &str = "Test Failed. Please try again.";

#[derive(Debug, Error)]
pub enum SpeedTestError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server responded with status {0}")]
    Status(u16),
    #[error("measurement task stopped: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, SpeedTestError>;

/// Where a displayed number came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Provenance {
    /// Reset value, nothing recorded yet.
    #[default]
    Pending,
    Measured,
    /// At least one contributing sample was fabricated.
    Fallback,
    /// Nothing was measured and fabrication is disabled.
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Metric {
    pub value: f64,
    pub provenance: Provenance,
}

impl Metric {
    pub fn unavailable() -> Self {
        Self {
            value: 0.0,
            provenance: Provenance::Unavailable,
        }
    }

    /// Download/upload rendering: always one fractional digit.
    pub fn display(&self) -> String {
        format_mbps(self.value)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeedTestResult {
    pub ping_ms: u32,
    pub ping_provenance: Provenance,
    pub download: Metric,
    pub upload: Metric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPhase {
    Idle,
    Ping,
    Download,
    Upload,
    Completed,
    Failed,
}

impl TestPhase {
    pub fn is_running(self) -> bool {
        matches!(self, TestPhase::Ping | TestPhase::Download | TestPhase::Upload)
    }

    pub fn status_text(self) -> &'static str {
        match self {
            TestPhase::Idle => "Ready",
            TestPhase::Ping => "Testing Ping...",
            TestPhase::Download => "Testing Download Speed...",
            TestPhase::Upload => "Testing Upload Speed...",
            TestPhase::Completed => STATUS_COMPLETE,
            TestPhase::Failed => STATUS_FAILED,
        }
    }
}

/// Whether a phase may invent a number when nothing usable was measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackPolicy {
    #[default]
    Fabricate,
    Omit,
}

/// Outcome of measuring one payload size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Attempt {
    Sample(f64),
    Skipped,
}

/// Running mean over the samples of one phase.
#[derive(Debug, Default)]
pub struct Tally {
    sum: f64,
    count: u32,
    fabricated: bool,
}

impl Tally {
    pub fn record(&mut self, value: f64, provenance: Provenance) {
        self.sum += value;
        self.count += 1;
        self.fabricated |= provenance == Provenance::Fallback;
    }

    pub fn metric(&self) -> Option<Metric> {
        if self.count == 0 {
            return None;
        }
        let provenance = if self.fabricated {
            Provenance::Fallback
        } else {
            Provenance::Measured
        };
        Some(Metric {
            value: self.sum / self.count as f64,
            provenance,
        })
    }
}

/// Half of the last displayed digit; values within it of a bound render as the bound.
const DISPLAY_ROUNDING: f64 = 0.05;

pub fn format_mbps(mbps: f64) -> String {
    format!("{:.1}", mbps)
}

/// Megabits per second for `megabytes` moved in `elapsed`.
pub fn mbps(megabytes: f64, elapsed: Duration) -> f64 {
    (megabytes * 8.0) / elapsed.as_secs_f64()
}

/// Open interval (0, ceiling). Rejects NaN and the infinity of a zero-length timing.
pub fn plausible(mbps: f64, ceiling: f64) -> bool {
    mbps > 0.0 && mbps < ceiling
}

/// Uniform pick from `[low, high)` whose one-decimal rendering also stays
/// below `high`.
pub fn fabricate(range: [f64; 2]) -> f64 {
    let [low, high] = range;
    let high = high - DISPLAY_ROUNDING;
    if low < high {
        rand::thread_rng().gen_range(low..high)
    } else {
        low
    }
}
