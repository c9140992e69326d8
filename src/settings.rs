use crate::speedtest::FallbackPolicy;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DOWNLOAD_PAUSE: Duration = Duration::from_millis(500);
const UPLOAD_PAUSE: Duration = Duration::from_millis(300);

/// Measurement settings, loaded from `~/.config/speedprobe/config.toml`.
/// Every key is optional; missing keys keep their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Timed once each, in order.
    pub ping_endpoints: Vec<String>,
    /// Reported when no ping endpoint answers.
    pub ping_fallback_ms: u32,
    pub download_sizes_mib: Vec<u64>,
    /// URL templates tried in order per size; `{bytes}` is replaced by the size.
    pub download_candidates: Vec<String>,
    pub download_ceiling_mbps: f64,
    pub download_fallback_mbps: [f64; 2],
    pub upload_sizes_mib: Vec<f64>,
    pub upload_endpoint: String,
    pub upload_ceiling_mbps: f64,
    pub upload_fallback_mbps: [f64; 2],
    /// Pause between payload sizes so the display can keep up.
    pub pacing: bool,
    pub fallback: FallbackPolicy,
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ping_endpoints: vec![
                "https://www.google.com/favicon.ico".into(),
                "https://www.cloudflare.com/favicon.ico".into(),
                "https://httpbin.org/get".into(),
            ],
            ping_fallback_ms: 50,
            download_sizes_mib: vec![1, 5, 10],
            download_candidates: vec![
                "https://httpbin.org/bytes/{bytes}".into(),
                "https://speed.cloudflare.com/__down?bytes={bytes}".into(),
                "https://www.google.com/images/branding/googlelogo/1x/googlelogo_color_272x92dp.png"
                    .into(),
            ],
            download_ceiling_mbps: 1000.0,
            download_fallback_mbps: [10.0, 40.0],
            upload_sizes_mib: vec![0.5, 1.0, 2.0],
            upload_endpoint: "https://httpbin.org/post".into(),
            upload_ceiling_mbps: 500.0,
            upload_fallback_mbps: [5.0, 25.0],
            pacing: true,
            fallback: FallbackPolicy::Fabricate,
            request_timeout_secs: 30,
        }
    }
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn download_pause(&self) -> Option<Duration> {
        self.pacing.then_some(DOWNLOAD_PAUSE)
    }

    pub fn upload_pause(&self) -> Option<Duration> {
        self.pacing.then_some(UPLOAD_PAUSE)
    }

    pub fn validate(&self) -> Result<()> {
        check_range("download_fallback_mbps", self.download_fallback_mbps)?;
        check_range("upload_fallback_mbps", self.upload_fallback_mbps)?;
        if !(self.download_ceiling_mbps > 0.0) || !(self.upload_ceiling_mbps > 0.0) {
            bail!("plausibility ceilings must be positive");
        }
        if let Some(size) = self
            .upload_sizes_mib
            .iter()
            .find(|s| !s.is_finite() || **s <= 0.0)
        {
            bail!("upload size {} MiB is not a positive number", size);
        }
        if self.download_sizes_mib.contains(&0) {
            bail!("download sizes must be at least 1 MiB");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be at least 1");
        }
        Ok(())
    }

    /// Load from `path`, or from the XDG config file when `path` is None.
    /// A missing default file yields the built-in settings.
    pub fn load(path: Option<&Path>) -> Result<Settings> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default_path = config_path()?;
                if !default_path.exists() {
                    tracing::debug!("no config at {}, using defaults", default_path.display());
                    return Ok(Settings::default());
                }
                default_path
            }
        };

        let data = fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let settings: Settings =
            toml::from_str(&data).with_context(|| format!("parsing config {}", path.display()))?;
        settings.validate()?;
        tracing::info!("loaded config from {}", path.display());
        Ok(settings)
    }
}

fn check_range(name: &str, [low, high]: [f64; 2]) -> Result<()> {
    if !(low >= 0.0 && low < high && high.is_finite()) {
        bail!("{} must be [low, high) with 0 <= low < high", name);
    }
    Ok(())
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("speedprobe")?;
    Ok(xdg_dirs.get_config_home().join("config.toml"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsField {
    Pacing,
    Fallback,
    RequestTimeout,
}

impl SettingsField {
    pub fn next(self) -> Self {
        match self {
            SettingsField::Pacing => SettingsField::Fallback,
            SettingsField::Fallback => SettingsField::RequestTimeout,
            SettingsField::RequestTimeout => SettingsField::Pacing,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            SettingsField::Pacing => SettingsField::RequestTimeout,
            SettingsField::Fallback => SettingsField::Pacing,
            SettingsField::RequestTimeout => SettingsField::Fallback,
        }
    }
}
