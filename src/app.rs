use crate::settings::{Settings, SettingsField};
use crate::speedtest::{
    download::DownloadProgress,
    ping::PingProgress,
    runner::{Outcome, RunGate, TestUpdate},
    upload::UploadProgress,
    FallbackPolicy, SpeedTestResult, TestPhase, PROGRESS_AFTER_DOWNLOAD, PROGRESS_AFTER_PING,
    PROGRESS_AFTER_UPLOAD,
};
use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppView {
    Main,
    Settings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Panel {
    Download,
    Upload,
    Ping,
}

impl Panel {
    pub fn next(self) -> Self {
        match self {
            Panel::Download => Panel::Upload,
            Panel::Upload => Panel::Ping,
            Panel::Ping => Panel::Download,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            Panel::Download => Panel::Ping,
            Panel::Upload => Panel::Download,
            Panel::Ping => Panel::Upload,
        }
    }
}

pub struct App {
    pub phase: TestPhase,
    pub result: SpeedTestResult,
    pub status: String,
    /// Overall checkpoint progress, 0-100.
    pub progress: u8,
    pub should_quit: bool,

    // UI state
    pub view: AppView,
    pub selected_panel: Panel,
    pub expanded: bool,

    // Settings
    pub settings: Settings,
    pub selected_setting: SettingsField,

    // Per-phase progress, 0.0-1.0
    pub download_progress: f64,
    pub upload_progress: f64,

    // Samples for charts
    pub download_samples: Vec<f64>,
    pub upload_samples: Vec<f64>,
    pub ping_samples: Vec<f64>,

    gate: RunGate,
}

impl App {
    pub fn new(settings: Settings) -> Self {
        Self {
            phase: TestPhase::Idle,
            result: SpeedTestResult::default(),
            status: TestPhase::Idle.status_text().to_string(),
            progress: 0,
            should_quit: false,
            view: AppView::Main,
            selected_panel: Panel::Download,
            expanded: false,
            settings,
            selected_setting: SettingsField::Pacing,
            download_progress: 0.0,
            upload_progress: 0.0,
            download_samples: Vec::new(),
            upload_samples: Vec::new(),
            ping_samples: Vec::new(),
            gate: RunGate::default(),
        }
    }

    pub fn gate(&self) -> &RunGate {
        &self.gate
    }

    /// The start trigger is live whenever no run holds the gate.
    pub fn can_start(&self) -> bool {
        !self.gate.is_busy()
    }

    pub fn handle_key_event(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        if key.kind != KeyEventKind::Press {
            return None;
        }

        match self.view {
            AppView::Main => self.handle_main_key(key),
            AppView::Settings => self.handle_settings_key(key),
        }
    }

    fn handle_main_key(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
                Some(AppAction::Quit)
            }
            KeyCode::Char('s') => {
                if self.can_start() {
                    self.view = AppView::Settings;
                }
                None
            }
            KeyCode::Enter => {
                if self.expanded {
                    self.expanded = false;
                    None
                } else if self.can_start() {
                    Some(AppAction::StartTest)
                } else {
                    None
                }
            }
            KeyCode::Esc => {
                self.expanded = false;
                None
            }
            KeyCode::Tab | KeyCode::Right | KeyCode::Char('j') => {
                if !self.expanded {
                    self.selected_panel = self.selected_panel.next();
                }
                None
            }
            KeyCode::BackTab | KeyCode::Left | KeyCode::Char('k') => {
                if !self.expanded {
                    self.selected_panel = self.selected_panel.prev();
                }
                None
            }
            KeyCode::Char(' ') => {
                self.expanded = !self.expanded;
                None
            }
            _ => None,
        }
    }

    fn handle_settings_key(&mut self, key: event::KeyEvent) -> Option<AppAction> {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc | KeyCode::Enter => {
                self.view = AppView::Main;
                None
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected_setting = self.selected_setting.prev();
                None
            }
            KeyCode::Down | KeyCode::Char('j') | KeyCode::Tab => {
                self.selected_setting = self.selected_setting.next();
                None
            }
            KeyCode::Left | KeyCode::Char('h') => {
                self.decrease_setting();
                None
            }
            KeyCode::Right | KeyCode::Char('l') => {
                self.increase_setting();
                None
            }
            _ => None,
        }
    }

    fn increase_setting(&mut self) {
        match self.selected_setting {
            SettingsField::Pacing => self.settings.pacing = !self.settings.pacing,
            SettingsField::Fallback => self.toggle_fallback(),
            SettingsField::RequestTimeout => {
                self.settings.request_timeout_secs = (self.settings.request_timeout_secs + 5).min(120);
            }
        }
    }

    fn decrease_setting(&mut self) {
        match self.selected_setting {
            SettingsField::Pacing => self.settings.pacing = !self.settings.pacing,
            SettingsField::Fallback => self.toggle_fallback(),
            SettingsField::RequestTimeout => {
                self.settings.request_timeout_secs =
                    self.settings.request_timeout_secs.saturating_sub(5).max(5);
            }
        }
    }

    fn toggle_fallback(&mut self) {
        self.settings.fallback = match self.settings.fallback {
            FallbackPolicy::Fabricate => FallbackPolicy::Omit,
            FallbackPolicy::Omit => FallbackPolicy::Fabricate,
        };
    }

    pub fn reset_for_new_test(&mut self) {
        self.phase = TestPhase::Idle;
        self.result = SpeedTestResult::default();
        self.status = TestPhase::Idle.status_text().to_string();
        self.progress = 0;
        self.download_progress = 0.0;
        self.upload_progress = 0.0;
        self.download_samples.clear();
        self.upload_samples.clear();
        self.ping_samples.clear();
        self.expanded = false;
    }

    pub fn apply_update(&mut self, update: TestUpdate) {
        match update {
            TestUpdate::PhaseStarted(phase) => {
                self.phase = phase;
                self.status = phase.status_text().to_string();
            }
            TestUpdate::PingProgress(p) => self.update_ping_progress(p),
            TestUpdate::PingComplete(ping) => {
                self.result.ping_ms = ping.ms;
                self.result.ping_provenance = ping.provenance;
                self.ping_samples = ping.samples;
                self.progress = PROGRESS_AFTER_PING;
            }
            TestUpdate::DownloadProgress(p) => self.update_download_progress(p),
            TestUpdate::DownloadComplete(metric) => {
                self.result.download = metric;
                self.download_progress = 1.0;
                self.progress = PROGRESS_AFTER_DOWNLOAD;
            }
            TestUpdate::UploadProgress(p) => self.update_upload_progress(p),
            TestUpdate::UploadComplete(metric) => {
                self.result.upload = metric;
                self.upload_progress = 1.0;
                self.progress = PROGRESS_AFTER_UPLOAD;
            }
            TestUpdate::Finished(outcome) => self.finish(outcome),
        }
    }

    pub fn update_ping_progress(&mut self, progress: PingProgress) {
        if let Some(ping) = progress.latest_ping {
            self.ping_samples.push(ping);
        }
    }

    pub fn update_download_progress(&mut self, progress: DownloadProgress) {
        self.download_progress = progress.completed_sizes as f64 / progress.total_sizes.max(1) as f64;
        if let Some(running) = progress.running {
            self.result.download = running;
        }
        self.download_samples = progress.speed_samples;
    }

    pub fn update_upload_progress(&mut self, progress: UploadProgress) {
        self.upload_progress = progress.completed_sizes as f64 / progress.total_sizes.max(1) as f64;
        if let Some(running) = progress.running {
            self.result.upload = running;
        }
        self.upload_samples = progress.speed_samples;
    }

    pub fn finish(&mut self, outcome: Outcome) {
        self.phase = match outcome {
            Outcome::Completed => TestPhase::Completed,
            Outcome::Failed => {
                // A failed run keeps nothing it measured.
                self.result = SpeedTestResult::default();
                self.download_samples.clear();
                self.upload_samples.clear();
                self.ping_samples.clear();
                TestPhase::Failed
            }
        };
        self.status = self.phase.status_text().to_string();
        self.progress = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppAction {
    Quit,
    StartTest,
}

pub fn poll_event(timeout: Duration) -> Result<Option<Event>> {
    if event::poll(timeout)? {
        Ok(Some(event::read()?))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speedtest::runner::run_speed_test;
    use crate::speedtest::testing::{FakeTransport, Reply};
    use crate::speedtest::{Metric, Provenance};
    use crossterm::event::{KeyEvent, KeyModifiers};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    /// Runs one full test against `transport`, applying every update and
    /// recording the progress value seen after each.
    async fn run_once(app: &mut App, transport: FakeTransport) -> Vec<(TestUpdate, u8)> {
        let guard = app.gate().try_acquire().expect("trigger enabled");
        app.reset_for_new_test();

        let (tx, mut rx) = mpsc::channel(256);
        let handle = tokio::spawn(run_speed_test(
            Arc::new(transport),
            app.settings.clone(),
            tx,
            guard,
        ));

        let mut seen = Vec::new();
        while let Some(update) = rx.recv().await {
            app.apply_update(update.clone());
            seen.push((update, app.progress));
        }
        handle.await.unwrap();
        seen
    }

    fn progress_after(seen: &[(TestUpdate, u8)], pred: impl Fn(&TestUpdate) -> bool) -> u8 {
        seen.iter().find(|(u, _)| pred(u)).map(|(_, p)| *p).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn offline_run_completes_with_fallback_values() {
        let mut app = App::new(Settings::default());
        run_once(&mut app, FakeTransport::offline()).await;

        assert_eq!(app.phase, TestPhase::Completed);
        assert_eq!(app.status, "Test Complete!");
        assert_eq!(app.result.ping_ms, 50);

        let download: f64 = app.result.download.display().parse().unwrap();
        let upload: f64 = app.result.upload.display().parse().unwrap();
        assert!((10.0..40.0).contains(&download));
        assert!((5.0..25.0).contains(&upload));
        assert_eq!(app.result.download.provenance, Provenance::Fallback);
        assert_eq!(app.result.upload.provenance, Provenance::Fallback);

        assert_eq!(app.progress, 0);
        assert!(app.can_start());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_downloads_still_complete() {
        let transport = FakeTransport::new(Duration::from_millis(50)).on_fetch(|_| Reply::Ok(0));
        let mut app = App::new(Settings::default());
        run_once(&mut app, transport).await;

        assert_eq!(app.status, "Test Complete!");
        assert!((10.0..40.0).contains(&app.result.download.value));
        assert_eq!(app.result.upload.provenance, Provenance::Measured);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_hits_checkpoints_after_each_phase() {
        let transport = FakeTransport::new(Duration::from_millis(100))
            .on_fetch(|_| Reply::Ok(2 * 1024 * 1024));
        let mut app = App::new(Settings::default());
        let seen = run_once(&mut app, transport).await;

        for (update, progress) in &seen {
            match update {
                TestUpdate::PhaseStarted(TestPhase::Ping) | TestUpdate::PingProgress(_) => {
                    assert_eq!(*progress, 0)
                }
                TestUpdate::PhaseStarted(TestPhase::Download) | TestUpdate::DownloadProgress(_) => {
                    assert_eq!(*progress, 20)
                }
                TestUpdate::PhaseStarted(TestPhase::Upload) | TestUpdate::UploadProgress(_) => {
                    assert_eq!(*progress, 60)
                }
                _ => {}
            }
        }
        assert_eq!(progress_after(&seen, |u| matches!(u, TestUpdate::PingComplete(_))), 20);
        assert_eq!(progress_after(&seen, |u| matches!(u, TestUpdate::DownloadComplete(_))), 60);
        assert_eq!(progress_after(&seen, |u| matches!(u, TestUpdate::UploadComplete(_))), 100);
        assert_eq!(seen.last().unwrap().1, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn measured_values_render_with_one_decimal() {
        // 1 MiB in 100 ms is 80 Mbps on every download size.
        let transport = FakeTransport::new(Duration::from_millis(100))
            .on_fetch(|_| Reply::Ok(1024 * 1024));
        let mut app = App::new(Settings::default());
        run_once(&mut app, transport).await;

        for text in [app.result.download.display(), app.result.upload.display()] {
            let (_, fraction) = text.split_once('.').expect("decimal point");
            assert_eq!(fraction.len(), 1, "{}", text);
        }
        assert_eq!(app.result.download.provenance, Provenance::Measured);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_run_resets_and_reenables_trigger() {
        let transport = FakeTransport::new(Duration::from_millis(10)).on_post(|_| Reply::Panic);
        let mut app = App::new(Settings::default());
        run_once(&mut app, transport).await;

        assert_eq!(app.phase, TestPhase::Failed);
        assert_eq!(app.status, "Test Failed. Please try again.");
        assert_eq!(app.progress, 0);
        assert_eq!(app.result, SpeedTestResult::default());
        assert!(app.can_start());
        assert_eq!(app.handle_key_event(press(KeyCode::Enter)), Some(AppAction::StartTest));
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_runs_are_independent() {
        let mut app = App::new(Settings::default());
        let fast = FakeTransport::new(Duration::from_millis(100))
            .on_fetch(|_| Reply::Ok(1024 * 1024));
        run_once(&mut app, fast).await;
        assert_eq!(app.result.download.provenance, Provenance::Measured);
        let first_ping = app.result.ping_ms;

        run_once(&mut app, FakeTransport::offline()).await;
        assert_eq!(app.result.ping_ms, 50);
        assert_ne!(first_ping, 50);
        assert_eq!(app.result.download.provenance, Provenance::Fallback);
        assert_eq!(app.ping_samples.len(), 0);
    }

    #[test]
    fn trigger_is_ignored_while_a_run_holds_the_gate() {
        let mut app = App::new(Settings::default());
        let guard = app.gate().try_acquire().unwrap();
        assert_eq!(app.handle_key_event(press(KeyCode::Enter)), None);
        assert_eq!(app.handle_key_event(press(KeyCode::Char('s'))), None);
        assert_eq!(app.view, AppView::Main);

        drop(guard);
        assert_eq!(app.handle_key_event(press(KeyCode::Enter)), Some(AppAction::StartTest));
    }

    #[test]
    fn reset_zeroes_every_field() {
        let mut app = App::new(Settings::default());
        app.result.ping_ms = 42;
        app.result.download = Metric {
            value: 12.0,
            provenance: Provenance::Measured,
        };
        app.progress = 60;
        app.status = "Testing Upload Speed...".into();
        app.reset_for_new_test();

        assert_eq!(app.result, SpeedTestResult::default());
        assert_eq!(app.result.download.display(), "0.0");
        assert_eq!(app.progress, 0);
        assert_eq!(app.status, "Ready");
    }

    #[test]
    fn settings_view_edits_session_settings() {
        let mut app = App::new(Settings::default());
        app.handle_key_event(press(KeyCode::Char('s')));
        assert_eq!(app.view, AppView::Settings);

        app.handle_key_event(press(KeyCode::Right));
        assert!(!app.settings.pacing);

        app.handle_key_event(press(KeyCode::Down));
        app.handle_key_event(press(KeyCode::Left));
        assert_eq!(app.settings.fallback, FallbackPolicy::Omit);

        app.handle_key_event(press(KeyCode::Down));
        for _ in 0..40 {
            app.handle_key_event(press(KeyCode::Right));
        }
        assert_eq!(app.settings.request_timeout_secs, 120);
        for _ in 0..40 {
            app.handle_key_event(press(KeyCode::Left));
        }
        assert_eq!(app.settings.request_timeout_secs, 5);

        app.handle_key_event(press(KeyCode::Esc));
        assert_eq!(app.view, AppView::Main);
    }
}
