mod app;
mod logging;
mod settings;
mod speedtest;
mod ui;

use anyhow::Result;
use app::{poll_event, App, AppAction};
use clap::Parser;
use crossterm::event::Event;
use ratatui::DefaultTerminal;
use settings::Settings;
use speedtest::runner::{run_speed_test, Outcome, TestUpdate};
use speedtest::transport::HttpTransport;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use ui::draw_ui;

#[derive(Debug, Parser)]
#[command(name = "speedprobe", version, about = "Estimate ping, download and upload speed")]
struct Args {
    /// Config file to use instead of ~/.config/speedprobe/config.toml
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log file to append to instead of ~/.local/state/speedprobe/speedprobe.log
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_path = match args.log_file {
        Some(path) => Some(path),
        None => logging::default_log_path().ok(),
    };
    if let Some(path) = log_path {
        if let Err(e) = logging::init_logging(&path) {
            eprintln!("speedprobe: logging disabled: {:#}", e);
        }
    }

    let settings = Settings::load(args.config.as_deref())?;

    let mut terminal = ratatui::init();
    terminal.clear()?;

    let result = run_app(&mut terminal, settings).await;

    ratatui::restore();
    result
}

async fn run_app(terminal: &mut DefaultTerminal, settings: Settings) -> Result<()> {
    let mut app = App::new(settings);
    let mut test_rx: Option<mpsc::Receiver<TestUpdate>> = None;

    loop {
        terminal.draw(|frame| draw_ui(frame, &app))?;

        // Handle test updates
        if let Some(rx) = test_rx.as_mut() {
            loop {
                match rx.try_recv() {
                    Ok(update) => app.apply_update(update),
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        if app.phase.is_running() {
                            app.finish(Outcome::Failed);
                        }
                        test_rx = None;
                        break;
                    }
                }
            }
        }

        // Handle input
        if let Some(Event::Key(key)) = poll_event(Duration::from_millis(30))? {
            if let Some(action) = app.handle_key_event(key) {
                match action {
                    AppAction::Quit => break,
                    AppAction::StartTest => {
                        test_rx = start_test(&mut app);
                    }
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}

fn start_test(app: &mut App) -> Option<mpsc::Receiver<TestUpdate>> {
    let guard = app.gate().try_acquire()?;
    app.reset_for_new_test();

    let transport = match HttpTransport::new(app.settings.request_timeout()) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(error = %e, "could not build http client");
            drop(guard);
            app.finish(Outcome::Failed);
            return None;
        }
    };

    let (tx, rx) = mpsc::channel(64);
    let settings = app.settings.clone();
    tokio::spawn(async move {
        run_speed_test(Arc::new(transport), settings, tx, guard).await;
    });
    Some(rx)
}
