//! Main application logic and orchestration

use crate::audio::{self, CpalInput};
use crate::config::Config;
use crate::constants::meter::{MEASUREMENT_PERIOD_MS, THRESHOLD_COARSE_STEP_DB, THRESHOLD_STEP_DB};
use crate::error::MeterResult;
use crate::meter::{Meter, Readings, SamplerFactory};
use crate::sampler::{DeviceLock, HostPermissions, Sampler};
use crate::smoothing::ReadingSmoother;
use crate::stats::{AlertState, RunningStats, Threshold};
use crate::ui;
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};

/// Exit codes for the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    UserExit = 1, // Escape, q or Ctrl+C
    Error = 2,
}

/// Result of a monitor run plus the reason it ended
pub struct RunResult {
    pub result: MeterResult<()>,
    pub exit_code: ExitCode,
}

impl RunResult {
    fn from_outcome(outcome: MeterResult<ExitCode>) -> Self {
        match outcome {
            Ok(exit_code) => RunResult {
                result: Ok(()),
                exit_code,
            },
            Err(err) => RunResult {
                result: Err(err),
                exit_code: ExitCode::Error,
            },
        }
    }
}

/// Meter wired to the real microphone
pub fn build_meter(config: &Config) -> Meter {
    let device_name = config.device_name.clone();
    let factory: SamplerFactory = Arc::new(move || {
        Sampler::new(
            Box::new(CpalInput::new(device_name.clone())),
            Arc::new(HostPermissions),
            DeviceLock::process(),
        )
    });
    Meter::new(
        factory,
        config.estimator(),
        Duration::from_millis(MEASUREMENT_PERIOD_MS),
    )
}

/// Consumer-side view of a session: statistics, smoothing and alert state
pub struct MonitorState {
    pub device_name: String,
    pub reading: f64,
    pub threshold: Threshold,
    pub alert: AlertState,
    pub stats: RunningStats,
    pub smoother: ReadingSmoother,
    pub status: String,
}

impl MonitorState {
    pub fn new(device_name: String, threshold_db: f64) -> Self {
        Self {
            device_name,
            reading: 0.0,
            threshold: Threshold::new(threshold_db),
            alert: AlertState::Normal,
            stats: RunningStats::new(),
            smoother: ReadingSmoother::new(0.0),
            status: String::new(),
        }
    }

    /// Begin a fresh session view
    pub fn restart(&mut self) {
        self.reading = 0.0;
        self.alert = AlertState::Normal;
        self.stats.reset();
        self.smoother.reset(0.0);
        self.status = format!(
            "Measuring {}... Space stops, Up/Down adjust threshold, r resets, Esc quits.",
            self.device_name
        );
    }

    pub fn record(&mut self, reading: f64) {
        self.reading = reading;
        self.stats.update(reading);
        self.smoother.update(reading);
        self.alert = self.threshold.evaluate(reading);
    }

    /// Exit code to leave with after the latest reading, if any
    pub fn exit_code(&self, exit_on_alert: bool) -> Option<ExitCode> {
        (exit_on_alert && self.alert == AlertState::Alert).then_some(ExitCode::Success)
    }

    pub fn ui_state(&self) -> ui::UiState {
        ui::UiState {
            device_name: self.device_name.clone(),
            reading: self.reading,
            display_db: self.smoother.display(),
            threshold_db: self.threshold.value(),
            alert: self.alert,
            min_db: self.stats.min(),
            max_db: self.stats.max(),
            average_db: self.stats.average(),
            status: self.status.clone(),
        }
    }
}

/// Keyboard commands understood by the monitor
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Quit,
    Toggle,
    AdjustThreshold(f64),
    ResetStats,
}

pub fn command_for(code: KeyCode, modifiers: KeyModifiers) -> Option<Command> {
    match code {
        KeyCode::Esc | KeyCode::Char('q') => Some(Command::Quit),
        KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => Some(Command::Quit),
        KeyCode::Char(' ') => Some(Command::Toggle),
        KeyCode::Up | KeyCode::Char('+') => Some(Command::AdjustThreshold(THRESHOLD_STEP_DB)),
        KeyCode::Down | KeyCode::Char('-') => Some(Command::AdjustThreshold(-THRESHOLD_STEP_DB)),
        KeyCode::PageUp => Some(Command::AdjustThreshold(THRESHOLD_COARSE_STEP_DB)),
        KeyCode::PageDown => Some(Command::AdjustThreshold(-THRESHOLD_COARSE_STEP_DB)),
        KeyCode::Char('r') => Some(Command::ResetStats),
        _ => None,
    }
}

/// Next reading of the live session, or never when there is none
async fn next_reading(readings: &mut Option<Readings>) -> Option<MeterResult<f64>> {
    match readings {
        Some(readings) => readings.next().await,
        None => std::future::pending().await,
    }
}

/// Full-screen meter
pub struct App {
    config: Config,
    terminal: Terminal<CrosstermBackend<std::io::Stdout>>,
}

impl App {
    /// Initialize the terminal for the given configuration
    pub fn new_with_config(config: Config) -> MeterResult<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;

        Ok(App { config, terminal })
    }

    /// Run the meter until the user quits
    pub async fn run(mut self) -> RunResult {
        let meter = build_meter(&self.config);
        let device_name = audio::describe_device(self.config.device_name.as_deref());
        let mut state = MonitorState::new(device_name, self.config.threshold_db);

        let result = self.drive(&meter, &mut state).await;

        // The device must be released before the terminal is restored.
        meter.stop().await;
        if let Err(err) = self.cleanup() {
            warn!(error = %err, "failed to restore terminal");
        }

        RunResult::from_outcome(result)
    }

    async fn drive(&mut self, meter: &Meter, state: &mut MonitorState) -> MeterResult<ExitCode> {
        let mut readings = Some(meter.start().await?);
        state.restart();

        let mut redraw =
            tokio::time::interval(Duration::from_millis(crate::constants::ui::UPDATE_INTERVAL_MS));

        loop {
            let ui_state = state.ui_state();
            self.terminal.draw(|f| ui::render_ui(f, &ui_state))?;

            tokio::select! {
                _ = tokio::signal::ctrl_c() => return Ok(ExitCode::UserExit),
                item = next_reading(&mut readings) => match item {
                    Some(Ok(reading)) => {
                        state.record(reading);
                        if let Some(exit_code) = state.exit_code(self.config.exit_on_alert) {
                            info!(reading, threshold = state.threshold.value(), "threshold exceeded");
                            return Ok(exit_code);
                        }
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "measurement ended");
                        meter.stop().await;
                        readings = None;
                        state.status = if err.is_recoverable() {
                            format!("{}. Press Space to restart or Esc to quit.", err)
                        } else {
                            format!("{}. Fix the device and press Space to retry, Esc to quit.", err)
                        };
                    }
                    None => readings = None,
                },
                _ = redraw.tick() => {}
            }

            while crossterm::event::poll(Duration::from_millis(0))? {
                let Event::Key(key_event) = crossterm::event::read()? else {
                    continue;
                };
                match command_for(key_event.code, key_event.modifiers) {
                    Some(Command::Quit) => return Ok(ExitCode::UserExit),
                    Some(Command::Toggle) => {
                        if readings.is_some() {
                            meter.stop().await;
                            readings = None;
                            state.status =
                                "Stopped. Press Space to start a new measurement.".to_string();
                        } else {
                            readings = Some(meter.start().await?);
                            state.restart();
                        }
                    }
                    Some(Command::AdjustThreshold(delta)) => {
                        state.threshold.adjust(delta);
                        state.alert = state.threshold.evaluate(state.reading);
                    }
                    Some(Command::ResetStats) => state.stats.reset(),
                    None => {}
                }
            }
        }
    }

    /// Clean up terminal state
    fn cleanup(mut self) -> MeterResult<()> {
        disable_raw_mode()?;
        execute!(
            self.terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture
        )?;
        self.terminal.show_cursor()?;
        Ok(())
    }
}

/// Collect statistics headlessly for `duration`, or until Enter or Ctrl+C.
pub async fn run_summary(config: &Config, duration: Option<Duration>) -> MeterResult<RunningStats> {
    let meter = build_meter(config);
    let outcome = collect(&meter, duration).await;
    meter.stop().await;
    outcome
}

async fn collect(meter: &Meter, duration: Option<Duration>) -> MeterResult<RunningStats> {
    let mut readings = meter.start().await?;
    let mut stats = RunningStats::new();

    let deadline = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => {
                let mut line = String::new();
                let mut stdin = tokio::io::BufReader::new(tokio::io::stdin());
                // A closed stdin never delivers Enter; wait for Ctrl+C instead.
                if !matches!(stdin.read_line(&mut line).await, Ok(n) if n > 0) {
                    std::future::pending::<()>().await;
                }
            }
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            item = readings.next() => match item {
                Some(Ok(reading)) => {
                    stats.update(reading);
                }
                Some(Err(err)) => return Err(err),
                None => break,
            },
        }
    }
    Ok(stats)
}

/// Print one reading per line until `count` readings or Ctrl+C.
pub async fn run_stream(config: &Config, count: Option<u64>) -> MeterResult<()> {
    let meter = build_meter(config);
    let outcome = print_readings(&meter, count).await;
    meter.stop().await;
    outcome
}

async fn print_readings(meter: &Meter, count: Option<u64>) -> MeterResult<()> {
    let mut readings = meter.start().await?;
    let mut printed = 0u64;

    while count.is_none_or(|limit| printed < limit) {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            item = readings.next() => match item {
                Some(Ok(reading)) => {
                    println!("{:.1}", reading);
                    printed += 1;
                }
                Some(Err(err)) => return Err(err),
                None => break,
            },
        }
    }
    Ok(())
}
