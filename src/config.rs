//! Configuration parsing and validation

use crate::constants::audio::REFERENCE_AMPLITUDE;
use crate::constants::meter::{DEFAULT_THRESHOLD_DB, MAX_DISPLAY_DB};
use crate::error::{MeterError, MeterResult};
use crate::level::{LevelEstimator, Method};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Command line arguments for the dbmeter application
#[derive(Parser)]
#[command(name = "dbmeter")]
#[command(about = "Microphone sound level meter with an alert threshold")]
pub struct Args {
    /// Append JSON logs to this file
    #[arg(long, global = true, env = "DBMETER_LOG")]
    pub log_file: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show a live decibel meter with an adjustable alert threshold
    Monitor(MonitorArgs),
    /// List available audio input devices
    List(ListArgs),
    /// Measure and report the maximum level
    Max(SummaryArgs),
    /// Measure and report the average level
    Average(SummaryArgs),
    /// Print one reading per line
    Stream(StreamArgs),
}

/// Options shared by every command that opens the microphone
#[derive(clap::Args, Clone)]
pub struct CaptureArgs {
    /// Audio input device name (optional, uses default if not specified)
    #[arg(long)]
    pub device: Option<String>,

    /// How a sample buffer is reduced to a level
    #[arg(long, value_enum, default_value_t = Method::Rms)]
    pub estimator: Method,

    /// Reference amplitude (fraction of full scale) that maps to 0 dB
    #[arg(long, default_value_t = REFERENCE_AMPLITUDE)]
    pub reference: f64,
}

#[derive(clap::Args)]
pub struct MonitorArgs {
    #[command(flatten)]
    pub capture: CaptureArgs,

    /// Alert threshold in dB (0 to 120)
    #[arg(long, default_value_t = DEFAULT_THRESHOLD_DB)]
    pub threshold: f64,

    /// Exit as soon as a reading exceeds the threshold
    #[arg(long)]
    pub exit_on_alert: bool,
}

#[derive(clap::Args)]
pub struct SummaryArgs {
    #[command(flatten)]
    pub capture: CaptureArgs,

    /// Monitoring duration in seconds (optional, runs until Enter if not specified)
    #[arg(long)]
    pub seconds: Option<f32>,

    /// Output only the integer value without labels
    #[arg(long)]
    pub quiet: bool,
}

#[derive(clap::Args)]
pub struct StreamArgs {
    #[command(flatten)]
    pub capture: CaptureArgs,

    /// Stop after this many readings
    #[arg(long)]
    pub count: Option<u64>,
}

#[derive(clap::Args)]
pub struct ListArgs {}

/// Application configuration derived from command line arguments
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub threshold_db: f64,
    pub exit_on_alert: bool,
    pub method: Method,
    pub reference: f64,
    pub device_name: Option<String>,
}

impl Config {
    /// Create configuration from monitor arguments
    pub fn from_monitor_args(args: &MonitorArgs) -> MeterResult<Self> {
        if !(0.0..=MAX_DISPLAY_DB).contains(&args.threshold) {
            return Err(MeterError::Config(format!(
                "Threshold must be between 0 and {} dB, got {}",
                MAX_DISPLAY_DB, args.threshold
            )));
        }

        Ok(Config {
            threshold_db: args.threshold,
            exit_on_alert: args.exit_on_alert,
            ..Self::from_capture_args(&args.capture)?
        })
    }

    /// Create configuration for headless commands
    pub fn from_capture_args(args: &CaptureArgs) -> MeterResult<Self> {
        if !(args.reference.is_finite() && args.reference > 0.0) {
            return Err(MeterError::Config(format!(
                "Reference amplitude must be positive, got {}",
                args.reference
            )));
        }

        Ok(Config {
            threshold_db: DEFAULT_THRESHOLD_DB,
            exit_on_alert: false,
            method: args.estimator,
            reference: args.reference,
            device_name: args.device.clone(),
        })
    }

    pub fn estimator(&self) -> LevelEstimator {
        LevelEstimator::new(self.method, self.reference)
    }
}

/// Validate an optional run length given in seconds
pub fn duration_from_seconds(seconds: Option<f32>) -> MeterResult<Option<Duration>> {
    match seconds {
        Some(s) if !(s.is_finite() && s > 0.0) => {
            Err(MeterError::Config("Seconds must be positive".to_string()))
        }
        Some(s) => Ok(Some(Duration::from_secs_f32(s))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("dbmeter").chain(args.iter().copied()))
            .expect("arguments should parse")
    }

    #[test]
    fn monitor_defaults() {
        let Commands::Monitor(args) = parse(&["monitor"]).command else {
            panic!("expected monitor");
        };
        let config = Config::from_monitor_args(&args).unwrap();
        assert_eq!(config.threshold_db, DEFAULT_THRESHOLD_DB);
        assert_eq!(config.method, Method::Rms);
        assert_eq!(config.reference, REFERENCE_AMPLITUDE);
        assert_eq!(config.device_name, None);
        assert!(!config.exit_on_alert);
    }

    #[test]
    fn monitor_options() {
        let Commands::Monitor(args) = parse(&[
            "monitor",
            "--threshold",
            "72.5",
            "--estimator",
            "peak",
            "--device",
            "USB Mic",
            "--exit-on-alert",
        ])
        .command
        else {
            panic!("expected monitor");
        };
        let config = Config::from_monitor_args(&args).unwrap();
        assert_eq!(config.threshold_db, 72.5);
        assert_eq!(config.method, Method::Peak);
        assert_eq!(config.device_name.as_deref(), Some("USB Mic"));
        assert!(config.exit_on_alert);
        assert_eq!(config.estimator().method(), Method::Peak);
    }

    #[test]
    fn threshold_out_of_range_is_rejected() {
        let Commands::Monitor(args) = parse(&["monitor", "--threshold", "130"]).command else {
            panic!("expected monitor");
        };
        assert!(matches!(
            Config::from_monitor_args(&args),
            Err(MeterError::Config(_))
        ));
    }

    #[test]
    fn reference_must_be_positive() {
        let Commands::Max(args) = parse(&["max", "--reference", "0"]).command else {
            panic!("expected max");
        };
        assert!(Config::from_capture_args(&args.capture).is_err());
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let args = parse(&["stream", "--count", "3", "-vv", "--log-file", "/tmp/dbmeter.jsonl"]);
        assert_eq!(args.verbose, 2);
        assert_eq!(args.log_file, Some(PathBuf::from("/tmp/dbmeter.jsonl")));
        let Commands::Stream(stream) = args.command else {
            panic!("expected stream");
        };
        assert_eq!(stream.count, Some(3));
    }

    #[test]
    fn seconds_must_be_positive() {
        assert_eq!(duration_from_seconds(None).unwrap(), None);
        assert_eq!(
            duration_from_seconds(Some(1.5)).unwrap(),
            Some(Duration::from_millis(1500))
        );
        assert!(duration_from_seconds(Some(0.0)).is_err());
        assert!(duration_from_seconds(Some(-2.0)).is_err());
    }
}
