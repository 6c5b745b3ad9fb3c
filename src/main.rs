mod app;
mod audio;
mod cancel;
mod config;
mod constants;
mod error;
mod level;
mod meter;
mod sampler;
mod smoothing;
mod stats;
mod telemetry;
mod ui;

use clap::Parser;
use dialoguer::{Select, theme::ColorfulTheme};
use stats::RunningStats;
use telemetry::Console;

fn list_devices() -> Result<(), Box<dyn std::error::Error>> {
    let device_list = audio::list_input_devices()?;

    if device_list.is_empty() {
        println!("No audio input devices found.");
        return Ok(());
    }

    // Interactive selection
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select an audio input device")
        .items(&device_list)
        .default(0)
        .interact()?;

    println!("{}", device_list[selection]);

    Ok(())
}

fn exit_with_error(context: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("{}: {}", context, err);
    std::process::exit(app::ExitCode::Error as i32);
}

fn print_summary(label: &str, value: Option<f64>, count: u64, quiet: bool) {
    match (value, quiet) {
        (Some(level), true) => println!("{}", level.round() as i64),
        (Some(level), false) => println!("{} level: {:.1} dB ({} readings)", label, level, count),
        (None, true) => println!("0"),
        (None, false) => println!("No readings above the noise floor were captured."),
    }
}

async fn summarize(
    args: &config::SummaryArgs,
    pick: fn(&RunningStats) -> Option<f64>,
    label: &str,
) {
    let config = match config::Config::from_capture_args(&args.capture) {
        Ok(c) => c,
        Err(e) => exit_with_error("Configuration error", e),
    };
    let duration = match config::duration_from_seconds(args.seconds) {
        Ok(d) => d,
        Err(e) => exit_with_error("Configuration error", e),
    };

    match app::run_summary(&config, duration).await {
        Ok(stats) => print_summary(label, pick(&stats), stats.count(), args.quiet),
        Err(e) => exit_with_error("Error during monitoring", e),
    }
}

#[tokio::main]
async fn main() {
    use app::ExitCode;
    use config::{Args, Commands};

    let args = Args::parse();
    let console = match args.command {
        Commands::Monitor(_) => Console::Silent,
        _ => Console::Stderr,
    };
    telemetry::init_tracing(args.log_file.as_deref(), args.verbose, console);

    match args.command {
        Commands::Monitor(monitor_args) => {
            let config = match config::Config::from_monitor_args(&monitor_args) {
                Ok(c) => c,
                Err(e) => exit_with_error("Configuration error", e),
            };

            match app::App::new_with_config(config) {
                Ok(app) => {
                    let run_result = app.run().await;
                    match run_result.result {
                        Ok(_) => std::process::exit(run_result.exit_code as i32),
                        Err(e) => exit_with_error("Application error", e),
                    }
                }
                Err(e) => exit_with_error("Setup error", e),
            }
        }
        Commands::List(_) => {
            if let Err(e) = list_devices() {
                exit_with_error("Error listing devices", e);
            }
        }
        Commands::Max(max_args) => summarize(&max_args, RunningStats::max, "Maximum").await,
        Commands::Average(average_args) => {
            summarize(&average_args, RunningStats::average, "Average").await
        }
        Commands::Stream(stream_args) => {
            let config = match config::Config::from_capture_args(&stream_args.capture) {
                Ok(c) => c,
                Err(e) => exit_with_error("Configuration error", e),
            };
            if let Err(e) = app::run_stream(&config, stream_args.count).await {
                exit_with_error("Error during monitoring", e);
            }
        }
    }

    std::process::exit(ExitCode::Success as i32);
}
