//! Tracing subscriber setup

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::OnceLock;
use tracing::Level;
use tracing_subscriber::fmt::time::UtcTime;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Where log output goes when no log file is configured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Console {
    /// stderr is free for diagnostics
    Stderr,
    /// stderr belongs to the full-screen UI
    Silent,
}

fn level_for(verbosity: u8, base: Level) -> Level {
    let levels = [Level::ERROR, Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE];
    let start = levels.iter().position(|l| *l == base).unwrap_or(1);
    levels[(start + usize::from(verbosity)).min(levels.len() - 1)]
}

/// Install the global subscriber once. A log file takes JSON lines; without
/// one, diagnostics go to stderr unless the console is reserved.
pub fn init_tracing(log_file: Option<&Path>, verbosity: u8, console: Console) {
    let _ = TRACING_INIT.get_or_init(|| {
        if let Some(path) = log_file {
            let file = match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => file,
                Err(err) => {
                    eprintln!("Cannot open log file {}: {}", path.display(), err);
                    return;
                }
            };
            let subscriber = tracing_subscriber::fmt()
                .json()
                .with_timer(UtcTime::rfc_3339())
                .with_max_level(level_for(verbosity, Level::INFO))
                .with_writer(file)
                .with_current_span(false)
                .with_span_list(false)
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
        } else if console == Console::Stderr {
            let subscriber = tracing_subscriber::fmt()
                .with_max_level(level_for(verbosity, Level::WARN))
                .with_writer(std::io::stderr)
                .with_target(false)
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_level() {
        assert_eq!(level_for(0, Level::WARN), Level::WARN);
        assert_eq!(level_for(1, Level::WARN), Level::INFO);
        assert_eq!(level_for(2, Level::INFO), Level::TRACE);
        assert_eq!(level_for(9, Level::INFO), Level::TRACE);
    }
}
