use clap::ValueEnum;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, Layer};

/// Crates whose events follow `--log-level`. Everything else is capped at warn.
const PERIPLEX_TARGETS: [&str; 4] = [
    "periplex",
    "periplex_transport",
    "periplex_frame",
    "periplex_peer",
];

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    /// One JSON object per line, with the enclosing link span's fields.
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

fn targets(level: LevelFilter) -> Targets {
    PERIPLEX_TARGETS.iter().fold(
        Targets::new().with_default(level.min(LevelFilter::WARN)),
        |targets, name| targets.with_target(*name, level),
    )
}

/// Install the stderr subscriber. Stdout stays reserved for command output.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let level = LevelFilter::from(level);
    let layer = match format {
        LogFormat::Text => fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .with_target(level >= LevelFilter::DEBUG)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
    };

    let _ = tracing_subscriber::registry()
        .with(layer.with_filter(targets(level)))
        .try_init();
}

#[cfg(test)]
mod tests {
    use tracing::Level;

    use super::*;

    #[test]
    fn dependencies_stay_quiet_at_debug() {
        let filter = targets(LogLevel::Debug.into());
        assert!(filter.would_enable("periplex_peer::server", &Level::DEBUG));
        assert!(filter.would_enable("periplex::cmd::serve", &Level::DEBUG));
        assert!(!filter.would_enable("tokio::net", &Level::DEBUG));
        assert!(filter.would_enable("tokio::net", &Level::WARN));
    }

    #[test]
    fn error_level_silences_warnings_everywhere() {
        let filter = targets(LogLevel::Error.into());
        assert!(!filter.would_enable("periplex_frame::connection", &Level::WARN));
        assert!(!filter.would_enable("socket2", &Level::WARN));
        assert!(filter.would_enable("periplex_frame::connection", &Level::ERROR));
    }
}
