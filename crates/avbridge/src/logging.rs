use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Target prefix shared by every crate of the bridge (`avbridge_dispatch`, ...).
const BRIDGE_TARGET: &str = "avbridge";

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }

    fn verbose(self) -> bool {
        matches!(self, LogLevel::Debug | LogLevel::Trace)
    }
}

/// The requested level applies to the bridge crates. Runtime and other
/// dependency events never go below WARN.
fn bridge_targets(level: LogLevel) -> Targets {
    let level = level.as_filter();
    Targets::new()
        .with_default(level.min(LevelFilter::WARN))
        .with_target(BRIDGE_TARGET, level)
}

/// Install the stderr subscriber. Engine threads log through the same one,
/// so at debug and above each line names its thread and emitting crate.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level.as_filter())
        .with_ansi(false)
        .with_target(level.verbose())
        .with_thread_names(level.verbose());

    match format {
        LogFormat::Text => {
            let _ = builder.finish().with(bridge_targets(level)).try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().finish().with(bridge_targets(level)).try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing::Level;

    use super::*;

    #[test]
    fn bridge_crates_follow_the_requested_level() {
        let targets = bridge_targets(LogLevel::Trace);
        assert!(targets.would_enable("avbridge_dispatch::serializer", &Level::TRACE));
        assert!(targets.would_enable("avbridge_marshal::frame", &Level::DEBUG));
        assert!(targets.would_enable("avbridge", &Level::TRACE));
    }

    #[test]
    fn dependencies_are_capped_at_warn() {
        let targets = bridge_targets(LogLevel::Debug);
        assert!(!targets.would_enable("tokio::runtime", &Level::DEBUG));
        assert!(!targets.would_enable("mio::poll", &Level::INFO));
        assert!(targets.would_enable("tokio::runtime", &Level::WARN));
    }

    #[test]
    fn quiet_levels_are_not_raised_for_dependencies() {
        let targets = bridge_targets(LogLevel::Error);
        assert!(!targets.would_enable("tokio::runtime", &Level::WARN));
        assert!(!targets.would_enable("avbridge_device::table", &Level::WARN));
        assert!(targets.would_enable("avbridge_device::table", &Level::ERROR));
    }
}
