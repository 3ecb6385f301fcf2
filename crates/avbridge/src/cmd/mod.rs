use std::path::{Path, PathBuf};
use std::time::Duration;

use avbridge_dispatch::{BridgeConfig, LinkKind};
use clap::{Args, Subcommand};

use crate::exit::{io_error, CliError, CliResult, DATA_INVALID, USAGE};
use crate::output::OutputFormat;

pub mod functions;
pub mod info;
pub mod probe;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List every callable function and how it runs.
    Functions(FunctionsArgs),
    /// Load the engine and print the topology the flags select.
    Info(InfoArgs),
    /// Demux a host file through a read-ahead device and count packets.
    Probe(ProbeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat, config: Option<&Path>) -> CliResult<i32> {
    match command {
        Command::Functions(args) => functions::run(args, format),
        Command::Info(args) => info::run(args, format, config),
        Command::Probe(args) => probe::run(args, format, config),
        Command::Version(args) => version::run(args),
    }
}

/// Topology flags shared by the commands that load an engine. Set flags
/// override the `--config` file.
#[derive(Args, Debug, Default, Clone)]
pub struct BridgeArgs {
    /// Run the engine in the caller's context.
    #[arg(long, conflicts_with = "threads")]
    pub direct: bool,
    /// Let the engine run its own worker pool when the host allows it.
    #[arg(long)]
    pub threads: bool,
    /// Worker threads for the engine pool.
    #[arg(long, value_name = "N")]
    pub pool_size: Option<usize>,
    /// Carry calls over a Unix socket pair instead of in-process queues.
    #[arg(long)]
    pub socket: bool,
    /// Use the degraded engine build even when the accelerated one loads.
    #[arg(long, conflicts_with = "no_degraded")]
    pub force_degraded: bool,
    /// Fail instead of falling back to the degraded build.
    #[arg(long)]
    pub no_degraded: bool,
    /// Per-call deadline (e.g. 5s, 500ms).
    #[arg(long)]
    pub timeout: Option<String>,
}

impl BridgeArgs {
    pub fn apply(&self, mut config: BridgeConfig) -> CliResult<BridgeConfig> {
        if self.direct {
            config = config.with_isolate(false).with_threads(false);
        }
        if self.threads {
            config = config.with_threads(true);
        }
        if let Some(pool_size) = self.pool_size {
            config = config.with_pool_size(pool_size);
        }
        if self.socket {
            config = config.with_link(LinkKind::Socket);
        }
        if self.force_degraded {
            config = config.with_force_degraded(true);
        }
        if self.no_degraded {
            config = config.with_allow_degraded(false);
        }
        if let Some(timeout) = &self.timeout {
            config = config.with_call_timeout(parse_timeout(timeout)?);
        }
        Ok(config)
    }
}

/// The `--config` file, or defaults when none is given.
pub fn load_config(path: Option<&Path>) -> CliResult<BridgeConfig> {
    let Some(path) = path else {
        return Ok(BridgeConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|err| io_error(&format!("read config {}", path.display()), err))?;
    serde_json::from_str(&text).map_err(|err| {
        CliError::new(
            DATA_INVALID,
            format!("invalid config {}: {err}", path.display()),
        )
    })
}

pub fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("start runtime", err))
}

pub fn parse_timeout(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "timeout must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid timeout value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "timeout must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

#[derive(Args, Debug, Default)]
pub struct FunctionsArgs {
    /// Only list functions of this kind (primitive, device, meta).
    #[arg(long)]
    pub kind: Option<String>,
    /// Include the generated field accessors.
    #[arg(long)]
    pub accessors: bool,
}

#[derive(Args, Debug, Default)]
pub struct InfoArgs {
    #[command(flatten)]
    pub bridge: BridgeArgs,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Host file to demux.
    pub path: PathBuf,
    /// Container format name; guessed from the data when omitted.
    #[arg(long)]
    pub input_format: Option<String>,
    #[command(flatten)]
    pub bridge: BridgeArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_timeout_units() {
        assert_eq!(parse_timeout("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_timeout("2").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_timeout("150ms").unwrap(), Duration::from_millis(150));
    }

    #[test]
    fn parse_timeout_invalid() {
        assert_eq!(parse_timeout("0s").unwrap_err().code, USAGE);
        assert!(parse_timeout("bad").is_err());
        assert!(parse_timeout("").is_err());
    }

    #[test]
    fn flags_override_the_config_file() {
        let args = BridgeArgs {
            direct: true,
            socket: true,
            no_degraded: true,
            timeout: Some("250ms".into()),
            ..BridgeArgs::default()
        };
        let config = args
            .apply(BridgeConfig::default().with_threads(true))
            .expect("flags should apply");
        assert!(!config.isolate);
        assert!(!config.threads);
        assert!(!config.allow_degraded);
        assert_eq!(config.link, LinkKind::Socket);
        assert_eq!(config.call_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn missing_config_file_fails() {
        let err = load_config(Some(Path::new("/nonexistent/avbridge.json")))
            .expect_err("missing config should fail");
        assert_eq!(err.code, crate::exit::FAILURE);
        assert!(load_config(None).is_ok());
    }
}
