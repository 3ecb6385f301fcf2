mod cmd;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "avbridge", version, about = "Async media engine bridge CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Bridge configuration file (JSON).
    #[arg(long, value_name = "FILE", env = "AVBRIDGE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format, cli.config.as_deref());

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_probe_subcommand() {
        let cli = Cli::try_parse_from([
            "avbridge",
            "probe",
            "/tmp/in.avbr",
            "--socket",
            "--timeout",
            "3s",
        ])
        .expect("probe args should parse");

        let Command::Probe(args) = cli.command else {
            panic!("expected probe");
        };
        assert!(args.bridge.socket);
        assert_eq!(args.bridge.timeout.as_deref(), Some("3s"));
    }

    #[test]
    fn rejects_conflicting_topology_flags() {
        let err = Cli::try_parse_from(["avbridge", "info", "--direct", "--threads"])
            .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn config_is_global() {
        let cli = Cli::try_parse_from(["avbridge", "info", "--config", "/tmp/bridge.json"])
            .expect("config should parse after the subcommand");
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/bridge.json")));
        assert!(matches!(cli.command, Command::Info(_)));
    }
}
