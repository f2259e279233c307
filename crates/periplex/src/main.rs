mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "periplex", version, about = "Duplex TCP transport for peripheral devices")]
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

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

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
    use periplex_peer::Scope;

    use super::*;

    #[test]
    fn parses_serve_subcommand() {
        let cli = Cli::try_parse_from([
            "periplex",
            "serve",
            "127.0.0.1:7000",
            "--probe",
            "Status",
            "--handle",
            "device/Status,printer/Print",
        ])
        .expect("serve args should parse");

        match cli.command {
            Command::Serve(args) => {
                assert_eq!(args.addr, "127.0.0.1:7000");
                assert_eq!(args.probe.as_deref(), Some("Status"));
                assert_eq!(args.handles, vec!["device/Status", "printer/Print"]);
                assert!(args.count.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_device_scopes() {
        let cli = Cli::try_parse_from([
            "periplex",
            "device",
            "127.0.0.1:7000",
            "--name",
            "D1",
            "--scopes",
            "device,printer",
            "--reconnect",
            "500ms",
        ])
        .expect("device args should parse");

        match cli.command {
            Command::Device(args) => {
                assert_eq!(args.name, "D1");
                assert_eq!(args.scopes, vec![Scope::Device, Scope::Printer]);
                assert_eq!(args.reconnect, "500ms");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_scope() {
        let err = Cli::try_parse_from([
            "periplex",
            "device",
            "127.0.0.1:7000",
            "--name",
            "D1",
            "--scopes",
            "scanner",
        ])
        .expect_err("unknown scope should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn device_requires_name() {
        let err = Cli::try_parse_from(["periplex", "device", "127.0.0.1:7000"])
            .expect_err("missing name should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from(["periplex", "version", "--format", "json", "--log-level", "debug"])
            .expect("global flags should parse after subcommand");
        assert!(matches!(cli.format, Some(OutputFormat::Json)));
        assert!(matches!(cli.log_level, LogLevel::Debug));
    }
}
