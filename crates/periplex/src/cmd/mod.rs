use std::time::Duration;

use clap::{Args, Subcommand};
use periplex_peer::Scope;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::exit::{io_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod device;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a server and print packets and link events.
    Serve(ServeArgs),
    /// Run a device client that answers Device/Status.
    Device(DeviceArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Device(args) => device::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on (host:port).
    pub addr: String,
    /// Commands to print when received, as SCOPE/COMMAND (comma-separated).
    #[arg(long = "handle", value_delimiter = ',', default_value = "device/Status")]
    pub handles: Vec<String>,
    /// Send a Device/<COMMAND> request to every device as it attaches.
    #[arg(long, value_name = "COMMAND")]
    pub probe: Option<String>,
    /// Exit after printing N packets.
    #[arg(long)]
    pub count: Option<usize>,
    /// Greeting deadline for new connections (e.g. 10s, 500ms).
    #[arg(long, default_value = "10s")]
    pub greeting_timeout: String,
}

#[derive(Args, Debug)]
pub struct DeviceArgs {
    /// Server address (host:port).
    pub addr: String,
    /// Device name announced in the greeting.
    #[arg(long)]
    pub name: String,
    /// Scopes to declare (comma-separated).
    #[arg(long, value_delimiter = ',', default_value = "device")]
    pub scopes: Vec<Scope>,
    /// Redial period while disconnected (e.g. 3s, 500ms).
    #[arg(long, default_value = "3s")]
    pub reconnect: String,
    /// Dial timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub connect_timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn runtime() -> CliResult<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime setup failed", err))
}

/// Cancel `token` on the first Ctrl-C.
pub(crate) fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupted");
                token.cancel();
            }
            Err(err) => warn!(error = %err, "ctrl-c handler unavailable"),
        }
    });
}

/// Parse `500ms`, `3s` or a bare number of seconds.
pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

/// Parse `scope/command`.
pub(crate) fn parse_handle(input: &str) -> CliResult<(Scope, String)> {
    let (scope, command) = input
        .split_once('/')
        .ok_or_else(|| CliError::new(USAGE, format!("expected SCOPE/COMMAND, got '{input}'")))?;
    let scope: Scope = scope.parse().map_err(|err: String| CliError::new(USAGE, err))?;
    let command = command.trim();
    if command.is_empty() {
        return Err(CliError::new(USAGE, format!("missing command in '{input}'")));
    }
    Ok((scope, command.to_string()))
}
