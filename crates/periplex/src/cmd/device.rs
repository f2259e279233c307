use periplex_peer::{
    ClientConfig, DuplexClient, Packet, Scope, ScopeItem, ScopeRegistrar, ScopeSet, Transporter,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cmd::{cancel_on_ctrl_c, parse_duration, runtime, DeviceArgs};
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_packet, InboundPacket, OutputFormat};

const STATUS_COMMAND: &str = "Status";

#[derive(Debug, Serialize)]
struct DeviceStatus<'a> {
    device: &'a str,
    state: &'static str,
}

pub fn run(args: DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    runtime()?.block_on(device(args, format))
}

async fn device(args: DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    let scopes: ScopeSet = args.scopes.iter().copied().collect();
    let config = ClientConfig::new(&args.addr, &args.name)
        .with_scopes(scopes.with(Scope::Device))
        .with_reconnect_interval(parse_duration(&args.reconnect)?)
        .with_connect_timeout(parse_duration(&args.connect_timeout)?);
    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());
    let client = DuplexClient::with_shutdown(config, &shutdown);

    // Handlers run on the read task; replies go out from here.
    let (status_tx, mut status_rx) = mpsc::unbounded_channel::<()>();
    client.add_scope_item(ScopeItem::new(Scope::Device).handle(
        STATUS_COMMAND,
        move |dev_name, content| {
            print_packet(
                &InboundPacket {
                    scope: Scope::Device,
                    command: STATUS_COMMAND,
                    dev_name,
                    content: &content,
                },
                format,
            );
            let _ = status_tx.send(());
            Ok(())
        },
    ));

    client
        .start()
        .map_err(|err| peer_error("start failed", err))?;
    info!(server = %args.addr, device = %args.name, %scopes, "device running");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(()) = status_rx.recv() => {
                let reply = Packet::response(Scope::Device, args.name.as_str(), STATUS_COMMAND)
                    .with_json(&DeviceStatus { device: &args.name, state: "idle" })
                    .map_err(|err| peer_error("encode status", err.into()))?;
                if let Err(err) = client.send_packet(reply).await {
                    warn!(error = %err, "status reply failed");
                }
            }
        }
    }

    client.stop().await;
    Ok(SUCCESS)
}
