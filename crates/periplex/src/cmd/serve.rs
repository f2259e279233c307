use periplex_peer::{
    CommandHandler, DuplexServer, HandshakeConfig, LinkEvent, Packet, Scope, ServerConfig,
};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cmd::{cancel_on_ctrl_c, parse_duration, parse_handle, runtime, ServeArgs};
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_event, print_packet, InboundPacket, OutputFormat};

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    runtime()?.block_on(serve(args, format))
}

async fn serve(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let handles = args
        .handles
        .iter()
        .map(|handle| parse_handle(handle))
        .collect::<CliResult<Vec<_>>>()?;
    let handshake = HandshakeConfig {
        timeout: parse_duration(&args.greeting_timeout)?,
        ..HandshakeConfig::default()
    };

    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());
    let server =
        DuplexServer::with_shutdown(ServerConfig::new(&args.addr).with_handshake(handshake), &shutdown);

    let (printed_tx, mut printed_rx) = mpsc::unbounded_channel::<()>();
    for (scope, command) in handles {
        let printed = printed_tx.clone();
        let name = command.clone();
        server.table().register(
            scope,
            command,
            CommandHandler::new(move |dev_name, content| {
                print_packet(
                    &InboundPacket {
                        scope,
                        command: &name,
                        dev_name,
                        content: &content,
                    },
                    format,
                );
                let _ = printed.send(());
                Ok(())
            }),
        );
    }
    drop(printed_tx);

    let mut events = server.subscribe();
    let addr = server
        .start_listen()
        .await
        .map_err(|err| peer_error("listen failed", err))?;
    info!(%addr, "serving");

    let mut printed = 0usize;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(()) = printed_rx.recv() => {
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(event) => {
                    print_event(&event, format);
                    if let (Some(command), LinkEvent::Attached { device, scopes, .. }) = (&args.probe, &event) {
                        if scopes.contains(Scope::Device) {
                            let probe = Packet::request(Scope::Device, device.as_str(), command.as_str());
                            if let Err(err) = server.send_to_device(probe).await {
                                warn!(device = %device, error = %err, "probe failed");
                            }
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "link events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    server.stop_listen().await;
    Ok(SUCCESS)
}
