use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use periplex_peer::{LinkEvent, Scope};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// An inbound packet as seen by a command handler.
pub struct InboundPacket<'a> {
    pub scope: Scope,
    pub command: &'a str,
    pub dev_name: &'a str,
    pub content: &'a [u8],
}

#[derive(Serialize)]
struct PacketOutput<'a> {
    kind: &'static str,
    scope: &'static str,
    command: &'a str,
    device: &'a str,
    content_size: usize,
    content: String,
    timestamp: String,
}

#[derive(Serialize)]
struct EventOutput<'a> {
    kind: &'static str,
    event: &'static str,
    link_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    timestamp: String,
}

pub fn print_packet(packet: &InboundPacket<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = PacketOutput {
                kind: "packet",
                scope: packet.scope.name(),
                command: packet.command,
                device: packet.dev_name,
                content_size: packet.content.len(),
                content: content_preview(packet.content),
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SCOPE", "COMMAND", "DEVICE", "SIZE", "CONTENT"])
                .add_row(vec![
                    packet.scope.to_string(),
                    packet.command.to_string(),
                    packet.dev_name.to_string(),
                    packet.content.len().to_string(),
                    content_preview(packet.content),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{}/{} device={} size={} content={}",
                packet.scope,
                packet.command,
                packet.dev_name,
                packet.content.len(),
                content_preview(packet.content)
            );
        }
        OutputFormat::Raw => print_raw(packet.content),
    }
}

pub fn print_event(event: &LinkEvent, format: OutputFormat) {
    let (name, link_id, device, detail) = match event {
        LinkEvent::Accepted { link_id, peer } => {
            ("accepted", link_id, None, Some(peer.to_string()))
        }
        LinkEvent::Attached {
            link_id,
            device,
            scopes,
        } => ("attached", link_id, Some(device.as_str()), Some(scopes.to_string())),
        LinkEvent::Superseded { link_id, device } => {
            ("superseded", link_id, Some(device.as_str()), None)
        }
        LinkEvent::Detached { link_id, device } => ("detached", link_id, device.as_deref(), None),
    };

    match format {
        OutputFormat::Json => {
            let out = EventOutput {
                kind: "link",
                event: name,
                link_id,
                device,
                detail,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT", "LINK", "DEVICE", "DETAIL"])
                .add_row(vec![
                    name.to_string(),
                    link_id.to_string(),
                    device.unwrap_or("-").to_string(),
                    detail.unwrap_or_default(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{name} link={link_id} device={} {}",
                device.unwrap_or("-"),
                detail.unwrap_or_default()
            );
        }
        // Raw output carries packet content only.
        OutputFormat::Raw => {}
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn content_preview(content: &[u8]) -> String {
    match std::str::from_utf8(content) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", content.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
