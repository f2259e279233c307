//! Greeting and welcome exchanged on the System scope.
//!
//! A device opens every connection with a System/`greeting` request naming
//! itself (in `dev_name`) and declaring the scopes it serves. The server
//! answers with System/`welcome` carrying the link id it assigned and the
//! negotiated scope set.

use std::time::Duration;

use periplex_frame::{Packet, PacketKind, Scope, ScopeSet, MAX_NAME_LEN, PACKET_VERSION};
use serde::{Deserialize, Serialize};

use crate::error::{PeerError, Result};

pub const PROTOCOL_NAME: &str = "periplex";
pub const PROTOCOL_VERSION: &str = "1.0";
pub const GREETING_COMMAND: &str = "greeting";
pub const WELCOME_COMMAND: &str = "welcome";

const MAX_PROTOCOL_LEN: usize = 32;
const MAX_VERSION_LEN: usize = 16;

/// Body of the greeting request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Greeting {
    pub protocol: String,
    pub version: String,
    /// Packet codec version of the sender.
    #[serde(default)]
    pub packet_version: u8,
    pub scopes: ScopeSet,
}

/// Body of the welcome response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Welcome {
    pub link_id: String,
    pub scopes: ScopeSet,
}

/// Protocol identity and greeting deadline.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// How long a server waits for the greeting on a new connection.
    pub timeout: Duration,
    pub protocol_name: String,
    pub protocol_version: String,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            protocol_name: PROTOCOL_NAME.to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
        }
    }
}

/// Build the greeting a device sends after connecting.
pub fn greeting_packet(
    config: &HandshakeConfig,
    device_name: &str,
    scopes: ScopeSet,
) -> Result<Packet> {
    validate_protocol_name(&config.protocol_name)?;
    validate_version(&config.protocol_version)?;
    validate_device_name(device_name)?;

    let greeting = Greeting {
        protocol: config.protocol_name.clone(),
        version: config.protocol_version.clone(),
        packet_version: PACKET_VERSION,
        scopes,
    };
    Ok(Packet::request(Scope::System, device_name, GREETING_COMMAND).with_json(&greeting)?)
}

pub fn is_greeting(packet: &Packet) -> bool {
    packet.scope == Scope::System && packet.command == GREETING_COMMAND
}

pub fn is_welcome(packet: &Packet) -> bool {
    packet.scope == Scope::System && packet.command == WELCOME_COMMAND
}

/// Validate a greeting on the server side.
///
/// Returns the greeting and the scopes both sides support.
pub fn accept_greeting(
    config: &HandshakeConfig,
    packet: &Packet,
    supported: ScopeSet,
) -> Result<(Greeting, ScopeSet)> {
    if packet.kind != PacketKind::Request {
        return Err(PeerError::HandshakeFailed(format!(
            "greeting must be a request, got {:?}",
            packet.kind
        )));
    }
    validate_device_name(&packet.dev_name)?;

    let greeting: Greeting = packet.json()?;
    validate_protocol_name(&greeting.protocol)?;
    validate_version(&greeting.version)?;

    if greeting.protocol != config.protocol_name {
        return Err(PeerError::HandshakeFailed(format!(
            "unknown protocol '{}' (expected '{}')",
            greeting.protocol, config.protocol_name
        )));
    }

    if !is_version_compatible(&greeting.version, &config.protocol_version)? {
        return Err(PeerError::HandshakeFailed(format!(
            "incompatible version '{}' (server '{}')",
            greeting.version, config.protocol_version
        )));
    }

    if greeting.packet_version != PACKET_VERSION {
        return Err(PeerError::HandshakeFailed(format!(
            "unsupported packet version {} (expected {})",
            greeting.packet_version, PACKET_VERSION
        )));
    }

    let negotiated = greeting.scopes.intersection(supported);
    Ok((greeting, negotiated))
}

/// Build the server's answer to `greeting`.
pub fn welcome_packet(greeting: &Packet, link_id: &str, scopes: ScopeSet) -> Result<Packet> {
    let welcome = Welcome {
        link_id: link_id.to_string(),
        scopes,
    };
    Ok(greeting.reply(WELCOME_COMMAND).with_json(&welcome)?)
}

pub fn read_welcome(packet: &Packet) -> Result<Welcome> {
    if !is_welcome(packet) {
        return Err(PeerError::HandshakeFailed(format!(
            "expected welcome, got {}/{}",
            packet.scope, packet.command
        )));
    }
    Ok(packet.json()?)
}

fn validate_device_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(PeerError::HandshakeFailed(format!(
            "invalid device name length: {}",
            name.len()
        )));
    }
    Ok(())
}

fn validate_protocol_name(protocol: &str) -> Result<()> {
    if protocol.is_empty() || protocol.len() > MAX_PROTOCOL_LEN {
        return Err(PeerError::HandshakeFailed(format!(
            "invalid protocol name length: {}",
            protocol.len()
        )));
    }
    Ok(())
}

fn validate_version(version: &str) -> Result<()> {
    if version.is_empty() || version.len() > MAX_VERSION_LEN {
        return Err(PeerError::HandshakeFailed(format!(
            "invalid protocol version length: {}",
            version.len()
        )));
    }
    parse_version(version)?;
    Ok(())
}

fn is_version_compatible(client_version: &str, server_version: &str) -> Result<bool> {
    let (client_major, client_minor) = parse_version(client_version)?;
    let (server_major, server_minor) = parse_version(server_version)?;

    Ok(client_major == server_major && client_minor >= server_minor)
}

fn parse_version(version: &str) -> Result<(u16, u16)> {
    let invalid = |why: &str| PeerError::HandshakeFailed(format!("invalid version '{version}': {why}"));

    let mut parts = version.split('.');
    let major = parts.next().ok_or_else(|| invalid("missing major"))?;
    let minor = parts.next().ok_or_else(|| invalid("missing minor"))?;
    if parts.next().is_some() {
        return Err(invalid("expected '<major>.<minor>'"));
    }

    let major = major.parse::<u16>().map_err(|_| invalid("non-numeric major"))?;
    let minor = minor.parse::<u16>().map_err(|_| invalid("non-numeric minor"))?;
    Ok((major, minor))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_scopes() -> ScopeSet {
        ScopeSet::system_only().with(Scope::Device).with(Scope::Printer)
    }

    #[test]
    fn greeting_roundtrip() {
        let config = HandshakeConfig::default();
        let packet = greeting_packet(&config, "D1", device_scopes()).unwrap();
        assert!(is_greeting(&packet));
        assert_eq!(packet.kind, PacketKind::Request);
        assert_eq!(packet.dev_name, "D1");

        let server_scopes = ScopeSet::system_only().with(Scope::Device).with(Scope::Reader);
        let (greeting, negotiated) = accept_greeting(&config, &packet, server_scopes).unwrap();
        assert_eq!(greeting.scopes, device_scopes());
        assert_eq!(greeting.version, PROTOCOL_VERSION);
        assert!(negotiated.contains(Scope::Device));
        assert!(!negotiated.contains(Scope::Printer));
        assert!(!negotiated.contains(Scope::Reader));
    }

    #[test]
    fn welcome_echoes_link_and_counter() {
        let config = HandshakeConfig::default();
        let greeting = greeting_packet(&config, "D1", device_scopes())
            .unwrap()
            .with_counter(9);
        let welcome = welcome_packet(&greeting, "link-4", device_scopes()).unwrap();

        assert!(is_welcome(&welcome));
        assert_eq!(welcome.kind, PacketKind::Response);
        assert_eq!(welcome.counter, 9);
        let body = read_welcome(&welcome).unwrap();
        assert_eq!(body.link_id, "link-4");
        assert_eq!(body.scopes, device_scopes());
    }

    #[test]
    fn read_welcome_rejects_other_commands() {
        let packet = Packet::response(Scope::System, "D1", "other");
        assert!(matches!(
            read_welcome(&packet),
            Err(PeerError::HandshakeFailed(_))
        ));
    }

    #[test]
    fn empty_device_name_rejected() {
        let config = HandshakeConfig::default();
        assert!(greeting_packet(&config, "", ScopeSet::system_only()).is_err());

        let packet = greeting_packet(&config, "D1", ScopeSet::system_only()).unwrap();
        let anonymous = Packet {
            dev_name: String::new(),
            ..packet
        };
        assert!(matches!(
            accept_greeting(&config, &anonymous, ScopeSet::system_only()),
            Err(PeerError::HandshakeFailed(_))
        ));
    }

    #[test]
    fn wrong_protocol_name_rejected() {
        let device = HandshakeConfig {
            protocol_name: "other".to_string(),
            ..HandshakeConfig::default()
        };
        let packet = greeting_packet(&device, "D1", ScopeSet::system_only()).unwrap();
        let err = accept_greeting(&HandshakeConfig::default(), &packet, ScopeSet::system_only())
            .unwrap_err();
        assert!(err.to_string().contains("unknown protocol"));
    }

    #[test]
    fn version_mismatch() {
        let server = HandshakeConfig {
            protocol_version: "1.2".to_string(),
            ..HandshakeConfig::default()
        };
        let older = HandshakeConfig {
            protocol_version: "1.1".to_string(),
            ..HandshakeConfig::default()
        };
        let newer_major = HandshakeConfig {
            protocol_version: "2.0".to_string(),
            ..HandshakeConfig::default()
        };
        let newer_minor = HandshakeConfig {
            protocol_version: "1.3".to_string(),
            ..HandshakeConfig::default()
        };

        for (device, ok) in [(older, false), (newer_major, false), (newer_minor, true)] {
            let packet = greeting_packet(&device, "D1", ScopeSet::system_only()).unwrap();
            let result = accept_greeting(&server, &packet, ScopeSet::system_only());
            assert_eq!(result.is_ok(), ok, "device version {}", device.protocol_version);
        }
    }

    #[test]
    fn malformed_version_rejected() {
        for version in ["", "1", "1.2.3", "a.0", "1.b"] {
            let device = HandshakeConfig {
                protocol_version: version.to_string(),
                ..HandshakeConfig::default()
            };
            assert!(
                greeting_packet(&device, "D1", ScopeSet::system_only()).is_err(),
                "version {version:?} accepted"
            );
        }
    }

    #[test]
    fn invalid_json_rejected() {
        let packet =
            Packet::request(Scope::System, "D1", GREETING_COMMAND).with_content(&b"not-json"[..]);
        let err = accept_greeting(&HandshakeConfig::default(), &packet, ScopeSet::system_only())
            .unwrap_err();
        assert!(matches!(err, PeerError::Json(_)));
    }

    #[test]
    fn greeting_must_be_request() {
        let config = HandshakeConfig::default();
        let mut packet = greeting_packet(&config, "D1", ScopeSet::system_only()).unwrap();
        packet.kind = PacketKind::Notify;
        assert!(accept_greeting(&config, &packet, ScopeSet::system_only()).is_err());
    }

    #[test]
    fn foreign_packet_version_rejected() {
        let config = HandshakeConfig::default();
        let greeting = Greeting {
            protocol: PROTOCOL_NAME.to_string(),
            version: PROTOCOL_VERSION.to_string(),
            packet_version: PACKET_VERSION + 1,
            scopes: ScopeSet::system_only(),
        };
        let packet = Packet::request(Scope::System, "D1", GREETING_COMMAND)
            .with_json(&greeting)
            .unwrap();
        assert!(accept_greeting(&config, &packet, ScopeSet::system_only()).is_err());
    }
}
