// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport collaborator interface.
//!
//! The coordinator never touches sockets. A [`TransportFactory`] hands out a
//! client or server transport together with the receiving ends of its event
//! channels, and everything afterwards goes through the traits below.
//!
//! # Implementations
//!
//! - [`udp`]: plain UDP over `tokio::net::UdpSocket`
//! - [`intra`]: in-process network for tests and offline use

pub mod intra;
pub mod udp;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use intra::IntraNetwork;
pub use udp::UdpTransportFactory;

/// Client identifier, assigned by the coordinator.
pub type ClientId = u64;

/// Capacity of command and trace channels handed out by the factories.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport is not running")]
    NotRunning,

    #[error("transport channel closed")]
    Closed,

    #[error("peer unreachable: {0}")]
    Unreachable(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Packet kinds a callback can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    /// Peer registration, carries no payload.
    Hello = 0x00,
    /// Any debug payload.
    DebugAny = 0x01,
}

impl PacketKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Hello),
            0x01 => Some(Self::DebugAny),
            _ => None,
        }
    }
}

/// Polled server state snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerState {
    pub should_stop: bool,
    pub is_alive: bool,
}

/// Notices emitted on a client's command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand {
    StateChanged { running: bool },
}

/// Notices emitted on the server's command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerCommand {
    StateChanged(ServerState),
}

/// Direction of a traced datagram, seen from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceDirection {
    In,
    Out,
}

/// One datagram observed by the server transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    pub timestamp: SystemTime,
    pub local_addr: String,
    pub remote_addr: String,
    pub direction: TraceDirection,
    pub length: usize,
    pub client_id: ClientId,
}

/// Invoked for every inbound packet of a registered kind on a client.
pub type PacketCallback = Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Invoked for every inbound packet of a registered kind on the server,
/// with the id of the client that sent it.
pub type ServerPacketCallback =
    Arc<dyn Fn(Vec<u8>, ClientId) -> BoxFuture<'static, ()> + Send + Sync>;

/// A debug UDP client endpoint.
pub trait ClientTransport: Send + Sync {
    /// Network loop. Returns once stopped or cancelled.
    fn run(self: Arc<Self>) -> BoxFuture<'static, Result<(), TransportError>>;

    /// Ask the network loop to exit.
    fn stop(&self);

    /// Current running flag.
    fn is_running(&self) -> bool;

    /// Register the callback for inbound packets of `kind`.
    fn on_packet(&self, kind: PacketKind, callback: PacketCallback);

    /// Send one debug payload to the server.
    fn send<'a>(&'a self, payload: &'a [u8]) -> BoxFuture<'a, Result<(), TransportError>>;
}

/// The debug UDP server endpoint.
pub trait ServerTransport: Send + Sync {
    /// Network loop. Returns once stopped or cancelled.
    fn run(self: Arc<Self>) -> BoxFuture<'static, Result<(), TransportError>>;

    /// Ask the network loop to exit.
    fn stop(&self);

    /// Current state snapshot.
    fn state(&self) -> ServerState;

    /// Register the callback for inbound packets of `kind`.
    fn on_packet(&self, kind: PacketKind, callback: ServerPacketCallback);

    /// Send one debug payload to every known peer, returning how many were reached.
    fn broadcast<'a>(&'a self, payload: &'a [u8]) -> BoxFuture<'a, Result<usize, TransportError>>;
}

/// A freshly created client and the receiving end of its command channel.
pub struct ClientParts {
    pub transport: Arc<dyn ClientTransport>,
    pub commands: mpsc::Receiver<ClientCommand>,
}

/// A freshly started server and the receiving ends of its channels.
pub struct ServerParts {
    pub transport: Arc<dyn ServerTransport>,
    pub commands: mpsc::Receiver<ServerCommand>,
    pub traces: mpsc::Receiver<TraceEvent>,
}

/// Creates transports. `cancel` is observed by the created network loop.
pub trait TransportFactory: Send + Sync {
    /// Create a client that talks to the server on `port`.
    fn connect_client(
        &self,
        id: ClientId,
        port: u16,
        cancel: CancellationToken,
    ) -> Result<ClientParts, TransportError>;

    /// Create a server bound to `port`.
    fn start_server(&self, port: u16, cancel: CancellationToken)
        -> Result<ServerParts, TransportError>;
}

/// Encode a datagram: kind byte, big-endian client id, payload.
///
/// The header carries 32 bits of id; larger ids are rejected.
pub(crate) fn encode_packet(
    kind: PacketKind,
    client_id: ClientId,
    payload: &[u8],
) -> Result<Vec<u8>, TransportError> {
    let wire_id = u32::try_from(client_id).map_err(|_| {
        TransportError::Config(format!(
            "client id {} does not fit the packet header",
            client_id
        ))
    })?;
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.push(kind as u8);
    buf.extend_from_slice(&wire_id.to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Decode a datagram produced by [`encode_packet`].
pub(crate) fn decode_packet(buf: &[u8]) -> Option<(PacketKind, ClientId, &[u8])> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    let kind = PacketKind::from_u8(buf[0])?;
    let id = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
    Some((kind, ClientId::from(id), &buf[HEADER_LEN..]))
}

const HEADER_LEN: usize = 5;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_header_layout() {
        let buf = encode_packet(PacketKind::DebugAny, 7, b"hi").unwrap();
        assert_eq!(buf, vec![0x01, 0, 0, 0, 7, b'h', b'i']);
    }

    #[test]
    fn test_packet_rejects_wide_client_id() {
        let widest = ClientId::from(u32::MAX);
        let buf = encode_packet(PacketKind::Hello, widest, &[]).unwrap();
        assert_eq!(decode_packet(&buf).map(|(_, id, _)| id), Some(widest));

        assert!(matches!(
            encode_packet(PacketKind::DebugAny, widest + 1, b"hi"),
            Err(TransportError::Config(_))
        ));
    }

    #[test]
    fn test_decode_rejects_short_and_unknown() {
        assert!(decode_packet(&[0x01, 0, 0]).is_none());
        assert!(decode_packet(&[0x7f, 0, 0, 0, 1]).is_none());

        let (kind, id, payload) = decode_packet(&[0x00, 0, 0, 1, 0]).unwrap();
        assert_eq!(kind, PacketKind::Hello);
        assert_eq!(id, 256);
        assert!(payload.is_empty());
    }

    #[test]
    fn test_server_state_json_shape() {
        let json = serde_json::to_value(ServerState::default()).unwrap();
        assert_eq!(json, serde_json::json!({"shouldStop": false, "isAlive": false}));
    }
}
