// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dashboard protocol.
//!
//! Viewers on `/ws` only ever receive short control [`Token`]s; everything
//! else is fetched over the JSON API with the types below.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::transport::ClientId;

/// Control code pushed to every viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    /// Reload everything (sent once per process start).
    Reload,
    /// Server state changed.
    ServerUpdated,
    /// Client `id` changed (state or datagram log).
    ClientUpdated(ClientId),
    /// A new client was created.
    ClientCreated,
}

#[cfg(test)]
impl Token {
    /// Parse the wire text of a token.
    fn parse(text: &str) -> Option<Self> {
        match text {
            "rp" => Some(Self::Reload),
            "uss" => Some(Self::ServerUpdated),
            "cnu" => Some(Self::ClientCreated),
            other => other
                .strip_prefix("usu")
                .and_then(|id| id.parse().ok())
                .map(Self::ClientUpdated),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reload => f.write_str("rp"),
            Self::ServerUpdated => f.write_str("uss"),
            Self::ClientUpdated(id) => write!(f, "usu{}", id),
            Self::ClientCreated => f.write_str("cnu"),
        }
    }
}

/// Direction of a logged datagram. Serialized as `1` / `2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Direction {
    ClientToServer = 1,
    ServerToClient = 2,
}

impl From<Direction> for u8 {
    fn from(direction: Direction) -> Self {
        direction as u8
    }
}

impl TryFrom<u8> for Direction {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::ClientToServer),
            2 => Ok(Self::ServerToClient),
            other => Err(format!("unknown datagram direction {}", other)),
        }
    }
}

/// One logged datagram; `message` travels as base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datagram {
    pub direction: Direction,
    #[serde(with = "base64_bytes")]
    pub message: Vec<u8>,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

/// Generic success body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SuccessResponse {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl SuccessResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }
}

/// `{name, id}`, returned by client start and used in listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientSummary {
    pub id: ClientId,
    pub name: String,
}

/// Full state of one client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientStateResponse {
    pub id: ClientId,
    pub running: bool,
    pub datagrams: Vec<Datagram>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AllClientsResponse {
    pub udp_clients: Vec<ClientSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClientPage {
    pub items: Vec<ClientSummary>,
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
}

/// Body of `POST /api/client/send`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendDatagramRequest {
    pub id: ClientId,
    pub message: String,
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TraceResponse {
    pub heading: String,
    pub diagram: String,
}

/// Edge of the client map; `to_client_id == 0` is the server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MapConnection {
    pub from_client_id: ClientId,
    pub to_client_id: ClientId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientMap {
    pub clients: Vec<ClientSummary>,
    pub connections: Vec<MapConnection>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub viewers: usize,
    pub clients: usize,
}
