// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Decoding of operator-typed datagram payloads.

use crate::error::{HubError, HubResult};
use std::str::FromStr;

/// Encoding of a payload typed into the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    /// Hex digits, whitespace anywhere is ignored.
    Hex,
    /// Raw UTF-8 text.
    Text,
}

impl FromStr for PayloadFormat {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hex" => Ok(Self::Hex),
            "text" => Ok(Self::Text),
            _ => Err(HubError::invalid("Format must be 'hex' or 'text'")),
        }
    }
}

impl PayloadFormat {
    /// Turn `message` into the bytes that go on the wire.
    pub fn decode(self, message: &str) -> HubResult<Vec<u8>> {
        match self {
            Self::Text => Ok(message.as_bytes().to_vec()),
            Self::Hex => {
                let digits: String = message.chars().filter(|c| !c.is_whitespace()).collect();
                hex::decode(digits).map_err(|e| HubError::invalid_with("Invalid hex string", e))
            }
        }
    }
}
