// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for hub operations and the JSON error body they map to.

use crate::config::ConfigError;
use crate::transport::TransportError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used by every coordinator operation.
pub type HubResult<T> = Result<T, HubError>;

/// Errors surfaced by coordinator operations.
///
/// The `Display` text is what the dashboard shows; collaborator error text
/// only ever travels in [`HubError::details`].
#[derive(Debug, Error)]
pub enum HubError {
    /// Bad or missing input.
    #[error("{message}")]
    Validation {
        message: String,
        details: Option<String>,
    },

    /// Unknown client name or id.
    #[error("{0}")]
    NotFound(String),

    /// Operation on something that is not running.
    #[error("{0}")]
    Unavailable(String),

    /// Creation or send failed at the transport layer.
    #[error("{message}")]
    Transport {
        message: String,
        #[source]
        source: TransportError,
    },

    /// The requested state would clobber a live entity.
    #[error("{0}")]
    Conflict(String),
}

impl HubError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn invalid_with(message: impl Into<String>, details: impl ToString) -> Self {
        Self::Validation {
            message: message.into(),
            details: Some(details.to_string()),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn transport(message: impl Into<String>, source: TransportError) -> Self {
        Self::Transport {
            message: message.into(),
            source,
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// HTTP status the error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } | Self::Unavailable(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Transport { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Conflict(_) => StatusCode::CONFLICT,
        }
    }

    /// Internal error text, if any.
    pub fn details(&self) -> Option<String> {
        match self {
            Self::Validation { details, .. } => details.clone(),
            Self::Transport { source, .. } => Some(source.to_string()),
            Self::NotFound(_) | Self::Unavailable(_) | Self::Conflict(_) => None,
        }
    }
}

/// API error response body: `{code, message, details?}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            code: StatusCode::BAD_REQUEST.as_u16(),
            message: message.into(),
            details,
        }
    }
}

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        Self {
            code: err.status().as_u16(),
            details: err.details(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

/// Errors from bringing the service up.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Bind error on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Service already running")]
    AlreadyRunning,
}
