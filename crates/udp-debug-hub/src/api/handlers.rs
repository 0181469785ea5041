// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP request handlers.
//!
//! Query strings are taken as plain maps and parsed here, so a bad value is
//! answered with the JSON error body instead of a framework rejection.

use super::AppState;
use crate::error::ApiError;
use crate::protocol::{
    AllClientsResponse, ClientMap, ClientPage, ClientStateResponse, ClientSummary,
    HealthResponse, SendDatagramRequest, SuccessResponse, TraceResponse,
};
use crate::transport::{ClientId, ServerState};
use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
    Json,
};
use futures::{future, SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;

type Params = Query<HashMap<String, String>>;
type ApiResult<T> = Result<Json<T>, ApiError>;

const DEFAULT_PAGE: usize = 1;
const DEFAULT_PAGE_SIZE: usize = 10;

/// POST /api/server/start
pub async fn start_server(State(state): State<Arc<AppState>>) -> ApiResult<SuccessResponse> {
    state.coordinator.start_server().await?;
    Ok(Json(SuccessResponse::new("UDP server started")))
}

/// POST /api/server/stop
pub async fn stop_server(State(state): State<Arc<AppState>>) -> ApiResult<SuccessResponse> {
    state.coordinator.stop_server().await?;
    Ok(Json(SuccessResponse::new("UDP server stopped")))
}

/// GET /api/server/get
pub async fn server_state(State(state): State<Arc<AppState>>) -> Json<ServerState> {
    Json(state.coordinator.server_state())
}

/// POST /api/client/start
pub async fn start_client(State(state): State<Arc<AppState>>) -> ApiResult<ClientSummary> {
    Ok(Json(state.coordinator.start_client().await?))
}

/// POST /api/client/stop?name=
pub async fn stop_client(
    State(state): State<Arc<AppState>>,
    Query(params): Params,
) -> ApiResult<SuccessResponse> {
    state.coordinator.stop_client(name_param(&params)).await?;
    Ok(Json(SuccessResponse::new("UDP client stopped")))
}

/// POST /api/client/send
pub async fn send_datagram(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SendDatagramRequest>, JsonRejection>,
) -> ApiResult<SuccessResponse> {
    let Json(request) = body
        .map_err(|e| ApiError::bad_request("Invalid request body", Some(e.body_text())))?;
    state
        .coordinator
        .send_datagram(request.id, &request.message, &request.format)
        .await?;
    Ok(Json(SuccessResponse::new("Datagram sent successfully")))
}

/// GET /api/client/get/name?name=
pub async fn client_by_name(
    State(state): State<Arc<AppState>>,
    Query(params): Params,
) -> ApiResult<ClientStateResponse> {
    Ok(Json(state.coordinator.client_by_name(name_param(&params))?))
}

/// GET /api/client/get/id?id=
pub async fn client_by_id(
    State(state): State<Arc<AppState>>,
    Query(params): Params,
) -> ApiResult<ClientStateResponse> {
    let id = id_param(&params)?;
    Ok(Json(state.coordinator.client_by_id(id)?))
}

/// GET /api/client/get/all
pub async fn all_clients(State(state): State<Arc<AppState>>) -> Json<AllClientsResponse> {
    Json(state.coordinator.all_clients())
}

/// GET /api/client/get/all/paginated?page=&pageSize=&q=
pub async fn clients_paginated(
    State(state): State<Arc<AppState>>,
    Query(params): Params,
) -> ApiResult<ClientPage> {
    let page = positive_param(&params, "page", DEFAULT_PAGE, "Page must be a positive integer")?;
    let page_size = positive_param(
        &params,
        "pageSize",
        DEFAULT_PAGE_SIZE,
        "Page size must be a positive integer",
    )?;
    let filter = params.get("q").map(String::as_str);
    Ok(Json(
        state.coordinator.list_clients(filter, page, page_size)?,
    ))
}

/// GET /api/client/map
pub async fn client_map(State(state): State<Arc<AppState>>) -> Json<ClientMap> {
    Json(state.coordinator.client_map())
}

/// GET /api/traces/all?name=
pub async fn traces(
    State(state): State<Arc<AppState>>,
    Query(params): Params,
) -> ApiResult<TraceResponse> {
    Ok(Json(state.coordinator.trace_diagram(name_param(&params))?))
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        viewers: state.coordinator.hub().viewer_count(),
        clients: state.coordinator.client_count(),
    })
}

/// GET /ws
pub async fn viewer_socket(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_viewer(socket, state))
}

async fn handle_viewer(socket: WebSocket, state: Arc<AppState>) {
    let (tx, rx) = socket.split();
    let sink = tx.with(|text: String| future::ready(Ok::<_, axum::Error>(Message::Text(text))));
    let hub = state.coordinator.hub().clone();
    state.tracker.track_future(hub.accept(sink, rx)).await;
}

fn name_param(params: &HashMap<String, String>) -> &str {
    params.get("name").map(String::as_str).unwrap_or_default()
}

fn id_param(params: &HashMap<String, String>) -> Result<ClientId, ApiError> {
    let raw = params
        .get("id")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("ID is required", None))?;
    raw.parse()
        .map_err(|e: std::num::ParseIntError| ApiError::bad_request("ID is invalid", Some(e.to_string())))
}

fn positive_param(
    params: &HashMap<String, String>,
    key: &str,
    default: usize,
    message: &str,
) -> Result<usize, ApiError> {
    match params.get(key).map(|s| s.trim()).filter(|s| !s.is_empty()) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<usize>()
            .ok()
            .filter(|value| *value > 0)
            .ok_or_else(|| ApiError::bad_request(message, None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_id_param() {
        assert_eq!(id_param(&params(&[("id", "12")])).unwrap(), 12);

        let missing = id_param(&params(&[])).unwrap_err();
        assert_eq!(missing.message, "ID is required");

        let invalid = id_param(&params(&[("id", "abc")])).unwrap_err();
        assert_eq!(invalid.message, "ID is invalid");
        assert!(invalid.details.is_some());
    }

    #[test]
    fn test_positive_param_defaults_and_rejects() {
        let msg = "Page must be a positive integer";
        assert_eq!(positive_param(&params(&[]), "page", 1, msg).unwrap(), 1);
        assert_eq!(positive_param(&params(&[("page", "3")]), "page", 1, msg).unwrap(), 3);

        for bad in ["0", "-1", "x"] {
            let err = positive_param(&params(&[("page", bad)]), "page", 1, msg).unwrap_err();
            assert_eq!(err.code, 400);
            assert_eq!(err.message, msg);
        }
    }

    #[test]
    fn test_name_param_missing_is_empty() {
        assert_eq!(name_param(&params(&[])), "");
        assert_eq!(name_param(&params(&[("name", "Kasi")])), "Kasi");
    }
}
