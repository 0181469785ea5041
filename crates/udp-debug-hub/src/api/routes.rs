// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Route table.

use super::handlers;
use super::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// JSON API routes
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/server/start", post(handlers::start_server))
        .route("/api/server/stop", post(handlers::stop_server))
        .route("/api/server/get", get(handlers::server_state))
        .route("/api/client/start", post(handlers::start_client))
        .route("/api/client/stop", post(handlers::stop_client))
        .route("/api/client/send", post(handlers::send_datagram))
        .route("/api/client/get/name", get(handlers::client_by_name))
        .route("/api/client/get/id", get(handlers::client_by_id))
        .route("/api/client/get/all", get(handlers::all_clients))
        .route(
            "/api/client/get/all/paginated",
            get(handlers::clients_paginated),
        )
        .route("/api/client/map", get(handlers::client_map))
        .route("/api/traces/all", get(handlers::traces))
}

/// Viewer channel and liveness
pub fn viewer_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws", get(handlers::viewer_socket))
        .route("/health", get(handlers::health))
}
