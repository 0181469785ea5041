// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP and WebSocket surface of the dashboard.

pub mod handlers;
pub mod routes;

use crate::coordinator::Coordinator;
use axum::Router;
use std::path::Path;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Shared application state
pub struct AppState {
    pub coordinator: Coordinator,
    /// Viewer sessions are tracked here so shutdown waits for them.
    pub tracker: TaskTracker,
}

/// Build the complete router: JSON API with CORS, `/ws`, `/health`, and
/// the dashboard files when `static_dir` is set.
pub fn router(state: Arc<AppState>, static_dir: Option<&Path>) -> Router {
    let api = routes::api_routes().layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    let mut router = api.merge(routes::viewer_routes()).with_state(state);
    if let Some(dir) = static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }
    router.layer(TraceLayer::new_for_http())
}
