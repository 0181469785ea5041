// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP API integration tests
//!
//! Binds a hub on an ephemeral port with the in-process transport and
//! exercises the JSON API end to end.

use reqwest::StatusCode;
use serde_json::{json, Value};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use udp_debug_hub::protocol::{ClientPage, ClientStateResponse, ClientSummary, HealthResponse};
use udp_debug_hub::{ApiError, DebugHub, HubConfig, IntraNetwork, TransportMode};

struct TestHub {
    hub: DebugHub,
    base: String,
    http: reqwest::Client,
}

impl TestHub {
    async fn start() -> Self {
        let config = HubConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            http_port: 0,
            transport: TransportMode::Intra,
            shutdown_timeout_secs: 2,
            server_poll_interval_ms: 10,
            ..Default::default()
        };
        let mut hub = DebugHub::bind_with(config, Arc::new(IntraNetwork::new()))
            .await
            .expect("Failed to bind hub");
        hub.run().await.expect("Failed to run hub");

        let base = format!("http://{}", hub.local_addr());
        Self {
            hub,
            base,
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn post(&self, path: &str) -> reqwest::Response {
        self.http.post(self.url(path)).send().await.unwrap()
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.http.get(self.url(path)).send().await.unwrap()
    }

    async fn wait_running(&self, id: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let state: ClientStateResponse = self
                    .get(&format!("/api/client/get/id?id={}", id))
                    .await
                    .json()
                    .await
                    .unwrap();
                if state.running {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("client never reported running");
    }

    async fn stop(mut self) {
        drop(self.http);
        let outcome = self.hub.shutdown().await.expect("shutdown failed");
        assert!(outcome.listener_closed);
    }
}

async fn api_error(response: reqwest::Response, status: StatusCode) -> ApiError {
    assert_eq!(response.status(), status);
    let body: ApiError = response.json().await.unwrap();
    assert_eq!(body.code, status.as_u16());
    body
}

#[tokio::test]
async fn test_health() {
    let hub = TestHub::start().await;
    let health: HealthResponse = hub.get("/health").await.json().await.unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.clients, 0);
    hub.stop().await;
}

#[tokio::test]
async fn test_server_lifecycle() {
    let hub = TestHub::start().await;

    let state: Value = hub.get("/api/server/get").await.json().await.unwrap();
    assert_eq!(state, json!({"shouldStop": false, "isAlive": false}));

    let stop = hub.post("/api/server/stop").await;
    let err = api_error(stop, StatusCode::BAD_REQUEST).await;
    assert_eq!(err.message, "UDP server is not running");

    let started = hub.post("/api/server/start").await;
    assert_eq!(started.status(), StatusCode::OK);
    let body: Value = started.json().await.unwrap();
    assert_eq!(body["message"], "UDP server started");

    let again = hub.post("/api/server/start").await;
    let err = api_error(again, StatusCode::CONFLICT).await;
    assert_eq!(err.message, "UDP server is already running");

    let stopped = hub.post("/api/server/stop").await;
    assert_eq!(stopped.status(), StatusCode::OK);
    let body: Value = stopped.json().await.unwrap();
    assert_eq!(body["message"], "UDP server stopped");

    hub.stop().await;
}

#[tokio::test]
async fn test_client_endpoints() {
    let hub = TestHub::start().await;
    assert_eq!(hub.post("/api/server/start").await.status(), StatusCode::OK);

    let client: ClientSummary = hub.post("/api/client/start").await.json().await.unwrap();
    assert_eq!(client.id, 1);
    hub.wait_running(client.id).await;

    let by_name: ClientStateResponse = hub
        .get(&format!("/api/client/get/name?name={}", client.name))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(by_name.id, client.id);

    let all: Value = hub.get("/api/client/get/all").await.json().await.unwrap();
    assert_eq!(all["udpClients"][0]["name"], client.name.as_str());

    let page: ClientPage = hub
        .get("/api/client/get/all/paginated")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(page.page, 1);
    assert_eq!(page.page_size, 10);
    assert_eq!(page.total, 1);

    let sent = hub
        .http
        .post(hub.url("/api/client/send"))
        .json(&json!({"id": client.id, "message": "68 69", "format": "hex"}))
        .send()
        .await
        .unwrap();
    assert_eq!(sent.status(), StatusCode::OK);

    let state: Value = hub
        .get(&format!("/api/client/get/id?id={}", client.id))
        .await
        .json()
        .await
        .unwrap();
    // base64 of "hi", direction 1 = client to server
    let logged = state["datagrams"].as_array().unwrap();
    assert!(logged
        .iter()
        .any(|d| d["direction"] == 1u8 && d["message"] == "aGk="));

    let traces: Value = hub
        .get(&format!("/api/traces/all?name={}", client.name))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(
        traces["heading"],
        format!("Diagram for user: {}", client.name).as_str()
    );

    let stopped = hub
        .post(&format!("/api/client/stop?name={}", client.name))
        .await;
    assert_eq!(stopped.status(), StatusCode::OK);
    let gone = hub.get(&format!("/api/client/get/id?id={}", client.id)).await;
    api_error(gone, StatusCode::NOT_FOUND).await;

    hub.stop().await;
}

#[tokio::test]
async fn test_error_bodies() {
    let hub = TestHub::start().await;

    let err = api_error(hub.get("/api/client/get/id").await, StatusCode::BAD_REQUEST).await;
    assert_eq!(err.message, "ID is required");

    let err = api_error(
        hub.get("/api/client/get/id?id=abc").await,
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(err.message, "ID is invalid");
    assert!(err.details.is_some());

    let err = api_error(
        hub.get("/api/client/get/name?name=Nobody").await,
        StatusCode::NOT_FOUND,
    )
    .await;
    assert_eq!(err.message, "UDP client not found");

    let err = api_error(hub.post("/api/client/stop").await, StatusCode::BAD_REQUEST).await;
    assert_eq!(err.message, "Name is required");

    let err = api_error(
        hub.get("/api/client/get/all/paginated?page=0").await,
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(err.message, "Page must be a positive integer");

    // An empty registry has no pages to be out of range of.
    let empty: ClientPage = hub
        .get("/api/client/get/all/paginated?page=2")
        .await
        .json()
        .await
        .unwrap();
    assert!(empty.items.is_empty());
    assert_eq!(empty.total, 0);

    let bad_body = hub
        .http
        .post(hub.url("/api/client/send"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    let err = api_error(bad_body, StatusCode::BAD_REQUEST).await;
    assert_eq!(err.message, "Invalid request body");

    let unknown = hub
        .http
        .post(hub.url("/api/client/send"))
        .json(&json!({"id": 42, "message": "hi", "format": "text"}))
        .send()
        .await
        .unwrap();
    api_error(unknown, StatusCode::NOT_FOUND).await;

    hub.stop().await;
}
