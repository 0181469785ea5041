// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service assembly: config, transport, hub, coordinator, listener, shutdown.

use crate::api::{self, AppState};
use crate::config::{HubConfig, TransportMode};
use crate::coordinator::Coordinator;
use crate::error::ServiceError;
use crate::hub::BroadcastHub;
use crate::names::SyllableNames;
use crate::protocol::Token;
use crate::shutdown::{Shutdown, ShutdownError, ShutdownOutcome};
use crate::transport::{IntraNetwork, TransportFactory, UdpTransportFactory};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Transport factory selected by `config.transport`.
pub fn transport_factory(config: &HubConfig) -> Arc<dyn TransportFactory> {
    match config.transport {
        TransportMode::Udp => Arc::new(UdpTransportFactory::new(config.udp_host.clone())),
        TransportMode::Intra => Arc::new(IntraNetwork::new()),
    }
}

/// The running dashboard backend.
pub struct DebugHub {
    config: HubConfig,
    coordinator: Coordinator,
    shutdown: Shutdown,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    server: Option<JoinHandle<std::io::Result<()>>>,
}

impl DebugHub {
    /// Bind the HTTP listener with the transport named in `config`.
    pub async fn bind(config: HubConfig) -> Result<Self, ServiceError> {
        let factory = transport_factory(&config);
        Self::bind_with(config, factory).await
    }

    /// Bind the HTTP listener with an explicit transport factory.
    pub async fn bind_with(
        config: HubConfig,
        factory: Arc<dyn TransportFactory>,
    ) -> Result<Self, ServiceError> {
        let addr = config.http_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServiceError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ServiceError::Bind {
            addr: addr.to_string(),
            source,
        })?;

        let shutdown = Shutdown::new();
        let coordinator = Coordinator::builder(factory)
            .hub(Arc::new(BroadcastHub::new(config.viewer_write_timeout())))
            .names(Arc::new(SyllableNames::new()))
            .name_attempts(config.name_attempts)
            .udp_port(config.udp_port)
            .poll_interval(config.server_poll_interval())
            .cancel(shutdown.cancel_token())
            .tracker(shutdown.tracker())
            .build();

        Ok(Self {
            config,
            coordinator,
            shutdown,
            listener: Some(listener),
            local_addr,
            server: None,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Start serving HTTP, spawn the server relays and tell viewers to reload.
    pub async fn run(&mut self) -> Result<(), ServiceError> {
        let listener = self.listener.take().ok_or(ServiceError::AlreadyRunning)?;

        let state = Arc::new(AppState {
            coordinator: self.coordinator.clone(),
            tracker: self.shutdown.tracker(),
        });
        let router = api::router(state, self.config.static_dir.as_deref());
        let stop = self.shutdown.listener_stop();

        self.server = Some(tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(stop.cancelled_owned())
                .await;
            if let Err(e) = &result {
                error!("HTTP listener failed: {}", e);
            }
            result
        }));

        self.coordinator.spawn_server_relays();
        self.coordinator.hub().broadcast(Token::Reload).await;
        info!("Dashboard backend listening on {}", self.local_addr);
        Ok(())
    }

    /// Run the shutdown sequence and release every client and the server.
    pub async fn shutdown(&mut self) -> Result<ShutdownOutcome, ShutdownError> {
        let server = self
            .server
            .take()
            .unwrap_or_else(|| tokio::spawn(async { Ok(()) }));
        let outcome = self
            .shutdown
            .run(self.coordinator.hub(), server, self.config.shutdown_timeout())
            .await;
        self.coordinator.stop_all();
        outcome
    }
}
