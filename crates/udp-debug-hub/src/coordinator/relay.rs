// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay loops from transport channels into the coordinator.
//!
//! - one client command relay per client, exits when the client is stopped
//! - one server command relay and one trace relay, each polling for a
//!   server handle and draining its channel until that server is stopped;
//!   traces still buffered at stop are recorded before the handle is let go
//!
//! All of them exit on the coordinator's cancellation token.

use super::{Coordinator, ServerHandle};
use crate::protocol::Token;
use crate::transport::{ClientCommand, ClientId, ServerCommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub(super) async fn client_command_relay(
    coordinator: Coordinator,
    id: ClientId,
    mut commands: mpsc::Receiver<ClientCommand>,
    stop: CancellationToken,
) {
    let cancel = coordinator.cancel_token().clone();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = stop.cancelled() => break,
            command = commands.recv() => match command {
                Some(ClientCommand::StateChanged { running }) => {
                    if coordinator.mirror_running(id, running) {
                        coordinator.hub().broadcast(Token::ClientUpdated(id)).await;
                    }
                }
                None => break,
            }
        }
    }
    debug!(client_id = id, "client command relay exited");
}

pub(super) async fn server_command_relay(coordinator: Coordinator) {
    let cancel = coordinator.cancel_token().clone();
    while let Some(handle) = wait_for_server(&coordinator, &cancel).await {
        {
            let mut commands = handle.commands.lock().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = handle.stopped.cancelled() => break,
                    command = commands.recv() => match command {
                        Some(ServerCommand::StateChanged(state)) => {
                            debug!(alive = state.is_alive, should_stop = state.should_stop, "server state changed");
                            coordinator.hub().broadcast(Token::ServerUpdated).await;
                        }
                        None => {
                            release_when_stopped(&handle, &cancel).await;
                            break;
                        }
                    }
                }
            }
        }
    }
    debug!("server command relay exited");
}

pub(super) async fn trace_relay(coordinator: Coordinator) {
    let cancel = coordinator.cancel_token().clone();
    while let Some(handle) = wait_for_server(&coordinator, &cancel).await {
        {
            let mut traces = handle.traces.lock().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = handle.stopped.cancelled() => {
                        // Keep what the server traced before it stopped.
                        while let Ok(event) = traces.try_recv() {
                            coordinator.record_trace(event);
                        }
                        break;
                    }
                    event = traces.recv() => match event {
                        Some(event) => coordinator.record_trace(event),
                        None => {
                            release_when_stopped(&handle, &cancel).await;
                            break;
                        }
                    }
                }
            }
        }
    }
    debug!("trace relay exited");
}

/// Poll the server slot until it holds a live handle. None on cancellation.
async fn wait_for_server(
    coordinator: &Coordinator,
    cancel: &CancellationToken,
) -> Option<ServerHandle> {
    let interval = coordinator.poll_interval();
    loop {
        if cancel.is_cancelled() {
            return None;
        }
        if let Some(handle) = coordinator.server_handle() {
            if !handle.stopped.is_cancelled() {
                return Some(handle);
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// A server whose channel closed stays registered until stopped; park until
/// then instead of spinning on the closed channel.
async fn release_when_stopped(handle: &ServerHandle, cancel: &CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = handle.stopped.cancelled() => {}
    }
}
