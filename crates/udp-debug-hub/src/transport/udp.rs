// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Plain UDP transport.
//!
//! Every datagram is `[kind][client id, u32 BE][payload]`. A client announces
//! itself with a `Hello` when its loop starts; the server remembers the source
//! address of each client id, traces every datagram in both directions, and
//! relays debug packets through [`ServerTransport::broadcast`].
//!
//! The server socket is closed when the server loop returns, so the port is
//! free again as soon as `run` completes, whoever still holds the transport.

use super::{
    decode_packet, encode_packet, ClientCommand, ClientId, ClientParts, ClientTransport,
    PacketCallback, PacketKind, ServerCommand, ServerPacketCallback, ServerParts, ServerState,
    ServerTransport, TraceDirection, TraceEvent, TransportError, TransportFactory,
    EVENT_CHANNEL_CAPACITY,
};
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Largest datagram the loops will read.
const MAX_DATAGRAM: usize = 65_535;

/// Creates UDP clients that dial `host` and servers bound on all interfaces.
#[derive(Debug, Clone)]
pub struct UdpTransportFactory {
    host: String,
}

impl UdpTransportFactory {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl TransportFactory for UdpTransportFactory {
    fn connect_client(
        &self,
        id: ClientId,
        port: u16,
        cancel: CancellationToken,
    ) -> Result<ClientParts, TransportError> {
        let server_addr = (self.host.as_str(), port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| TransportError::Unreachable(format!("{}:{}", self.host, port)))?;

        let local: SocketAddr = if server_addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = bind_nonblocking(local)?;

        let (commands_tx, commands_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let client = UdpClient {
            id,
            server_addr,
            socket,
            running: AtomicBool::new(false),
            callbacks: RwLock::new(HashMap::new()),
            commands: commands_tx,
            stop: cancel.child_token(),
        };

        Ok(ClientParts {
            transport: Arc::new(client),
            commands: commands_rx,
        })
    }

    fn start_server(
        &self,
        port: u16,
        cancel: CancellationToken,
    ) -> Result<ServerParts, TransportError> {
        let socket = bind_nonblocking((Ipv4Addr::UNSPECIFIED, port).into())?;
        let local_addr = socket.local_addr()?;

        let (commands_tx, commands_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (traces_tx, traces_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let server = UdpServer {
            local_addr,
            socket: Mutex::new(Some(Arc::new(socket))),
            peers: Mutex::new(HashMap::new()),
            callbacks: RwLock::new(HashMap::new()),
            state: Mutex::new(ServerState::default()),
            commands: commands_tx,
            traces: traces_tx,
            stop: cancel.child_token(),
        };

        info!("UDP server bound on {}", local_addr);

        Ok(ServerParts {
            transport: Arc::new(server),
            commands: commands_rx,
            traces: traces_rx,
        })
    }
}

fn bind_nonblocking(addr: SocketAddr) -> Result<UdpSocket, TransportError> {
    let socket = std::net::UdpSocket::bind(addr)?;
    socket.set_nonblocking(true)?;
    Ok(UdpSocket::from_std(socket)?)
}

/// UDP debug client.
pub struct UdpClient {
    id: ClientId,
    server_addr: SocketAddr,
    socket: UdpSocket,
    running: AtomicBool,
    callbacks: RwLock<HashMap<PacketKind, PacketCallback>>,
    commands: mpsc::Sender<ClientCommand>,
    stop: CancellationToken,
}

impl UdpClient {
    fn set_running(&self, running: bool) {
        if self.running.swap(running, Ordering::SeqCst) == running {
            return;
        }
        if self
            .commands
            .try_send(ClientCommand::StateChanged { running })
            .is_err()
        {
            warn!(client_id = self.id, "command channel full, state notice dropped");
        }
    }

    async fn dispatch(&self, datagram: &[u8]) {
        let Some((kind, _, payload)) = decode_packet(datagram) else {
            debug!(client_id = self.id, "ignoring malformed datagram");
            return;
        };
        let callback = self.callbacks.read().get(&kind).cloned();
        if let Some(callback) = callback {
            callback(payload.to_vec()).await;
        }
    }
}

impl ClientTransport for UdpClient {
    fn run(self: Arc<Self>) -> BoxFuture<'static, Result<(), TransportError>> {
        Box::pin(async move {
            let hello = encode_packet(PacketKind::Hello, self.id, &[])?;
            self.socket.send_to(&hello, self.server_addr).await?;
            self.set_running(true);
            debug!(client_id = self.id, "UDP client loop started, server {}", self.server_addr);

            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                tokio::select! {
                    _ = self.stop.cancelled() => break,
                    received = self.socket.recv_from(&mut buf) => match received {
                        Ok((len, _from)) => self.dispatch(&buf[..len]).await,
                        Err(e) => debug!(client_id = self.id, "recv error: {}", e),
                    }
                }
            }

            self.set_running(false);
            debug!(client_id = self.id, "UDP client loop exited");
            Ok(())
        })
    }

    fn stop(&self) {
        self.stop.cancel();
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn on_packet(&self, kind: PacketKind, callback: PacketCallback) {
        self.callbacks.write().insert(kind, callback);
    }

    fn send<'a>(&'a self, payload: &'a [u8]) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            if !self.is_running() {
                return Err(TransportError::NotRunning);
            }
            let packet = encode_packet(PacketKind::DebugAny, self.id, payload)?;
            self.socket.send_to(&packet, self.server_addr).await?;
            Ok(())
        })
    }
}

/// UDP debug server.
pub struct UdpServer {
    local_addr: SocketAddr,
    /// Taken by the server loop on exit.
    socket: Mutex<Option<Arc<UdpSocket>>>,
    peers: Mutex<HashMap<ClientId, SocketAddr>>,
    callbacks: RwLock<HashMap<PacketKind, ServerPacketCallback>>,
    state: Mutex<ServerState>,
    commands: mpsc::Sender<ServerCommand>,
    traces: mpsc::Sender<TraceEvent>,
    stop: CancellationToken,
}

impl UdpServer {
    fn update_state(&self, f: impl FnOnce(&mut ServerState)) {
        let state = {
            let mut state = self.state.lock();
            f(&mut state);
            *state
        };
        if self
            .commands
            .try_send(ServerCommand::StateChanged(state))
            .is_err()
        {
            warn!("server command channel full, state notice dropped");
        }
    }

    fn trace(&self, direction: TraceDirection, remote: SocketAddr, length: usize, client_id: ClientId) {
        let event = TraceEvent {
            timestamp: SystemTime::now(),
            local_addr: self.local_addr.to_string(),
            remote_addr: remote.to_string(),
            direction,
            length,
            client_id,
        };
        if self.traces.try_send(event).is_err() {
            debug!(client_id, "trace channel full, event dropped");
        }
    }

    async fn dispatch(&self, datagram: &[u8], from: SocketAddr) {
        let Some((kind, client_id, payload)) = decode_packet(datagram) else {
            debug!("ignoring malformed datagram from {}", from);
            return;
        };

        self.peers.lock().insert(client_id, from);
        self.trace(TraceDirection::In, from, datagram.len(), client_id);

        let callback = self.callbacks.read().get(&kind).cloned();
        if let Some(callback) = callback {
            callback(payload.to_vec(), client_id).await;
        }
    }
}

impl ServerTransport for UdpServer {
    fn run(self: Arc<Self>) -> BoxFuture<'static, Result<(), TransportError>> {
        Box::pin(async move {
            let socket = self.socket.lock().clone().ok_or(TransportError::Closed)?;
            self.update_state(|s| {
                s.is_alive = true;
                s.should_stop = false;
            });

            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                tokio::select! {
                    _ = self.stop.cancelled() => break,
                    received = socket.recv_from(&mut buf) => match received {
                        Ok((len, from)) => self.dispatch(&buf[..len], from).await,
                        Err(e) => debug!("server recv error: {}", e),
                    }
                }
            }

            self.update_state(|s| s.is_alive = false);
            self.socket.lock().take();
            drop(socket);
            info!("UDP server on {} stopped", self.local_addr);
            Ok(())
        })
    }

    fn stop(&self) {
        self.update_state(|s| s.should_stop = true);
        self.stop.cancel();
    }

    fn state(&self) -> ServerState {
        *self.state.lock()
    }

    fn on_packet(&self, kind: PacketKind, callback: ServerPacketCallback) {
        self.callbacks.write().insert(kind, callback);
    }

    fn broadcast<'a>(&'a self, payload: &'a [u8]) -> BoxFuture<'a, Result<usize, TransportError>> {
        Box::pin(async move {
            if !self.state().is_alive {
                return Err(TransportError::NotRunning);
            }
            let socket = self.socket.lock().clone().ok_or(TransportError::NotRunning)?;
            let peers: Vec<(ClientId, SocketAddr)> =
                self.peers.lock().iter().map(|(id, addr)| (*id, *addr)).collect();

            let mut reached = 0;
            for (client_id, addr) in peers {
                let packet = match encode_packet(PacketKind::DebugAny, client_id, payload) {
                    Ok(packet) => packet,
                    Err(e) => {
                        warn!(client_id, "relay to {} skipped: {}", addr, e);
                        continue;
                    }
                };
                match socket.send_to(&packet, addr).await {
                    Ok(_) => {
                        self.trace(TraceDirection::Out, addr, packet.len(), client_id);
                        reached += 1;
                    }
                    Err(e) => warn!(client_id, "relay to {} failed: {}", addr, e),
                }
            }
            Ok(reached)
        })
    }
}
