// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process transport.
//!
//! Servers are keyed by port inside an [`IntraNetwork`]; clients reach them
//! through bounded channels carrying the same framed datagrams the UDP
//! transport puts on the wire. Links can be taken down per client to exercise
//! send failures without touching the OS network stack.

use super::{
    decode_packet, encode_packet, ClientCommand, ClientId, ClientParts, ClientTransport,
    PacketCallback, PacketKind, ServerCommand, ServerPacketCallback, ServerParts, ServerState,
    ServerTransport, TraceDirection, TraceEvent, TransportError, TransportFactory,
    EVENT_CHANNEL_CAPACITY,
};
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Datagram queued for a server, with the sender's reply channel.
struct Inbound {
    datagram: Vec<u8>,
    reply: mpsc::Sender<Vec<u8>>,
}

#[derive(Default)]
struct NetworkInner {
    servers: Mutex<HashMap<u16, Arc<IntraServer>>>,
    down: Mutex<HashSet<ClientId>>,
}

impl NetworkInner {
    fn server(&self, port: u16) -> Option<Arc<IntraServer>> {
        self.servers.lock().get(&port).cloned()
    }

    fn is_down(&self, id: ClientId) -> bool {
        self.down.lock().contains(&id)
    }
}

/// Shared in-process network. Cloning yields another handle to the same network.
#[derive(Clone, Default)]
pub struct IntraNetwork {
    inner: Arc<NetworkInner>,
}

impl IntraNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the link of client `id` down (or back up). While down, every
    /// datagram to or from that client is refused.
    pub fn set_link_down(&self, id: ClientId, down: bool) {
        let mut set = self.inner.down.lock();
        if down {
            set.insert(id);
        } else {
            set.remove(&id);
        }
    }

    /// Whether a server currently holds `port`.
    pub fn has_server(&self, port: u16) -> bool {
        self.inner.servers.lock().contains_key(&port)
    }
}

impl std::fmt::Debug for IntraNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ports: Vec<u16> = self.inner.servers.lock().keys().copied().collect();
        f.debug_struct("IntraNetwork").field("ports", &ports).finish()
    }
}

impl TransportFactory for IntraNetwork {
    fn connect_client(
        &self,
        id: ClientId,
        port: u16,
        cancel: CancellationToken,
    ) -> Result<ClientParts, TransportError> {
        let (inbox_tx, inbox_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (commands_tx, commands_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let client = IntraClient {
            id,
            port,
            network: Arc::downgrade(&self.inner),
            inbox_tx,
            inbox_rx: Mutex::new(Some(inbox_rx)),
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
        let mut servers = self.inner.servers.lock();
        if servers.contains_key(&port) {
            return Err(TransportError::Config(format!("port {} already in use", port)));
        }

        let (inbox_tx, inbox_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (commands_tx, commands_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (traces_tx, traces_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let server = Arc::new(IntraServer {
            port,
            network: Arc::downgrade(&self.inner),
            inbox_tx,
            inbox_rx: Mutex::new(Some(inbox_rx)),
            peers: Mutex::new(HashMap::new()),
            callbacks: RwLock::new(HashMap::new()),
            state: Mutex::new(ServerState::default()),
            commands: commands_tx,
            traces: traces_tx,
            stop: cancel.child_token(),
        });
        servers.insert(port, server.clone());

        Ok(ServerParts {
            transport: server,
            commands: commands_rx,
            traces: traces_rx,
        })
    }
}

/// In-process debug client.
pub struct IntraClient {
    id: ClientId,
    port: u16,
    network: Weak<NetworkInner>,
    inbox_tx: mpsc::Sender<Vec<u8>>,
    inbox_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    running: AtomicBool,
    callbacks: RwLock<HashMap<PacketKind, PacketCallback>>,
    commands: mpsc::Sender<ClientCommand>,
    stop: CancellationToken,
}

impl IntraClient {
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

    fn route(&self) -> Result<Arc<IntraServer>, TransportError> {
        let network = self.network.upgrade().ok_or(TransportError::Closed)?;
        if network.is_down(self.id) {
            return Err(TransportError::Unreachable(format!(
                "link to client {} is down",
                self.id
            )));
        }
        network
            .server(self.port)
            .ok_or_else(|| TransportError::Unreachable(format!("no server on port {}", self.port)))
    }

    async fn transmit(&self, kind: PacketKind, payload: &[u8]) -> Result<(), TransportError> {
        let server = self.route()?;
        let packet = encode_packet(kind, self.id, payload)?;
        server.deliver(packet, self.inbox_tx.clone()).await
    }

    async fn dispatch(&self, datagram: &[u8]) {
        let Some((kind, _, payload)) = decode_packet(datagram) else {
            return;
        };
        let callback = self.callbacks.read().get(&kind).cloned();
        if let Some(callback) = callback {
            callback(payload.to_vec()).await;
        }
    }
}

impl ClientTransport for IntraClient {
    fn run(self: Arc<Self>) -> BoxFuture<'static, Result<(), TransportError>> {
        Box::pin(async move {
            let mut inbox = self
                .inbox_rx
                .lock()
                .take()
                .ok_or_else(|| TransportError::Config("client loop already started".into()))?;

            // Like UDP, a hello nobody hears is not an error.
            if let Err(e) = self.transmit(PacketKind::Hello, &[]).await {
                debug!(client_id = self.id, "hello not delivered: {}", e);
            }
            self.set_running(true);

            loop {
                tokio::select! {
                    _ = self.stop.cancelled() => break,
                    datagram = inbox.recv() => match datagram {
                        Some(datagram) => self.dispatch(&datagram).await,
                        None => break,
                    }
                }
            }

            self.set_running(false);
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
            self.transmit(PacketKind::DebugAny, payload).await
        })
    }
}

/// In-process debug server.
pub struct IntraServer {
    port: u16,
    network: Weak<NetworkInner>,
    inbox_tx: mpsc::Sender<Inbound>,
    inbox_rx: Mutex<Option<mpsc::Receiver<Inbound>>>,
    peers: Mutex<HashMap<ClientId, mpsc::Sender<Vec<u8>>>>,
    callbacks: RwLock<HashMap<PacketKind, ServerPacketCallback>>,
    state: Mutex<ServerState>,
    commands: mpsc::Sender<ServerCommand>,
    traces: mpsc::Sender<TraceEvent>,
    stop: CancellationToken,
}

impl IntraServer {
    async fn deliver(
        &self,
        datagram: Vec<u8>,
        reply: mpsc::Sender<Vec<u8>>,
    ) -> Result<(), TransportError> {
        if !self.state().is_alive {
            return Err(TransportError::NotRunning);
        }
        self.inbox_tx
            .send(Inbound { datagram, reply })
            .await
            .map_err(|_| TransportError::Closed)
    }

    fn local_addr(&self) -> String {
        format!("intra:{}", self.port)
    }

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

    fn trace(&self, direction: TraceDirection, length: usize, client_id: ClientId) {
        let event = TraceEvent {
            timestamp: SystemTime::now(),
            local_addr: self.local_addr(),
            remote_addr: format!("intra-client:{}", client_id),
            direction,
            length,
            client_id,
        };
        if self.traces.try_send(event).is_err() {
            debug!(client_id, "trace channel full, event dropped");
        }
    }

    fn release_port(&self) {
        let Some(network) = self.network.upgrade() else {
            return;
        };
        let mut servers = network.servers.lock();
        let ours = servers
            .get(&self.port)
            .is_some_and(|s| std::ptr::eq(Arc::as_ptr(s), self));
        if ours {
            servers.remove(&self.port);
        }
    }

    async fn dispatch(&self, inbound: Inbound) {
        let Some((kind, client_id, payload)) = decode_packet(&inbound.datagram) else {
            return;
        };
        self.peers.lock().insert(client_id, inbound.reply);
        self.trace(TraceDirection::In, inbound.datagram.len(), client_id);

        let callback = self.callbacks.read().get(&kind).cloned();
        if let Some(callback) = callback {
            callback(payload.to_vec(), client_id).await;
        }
    }
}

impl ServerTransport for IntraServer {
    fn run(self: Arc<Self>) -> BoxFuture<'static, Result<(), TransportError>> {
        Box::pin(async move {
            let mut inbox = self
                .inbox_rx
                .lock()
                .take()
                .ok_or_else(|| TransportError::Config("server loop already started".into()))?;

            self.update_state(|s| {
                s.is_alive = true;
                s.should_stop = false;
            });

            loop {
                tokio::select! {
                    _ = self.stop.cancelled() => break,
                    inbound = inbox.recv() => match inbound {
                        Some(inbound) => self.dispatch(inbound).await,
                        None => break,
                    }
                }
            }

            self.update_state(|s| s.is_alive = false);
            self.release_port();
            self.peers.lock().clear();
            debug!("intra server on port {} stopped", self.port);
            Ok(())
        })
    }

    fn stop(&self) {
        self.update_state(|s| s.should_stop = true);
        self.release_port();
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
            let network = self.network.upgrade();
            let peers: Vec<(ClientId, mpsc::Sender<Vec<u8>>)> = self
                .peers
                .lock()
                .iter()
                .map(|(id, tx)| (*id, tx.clone()))
                .collect();

            let mut reached = 0;
            for (client_id, tx) in peers {
                if network.as_ref().is_some_and(|n| n.is_down(client_id)) {
                    debug!(client_id, "link down, relay skipped");
                    continue;
                }
                let packet = match encode_packet(PacketKind::DebugAny, client_id, payload) {
                    Ok(packet) => packet,
                    Err(e) => {
                        warn!(client_id, "relay skipped: {}", e);
                        continue;
                    }
                };
                let length = packet.len();
                match tx.try_send(packet) {
                    Ok(()) => {
                        self.trace(TraceDirection::Out, length, client_id);
                        reached += 1;
                    }
                    Err(e) => warn!(client_id, "relay failed: {}", e),
                }
            }
            Ok(reached)
        })
    }
}
