// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! State coordinator.
//!
//! Single source of truth for the debug server slot, the client registry and
//! the trace log. All mutation happens under one of two independent locks
//! (registry, traces); neither is ever held across an `.await`, and viewer
//! tokens are broadcast only after the guard is gone.
//!
//! # Background work
//!
//! Every transport loop and relay loop is spawned on the coordinator's
//! [`TaskTracker`] and observes its root [`CancellationToken`], so one
//! cancellation drains everything.

pub mod registry;
mod relay;

use crate::diagram::sequence_diagram;
use crate::error::{HubError, HubResult};
use crate::hub::BroadcastHub;
use crate::names::{NameSource, SyllableNames};
use crate::payload::PayloadFormat;
use crate::protocol::{
    AllClientsResponse, ClientMap, ClientPage, ClientStateResponse, ClientSummary, Datagram,
    Direction, MapConnection, Token, TraceResponse,
};
use crate::transport::{ClientId, PacketKind, ServerState, TraceEvent, TransportFactory};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

pub use registry::{paginate, ClientRecord, CommandChannel, Registry, ServerHandle};

/// How often the server relays look for a server handle.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Name candidates tried before a start fails with a conflict.
pub const DEFAULT_NAME_ATTEMPTS: usize = 8;

/// Default UDP port of the debug server.
pub const DEFAULT_UDP_PORT: u16 = 9090;

/// Client id reserved for the server in the client map.
pub const SERVER_NODE_ID: ClientId = 0;

/// How long `stop_server` waits for the server loop to release its port.
pub const SERVER_STOP_TIMEOUT: Duration = Duration::from_secs(2);

struct Inner {
    registry: Mutex<Registry>,
    traces: RwLock<Vec<TraceEvent>>,
    next_id: AtomicU64,
    hub: Arc<BroadcastHub>,
    factory: Arc<dyn TransportFactory>,
    names: Arc<dyn NameSource>,
    name_attempts: usize,
    udp_port: u16,
    poll_interval: Duration,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

/// Handle to the shared coordinator state. Cloning is cheap.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

/// Builder for [`Coordinator`].
pub struct CoordinatorBuilder {
    factory: Arc<dyn TransportFactory>,
    hub: Option<Arc<BroadcastHub>>,
    names: Option<Arc<dyn NameSource>>,
    name_attempts: usize,
    udp_port: u16,
    poll_interval: Duration,
    cancel: Option<CancellationToken>,
    tracker: Option<TaskTracker>,
}

impl CoordinatorBuilder {
    pub fn hub(mut self, hub: Arc<BroadcastHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn names(mut self, names: Arc<dyn NameSource>) -> Self {
        self.names = Some(names);
        self
    }

    pub fn name_attempts(mut self, attempts: usize) -> Self {
        self.name_attempts = attempts.max(1);
        self
    }

    pub fn udp_port(mut self, port: u16) -> Self {
        self.udp_port = port;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn tracker(mut self, tracker: TaskTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn build(self) -> Coordinator {
        let hub = self
            .hub
            .unwrap_or_else(|| Arc::new(BroadcastHub::new(Duration::from_secs(1))));
        let names = self
            .names
            .unwrap_or_else(|| Arc::new(SyllableNames::new()) as Arc<dyn NameSource>);

        Coordinator {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry::new()),
                traces: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                hub,
                factory: self.factory,
                names,
                name_attempts: self.name_attempts,
                udp_port: self.udp_port,
                poll_interval: self.poll_interval,
                cancel: self.cancel.unwrap_or_default(),
                tracker: self.tracker.unwrap_or_default(),
            }),
        }
    }
}

impl Coordinator {
    pub fn builder(factory: Arc<dyn TransportFactory>) -> CoordinatorBuilder {
        CoordinatorBuilder {
            factory,
            hub: None,
            names: None,
            name_attempts: DEFAULT_NAME_ATTEMPTS,
            udp_port: DEFAULT_UDP_PORT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel: None,
            tracker: None,
        }
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.inner.hub
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.inner.tracker
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    pub fn poll_interval(&self) -> Duration {
        self.inner.poll_interval
    }

    pub fn client_count(&self) -> usize {
        self.inner.registry.lock().client_count()
    }

    /// Spawn the server command relay and the trace relay.
    pub fn spawn_server_relays(&self) {
        self.inner
            .tracker
            .spawn(relay::server_command_relay(self.clone()));
        self.inner.tracker.spawn(relay::trace_relay(self.clone()));
    }

    // ---- clients ----

    /// Create, register and start a new client.
    pub async fn start_client(&self) -> HubResult<ClientSummary> {
        let inner = &self.inner;
        let id = inner.next_id.fetch_add(1, Ordering::SeqCst);
        let stop = inner.cancel.child_token();

        let parts = inner
            .factory
            .connect_client(id, inner.udp_port, stop.clone())
            .map_err(|e| HubError::transport("Failed to create client", e))?;

        let weak = Arc::downgrade(&self.inner);
        parts.transport.on_packet(
            PacketKind::DebugAny,
            Arc::new(move |payload: Vec<u8>| {
                let weak = weak.clone();
                async move {
                    if let Some(coordinator) = Coordinator::upgrade(&weak) {
                        coordinator
                            .append_datagram(id, Direction::ServerToClient, payload)
                            .await;
                    }
                }
                .boxed()
            }),
        );

        let name = {
            let mut registry = inner.registry.lock();
            let name = (0..inner.name_attempts)
                .map(|_| inner.names.next_name())
                .find(|candidate| !registry.contains_name(candidate));
            if let Some(name) = &name {
                registry.insert_client(
                    ClientRecord::new(id, name.clone(), parts.transport.clone()),
                    CommandChannel { stop: stop.clone() },
                );
            }
            name
        };
        let Some(name) = name else {
            stop.cancel();
            parts.transport.stop();
            warn!(client_id = id, "no free client name after {} attempts", inner.name_attempts);
            return Err(HubError::conflict("Could not generate a unique client name"));
        };

        inner.tracker.spawn(relay::client_command_relay(
            self.clone(),
            id,
            parts.commands,
            stop,
        ));
        let transport = parts.transport;
        inner.tracker.spawn(async move {
            if let Err(e) = transport.run().await {
                warn!(client_id = id, "client transport exited: {}", e);
            }
        });

        info!(client_id = id, name = %name, "client started");
        inner.hub.broadcast(Token::ClientCreated).await;

        Ok(ClientSummary { id, name })
    }

    /// Stop and remove the client called `name`.
    pub async fn stop_client(&self, name: &str) -> HubResult<()> {
        if name.is_empty() {
            return Err(HubError::invalid("Name is required"));
        }

        let removed = self.inner.registry.lock().remove_client(name);
        let Some((record, channel)) = removed else {
            return Err(HubError::not_found("UDP client not found"));
        };

        if let Some(channel) = channel {
            channel.stop.cancel();
        }
        record.transport.stop();

        info!(client_id = record.id, name = %name, "client stopped");
        self.inner.hub.broadcast(Token::ClientUpdated(record.id)).await;
        Ok(())
    }

    pub fn client_by_name(&self, name: &str) -> HubResult<ClientStateResponse> {
        if name.is_empty() {
            return Err(HubError::invalid("Name is required"));
        }
        let registry = self.inner.registry.lock();
        registry
            .by_name(name)
            .map(state_of)
            .ok_or_else(|| HubError::not_found("UDP client not found"))
    }

    pub fn client_by_id(&self, id: ClientId) -> HubResult<ClientStateResponse> {
        let registry = self.inner.registry.lock();
        registry
            .by_id(id)
            .map(state_of)
            .ok_or_else(|| HubError::not_found("UDP client not found"))
    }

    pub fn all_clients(&self) -> AllClientsResponse {
        AllClientsResponse {
            udp_clients: self.inner.registry.lock().list(None),
        }
    }

    /// One page of clients whose name contains `filter`, ordered by id.
    pub fn list_clients(
        &self,
        filter: Option<&str>,
        page: usize,
        page_size: usize,
    ) -> HubResult<ClientPage> {
        let items = self.inner.registry.lock().list(filter);
        paginate(items, page, page_size)
    }

    /// Decode `message` and send it from client `id` to the server.
    ///
    /// The datagram is logged only once the transport accepted it.
    pub async fn send_datagram(&self, id: ClientId, message: &str, format: &str) -> HubResult<()> {
        let format: PayloadFormat = format.parse()?;

        let transport = {
            let registry = self.inner.registry.lock();
            let record = registry
                .by_id(id)
                .ok_or_else(|| HubError::not_found("UDP client not found"))?;
            if !record.running {
                return Err(HubError::unavailable("Client is not running"));
            }
            record.transport.clone()
        };

        let payload = format.decode(message)?;
        transport
            .send(&payload)
            .await
            .map_err(|e| HubError::transport("Failed to send datagram", e))?;

        if !self
            .append_datagram(id, Direction::ClientToServer, payload)
            .await
        {
            return Err(HubError::not_found("UDP client not found"));
        }
        Ok(())
    }

    /// Append to a client's log and notify viewers. False if the client is gone.
    async fn append_datagram(&self, id: ClientId, direction: Direction, message: Vec<u8>) -> bool {
        let appended = match self.inner.registry.lock().by_id_mut(id) {
            Some(record) => {
                record.datagrams.push(Datagram { direction, message });
                true
            }
            None => false,
        };
        if appended {
            self.inner.hub.broadcast(Token::ClientUpdated(id)).await;
        } else {
            debug!(client_id = id, "datagram for unknown client dropped");
        }
        appended
    }

    /// Mirror a transport's running flag into its record.
    fn mirror_running(&self, id: ClientId, running: bool) -> bool {
        match self.inner.registry.lock().by_id_mut(id) {
            Some(record) => {
                record.running = running;
                true
            }
            None => false,
        }
    }

    // ---- server ----

    /// Start the singleton debug server. Refused while one is registered.
    pub async fn start_server(&self) -> HubResult<()> {
        let inner = &self.inner;
        if inner.registry.lock().server.is_some() {
            return Err(HubError::conflict("UDP server is already running"));
        }

        let parts = inner
            .factory
            .start_server(inner.udp_port, inner.cancel.child_token())
            .map_err(|e| HubError::transport("Failed to create server", e))?;

        let relay_target = Arc::downgrade(&parts.transport);
        parts.transport.on_packet(
            PacketKind::DebugAny,
            Arc::new(move |payload: Vec<u8>, client_id: ClientId| {
                let relay_target = relay_target.clone();
                async move {
                    let Some(server) = relay_target.upgrade() else {
                        return;
                    };
                    match server.broadcast(&payload).await {
                        Ok(reached) => debug!(client_id, "relayed to {} peer(s)", reached),
                        Err(e) => warn!(client_id, "relay failed: {}", e),
                    }
                }
                .boxed()
            }),
        );

        let handle = ServerHandle::new(parts.transport.clone(), parts.commands, parts.traces);
        let finished = handle.finished.clone();
        let raced = {
            let mut registry = inner.registry.lock();
            if registry.server.is_some() {
                true
            } else {
                registry.server = Some(handle);
                false
            }
        };
        if raced {
            parts.transport.stop();
            return Err(HubError::conflict("UDP server is already running"));
        }

        let transport = parts.transport;
        inner.tracker.spawn(async move {
            if let Err(e) = transport.run().await {
                warn!("server transport exited: {}", e);
            }
            finished.cancel();
        });

        info!(port = inner.udp_port, "UDP server started");
        inner.hub.broadcast(Token::ServerUpdated).await;
        Ok(())
    }

    pub async fn stop_server(&self) -> HubResult<()> {
        let handle = self
            .inner
            .registry
            .lock()
            .server
            .take()
            .ok_or_else(|| HubError::unavailable("UDP server is not running"))?;

        handle.stopped.cancel();
        handle.transport.stop();

        // The port is free only once the loop has returned.
        if tokio::time::timeout(SERVER_STOP_TIMEOUT, handle.finished.cancelled())
            .await
            .is_err()
        {
            warn!("server loop still running after {:?}", SERVER_STOP_TIMEOUT);
        }

        info!("UDP server stopped");
        self.inner.hub.broadcast(Token::ServerUpdated).await;
        Ok(())
    }

    /// Snapshot of the server state; all-false when there is no server.
    pub fn server_state(&self) -> ServerState {
        self.inner
            .registry
            .lock()
            .server
            .as_ref()
            .map(|handle| handle.transport.state())
            .unwrap_or_default()
    }

    fn server_handle(&self) -> Option<ServerHandle> {
        self.inner.registry.lock().server.clone()
    }

    // ---- traces ----

    fn record_trace(&self, event: TraceEvent) {
        self.inner.traces.write().push(event);
    }

    /// Traces of client `name`, in arrival order.
    pub fn traces_for(&self, name: &str) -> HubResult<Vec<TraceEvent>> {
        if name.is_empty() {
            return Err(HubError::invalid("Name is required"));
        }
        let id = self
            .inner
            .registry
            .lock()
            .by_name(name)
            .map(|record| record.id)
            .ok_or_else(|| HubError::not_found("UDP client not found"))?;

        Ok(self
            .inner
            .traces
            .read()
            .iter()
            .filter(|event| event.client_id == id)
            .cloned()
            .collect())
    }

    /// Sequence diagram of the traces of client `name`.
    pub fn trace_diagram(&self, name: &str) -> HubResult<TraceResponse> {
        let traces = self.traces_for(name)?;
        Ok(TraceResponse {
            heading: format!("Diagram for user: {}", name),
            diagram: sequence_diagram(&traces),
        })
    }

    /// Clients plus a client-to-server edge for each one that has traffic.
    pub fn client_map(&self) -> ClientMap {
        let (clients, mut active) = {
            let registry = self.inner.registry.lock();
            let active: BTreeSet<ClientId> = registry
                .records()
                .filter(|record| !record.datagrams.is_empty())
                .map(|record| record.id)
                .collect();
            (registry.list(None), active)
        };

        let known: BTreeSet<ClientId> = clients.iter().map(|c| c.id).collect();
        active.extend(
            self.inner
                .traces
                .read()
                .iter()
                .map(|event| event.client_id)
                .filter(|id| known.contains(id)),
        );

        ClientMap {
            clients,
            connections: active
                .into_iter()
                .map(|from_client_id| MapConnection {
                    from_client_id,
                    to_client_id: SERVER_NODE_ID,
                })
                .collect(),
        }
    }

    /// Stop every client and the server without notifying viewers.
    pub fn stop_all(&self) {
        let (records, server) = {
            let mut registry = self.inner.registry.lock();
            (registry.drain_clients(), registry.server.take())
        };
        for record in &records {
            record.transport.stop();
        }
        if let Some(handle) = server {
            handle.stopped.cancel();
            handle.transport.stop();
        }
        if !records.is_empty() {
            info!("stopped {} client(s)", records.len());
        }
    }

    fn upgrade(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }
}

fn state_of(record: &ClientRecord) -> ClientStateResponse {
    ClientStateResponse {
        id: record.id,
        running: record.running,
        datagrams: record.datagrams.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::IntraNetwork;

    fn coordinator(net: &IntraNetwork) -> Coordinator {
        Coordinator::builder(Arc::new(net.clone()))
            .names(Arc::new(SyllableNames::with_seed(11)))
            .poll_interval(Duration::from_millis(10))
            .build()
    }

    async fn wait_running(c: &Coordinator, id: ClientId) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !c.client_by_id(id).map(|s| s.running).unwrap_or(false) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("client never reported running");
    }

    #[tokio::test]
    async fn test_ids_start_at_one_and_increase() {
        let net = IntraNetwork::new();
        let c = coordinator(&net);
        let a = c.start_client().await.unwrap();
        let b = c.start_client().await.unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_ne!(a.name, b.name);
        c.cancel_token().cancel();
    }

    #[tokio::test]
    async fn test_new_coordinator_has_own_counter() {
        let net = IntraNetwork::new();
        let first = coordinator(&net);
        first.start_client().await.unwrap();
        let second = coordinator(&net);
        assert_eq!(second.start_client().await.unwrap().id, 1);
        first.cancel_token().cancel();
        second.cancel_token().cancel();
    }

    #[tokio::test]
    async fn test_stop_client_validation() {
        let net = IntraNetwork::new();
        let c = coordinator(&net);
        c.start_client().await.unwrap();

        assert!(matches!(c.stop_client("").await, Err(HubError::Validation { .. })));
        assert!(matches!(c.stop_client("missing").await, Err(HubError::NotFound(_))));
        assert_eq!(c.client_count(), 1);
        c.cancel_token().cancel();
    }

    #[tokio::test]
    async fn test_stop_client_removes_and_cancels_relay() {
        let net = IntraNetwork::new();
        let c = coordinator(&net);
        let client = c.start_client().await.unwrap();
        wait_running(&c, client.id).await;

        c.stop_client(&client.name).await.unwrap();
        assert!(c.client_by_id(client.id).is_err());
        assert!(!c.inner.registry.lock().has_command_channel(client.id));

        c.tracker().close();
        c.cancel_token().cancel();
        tokio::time::timeout(Duration::from_secs(5), c.tracker().wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_server_state_without_server() {
        let c = coordinator(&IntraNetwork::new());
        assert_eq!(c.server_state(), ServerState::default());
        assert!(matches!(c.stop_server().await, Err(HubError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_second_server_start_conflicts() {
        let net = IntraNetwork::new();
        let c = coordinator(&net);
        c.start_server().await.unwrap();
        assert!(matches!(c.start_server().await, Err(HubError::Conflict(_))));

        c.stop_server().await.unwrap();
        c.start_server().await.unwrap();
        c.cancel_token().cancel();
    }

    struct SameName;

    impl NameSource for SameName {
        fn next_name(&self) -> String {
            "Echo".to_string()
        }
    }

    #[tokio::test]
    async fn test_name_collision_is_a_conflict() {
        let net = IntraNetwork::new();
        let c = Coordinator::builder(Arc::new(net))
            .names(Arc::new(SameName))
            .name_attempts(3)
            .build();

        let first = c.start_client().await.unwrap();
        assert_eq!(first.name, "Echo");
        assert!(matches!(c.start_client().await, Err(HubError::Conflict(_))));
        assert_eq!(c.client_count(), 1);
        assert_eq!(c.client_by_name("Echo").unwrap().id, first.id);
        c.cancel_token().cancel();
    }
}
