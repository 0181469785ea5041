// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client registry and server slot.
//!
//! Plain data behind the coordinator's lock; nothing here awaits or does I/O.

use crate::error::{HubError, HubResult};
use crate::protocol::{ClientPage, ClientSummary, Datagram};
use crate::transport::{ClientId, ClientTransport, ServerCommand, ServerTransport, TraceEvent};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

/// A registered debug client.
pub struct ClientRecord {
    pub id: ClientId,
    pub name: String,
    pub transport: Arc<dyn ClientTransport>,
    pub running: bool,
    pub datagrams: Vec<Datagram>,
}

impl ClientRecord {
    pub fn new(id: ClientId, name: String, transport: Arc<dyn ClientTransport>) -> Self {
        Self {
            id,
            name,
            transport,
            running: false,
            datagrams: Vec::new(),
        }
    }

    pub fn summary(&self) -> ClientSummary {
        ClientSummary {
            id: self.id,
            name: self.name.clone(),
        }
    }
}

/// Registration of a client's command channel. The receiver itself lives in
/// the relay loop; cancelling `stop` makes that loop exit.
pub struct CommandChannel {
    pub stop: CancellationToken,
}

/// The live server and the shared receiving ends of its channels.
#[derive(Clone)]
pub struct ServerHandle {
    pub transport: Arc<dyn ServerTransport>,
    pub commands: Arc<AsyncMutex<mpsc::Receiver<ServerCommand>>>,
    pub traces: Arc<AsyncMutex<mpsc::Receiver<TraceEvent>>>,
    /// Cancelled when the server is stopped, releasing both relays.
    pub stopped: CancellationToken,
    /// Cancelled once the server loop has returned.
    pub finished: CancellationToken,
}

impl ServerHandle {
    pub fn new(
        transport: Arc<dyn ServerTransport>,
        commands: mpsc::Receiver<ServerCommand>,
        traces: mpsc::Receiver<TraceEvent>,
    ) -> Self {
        Self {
            transport,
            commands: Arc::new(AsyncMutex::new(commands)),
            traces: Arc::new(AsyncMutex::new(traces)),
            stopped: CancellationToken::new(),
            finished: CancellationToken::new(),
        }
    }
}

/// Everything guarded by the registry lock.
#[derive(Default)]
pub struct Registry {
    clients: HashMap<String, ClientRecord>,
    names: HashMap<ClientId, String>,
    channels: HashMap<ClientId, CommandChannel>,
    pub server: Option<ServerHandle>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.clients.contains_key(name)
    }

    /// Insert a client and its command channel. The name must be free.
    pub fn insert_client(&mut self, record: ClientRecord, channel: CommandChannel) {
        self.names.insert(record.id, record.name.clone());
        self.channels.insert(record.id, channel);
        self.clients.insert(record.name.clone(), record);
    }

    /// Remove a client by name, returning its record and command channel.
    pub fn remove_client(&mut self, name: &str) -> Option<(ClientRecord, Option<CommandChannel>)> {
        let record = self.clients.remove(name)?;
        self.names.remove(&record.id);
        let channel = self.channels.remove(&record.id);
        Some((record, channel))
    }

    pub fn by_name(&self, name: &str) -> Option<&ClientRecord> {
        self.clients.get(name)
    }

    pub fn by_id(&self, id: ClientId) -> Option<&ClientRecord> {
        self.names.get(&id).and_then(|name| self.clients.get(name))
    }

    pub fn by_id_mut(&mut self, id: ClientId) -> Option<&mut ClientRecord> {
        let name = self.names.get(&id)?;
        self.clients.get_mut(name)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn has_command_channel(&self, id: ClientId) -> bool {
        self.channels.contains_key(&id)
    }

    /// All clients whose name contains `filter` (case-insensitive), by id.
    pub fn list(&self, filter: Option<&str>) -> Vec<ClientSummary> {
        let needle = filter.map(str::to_lowercase).filter(|f| !f.is_empty());
        let mut items: Vec<ClientSummary> = self
            .clients
            .values()
            .filter(|record| match &needle {
                Some(needle) => record.name.to_lowercase().contains(needle.as_str()),
                None => true,
            })
            .map(ClientRecord::summary)
            .collect();
        items.sort_by_key(|item| item.id);
        items
    }

    pub fn records(&self) -> impl Iterator<Item = &ClientRecord> {
        self.clients.values()
    }

    /// Stop every client and cancel every relay, emptying the registry.
    pub fn drain_clients(&mut self) -> Vec<ClientRecord> {
        for (_, channel) in self.channels.drain() {
            channel.stop.cancel();
        }
        self.names.clear();
        self.clients.drain().map(|(_, record)| record).collect()
    }
}

/// Slice one page out of `items`. Pages are 1-based; asking past the last
/// page is an error unless there is nothing to page through.
pub fn paginate(items: Vec<ClientSummary>, page: usize, page_size: usize) -> HubResult<ClientPage> {
    if page == 0 {
        return Err(HubError::invalid("Page must be a positive integer"));
    }
    if page_size == 0 {
        return Err(HubError::invalid("Page size must be a positive integer"));
    }

    let total = items.len();
    let total_pages = total.div_ceil(page_size);
    if total_pages > 0 && page > total_pages {
        return Err(HubError::invalid("Page is out of range"));
    }

    let items = items
        .into_iter()
        .skip((page - 1).saturating_mul(page_size))
        .take(page_size)
        .collect();

    Ok(ClientPage {
        items,
        page,
        page_size,
        total,
    })
}
