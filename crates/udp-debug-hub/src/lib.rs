// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP Debug Hub
//!
//! Live-state backend for a debugging dashboard of a UDP client/server stack.
//! Tracks one optional debug server and any number of named debug clients,
//! and pushes short change tokens to every connected viewer so the dashboard
//! never has to poll.
//!
//! # Components
//!
//! - **Coordinator**: client registry, server slot and trace log
//! - **Relays**: background loops turning transport events into state
//! - **Broadcast hub**: viewer connection set and token fan-out
//! - **Shutdown**: one cancellation signal, one deadline
//!
//! # Quick Start
//!
//! ```bash
//! # UDP debug server on 9090, dashboard API on 8080
//! udp-debug-hub
//!
//! # In-process transport, custom ports
//! udp-debug-hub --transport intra --http-port 3000 --udp-port 9191
//!
//! # Using config file
//! udp-debug-hub --config hub.toml
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! bind_address = "0.0.0.0"
//! http_port = 8080
//! udp_port = 9090
//! transport = "udp"
//! shutdown_timeout_secs = 10
//! static_dir = "web/dist"
//! ```

pub mod api;
pub mod app;
pub mod config;
pub mod coordinator;
pub mod diagram;
pub mod error;
pub mod hub;
pub mod names;
pub mod payload;
pub mod protocol;
pub mod shutdown;
pub mod transport;

pub use app::DebugHub;
pub use config::{ConfigError, HubConfig, TransportMode};
pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use error::{ApiError, HubError, HubResult, ServiceError};
pub use hub::BroadcastHub;
pub use protocol::Token;
pub use shutdown::{Shutdown, ShutdownError, ShutdownOutcome, ShutdownState};
pub use transport::{IntraNetwork, TransportFactory, UdpTransportFactory};
