// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Coordinated shutdown.
//!
//! One root [`CancellationToken`] reaches every relay and transport loop,
//! and every background task is spawned on one [`TaskTracker`]. Shutdown
//! fires the token, cancels the viewer hub, asks the HTTP listener to stop,
//! then waits for the tracker and the listener under a single deadline.

use crate::hub::BroadcastHub;
use parking_lot::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    ShuttingDown,
    Stopped,
}

#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("Shutdown already in progress")]
    AlreadyShuttingDown,

    #[error("HTTP listener failed: {0}")]
    Listener(#[source] std::io::Error),

    #[error("HTTP listener task failed: {0}")]
    ListenerTask(#[source] tokio::task::JoinError),
}

/// What a completed shutdown managed to wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownOutcome {
    /// Every tracked task finished before the deadline.
    pub drained: bool,
    /// The listener returned before the deadline.
    pub listener_closed: bool,
}

pub struct Shutdown {
    cancel: CancellationToken,
    tracker: TaskTracker,
    listener_stop: CancellationToken,
    state: Mutex<ShutdownState>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            listener_stop: CancellationToken::new(),
            state: Mutex::new(ShutdownState::Running),
        }
    }

    /// Root token observed by every background loop.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn tracker(&self) -> TaskTracker {
        self.tracker.clone()
    }

    /// Token the HTTP listener's graceful-shutdown future waits on.
    pub fn listener_stop(&self) -> CancellationToken {
        self.listener_stop.clone()
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.lock()
    }

    /// Run the shutdown sequence once. A drain timeout is only a warning;
    /// a listener failure is returned.
    pub async fn run(
        &self,
        hub: &BroadcastHub,
        mut listener: JoinHandle<std::io::Result<()>>,
        timeout: Duration,
    ) -> Result<ShutdownOutcome, ShutdownError> {
        {
            let mut state = self.state.lock();
            if *state != ShutdownState::Running {
                return Err(ShutdownError::AlreadyShuttingDown);
            }
            *state = ShutdownState::ShuttingDown;
        }
        info!("Shutting down (timeout {:?})", timeout);

        self.cancel.cancel();
        hub.cancel();
        self.listener_stop.cancel();
        self.tracker.close();

        let deadline = Instant::now() + timeout;
        let (drain, listener_result) = tokio::join!(
            timeout_at(deadline, self.tracker.wait()),
            timeout_at(deadline, &mut listener),
        );

        let drained = drain.is_ok();
        if !drained {
            warn!(
                "{} background task(s) still running after {:?}",
                self.tracker.len(),
                timeout
            );
        }

        let result = match listener_result {
            Ok(Ok(Ok(()))) => Ok(true),
            Ok(Ok(Err(e))) => Err(ShutdownError::Listener(e)),
            Ok(Err(e)) => Err(ShutdownError::ListenerTask(e)),
            Err(_) => {
                warn!("HTTP listener did not close within {:?}, aborting it", timeout);
                listener.abort();
                Ok(false)
            }
        };

        *self.state.lock() = ShutdownState::Stopped;
        info!("Shutdown complete");
        result.map(|listener_closed| ShutdownOutcome {
            drained,
            listener_closed,
        })
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listener_until(stop: CancellationToken) -> JoinHandle<std::io::Result<()>> {
        tokio::spawn(async move {
            stop.cancelled().await;
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_clean_shutdown_drains_everything() {
        let shutdown = Shutdown::new();
        let hub = BroadcastHub::new(Duration::from_millis(100));
        let cancel = shutdown.cancel_token();
        shutdown.tracker().spawn(async move { cancel.cancelled().await });
        let listener = listener_until(shutdown.listener_stop());

        let outcome = shutdown
            .run(&hub, listener, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ShutdownOutcome {
                drained: true,
                listener_closed: true
            }
        );
        assert_eq!(shutdown.state(), ShutdownState::Stopped);
        assert!(hub.is_cancelled());
    }

    #[tokio::test]
    async fn test_timeouts_share_one_deadline() {
        let shutdown = Shutdown::new();
        let hub = BroadcastHub::new(Duration::from_millis(100));
        shutdown
            .tracker()
            .spawn(tokio::time::sleep(Duration::from_secs(60)));
        let stuck_listener = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });

        let started = std::time::Instant::now();
        let outcome = shutdown
            .run(&hub, stuck_listener, Duration::from_millis(300))
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert!(!outcome.drained);
        assert!(!outcome.listener_closed);
        // Two serial waits would take at least 600ms.
        assert!(elapsed < Duration::from_millis(550), "took {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_listener_error_is_reported() {
        let shutdown = Shutdown::new();
        let hub = BroadcastHub::new(Duration::from_millis(100));
        let failing = tokio::spawn(async {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "accept failed"))
        });

        let err = shutdown
            .run(&hub, failing, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ShutdownError::Listener(_)));
        assert_eq!(shutdown.state(), ShutdownState::Stopped);
    }

    #[tokio::test]
    async fn test_second_run_is_refused() {
        let shutdown = Shutdown::new();
        let hub = BroadcastHub::new(Duration::from_millis(100));
        shutdown
            .run(&hub, listener_until(shutdown.listener_stop()), Duration::from_secs(1))
            .await
            .unwrap();

        let again = shutdown
            .run(&hub, listener_until(shutdown.listener_stop()), Duration::from_secs(1))
            .await;
        assert!(matches!(again, Err(ShutdownError::AlreadyShuttingDown)));
    }
}
