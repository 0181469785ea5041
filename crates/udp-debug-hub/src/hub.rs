// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Viewer broadcast hub.
//!
//! Each dashboard session registers while [`BroadcastHub::accept`] runs and
//! is removed when it returns. [`BroadcastHub::broadcast`] writes a token to
//! every live viewer concurrently; a viewer whose write fails or times out is
//! dropped without affecting the others.

use crate::protocol::Token;
use dashmap::DashMap;
use futures::future::join_all;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

type ViewerSink = Pin<Box<dyn Sink<String, Error = BoxError> + Send>>;

struct Viewer {
    sink: Arc<Mutex<ViewerSink>>,
    /// Cancelled when a write fails or the hub shuts down.
    closed: CancellationToken,
}

/// Set of live viewer connections.
pub struct BroadcastHub {
    viewers: DashMap<Uuid, Viewer>,
    cancel: CancellationToken,
    write_timeout: Duration,
}

impl BroadcastHub {
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            viewers: DashMap::new(),
            cancel: CancellationToken::new(),
            write_timeout,
        }
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Serve one viewer until its stream ends, a write to it fails, or the
    /// hub is cancelled. Inbound messages are read and discarded.
    pub async fn accept<S, R, M, E>(&self, sink: S, mut stream: R)
    where
        S: Sink<String> + Send + 'static,
        S::Error: Into<BoxError>,
        R: Stream<Item = Result<M, E>> + Unpin,
        E: std::fmt::Display,
    {
        if self.cancel.is_cancelled() {
            return;
        }

        let id = Uuid::new_v4();
        let session = id.to_string()[..8].to_string();
        let closed = self.cancel.child_token();
        let sink: ViewerSink = Box::pin(sink.sink_map_err(Into::into));
        let sink = Arc::new(Mutex::new(sink));

        self.viewers.insert(
            id,
            Viewer {
                sink: sink.clone(),
                closed: closed.clone(),
            },
        );
        info!(session = %session, "viewer connected ({} live)", self.viewers.len());

        loop {
            tokio::select! {
                _ = closed.cancelled() => break,
                item = stream.next() => match item {
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(session = %session, "viewer stream error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }

        self.viewers.remove(&id);
        let close = async { sink.lock().await.close().await };
        if tokio::time::timeout(self.write_timeout, close).await.is_err() {
            debug!(session = %session, "viewer close timed out");
        }
        info!(session = %session, "viewer disconnected");
    }

    /// Write `token` to every live viewer. Returns how many were reached.
    pub async fn broadcast(&self, token: Token) -> usize {
        if self.cancel.is_cancelled() {
            return 0;
        }

        // Snapshot, so no shard lock is held while writing.
        let targets: Vec<(Uuid, Arc<Mutex<ViewerSink>>)> = self
            .viewers
            .iter()
            .map(|entry| (*entry.key(), entry.value().sink.clone()))
            .collect();
        if targets.is_empty() {
            return 0;
        }

        let text = token.to_string();
        let writes = targets.into_iter().map(|(id, sink)| {
            let text = text.clone();
            async move {
                let write = async {
                    let mut sink = sink.lock().await;
                    sink.send(text).await
                };
                let delivered = matches!(
                    tokio::time::timeout(self.write_timeout, write).await,
                    Ok(Ok(()))
                );
                (id, delivered)
            }
        });

        let mut reached = 0;
        for (id, delivered) in join_all(writes).await {
            if delivered {
                reached += 1;
            } else {
                self.drop_viewer(id);
            }
        }
        debug!("broadcast {} to {} viewer(s)", text, reached);
        reached
    }

    /// Stop accepting, release every viewer, and turn broadcasts into no-ops.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    fn drop_viewer(&self, id: Uuid) {
        if let Some((_, viewer)) = self.viewers.remove(&id) {
            viewer.closed.cancel();
            warn!("dropping viewer {} after failed write", &id.to_string()[..8]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;

    type Inbound = mpsc::UnboundedSender<Result<String, std::io::Error>>;

    struct TestViewer {
        rx: mpsc::UnboundedReceiver<String>,
        inbound: Inbound,
        task: tokio::task::JoinHandle<()>,
    }

    fn connect(hub: &Arc<BroadcastHub>) -> TestViewer {
        let (tx, rx) = mpsc::unbounded::<String>();
        let (inbound, stream) = mpsc::unbounded::<Result<String, std::io::Error>>();
        let hub = hub.clone();
        let task = tokio::spawn(async move { hub.accept(tx, stream).await });
        TestViewer { rx, inbound, task }
    }

    async fn wait_for_viewers(hub: &BroadcastHub, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while hub.viewer_count() != n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("viewer count not reached");
    }

    #[tokio::test]
    async fn test_broadcast_without_viewers() {
        let hub = BroadcastHub::new(Duration::from_millis(100));
        assert_eq!(hub.broadcast(Token::Reload).await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_viewer() {
        let hub = Arc::new(BroadcastHub::new(Duration::from_secs(1)));
        let mut a = connect(&hub);
        let mut b = connect(&hub);
        wait_for_viewers(&hub, 2).await;

        assert_eq!(hub.broadcast(Token::ClientUpdated(5)).await, 2);
        assert_eq!(a.rx.next().await.as_deref(), Some("usu5"));
        assert_eq!(b.rx.next().await.as_deref(), Some("usu5"));

        // Ending the inbound stream deregisters.
        a.inbound.close_channel();
        a.task.await.unwrap();
        wait_for_viewers(&hub, 1).await;
        assert_eq!(hub.broadcast(Token::ServerUpdated).await, 1);
        assert_eq!(b.rx.next().await.as_deref(), Some("uss"));
    }

    #[tokio::test]
    async fn test_failed_viewer_is_dropped() {
        let hub = Arc::new(BroadcastHub::new(Duration::from_secs(1)));
        let broken = connect(&hub);
        let mut healthy = connect(&hub);
        wait_for_viewers(&hub, 2).await;

        drop(broken.rx);
        assert_eq!(hub.broadcast(Token::ClientCreated).await, 1);
        assert_eq!(healthy.rx.next().await.as_deref(), Some("cnu"));

        // The broken viewer's accept returns on its own.
        tokio::time::timeout(Duration::from_secs(5), broken.task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hub.viewer_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_releases_viewers_and_silences_broadcast() {
        let hub = Arc::new(BroadcastHub::new(Duration::from_secs(1)));
        let mut viewer = connect(&hub);
        wait_for_viewers(&hub, 1).await;

        hub.cancel();
        tokio::time::timeout(Duration::from_secs(5), viewer.task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hub.viewer_count(), 0);
        assert_eq!(hub.broadcast(Token::Reload).await, 0);
        // Closed by accept on the way out.
        assert_eq!(viewer.rx.next().await, None);

        // Late arrivals return immediately.
        let late = connect(&hub);
        tokio::time::timeout(Duration::from_secs(5), late.task)
            .await
            .unwrap()
            .unwrap();
        drop(viewer.inbound);
    }
}
