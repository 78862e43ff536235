/*
[INPUT]:  Concrete REST client and stream transport
[OUTPUT]: Trait seams consumed by the replica (snapshot source, diff transport)
[POS]:    Transport boundary - lets the replica run against real or fake venues
[UPDATE]: When the replica needs a new capability from the transport
*/

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::http::{DepthClient, Result};
use crate::types::Snapshot;
use crate::ws::DepthWebSocket;

/// Events a diff transport delivers. Raw payloads only, no protocol knowledge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// First successful connection.
    Connected,
    /// Connection re-established after a drop; diffs may have been missed.
    Reconnected { attempts: u32 },
    /// One raw stream message.
    Message(String),
    /// Connection lost; the transport is retrying.
    Disconnected { reason: String },
    /// Retry budget exhausted; no further events will follow.
    Closed { reason: String },
}

/// Request/response source of full-depth snapshots.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self, symbol: &str, depth: u32) -> Result<Snapshot>;
}

/// Opens one per-symbol diff stream.
pub trait DiffTransport: Send + Sync {
    fn open(&self, symbol: &str) -> Result<StreamHandle>;
}

/// Receiving end of an open stream. Dropping it tears the connection down.
#[derive(Debug)]
pub struct StreamHandle {
    rx: mpsc::Receiver<StreamEvent>,
    task: Option<JoinHandle<()>>,
}

impl StreamHandle {
    pub fn new(rx: mpsc::Receiver<StreamEvent>, task: JoinHandle<()>) -> Self {
        Self {
            rx,
            task: Some(task),
        }
    }

    /// Handle fed by an external producer (fakes, replay).
    pub fn from_receiver(rx: mpsc::Receiver<StreamEvent>) -> Self {
        Self { rx, task: None }
    }

    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    pub fn close(&mut self) {
        self.rx.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl SnapshotSource for DepthClient {
    async fn fetch_snapshot(&self, symbol: &str, depth: u32) -> Result<Snapshot> {
        self.fetch_depth_snapshot(symbol, depth).await
    }
}

impl DiffTransport for DepthWebSocket {
    fn open(&self, symbol: &str) -> Result<StreamHandle> {
        self.open_stream(symbol)
    }
}
