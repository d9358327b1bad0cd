//! Per-peer write handle
//!
//! Several logical flows (chat broadcast, file streaming, screen-frame relay)
//! can all want to write to the same peer's connection concurrently. The
//! handle owns the write half behind an async mutex so every write is
//! serialized and partial writes never interleave.

use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, MutexGuard, Notify};

/// Sendable peer: display name plus a serialized write handle
#[derive(Clone)]
pub struct PeerHandle {
    name: Arc<str>,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    closed: Arc<Notify>,
}

impl PeerHandle {
    pub fn new(name: impl Into<Arc<str>>, writer: OwnedWriteHalf) -> Self {
        Self {
            name: name.into(),
            writer: Arc::new(Mutex::new(writer)),
            closed: Arc::new(Notify::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write one complete message.
    pub async fn send(&self, data: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(data).await
    }

    pub async fn send_line(&self, line: &str) -> std::io::Result<()> {
        self.send(line.as_bytes()).await
    }

    /// Write several parts as one unit (e.g. a screen-frame header line and
    /// its payload), holding the write lock across all of them.
    pub async fn send_parts(&self, parts: &[&[u8]]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        for part in parts {
            writer.write_all(part).await?;
        }
        Ok(())
    }

    /// Lock the raw writer for an extended exclusive transfer (file download
    /// streaming). Chat and relay writes to this peer wait until the guard is
    /// dropped.
    pub async fn lock_writer(&self) -> MutexGuard<'_, OwnedWriteHalf> {
        self.writer.lock().await
    }

    /// Resolves once [`close`](Self::close) has been called. The session task
    /// selects on this, so a teardown ends the read loop too instead of only
    /// breaking future writes.
    pub async fn closed(&self) {
        self.closed.notified().await;
    }

    /// Close the connection: wake the session task and shut the write side
    /// down. The stored notify permit makes this effective even if the
    /// session task is not yet waiting.
    pub async fn close(&self) {
        self.closed.notify_one();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}
