//! Connection registry
//!
//! Maps display names to live control connections and owns name uniqueness.
//! Broadcasts iterate a snapshot of the current peers so no registry lock is
//! held during I/O; any peer whose write fails is reported back to the caller
//! for the full teardown cascade rather than aborting delivery to the rest.

use parking_lot::Mutex;
use std::collections::HashMap;

use super::peer::PeerHandle;

/// Result of a registration attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    NameTaken,
    NameEmpty,
}

/// Name → connection table, guarded internally
#[derive(Default)]
pub struct ConnectionRegistry {
    peers: Mutex<HashMap<String, PeerHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a display name. The uniqueness check and the insert happen under
    /// one lock, so of any number of simultaneous claims for the same name
    /// exactly one succeeds.
    pub fn register(&self, handle: PeerHandle) -> RegisterOutcome {
        if handle.name().is_empty() {
            return RegisterOutcome::NameEmpty;
        }
        let mut peers = self.peers.lock();
        if peers.contains_key(handle.name()) {
            return RegisterOutcome::NameTaken;
        }
        peers.insert(handle.name().to_string(), handle);
        RegisterOutcome::Registered
    }

    /// Remove a peer, returning its handle if it was still registered.
    pub fn unregister(&self, name: &str) -> Option<PeerHandle> {
        self.peers.lock().remove(name)
    }

    pub fn get(&self, name: &str) -> Option<PeerHandle> {
        self.peers.lock().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.peers.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }

    /// Snapshot of the current peers.
    pub fn snapshot(&self) -> Vec<PeerHandle> {
        self.peers.lock().values().cloned().collect()
    }

    /// Send `data` to every registered peer except `exclude`. Returns the
    /// names of peers whose write failed; the caller is expected to run the
    /// disconnect cascade for them.
    pub async fn broadcast(&self, data: &[u8], exclude: Option<&str>) -> Vec<String> {
        let targets = self.snapshot();
        let mut failed = Vec::new();
        for peer in targets {
            if Some(peer.name()) == exclude {
                continue;
            }
            if let Err(e) = peer.send(data).await {
                tracing::warn!(peer = peer.name(), error = %e, "broadcast write failed");
                failed.push(peer.name().to_string());
            }
        }
        failed
    }

    /// Send to every registered peer.
    pub async fn broadcast_all(&self, data: &[u8]) -> Vec<String> {
        self.broadcast(data, None).await
    }

    /// Send a multi-part message (header + payload) to every peer except
    /// `exclude`, each peer receiving the parts back to back without
    /// interleaved writes.
    pub async fn broadcast_parts(&self, parts: &[&[u8]], exclude: Option<&str>) -> Vec<String> {
        let targets = self.snapshot();
        let mut failed = Vec::new();
        for peer in targets {
            if Some(peer.name()) == exclude {
                continue;
            }
            if let Err(e) = peer.send_parts(parts).await {
                tracing::warn!(peer = peer.name(), error = %e, "relay write failed");
                failed.push(peer.name().to_string());
            }
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::net::{TcpListener, TcpStream};

    async fn test_handle(name: &str) -> PeerHandle {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let _server_side = listener.accept().await.unwrap();
        let (_read, write) = client.into_split();
        PeerHandle::new(name, write)
    }

    #[tokio::test]
    async fn test_register_unique_names() {
        let registry = ConnectionRegistry::new();
        let a = test_handle("alice").await;
        let a2 = test_handle("alice").await;

        assert_eq!(registry.register(a), RegisterOutcome::Registered);
        assert_eq!(registry.register(a2), RegisterOutcome::NameTaken);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_register_rejects_empty_name() {
        let registry = ConnectionRegistry::new();
        let handle = test_handle("").await;
        assert_eq!(registry.register(handle), RegisterOutcome::NameEmpty);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = ConnectionRegistry::new();
        registry.register(test_handle("bob").await);

        assert!(registry.unregister("bob").is_some());
        assert!(registry.unregister("bob").is_none());
        assert!(!registry.contains("bob"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registration_single_winner() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            let handle = test_handle("carol").await;
            tasks.push(tokio::spawn(async move { registry.register(handle) }));
        }

        let mut wins = 0;
        for task in tasks {
            if task.await.unwrap() == RegisterOutcome::Registered {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(registry.len(), 1);
    }
}
