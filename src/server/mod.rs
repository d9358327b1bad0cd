//! TCP control plane: registry, presenter, per-connection handling and the
//! accept loop that ties the whole relay together.

pub mod connection;
pub mod peer;
pub mod presenter;
pub mod registry;
pub mod transfer;

pub use peer::PeerHandle;
pub use presenter::Presenter;
pub use registry::{ConnectionRegistry, RegisterOutcome};

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, UdpSocket};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::media::{self, MediaState};
use crate::protocol::notice;
use crate::storage::FileStore;

/// Everything the connection handlers and media tasks share. Each table
/// guards itself; no caller ever sees a raw map.
pub struct SharedState {
    pub config: ServerConfig,
    pub registry: ConnectionRegistry,
    pub presenter: Presenter,
    pub store: FileStore,
    pub media: MediaState,
    pub udp: Arc<UdpSocket>,
}

/// The relay server: one TCP listener, one UDP media socket, two media tasks
/// and a task per control connection.
pub struct RelayServer {
    state: Arc<SharedState>,
    listener: TcpListener,
}

impl RelayServer {
    /// Bind both sockets and open the blob store. With port 0 in the config
    /// the effective UDP port is what `AUDIO_PORT` later announces.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.tcp_addr()).await?;
        let udp = Arc::new(media::bind_udp(config.udp_addr(), config.udp_recv_buffer)?);
        let store = FileStore::open(&config.files_dir).await?;

        let config = ServerConfig {
            udp_port: udp.local_addr()?.port(),
            ..config
        };
        let state = Arc::new(SharedState {
            config,
            registry: ConnectionRegistry::new(),
            presenter: Presenter::new(),
            store,
            media: MediaState::new(),
            udp,
        });
        Ok(Self { state, listener })
    }

    pub fn state(&self) -> Arc<SharedState> {
        self.state.clone()
    }

    pub fn tcp_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn udp_addr(&self) -> Result<SocketAddr> {
        Ok(self.state.udp.local_addr()?)
    }

    /// Run the relay: spawns the media receive loop and the mixer, then
    /// accepts control connections until the process ends.
    pub async fn run(self) -> Result<()> {
        let _relay_task = tokio::spawn(media::relay_loop(self.state.clone()));
        let _mixer_task = tokio::spawn(media::mixer_loop(self.state.clone()));

        tracing::info!(
            tcp = %self.listener.local_addr()?,
            udp = %self.state.udp.local_addr()?,
            "relay listening"
        );

        loop {
            match self.listener.accept().await {
                Ok((socket, addr)) => {
                    tracing::debug!(%addr, "new control connection");
                    tokio::spawn(connection::handle_connection(
                        self.state.clone(),
                        socket,
                        addr,
                    ));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                }
            }
        }
    }

    /// Notify every peer the server is closing, then force the connections
    /// shut.
    pub async fn shutdown(state: &Arc<SharedState>) {
        tracing::info!("server shutting down");
        let _ = state
            .registry
            .broadcast_all(notice::shutting_down().as_bytes())
            .await;
        for peer in state.registry.snapshot() {
            peer.close().await;
            state.registry.unregister(peer.name());
        }
    }
}

/// Run the disconnect cascade for a set of peers. Notices sent during one
/// teardown can themselves reveal further dead peers; those are torn down in
/// turn (iteratively, each peer at most once).
pub async fn disconnect_peers(state: &Arc<SharedState>, initial: Vec<String>) {
    let mut pending = initial;
    let mut seen: HashSet<String> = HashSet::new();
    while let Some(name) = pending.pop() {
        if !seen.insert(name.clone()) {
            continue;
        }
        pending.extend(teardown_peer(state, &name).await);
    }
}

/// One logically atomic disconnect. The registry entry is claimed first: it
/// is the gate that makes a peer tear down at most once, so a late duplicate
/// teardown cannot clobber presenter or media state a re-registered namesake
/// has since acquired.
async fn teardown_peer(state: &Arc<SharedState>, name: &str) -> Vec<String> {
    let Some(peer) = state.registry.unregister(name) else {
        // Already torn down by a concurrent failure path.
        return Vec::new();
    };
    let mut failed = Vec::new();

    if state.presenter.stop(name) {
        tracing::info!(peer = name, "presenter cleared by disconnect");
        failed.extend(
            state
                .registry
                .broadcast(notice::presenter_set(None).as_bytes(), Some(name))
                .await,
        );
    }

    state.media.remove_peer(name);

    peer.close().await;
    tracing::info!(peer = name, "peer left");

    failed.extend(
        state
            .registry
            .broadcast_all(notice::left_chat(name).as_bytes())
            .await,
    );
    failed.extend(
        state
            .registry
            .broadcast_all(notice::user_left(name).as_bytes())
            .await,
    );
    failed
}
