//! UDP media relay
//!
//! Receives every media datagram, classifies it by tag, and either performs
//! the registration handshake, relays video verbatim to all other endpoints
//! (with the sender's name spliced into the tag), or decodes audio into the
//! sender's slot for the next mix cycle. Datagrams from unregistered sources
//! are silently dropped.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

use crate::constants::MAX_DATAGRAM_SIZE;
use crate::error::{MediaError, Result};
use crate::protocol::{classify_datagram, notice, video_relay_packet, Datagram};
use crate::server::{disconnect_peers, SharedState};

/// Bind the media socket, enlarging its receive buffer so bursts of video
/// frames are not dropped by the kernel.
pub fn bind_udp(addr: SocketAddr, recv_buffer: usize) -> Result<UdpSocket> {
    use socket2::{Domain, Protocol, Socket, Type};

    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| MediaError::BindFailed(e.to_string()))?;
    if let Err(e) = socket.set_recv_buffer_size(recv_buffer) {
        tracing::warn!(error = %e, "could not enlarge UDP receive buffer");
    }
    socket
        .set_nonblocking(true)
        .map_err(|e| MediaError::BindFailed(e.to_string()))?;
    socket
        .bind(&addr.into())
        .map_err(|e| MediaError::BindFailed(format!("{addr}: {e}")))?;

    Ok(UdpSocket::from_std(socket.into())?)
}

/// Long-lived receive/classify/decode loop over the media socket.
pub async fn relay_loop(state: Arc<SharedState>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (len, addr) = match state.udp.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                tracing::warn!(error = %e, "media socket receive failed");
                continue;
            }
        };

        match classify_datagram(&buf[..len]) {
            Datagram::Hello(name) if !name.is_empty() => {
                handle_hello(&state, name, addr).await;
            }
            Datagram::Hello(_) => {}
            other => {
                let Some(sender) = state.media.lookup_name(addr) else {
                    continue;
                };
                match other {
                    Datagram::Video(frame) => relay_video(&state, &sender, addr, frame).await,
                    Datagram::Audio(payload) => {
                        let samples = state.media.decode_audio(addr, payload);
                        state.media.store_samples(addr, samples);
                    }
                    Datagram::Unknown | Datagram::Hello(_) => {}
                }
            }
        }
    }
}

/// Registration handshake. Membership is established here over UDP, but the
/// roster notices travel over the reliable control channel: the new peer is
/// told about every existing media peer, and everyone else is told about the
/// new one.
async fn handle_hello(state: &Arc<SharedState>, name: &str, addr: SocketAddr) {
    let existing = state.media.register(name, addr);
    tracing::info!(peer = name, %addr, "media endpoint registered");

    let mut failed = Vec::new();
    if let Some(peer) = state.registry.get(name) {
        for other in &existing {
            if peer.send_line(&notice::user_joined(other)).await.is_err() {
                failed.push(name.to_string());
                break;
            }
        }
    }
    failed.extend(
        state
            .registry
            .broadcast(notice::user_joined(name).as_bytes(), Some(name))
            .await,
    );
    disconnect_peers(state, failed).await;
}

async fn relay_video(state: &Arc<SharedState>, sender: &str, from: SocketAddr, frame: &[u8]) {
    let packet = video_relay_packet(sender, frame);
    for target in state.media.targets_except(from) {
        if let Err(e) = state.udp.send_to(&packet, target).await {
            tracing::warn!(%target, error = %e, "video relay send failed");
        }
    }
}
