//! Per-connection control handler
//!
//! One task per peer: runs the NICK handshake, replays the file catalog,
//! then dispatches chat, file transfer, presenter and report commands until
//! the connection dies, at which point the full teardown cascade runs.

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;

use crate::constants::{MAX_SCREEN_FRAME_BYTES, PAYLOAD_READ_TIMEOUT_SECS, READ_CHUNK_SIZE};
use crate::error::{ProtocolError, Result};
use crate::protocol::{notice, parse_line, Command, ControlLine, Frame, Framer};

use super::registry::RegisterOutcome;
use super::{disconnect_peers, transfer, PeerHandle, SharedState};

/// Read side of a control connection: the raw read half driven through the
/// two-mode framer.
pub struct ControlStream {
    reader: OwnedReadHalf,
    framer: Framer,
}

impl ControlStream {
    pub fn new(reader: OwnedReadHalf) -> Self {
        Self {
            reader,
            framer: Framer::new(),
        }
    }

    /// Read more bytes into the framer. `bounded` applies the payload read
    /// timeout, used while a declared binary payload is outstanding so a
    /// stalled peer cannot strand the stream mid-payload.
    async fn fill(&mut self, bounded: bool) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let n = if bounded {
            let read = self.reader.read(&mut chunk);
            tokio::time::timeout(Duration::from_secs(PAYLOAD_READ_TIMEOUT_SECS), read)
                .await
                .map_err(|_| ProtocolError::PayloadTimeout)??
        } else {
            self.reader.read(&mut chunk).await?
        };
        if n == 0 {
            return Err(ProtocolError::ConnectionClosed.into());
        }
        self.framer.feed(&chunk[..n]);
        Ok(())
    }

    /// Next text line from the stream.
    pub async fn next_line(&mut self) -> Result<String> {
        loop {
            if let Some(Frame::Line(line)) = self.framer.next() {
                return Ok(line);
            }
            self.fill(false).await?;
        }
    }

    /// Read a declared payload of exactly `len` bytes into memory.
    pub async fn read_payload(&mut self, len: usize) -> Result<Bytes> {
        self.framer.expect_payload(len);
        loop {
            if let Some(Frame::Payload(payload)) = self.framer.next() {
                return Ok(payload);
            }
            self.fill(true).await?;
        }
    }

    /// Stream a declared payload of exactly `len` bytes into `sink`.
    pub async fn stream_payload_to<W>(&mut self, len: usize, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        self.framer.stream_payload(len);
        let mut written = 0u64;
        while self.framer.payload_remaining() > 0 {
            match self.framer.payload_chunk() {
                Some(chunk) => {
                    sink.write_all(&chunk).await?;
                    written += chunk.len() as u64;
                }
                None => self.fill(true).await?,
            }
        }
        Ok(written)
    }

    /// Consume and discard a declared payload of exactly `len` bytes. Keeps
    /// the framing consistent when a payload must be ignored.
    pub async fn drain_payload(&mut self, len: usize) -> Result<()> {
        self.framer.stream_payload(len);
        while self.framer.payload_remaining() > 0 {
            if self.framer.payload_chunk().is_none() {
                self.fill(true).await?;
            }
        }
        Ok(())
    }
}

/// Entry point for one accepted control connection.
pub async fn handle_connection(state: Arc<SharedState>, socket: TcpStream, addr: SocketAddr) {
    if let Err(e) = run_connection(&state, socket, addr).await {
        tracing::debug!(%addr, error = %e, "connection ended");
    }
}

async fn run_connection(
    state: &Arc<SharedState>,
    socket: TcpStream,
    addr: SocketAddr,
) -> Result<()> {
    socket.set_nodelay(true).ok();
    let (read_half, mut write_half) = socket.into_split();
    let mut stream = ControlStream::new(read_half);

    write_half.write_all(notice::nick_prompt().as_bytes()).await?;

    let requested = tokio::time::timeout(
        Duration::from_secs(PAYLOAD_READ_TIMEOUT_SECS),
        stream.next_line(),
    )
    .await
    .map_err(|_| ProtocolError::Handshake("timed out waiting for display name".into()))??
    .trim()
    .to_string();

    if requested.is_empty() {
        write_half.write_all(notice::nick_empty().as_bytes()).await?;
        return Err(ProtocolError::Handshake("empty display name".into()).into());
    }

    let peer = PeerHandle::new(requested.as_str(), write_half);
    match state.registry.register(peer.clone()) {
        RegisterOutcome::Registered => {}
        RegisterOutcome::NameTaken => {
            peer.send_line(&notice::nick_taken(&requested)).await?;
            return Err(ProtocolError::Handshake(format!("name taken: {requested}")).into());
        }
        RegisterOutcome::NameEmpty => {
            peer.send_line(&notice::nick_empty()).await?;
            return Err(ProtocolError::Handshake("empty display name".into()).into());
        }
    }
    tracing::info!(peer = %requested, %addr, "peer joined");

    let result = session(state, &mut stream, &peer).await;
    disconnect_peers(state, vec![requested]).await;
    result
}

/// Post-registration lifetime of a peer: join preamble, then the dispatch
/// loop until the transport fails.
async fn session(
    state: &Arc<SharedState>,
    stream: &mut ControlStream,
    peer: &PeerHandle,
) -> Result<()> {
    let failed = state
        .registry
        .broadcast(notice::joined_chat(peer.name()).as_bytes(), Some(peer.name()))
        .await;
    fan_out(state, peer, failed).await?;

    peer.send_line(&notice::welcome()).await?;
    for record in state.store.list() {
        peer.send_line(&notice::file_new_available(
            &record.owner,
            &record.name,
            record.size,
        ))
        .await?;
    }
    peer.send_line(&notice::audio_port(state.config.udp_port)).await?;

    loop {
        // Biased so a close always wins over a buffered line: once torn
        // down, a peer never gets another command dispatched.
        let line = tokio::select! {
            biased;
            _ = peer.closed() => return Err(ProtocolError::ConnectionClosed.into()),
            line = stream.next_line() => line?,
        };
        match parse_line(&line) {
            Err(e) => {
                tracing::debug!(peer = peer.name(), error = %e, "discarding malformed command");
                peer.send_line(&notice::invalid_command(&line)).await?;
            }
            Ok(ControlLine::Chat(text)) => {
                tracing::debug!(peer = peer.name(), "chat message");
                let failed = state
                    .registry
                    .broadcast_all(notice::chat(peer.name(), &text).as_bytes())
                    .await;
                fan_out(state, peer, failed).await?;
            }
            Ok(ControlLine::Command(cmd)) => {
                dispatch_command(state, stream, peer, cmd).await?;
            }
        }
    }
}

async fn dispatch_command(
    state: &Arc<SharedState>,
    stream: &mut ControlStream,
    peer: &PeerHandle,
    cmd: Command,
) -> Result<()> {
    match cmd {
        Command::FileUploadStart { name, size } => {
            let failed = transfer::receive_upload(state, stream, peer, &name, size).await?;
            fan_out(state, peer, failed).await?;
        }
        Command::FileDownloadRequest { name } => {
            transfer::send_download(state, peer, &name).await?;
        }
        Command::PresenterRequest => {
            if state.presenter.request(peer.name()) {
                tracing::info!(peer = peer.name(), "presenting started");
                let failed = state
                    .registry
                    .broadcast_all(notice::presenter_set(Some(peer.name())).as_bytes())
                    .await;
                fan_out(state, peer, failed).await?;
            } else {
                peer.send_line(&notice::presenter_busy()).await?;
            }
        }
        Command::PresenterStop => {
            if state.presenter.stop(peer.name()) {
                tracing::info!(peer = peer.name(), "presenting stopped");
                let failed = state
                    .registry
                    .broadcast_all(notice::presenter_set(None).as_bytes())
                    .await;
                fan_out(state, peer, failed).await?;
            }
        }
        Command::ScreenData { len } => {
            if len > MAX_SCREEN_FRAME_BYTES {
                return Err(ProtocolError::PayloadTooLarge(len).into());
            }
            if state.presenter.is_presenting(peer.name()) {
                let payload = stream.read_payload(len).await?;
                let header = notice::screen_data_header(len);
                let failed = state
                    .registry
                    .broadcast_parts(&[header.as_bytes(), &payload], Some(peer.name()))
                    .await;
                fan_out(state, peer, failed).await?;
            } else {
                // Not the presenter: the frame is ignored, but its declared
                // bytes must still leave the stream or the framing desyncs.
                stream.drain_payload(len).await?;
            }
        }
        Command::ReportUser { name } => {
            tracing::warn!(
                reporter = peer.name(),
                reported = %name,
                timestamp = %chrono::Local::now().to_rfc2822(),
                "user report recorded"
            );
            peer.send_line(&notice::report_logged(&name)).await?;
        }
    }
    Ok(())
}

/// Tear down every peer whose broadcast write failed. If this peer is among
/// them its own transport is dead too, so the session ends.
async fn fan_out(state: &Arc<SharedState>, peer: &PeerHandle, failed: Vec<String>) -> Result<()> {
    if failed.is_empty() {
        return Ok(());
    }
    let own_failure = failed.iter().any(|name| name == peer.name());
    disconnect_peers(state, failed).await;
    if own_failure {
        return Err(ProtocolError::ConnectionClosed.into());
    }
    Ok(())
}
