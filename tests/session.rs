//! Socket-level integration tests: a real relay on ephemeral ports, real TCP
//! control peers and real UDP media endpoints.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};

use lan_collab_relay::config::ServerConfig;
use lan_collab_relay::server::{disconnect_peers, RelayServer, SharedState};

const TIMEOUT: Duration = Duration::from_secs(5);

fn test_files_dir(test: &str) -> PathBuf {
    std::env::temp_dir().join(format!("relay-it-{}-{}", std::process::id(), test))
}

async fn start_relay(test: &str) -> (SocketAddr, SocketAddr, Arc<SharedState>) {
    let config = ServerConfig {
        bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        tcp_port: 0,
        udp_port: 0,
        files_dir: test_files_dir(test),
        ..Default::default()
    };
    let server = RelayServer::bind(config).await.expect("bind relay");
    let tcp = server.tcp_addr().unwrap();
    let udp = server.udp_addr().unwrap();
    let state = server.state();
    tokio::spawn(server.run());
    (tcp, udp, state)
}

/// A scripted control-channel peer.
struct TestPeer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestPeer {
    /// Connect and answer the NICK prompt. Does not wait for the join
    /// preamble; use [`wait_for`](Self::wait_for) for that.
    async fn connect(addr: SocketAddr, name: &str) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        let (read, writer) = stream.into_split();
        let mut peer = Self {
            reader: BufReader::new(read),
            writer,
        };
        assert_eq!(peer.line().await, "NICK");
        peer.send(&format!("{name}\n")).await;
        peer
    }

    /// Connect, answer NICK, and consume the preamble up to `AUDIO_PORT`.
    async fn join(addr: SocketAddr, name: &str) -> Self {
        let mut peer = Self::connect(addr, name).await;
        peer.wait_for(|l| l.starts_with("CMD:AUDIO_PORT:")).await;
        peer
    }

    async fn send(&mut self, text: &str) {
        self.writer.write_all(text.as_bytes()).await.expect("send");
    }

    async fn send_bytes(&mut self, data: &[u8]) {
        self.writer.write_all(data).await.expect("send bytes");
    }

    async fn line(&mut self) -> String {
        let mut line = String::new();
        let read = tokio::time::timeout(TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out reading line")
            .expect("read line");
        assert!(read > 0, "connection closed while expecting a line");
        line.trim_end_matches(['\n', '\r']).to_string()
    }

    /// Read lines until one satisfies the predicate, skipping unrelated
    /// asynchronous notices.
    async fn wait_for(&mut self, pred: impl Fn(&str) -> bool) -> String {
        tokio::time::timeout(TIMEOUT, async {
            loop {
                let line = self.line().await;
                if pred(&line) {
                    return line;
                }
            }
        })
        .await
        .expect("timed out waiting for matching line")
    }

    async fn read_exact(&mut self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        tokio::time::timeout(TIMEOUT, self.reader.read_exact(&mut buf))
            .await
            .expect("timed out reading payload")
            .expect("read payload");
        buf
    }

    /// Read until the server closes the connection, skipping any lines still
    /// in flight. A reset counts: writing into a server-closed socket can
    /// surface as an error instead of a clean end of stream.
    async fn expect_eof(&mut self) {
        tokio::time::timeout(TIMEOUT, async {
            loop {
                let mut line = String::new();
                match self.reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => return,
                    Ok(_) => continue,
                }
            }
        })
        .await
        .expect("timed out waiting for end of stream");
    }
}

#[tokio::test]
async fn handshake_rejects_duplicate_and_empty_names() {
    let (tcp, _udp, state) = start_relay("names").await;

    let _alice = TestPeer::join(tcp, "alice").await;

    let mut imposter = TestPeer::connect(tcp, "alice").await;
    assert_eq!(imposter.line().await, "ERROR:NICK_TAKEN:alice");

    let mut nameless = TestPeer::connect(tcp, "").await;
    assert_eq!(nameless.line().await, "ERROR:NICK_EMPTY");

    assert_eq!(state.registry.len(), 1);
}

#[tokio::test]
async fn chat_reaches_every_peer_including_sender() {
    let (tcp, _udp, _state) = start_relay("chat").await;

    let mut alice = TestPeer::join(tcp, "alice").await;
    let mut bob = TestPeer::join(tcp, "bob").await;

    alice.send("hello lan\n").await;
    assert_eq!(
        alice.wait_for(|l| l.starts_with("[alice]")).await,
        "[alice] hello lan"
    );
    assert_eq!(
        bob.wait_for(|l| l.starts_with("[alice]")).await,
        "[alice] hello lan"
    );

    // A bare newline is still a chat message, relayed with an empty body.
    alice.send("\n").await;
    assert_eq!(
        bob.wait_for(|l| l.starts_with("[alice]")).await,
        "[alice] "
    );
}

#[tokio::test]
async fn file_upload_then_download_round_trips() {
    let (tcp, _udp, _state) = start_relay("files").await;
    let content: Vec<u8> = (0..42u8).collect();

    let mut alice = TestPeer::join(tcp, "alice").await;
    alice.send("CMD:FILE_UPLOAD_START:notes.txt:42\n").await;
    alice
        .wait_for(|l| l == "CMD:FILE_READY_TO_RECV:notes.txt")
        .await;
    alice.send_bytes(&content).await;

    // A chat echo proves the upload branch has fully completed, since the
    // handler processes one command at a time.
    alice.send("done\n").await;
    alice.wait_for(|l| l == "[alice] done").await;

    // A late joiner sees the catalog replayed during its preamble.
    let mut bob = TestPeer::connect(tcp, "bob").await;
    bob.wait_for(|l| l == "CMD:FILE_NEW_AVAILABLE:alice:notes.txt:42")
        .await;
    bob.wait_for(|l| l.starts_with("CMD:AUDIO_PORT:")).await;

    bob.send("CMD:FILE_DOWNLOAD_REQUEST:notes.txt\n").await;
    bob.wait_for(|l| l == "CMD:FILE_SEND_START:notes.txt:42")
        .await;
    assert_eq!(bob.read_exact(42).await, content);
}

#[tokio::test]
async fn download_of_unknown_file_is_informational() {
    let (tcp, _udp, _state) = start_relay("missing").await;

    let mut alice = TestPeer::join(tcp, "alice").await;
    alice.send("CMD:FILE_DOWNLOAD_REQUEST:ghost.bin\n").await;
    alice
        .wait_for(|l| l == "[SERVER] Error: File 'ghost.bin' not found.")
        .await;

    // Connection is still healthy.
    alice.send("still here\n").await;
    alice.wait_for(|l| l == "[alice] still here").await;
}

#[tokio::test]
async fn report_is_acknowledged() {
    let (tcp, _udp, _state) = start_relay("report").await;

    let mut alice = TestPeer::join(tcp, "alice").await;
    alice.send("CMD:REPORT_USER:bob\n").await;
    alice
        .wait_for(|l| l == "[SERVER] Report for bob has been logged.")
        .await;
}

#[tokio::test]
async fn presenter_scenario_grant_reject_relay_and_drain() {
    let (tcp, _udp, state) = start_relay("presenter").await;

    let mut alice = TestPeer::join(tcp, "alice").await;
    let mut bob = TestPeer::join(tcp, "bob").await;

    // Grant: everyone, including the requester, learns the presenter.
    alice.send("CMD:PRESENTER_REQUEST\n").await;
    alice.wait_for(|l| l == "CMD:PRESENTER_SET:alice").await;
    bob.wait_for(|l| l == "CMD:PRESENTER_SET:alice").await;

    // Contention: bob is rejected, state unchanged.
    bob.send("CMD:PRESENTER_REQUEST\n").await;
    bob.wait_for(|l| l == "[SERVER] Cannot start presenting, another user is active.")
        .await;
    assert_eq!(state.presenter.current().as_deref(), Some("alice"));

    // The presenter's frame reaches bob verbatim: header then payload.
    let frame: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    alice.send("CMD:SCREEN_DATA:1000\n").await;
    alice.send_bytes(&frame).await;
    bob.wait_for(|l| l == "CMD:SCREEN_DATA:1000").await;
    assert_eq!(bob.read_exact(1000).await, frame);

    // A non-presenter's frame is ignored but its bytes are drained, so the
    // connection stays in sync.
    bob.send("CMD:SCREEN_DATA:10\n").await;
    bob.send_bytes(&[0xAB; 10]).await;
    bob.send("after frame\n").await;
    bob.wait_for(|l| l == "[bob] after frame").await;
    alice.wait_for(|l| l == "[bob] after frame").await;

    // Disconnecting the presenter returns the state machine to idle.
    drop(alice);
    bob.wait_for(|l| l == "CMD:PRESENTER_SET:NONE").await;
    assert_eq!(state.presenter.current(), None);
}

#[tokio::test]
async fn oversized_screen_frame_disconnects_the_presenter() {
    let (tcp, _udp, state) = start_relay("huge-frame").await;

    let mut alice = TestPeer::join(tcp, "alice").await;
    let mut bob = TestPeer::join(tcp, "bob").await;

    alice.send("CMD:PRESENTER_REQUEST\n").await;
    bob.wait_for(|l| l == "CMD:PRESENTER_SET:alice").await;

    // A well-formed header with an absurd declared length is a protocol
    // violation: the connection is dropped without reserving memory for it,
    // and the presenter slot is released.
    alice
        .send(&format!("CMD:SCREEN_DATA:{}\n", u64::MAX))
        .await;
    bob.wait_for(|l| l == "CMD:PRESENTER_SET:NONE").await;
    bob.wait_for(|l| l == "CMD:USER_LEFT:alice").await;
    alice.expect_eof().await;

    // The slot really is free: the next request is granted.
    bob.send("CMD:PRESENTER_REQUEST\n").await;
    bob.wait_for(|l| l == "CMD:PRESENTER_SET:bob").await;
    assert_eq!(state.registry.len(), 1);
}

#[tokio::test]
async fn teardown_ends_session_and_frees_name() {
    let (tcp, _udp, state) = start_relay("teardown").await;

    let mut alice = TestPeer::join(tcp, "alice").await;
    let mut bob = TestPeer::join(tcp, "bob").await;
    alice.wait_for(|l| l == "[SERVER] bob joined the chat!").await;

    // Server-side teardown, as triggered when a broadcast write to a peer
    // fails.
    disconnect_peers(&state, vec!["bob".to_string()]).await;
    alice.wait_for(|l| l == "CMD:USER_LEFT:bob").await;

    // The torn-down session is really over: nothing it writes is dispatched
    // any more, and its socket reaches end of stream.
    bob.send("ghost message\n").await;
    bob.expect_eof().await;

    // The freed name can be taken by a fresh connection, which alone speaks
    // for it now.
    let mut bob2 = TestPeer::join(tcp, "bob").await;
    bob2.send("back\n").await;
    assert_eq!(
        alice.wait_for(|l| l.starts_with("[bob]")).await,
        "[bob] back"
    );
    assert_eq!(state.registry.len(), 2);
}

#[tokio::test]
async fn media_handshake_roster_mix_and_teardown() {
    let (tcp, udp, state) = start_relay("media").await;

    let mut alice = TestPeer::join(tcp, "alice").await;
    let mut bob = TestPeer::join(tcp, "bob").await;

    let alice_udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let bob_udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    alice_udp.send_to(b"HELLO:alice", udp).await.unwrap();
    bob.wait_for(|l| l == "CMD:USER_JOINED:alice").await;

    bob_udp.send_to(b"HELLO:bob", udp).await.unwrap();
    // The late joiner learns the existing roster over its reliable channel...
    bob.wait_for(|l| l == "CMD:USER_JOINED:alice").await;
    // ...and the rest learn about the newcomer.
    alice.wait_for(|l| l == "CMD:USER_JOINED:bob").await;

    // Video relays verbatim, tagged with the sender's name.
    alice_udp.send_to(b"VID:\x01\x02\x03", udp).await.unwrap();
    let mut buf = vec![0u8; 65536];
    let len = tokio::time::timeout(TIMEOUT, bob_udp.recv(&mut buf))
        .await
        .expect("timed out waiting for relayed video")
        .unwrap();
    assert_eq!(&buf[..len], b"VID:alice:\x01\x02\x03");

    // Audio: a payload Opus rejects falls back to raw samples; a full
    // 1920-byte frame is mix-eligible and comes back in the next cycle.
    let mut audio = vec![0u8; 1920];
    audio[0] = 0xff; // invalid code-3 packet, forces the raw fallback
    let mut packet = b"AUD:".to_vec();
    packet.extend_from_slice(&audio);
    alice_udp.send_to(&packet, udp).await.unwrap();

    let mixed = tokio::time::timeout(TIMEOUT, async {
        loop {
            let len = alice_udp.recv(&mut buf).await.unwrap();
            if buf[..len].starts_with(b"AUD:alice:") {
                return buf[..len].to_vec();
            }
        }
    })
    .await
    .expect("timed out waiting for mixed audio");
    // Single contributor: the mix is the input frame unchanged.
    assert_eq!(&mixed[10..], &audio[..]);

    // Control-connection teardown removes the endpoint and notifies over TCP.
    drop(bob);
    alice.wait_for(|l| l == "CMD:USER_LEFT:bob").await;
    assert_eq!(state.media.endpoint_count(), 1);
}

#[tokio::test]
async fn disconnect_notifies_remaining_peers() {
    let (tcp, _udp, state) = start_relay("leave").await;

    let mut alice = TestPeer::join(tcp, "alice").await;
    let bob = TestPeer::join(tcp, "bob").await;

    drop(bob);
    alice.wait_for(|l| l == "[SERVER] bob has left the chat.").await;
    alice.wait_for(|l| l == "CMD:USER_LEFT:bob").await;
    assert_eq!(state.registry.len(), 1);
}
