//! # LAN Collaboration Relay
//!
//! Server-side relay and protocol engine for LAN collaboration: text chat,
//! ad-hoc file transfer, exclusive screen presenting, and many-to-many
//! audio/video conferencing.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              RELAY SERVER                            │
//! │                                                                      │
//! │  TCP accept loop (server)                                            │
//! │      │  one task per peer                                            │
//! │      ▼                                                               │
//! │  Connection handler ── Framer (line mode / binary mode)              │
//! │                             │                                        │
//! │                             ├── chat ──────────► ConnectionRegistry  │
//! │                             ├── file up/down ──► FileStore/catalog   │
//! │                             └── screen frames ─► Presenter           │
//! │                                                                      │
//! │  ConnectionRegistry        Presenter (at most one)                   │
//! │   name → PeerHandle         Option<presenter name>                   │
//! │                                                                      │
//! │  UDP relay task (media::relay)      Mixer task (media::mixer)        │
//! │   HELLO → MediaRegistry              every 10ms: drain AudioSlots,   │
//! │   VID:  → relay to other endpoints   sum/avg/clip, broadcast mix     │
//! │   AUD:  → Opus decode → AudioSlots                                   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Control traffic is a newline-delimited text protocol with declared-length
//! binary payloads spliced in (file bytes, screen frames). Media traffic is
//! tag-prefixed UDP datagrams; audio is decoded server-side and mixed on a
//! fixed cadence, video is relayed verbatim.

pub mod config;
pub mod error;
pub mod media;
pub mod protocol;
pub mod server;
pub mod storage;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Sample rate for the audio plane (Hz)
    pub const SAMPLE_RATE: u32 = 48_000;

    /// Channel count (mono voice)
    pub const CHANNELS: u16 = 1;

    /// Samples per audio frame (20ms at 48kHz)
    pub const FRAME_SAMPLES: usize = 960;

    /// Wire size of one raw audio frame (i16 little-endian)
    pub const FRAME_BYTES: usize = FRAME_SAMPLES * CHANNELS as usize * 2;

    /// Mixing cadence in milliseconds
    pub const MIX_INTERVAL_MS: u64 = 10;

    /// Default TCP port for the control channel
    pub const DEFAULT_TCP_PORT: u16 = 6543;

    /// Default UDP port for the media channel
    pub const DEFAULT_UDP_PORT: u16 = 6544;

    /// Maximum UDP datagram size (large enough for a JPEG video frame)
    pub const MAX_DATAGRAM_SIZE: usize = 65_536;

    /// Largest accepted screen frame. Declared lengths above this are a
    /// protocol violation; the length comes from the peer and must never
    /// drive an allocation directly.
    pub const MAX_SCREEN_FRAME_BYTES: usize = 16 * 1024 * 1024;

    /// Read size for the control-connection framer
    pub const READ_CHUNK_SIZE: usize = 4096;

    /// Timeout for reading a declared binary payload (seconds)
    pub const PAYLOAD_READ_TIMEOUT_SECS: u64 = 30;
}
