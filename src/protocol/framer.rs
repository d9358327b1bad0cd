//! Two-mode control-stream parser
//!
//! The control stream is newline-delimited text, except that some commands
//! declare a binary payload of an announced length that immediately follows
//! the line. The framer is an explicit two-mode state machine: it stays in
//! line mode until the connection handler, having parsed such a command,
//! switches it into binary mode for exactly that many bytes, after which it
//! resumes line parsing at the very next byte.
//!
//! It is push-based (`feed` bytes in, pull [`Frame`]s out) so the parse is
//! independent of how the underlying socket reads are chunked, and so tests
//! can drive it byte by byte.

use bytes::{Buf, Bytes, BytesMut};

use crate::constants::READ_CHUNK_SIZE;

/// A parsed unit of the control stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// One newline-terminated text line, terminator (and trailing `\r`) stripped
    Line(String),
    /// A complete declared binary payload
    Payload(Bytes),
}

enum Mode {
    /// Accumulating newline-terminated text lines
    Lines,
    /// Collecting a declared payload to hand out as one `Frame::Payload`
    Collect { remaining: usize, collected: BytesMut },
    /// Handing a declared payload out in chunks (disk streaming / discard)
    Stream { remaining: usize },
}

/// Incremental parser over a control connection's byte stream
pub struct Framer {
    buf: BytesMut,
    mode: Mode,
}

impl Framer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
            mode: Mode::Lines,
        }
    }

    /// Append bytes read from the connection.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pull the next complete frame, if one is buffered.
    ///
    /// In line mode, undecodable bytes are discarded up to the next line
    /// boundary rather than failing the connection. Returns `None` while in
    /// streaming mode; use [`payload_chunk`](Self::payload_chunk) there.
    pub fn next(&mut self) -> Option<Frame> {
        loop {
            match &mut self.mode {
                Mode::Lines => {
                    let newline = self.buf.iter().position(|&b| b == b'\n')?;
                    let mut line = self.buf.split_to(newline + 1);
                    line.truncate(newline);
                    if line.last() == Some(&b'\r') {
                        line.truncate(line.len() - 1);
                    }
                    match String::from_utf8(line.to_vec()) {
                        Ok(text) => return Some(Frame::Line(text)),
                        Err(_) => continue,
                    }
                }
                Mode::Collect {
                    remaining,
                    collected,
                } => {
                    let take = (*remaining).min(self.buf.len());
                    collected.extend_from_slice(&self.buf[..take]);
                    self.buf.advance(take);
                    *remaining -= take;
                    if *remaining > 0 {
                        return None;
                    }
                    let payload = std::mem::take(collected).freeze();
                    self.mode = Mode::Lines;
                    return Some(Frame::Payload(payload));
                }
                Mode::Stream { .. } => return None,
            }
        }
    }

    /// Switch to binary mode, collecting the next `len` bytes into a single
    /// [`Frame::Payload`].
    ///
    /// `len` is peer-declared, so the buffer grows with the bytes that
    /// actually arrive rather than pre-reserving the full declared size.
    pub fn expect_payload(&mut self, len: usize) {
        self.mode = Mode::Collect {
            remaining: len,
            collected: BytesMut::with_capacity(len.min(READ_CHUNK_SIZE)),
        };
    }

    /// Switch to binary mode, handing the next `len` bytes out in chunks via
    /// [`payload_chunk`](Self::payload_chunk). Line parsing resumes
    /// automatically once the declared length has been consumed.
    pub fn stream_payload(&mut self, len: usize) {
        if len == 0 {
            self.mode = Mode::Lines;
        } else {
            self.mode = Mode::Stream { remaining: len };
        }
    }

    /// Bytes of the current streamed payload still to be consumed.
    pub fn payload_remaining(&self) -> usize {
        match self.mode {
            Mode::Stream { remaining } => remaining,
            Mode::Collect { remaining, .. } => remaining,
            Mode::Lines => 0,
        }
    }

    /// Take the next buffered chunk of a streamed payload.
    ///
    /// Returns `None` when no payload bytes are currently buffered (feed more
    /// data) or when not in streaming mode.
    pub fn payload_chunk(&mut self) -> Option<Bytes> {
        let Mode::Stream { remaining } = &mut self.mode else {
            return None;
        };
        if self.buf.is_empty() {
            return None;
        }
        let take = (*remaining).min(self.buf.len());
        let chunk = self.buf.split_to(take).freeze();
        *remaining -= take;
        if *remaining == 0 {
            self.mode = Mode::Lines;
        }
        Some(chunk)
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}
