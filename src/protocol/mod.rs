//! Control and media wire protocol
//!
//! The control channel is line-oriented UTF-8: `CMD:<TYPE>:...` lines are
//! commands, anything else is chat. Two commands (`FILE_UPLOAD_START` after
//! its acknowledgment, `SCREEN_DATA`) declare a binary payload of an
//! announced length that follows the line before the stream goes back to
//! being line-delimited; [`framer`] handles that mode switch.
//!
//! The media channel is tag-prefixed UDP datagrams: `HELLO:<name>` for
//! registration, `AUD:` / `VID:` for frames, with the sender's name spliced
//! into the tag on the relay direction.

pub mod framer;

pub use framer::{Frame, Framer};

use crate::error::ProtocolError;

/// Prefix marking a control line as a command
pub const CMD_PREFIX: &str = "CMD:";

const HELLO_TAG: &[u8] = b"HELLO:";
const AUDIO_TAG: &[u8] = b"AUD:";
const VIDEO_TAG: &[u8] = b"VID:";

/// A command parsed from a `CMD:` control line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    FileUploadStart { name: String, size: u64 },
    FileDownloadRequest { name: String },
    PresenterRequest,
    PresenterStop,
    ScreenData { len: usize },
    ReportUser { name: String },
}

/// A classified control line: either a command or plain chat text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlLine {
    Command(Command),
    Chat(String),
}

/// Classify one control line.
///
/// Lines without the `CMD:` prefix, and `CMD:` lines with an unrecognized
/// type, are chat (the latter matches the original wire behavior, where any
/// unhandled line fell through to the chat branch). Recognized commands with
/// unparseable fields are protocol violations.
pub fn parse_line(line: &str) -> Result<ControlLine, ProtocolError> {
    let Some(rest) = line.strip_prefix(CMD_PREFIX) else {
        return Ok(ControlLine::Chat(line.to_string()));
    };

    let (kind, args) = match rest.split_once(':') {
        Some((kind, args)) => (kind, args),
        None => (rest, ""),
    };

    let cmd = match kind {
        "FILE_UPLOAD_START" => {
            // The name may itself contain ':'; the size is the final field.
            let (name, size) = args
                .rsplit_once(':')
                .ok_or_else(|| ProtocolError::MalformedCommand(line.to_string()))?;
            let size = size
                .parse::<u64>()
                .map_err(|_| ProtocolError::MalformedCommand(line.to_string()))?;
            Command::FileUploadStart {
                name: name.to_string(),
                size,
            }
        }
        "FILE_DOWNLOAD_REQUEST" => Command::FileDownloadRequest {
            name: args.to_string(),
        },
        "PRESENTER_REQUEST" => Command::PresenterRequest,
        "PRESENTER_STOP" => Command::PresenterStop,
        "SCREEN_DATA" => {
            let len = args
                .parse::<usize>()
                .map_err(|_| ProtocolError::InvalidLength(line.to_string()))?;
            Command::ScreenData { len }
        }
        "REPORT_USER" => Command::ReportUser {
            name: args.to_string(),
        },
        _ => return Ok(ControlLine::Chat(line.to_string())),
    };

    Ok(ControlLine::Command(cmd))
}

/// A classified media datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram<'a> {
    /// `HELLO:<name>` registration handshake
    Hello(&'a str),
    /// `AUD:` + encoded audio payload
    Audio(&'a [u8]),
    /// `VID:` + video frame bytes
    Video(&'a [u8]),
    /// Anything else is ignored by the relay
    Unknown,
}

/// Classify one UDP datagram by its tag.
pub fn classify_datagram(data: &[u8]) -> Datagram<'_> {
    if let Some(rest) = data.strip_prefix(HELLO_TAG) {
        match std::str::from_utf8(rest) {
            Ok(name) => Datagram::Hello(name.trim()),
            Err(_) => Datagram::Unknown,
        }
    } else if let Some(rest) = data.strip_prefix(AUDIO_TAG) {
        Datagram::Audio(rest)
    } else if let Some(rest) = data.strip_prefix(VIDEO_TAG) {
        Datagram::Video(rest)
    } else {
        Datagram::Unknown
    }
}

/// Build a relay-direction video packet: `VID:<sender>:` + frame bytes.
pub fn video_relay_packet(sender: &str, frame: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(VIDEO_TAG.len() + sender.len() + 1 + frame.len());
    packet.extend_from_slice(VIDEO_TAG);
    packet.extend_from_slice(sender.as_bytes());
    packet.push(b':');
    packet.extend_from_slice(frame);
    packet
}

/// Build a broadcast-direction audio packet: `AUD:<sender>:` + raw samples.
pub fn audio_mix_packet(sender: &str, samples: &[i16]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(AUDIO_TAG.len() + sender.len() + 1 + samples.len() * 2);
    packet.extend_from_slice(AUDIO_TAG);
    packet.extend_from_slice(sender.as_bytes());
    packet.push(b':');
    for s in samples {
        packet.extend_from_slice(&s.to_le_bytes());
    }
    packet
}

/// Outbound control lines produced by the server.
///
/// Grouped here so the wire text exists in exactly one place.
pub mod notice {
    /// Sent first on a fresh connection to request a display name
    pub fn nick_prompt() -> String {
        "NICK\n".to_string()
    }

    pub fn nick_taken(name: &str) -> String {
        format!("ERROR:NICK_TAKEN:{name}\n")
    }

    pub fn nick_empty() -> String {
        "ERROR:NICK_EMPTY\n".to_string()
    }

    pub fn welcome() -> String {
        "[SERVER] Connected successfully.\n".to_string()
    }

    pub fn joined_chat(name: &str) -> String {
        format!("[SERVER] {name} joined the chat!\n")
    }

    pub fn left_chat(name: &str) -> String {
        format!("[SERVER] {name} has left the chat.\n")
    }

    pub fn chat(sender: &str, text: &str) -> String {
        format!("[{sender}] {text}\n")
    }

    pub fn audio_port(port: u16) -> String {
        format!("CMD:AUDIO_PORT:{port}\n")
    }

    pub fn file_new_available(owner: &str, name: &str, size: u64) -> String {
        format!("CMD:FILE_NEW_AVAILABLE:{owner}:{name}:{size}\n")
    }

    pub fn file_ready_to_recv(name: &str) -> String {
        format!("CMD:FILE_READY_TO_RECV:{name}\n")
    }

    pub fn file_send_start(name: &str, size: u64) -> String {
        format!("CMD:FILE_SEND_START:{name}:{size}\n")
    }

    pub fn file_not_found(name: &str) -> String {
        format!("[SERVER] Error: File '{name}' not found.\n")
    }

    pub fn file_upload_error(reason: &str) -> String {
        format!("[SERVER] Error uploading file: {reason}\n")
    }

    pub fn presenter_set(name: Option<&str>) -> String {
        format!("CMD:PRESENTER_SET:{}\n", name.unwrap_or("NONE"))
    }

    pub fn presenter_busy() -> String {
        "[SERVER] Cannot start presenting, another user is active.\n".to_string()
    }

    pub fn screen_data_header(len: usize) -> String {
        format!("CMD:SCREEN_DATA:{len}\n")
    }

    pub fn user_joined(name: &str) -> String {
        format!("CMD:USER_JOINED:{name}\n")
    }

    pub fn user_left(name: &str) -> String {
        format!("CMD:USER_LEFT:{name}\n")
    }

    pub fn report_logged(name: &str) -> String {
        format!("[SERVER] Report for {name} has been logged.\n")
    }

    pub fn shutting_down() -> String {
        "[SERVER] Server is shutting down.\n".to_string()
    }

    pub fn invalid_command(line: &str) -> String {
        format!("[SERVER] Error: invalid command: {line}\n")
    }
}
