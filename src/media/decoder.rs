//! Opus decoder wrapper
//!
//! One stateful decoder per remote sender (voice codecs carry inter-frame
//! state). When decoding fails the relay falls back to reinterpreting the
//! packet as raw little-endian samples instead of dropping the frame.

use opus::{Channels, Decoder};

use crate::constants::{CHANNELS, SAMPLE_RATE};
use crate::error::CodecError;

/// Per-sender Opus decoder
pub struct AudioDecoder {
    decoder: Decoder,
    /// Decoding buffer (reused to avoid allocations)
    decode_buffer: Vec<i16>,
    /// Frames decoded
    frames_decoded: u64,
    /// Frames that fell back to raw interpretation
    frames_fallback: u64,
}

impl AudioDecoder {
    /// Create a decoder for the relay's fixed audio format.
    pub fn new() -> Result<Self, CodecError> {
        let channels = match CHANNELS {
            1 => Channels::Mono,
            _ => Channels::Stereo,
        };
        let decoder = Decoder::new(SAMPLE_RATE, channels)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        // Max Opus frame is 120ms
        let decode_buffer = vec![0i16; SAMPLE_RATE as usize * CHANNELS as usize * 120 / 1000];

        Ok(Self {
            decoder,
            decode_buffer,
            frames_decoded: 0,
            frames_fallback: 0,
        })
    }

    /// Decode one Opus packet into interleaved i16 samples.
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>, CodecError> {
        let samples = self
            .decoder
            .decode(data, &mut self.decode_buffer, false)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))?;

        let total = samples * CHANNELS as usize;
        self.frames_decoded += 1;
        Ok(self.decode_buffer[..total].to_vec())
    }

    /// Decode with the raw-sample fallback: on any decode failure the packet
    /// bytes are treated as the samples themselves.
    pub fn decode_or_raw(&mut self, data: &[u8]) -> Vec<i16> {
        match self.decode(data) {
            Ok(samples) => samples,
            Err(e) => {
                self.frames_fallback += 1;
                tracing::trace!(error = %e, "opus decode failed, treating packet as raw samples");
                raw_samples(data)
            }
        }
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    pub fn frames_fallback(&self) -> u64 {
        self.frames_fallback
    }
}

/// Reinterpret packet bytes as little-endian i16 samples. A trailing odd
/// byte is dropped.
pub fn raw_samples(data: &[u8]) -> Vec<i16> {
    data.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_creation() {
        assert!(AudioDecoder::new().is_ok());
    }

    #[test]
    fn test_raw_samples_little_endian() {
        let samples = raw_samples(&[0x01, 0x00, 0xff, 0xff, 0x00, 0x80, 0x7f]);
        assert_eq!(samples, vec![1, -1, i16::MIN]);
    }

    #[test]
    fn test_decode_or_raw_falls_back_on_invalid_packet() {
        let mut decoder = AudioDecoder::new().unwrap();
        // A lone 0xff TOC byte declares a code-3 packet but omits the frame
        // count, which Opus rejects; the raw fallback then drops the odd
        // trailing byte, yielding an empty (mix-excluded) buffer.
        let samples = decoder.decode_or_raw(&[0xff]);
        assert!(samples.is_empty());
        assert_eq!(decoder.frames_fallback(), 1);
    }
}
