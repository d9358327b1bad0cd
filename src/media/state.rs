//! Media-plane shared state
//!
//! Three keyed tables, each behind its own mutex: the media registry
//! (display name → UDP endpoint), the audio slots (endpoint → most recent
//! decoded frame, last-value-wins), and the decoder table (endpoint → one
//! stateful Opus decoder). Slot and decoder lifecycle is tied to
//! registration and teardown, never garbage-collected implicitly.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;

use super::decoder::{raw_samples, AudioDecoder};

/// Registry, slots and decoders for the UDP media plane
#[derive(Default)]
pub struct MediaState {
    /// Display name → registered UDP endpoint
    endpoints: Mutex<HashMap<String, SocketAddr>>,
    /// Endpoint → latest decoded audio frame, overwritten on every packet
    slots: Mutex<HashMap<SocketAddr, Vec<i16>>>,
    /// Endpoint → per-sender decoder, created lazily on first audio packet.
    /// `None` records that decoder creation failed so raw fallback is used
    /// without retrying every packet.
    decoders: Mutex<HashMap<SocketAddr, Option<AudioDecoder>>>,
}

impl MediaState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind (or rebind, after a peer restart) a name to a source address.
    /// Returns the names already registered, for the roster notices. State
    /// keyed by a previous address of the same name is dropped.
    pub fn register(&self, name: &str, addr: SocketAddr) -> Vec<String> {
        let mut endpoints = self.endpoints.lock();
        let previous = endpoints.insert(name.to_string(), addr);
        let existing = endpoints
            .keys()
            .filter(|n| n.as_str() != name)
            .cloned()
            .collect();
        drop(endpoints);

        if let Some(old) = previous.filter(|old| *old != addr) {
            self.slots.lock().remove(&old);
            self.decoders.lock().remove(&old);
        }
        existing
    }

    /// Reverse-lookup the display name registered for a source address.
    pub fn lookup_name(&self, addr: SocketAddr) -> Option<String> {
        self.endpoints
            .lock()
            .iter()
            .find(|(_, a)| **a == addr)
            .map(|(name, _)| name.clone())
    }

    /// Remove a peer's endpoint, slot and decoder. Returns whether the peer
    /// was media-registered.
    pub fn remove_peer(&self, name: &str) -> bool {
        let Some(addr) = self.endpoints.lock().remove(name) else {
            return false;
        };
        self.slots.lock().remove(&addr);
        self.decoders.lock().remove(&addr);
        true
    }

    /// Snapshot of (name, endpoint) pairs.
    pub fn endpoints_snapshot(&self) -> Vec<(String, SocketAddr)> {
        self.endpoints
            .lock()
            .iter()
            .map(|(n, a)| (n.clone(), *a))
            .collect()
    }

    /// All endpoints except `exclude` (relay targets).
    pub fn targets_except(&self, exclude: SocketAddr) -> Vec<SocketAddr> {
        self.endpoints
            .lock()
            .values()
            .copied()
            .filter(|a| *a != exclude)
            .collect()
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.lock().len()
    }

    /// Decode an audio packet with the sender's decoder, falling back to raw
    /// samples when no decoder is available or decoding fails.
    pub fn decode_audio(&self, addr: SocketAddr, payload: &[u8]) -> Vec<i16> {
        let mut decoders = self.decoders.lock();
        let slot = decoders.entry(addr).or_insert_with(|| {
            match AudioDecoder::new() {
                Ok(decoder) => Some(decoder),
                Err(e) => {
                    tracing::warn!(%addr, error = %e, "no decoder for sender, using raw audio");
                    None
                }
            }
        });
        match slot {
            Some(decoder) => decoder.decode_or_raw(payload),
            None => raw_samples(payload),
        }
    }

    /// Overwrite the sender's audio slot with its newest frame. Stale or
    /// backlogged audio is intentionally dropped, not queued.
    pub fn store_samples(&self, addr: SocketAddr, samples: Vec<i16>) {
        self.slots.lock().insert(addr, samples);
    }

    /// Atomically take every pending audio slot, clearing the table.
    pub fn drain_slots(&self) -> Vec<(SocketAddr, Vec<i16>)> {
        self.slots.lock().drain().collect()
    }

    #[cfg(test)]
    pub(crate) fn has_decoder(&self, addr: SocketAddr) -> bool {
        self.decoders.lock().contains_key(&addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn test_register_and_reverse_lookup() {
        let state = MediaState::new();
        assert!(state.register("alice", addr(1000)).is_empty());
        assert_eq!(state.register("bob", addr(1001)), vec!["alice".to_string()]);

        assert_eq!(state.lookup_name(addr(1000)).as_deref(), Some("alice"));
        assert_eq!(state.lookup_name(addr(9999)), None);
    }

    #[test]
    fn test_rebind_drops_old_address_state() {
        let state = MediaState::new();
        state.register("alice", addr(1000));
        state.store_samples(addr(1000), vec![1, 2, 3]);
        state.decode_audio(addr(1000), &[0xff]);
        assert!(state.has_decoder(addr(1000)));

        // Peer restarts from a new port.
        state.register("alice", addr(2000));
        assert_eq!(state.lookup_name(addr(1000)), None);
        assert!(!state.has_decoder(addr(1000)));
        assert!(state.drain_slots().is_empty());
    }

    #[test]
    fn test_remove_peer_cascades() {
        let state = MediaState::new();
        state.register("alice", addr(1000));
        state.store_samples(addr(1000), vec![7]);
        state.decode_audio(addr(1000), &[0xff]);

        assert!(state.remove_peer("alice"));
        assert!(!state.remove_peer("alice"));
        assert_eq!(state.endpoint_count(), 0);
        assert!(state.drain_slots().is_empty());
        assert!(!state.has_decoder(addr(1000)));
    }

    #[test]
    fn test_slot_is_last_value_wins() {
        let state = MediaState::new();
        state.store_samples(addr(1000), vec![1]);
        state.store_samples(addr(1000), vec![2]);

        let drained = state.drain_slots();
        assert_eq!(drained, vec![(addr(1000), vec![2])]);
        assert!(state.drain_slots().is_empty());
    }
}
