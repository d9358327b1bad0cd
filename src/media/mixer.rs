//! Mixing engine
//!
//! On a fixed cadence, drains every sender's audio slot, averages the frames
//! into one signal and broadcasts the mix to every registered media
//! endpoint. Frames that do not match the expected fixed sample count (e.g.
//! a raw fallback with different framing) are excluded to avoid sample
//! misalignment.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::constants::{CHANNELS, FRAME_SAMPLES};
use crate::protocol::audio_mix_packet;
use crate::server::SharedState;

/// Average a set of equal-length frames into one, clipped to the i16 range.
/// A single contributor's frame passes through unchanged.
pub fn mix_frames(frames: &[&[i16]]) -> Vec<i16> {
    let Some(first) = frames.first() else {
        return Vec::new();
    };
    let mut sum = vec![0f32; first.len()];
    for frame in frames {
        for (acc, sample) in sum.iter_mut().zip(frame.iter()) {
            *acc += *sample as f32;
        }
    }
    let count = frames.len() as f32;
    sum.into_iter()
        .map(|v| (v / count).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Pick the frames eligible for this cycle's mix and attribute each to its
/// sender's display name. Frames of the wrong length are dropped.
fn contributors<'a>(
    drained: &'a [(SocketAddr, Vec<i16>)],
    names: &HashMap<SocketAddr, String>,
) -> Vec<(String, &'a [i16])> {
    let expected = FRAME_SAMPLES * CHANNELS as usize;
    drained
        .iter()
        .filter(|(_, samples)| samples.len() == expected)
        .map(|(addr, samples)| {
            let name = names
                .get(addr)
                .cloned()
                .unwrap_or_else(|| "Unknown".to_string());
            (name, samples.as_slice())
        })
        .collect()
}

/// Long-lived mixing task: one mix-and-broadcast cycle per tick.
pub async fn mixer_loop(state: Arc<SharedState>) {
    // interval() panics on a zero period; config load rejects 0, this covers
    // configs built in code.
    let period = Duration::from_millis(state.config.mix_interval_ms.max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        mix_cycle(&state).await;
    }
}

async fn mix_cycle(state: &Arc<SharedState>) {
    let drained = state.media.drain_slots();
    if drained.is_empty() {
        return;
    }

    let endpoints = state.media.endpoints_snapshot();
    let names: HashMap<SocketAddr, String> = endpoints
        .iter()
        .map(|(name, addr)| (*addr, name.clone()))
        .collect();

    let eligible = contributors(&drained, &names);
    if eligible.is_empty() {
        return;
    }

    let frames: Vec<&[i16]> = eligible.iter().map(|(_, samples)| *samples).collect();
    let mixed = mix_frames(&frames);

    // Best-effort attribution: a multi-speaker mix is labeled with just the
    // first contributor's name.
    let packet = audio_mix_packet(&eligible[0].0, &mixed);
    for (name, addr) in &endpoints {
        if let Err(e) = state.udp.send_to(&packet, addr).await {
            tracing::warn!(peer = %name, %addr, error = %e, "mix broadcast failed");
        }
    }
}
