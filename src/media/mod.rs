//! UDP media plane: registry, relay, decoding and mixing

pub mod decoder;
pub mod mixer;
pub mod relay;
pub mod state;

pub use decoder::AudioDecoder;
pub use mixer::{mix_frames, mixer_loop};
pub use relay::{bind_udp, relay_loop};
pub use state::MediaState;
