//! Wire protocol: connection states and frame codecs.

pub mod state;
pub mod wire;

pub use state::{ConnectionState, StateCell};
pub use wire::{ClientHandshake, END_OF_AUDIO, Segment, ServerMessage, encode_audio_frame};
