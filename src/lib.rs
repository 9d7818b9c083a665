//! voicewire - streaming client for live audio transcription.
//!
//! Captures live audio, reshapes it into overlapping crossfaded windows, and
//! streams them over a persistent WebSocket to a remote transcription
//! service, delivering incremental text results through a callback. The
//! crate is a library: hotkeys, text output, and configuration files belong
//! to the host.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod client;
pub mod config;
pub mod defaults;
pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod registry;
pub mod transport;

// Core traits (source → windows → wire)
pub use audio::source::{AudioSource, MockAudioSource};
pub use audio::wav::WavFileSource;
pub use audio::window::WindowAssembler;
#[cfg(feature = "cpal-audio")]
pub use audio::capture::CpalAudioSource;

// Pipeline
pub use pipeline::{AudioChunk, CapturePipeline};

// Protocol client
pub use client::{ClientBuilder, SegmentCallback, StreamingClient};
pub use protocol::state::ConnectionState;
pub use protocol::wire::{ClientHandshake, Segment, ServerMessage};
pub use registry::{CleanupReport, ClientRegistry};
pub use transport::{
    MockTransport, MockTransportLog, Transport, TransportEvent, TransportFactory, WireFrame,
    WsTransport,
};

// Error handling
pub use error::{Result, VoicewireError};

// Config
pub use config::ClientConfig;
