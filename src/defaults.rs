//! Default configuration constants for voicewire.
//!
//! This module provides shared constants used across different configuration types
//! to ensure consistency and eliminate duplication.

use std::time::Duration;

/// Default audio sample rate in Hz expected by the transcription service.
///
/// 16kHz is the standard for speech recognition and provides a good balance
/// between quality and computational efficiency for voice applications.
pub const TARGET_SAMPLE_RATE: u32 = 16000;

/// Default analysis window size in samples.
///
/// 4096 samples at 16kHz is 256ms per window — large enough to amortize
/// per-frame transport overhead, small enough to keep partial results timely.
pub const WINDOW_SIZE: usize = 4096;

/// Default window overlap as a fraction of the window size.
///
/// Consecutive windows share this leading/trailing region; the shared region
/// is crossfaded so energy transitions stay smooth across window boundaries.
/// Must stay below 1.0 so the stream always advances.
pub const WINDOW_OVERLAP: f32 = 0.2;

/// Default WebSocket URL of the transcription service.
pub const SERVER_URL: &str = "ws://localhost:9090";

/// Default transcription language code.
pub const LANGUAGE: &str = "en";

/// Default transcription task requested from the service.
pub const TASK: &str = "transcribe";

/// Default inference backend requested from the service.
pub const BACKEND: &str = "faster_whisper";

/// How long to wait for the socket to report connected.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait after the handshake for the server's ready signal.
///
/// Longer than the connect timeout because the service may load a model
/// on first connection.
pub const READY_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to wait for the end-of-audio acknowledgment during finalization.
pub const FINAL_WAIT: Duration = Duration::from_secs(10);

/// Extra grace period after finalization for trailing result frames.
pub const MESSAGE_WAIT: Duration = Duration::from_millis(500);

/// Interval between checks in bounded polling loops.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Default number of connection attempts per `connect()` call.
pub const MAX_RETRIES: u32 = 3;

/// Initial delay between failed connection attempts.
///
/// Doubled after every failure, capped at [`MAX_RETRY_DELAY`].
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for the exponential retry backoff.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Minimum enforced delay between successive `connect()` calls.
///
/// Prevents a flapping host from hammering the service with reconnects.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Bounded capacity of the capture queue, in chunks.
///
/// At the typical ~60Hz capture poll rate this buffers about one second of
/// audio; when the consumer falls further behind, new chunks are dropped.
pub const QUEUE_CAPACITY: usize = 64;

/// Interval at which the producer thread polls the audio source.
pub const CAPTURE_POLL_INTERVAL: Duration = Duration::from_millis(16);

/// How long to wait for a worker thread to finish before detaching it.
///
/// Exceeding this is logged, never fatal — a detached thread dies with the
/// process.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_stays_below_one() {
        assert!(WINDOW_OVERLAP >= 0.0);
        assert!(WINDOW_OVERLAP < 1.0);
    }

    #[test]
    fn test_window_step_is_positive() {
        let overlap_size = (WINDOW_SIZE as f32 * WINDOW_OVERLAP).floor() as usize;
        assert!(WINDOW_SIZE - overlap_size > 0);
    }

    #[test]
    fn test_retry_delay_below_cap() {
        assert!(RETRY_DELAY <= MAX_RETRY_DELAY);
    }
}
