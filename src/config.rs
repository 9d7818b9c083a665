//! Client configuration.
//!
//! The core consumes plain values; discovering and reading configuration
//! files is the host's job. [`ClientConfig::from_toml_str`] is provided for
//! hosts that keep their settings in TOML.

use crate::defaults;
use crate::error::{Result, VoicewireError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for a streaming client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ClientConfig {
    pub server: ServerConfig,
    pub window: WindowConfig,
    pub timing: TimingConfig,
    pub pipeline: PipelineConfig,
}

/// Transcription service connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// WebSocket URL of the transcription service.
    pub url: String,
    /// Language code sent in the handshake.
    pub language: String,
    /// Task requested from the service ("transcribe" or "translate").
    pub task: String,
    /// Whether the service should run voice activity detection.
    pub use_vad: bool,
    /// Inference backend requested from the service.
    pub backend: String,
}

/// Analysis window settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    /// Window length in samples.
    pub window_size: usize,
    /// Fraction of the window shared with its predecessor, in `[0, 1)`.
    pub overlap: f32,
    /// Sample rate the service expects, in Hz.
    pub target_sample_rate: u32,
}

/// Timeouts, polling, and retry behavior. All durations are milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    pub connect_timeout_ms: u64,
    pub ready_timeout_ms: u64,
    pub final_wait_ms: u64,
    pub message_wait_ms: u64,
    pub poll_interval_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub reconnect_delay_ms: u64,
    pub join_timeout_ms: u64,
}

/// Capture pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bounded capacity of the capture queue, in chunks.
    pub queue_capacity: usize,
    /// Producer poll interval in milliseconds.
    pub capture_poll_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: defaults::SERVER_URL.to_string(),
            language: defaults::LANGUAGE.to_string(),
            task: defaults::TASK.to_string(),
            use_vad: true,
            backend: defaults::BACKEND.to_string(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_size: defaults::WINDOW_SIZE,
            overlap: defaults::WINDOW_OVERLAP,
            target_sample_rate: defaults::TARGET_SAMPLE_RATE,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: defaults::CONNECT_TIMEOUT.as_millis() as u64,
            ready_timeout_ms: defaults::READY_TIMEOUT.as_millis() as u64,
            final_wait_ms: defaults::FINAL_WAIT.as_millis() as u64,
            message_wait_ms: defaults::MESSAGE_WAIT.as_millis() as u64,
            poll_interval_ms: defaults::POLL_INTERVAL.as_millis() as u64,
            max_retries: defaults::MAX_RETRIES,
            retry_delay_ms: defaults::RETRY_DELAY.as_millis() as u64,
            max_retry_delay_ms: defaults::MAX_RETRY_DELAY.as_millis() as u64,
            reconnect_delay_ms: defaults::RECONNECT_DELAY.as_millis() as u64,
            join_timeout_ms: defaults::JOIN_TIMEOUT.as_millis() as u64,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: defaults::QUEUE_CAPACITY,
            capture_poll_ms: defaults::CAPTURE_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

impl TimingConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn final_wait(&self) -> Duration {
        Duration::from_millis(self.final_wait_ms)
    }

    pub fn message_wait(&self) -> Duration {
        Duration::from_millis(self.message_wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

impl PipelineConfig {
    pub fn capture_poll(&self) -> Duration {
        Duration::from_millis(self.capture_poll_ms)
    }
}

impl ClientConfig {
    /// Parse a configuration from a TOML document.
    ///
    /// Missing fields use default values. The result is validated.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: ClientConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration can drive a client.
    ///
    /// # Errors
    /// Returns `VoicewireError::ConfigInvalidValue` for any value that would
    /// stall the pipeline or the connection loop.
    pub fn validate(&self) -> Result<()> {
        if self.server.url.trim().is_empty() {
            return Err(invalid("server.url", "must not be empty"));
        }
        if self.window.window_size == 0 {
            return Err(invalid("window.window_size", "must be greater than zero"));
        }
        if !(0.0..1.0).contains(&self.window.overlap) {
            return Err(invalid("window.overlap", "must be in [0, 1)"));
        }
        if self.window.target_sample_rate == 0 {
            return Err(invalid("window.target_sample_rate", "must be greater than zero"));
        }
        if self.timing.poll_interval_ms == 0 {
            return Err(invalid("timing.poll_interval_ms", "must be greater than zero"));
        }
        if self.timing.max_retries == 0 {
            return Err(invalid("timing.max_retries", "must be at least 1"));
        }
        if self.timing.retry_delay_ms == 0 {
            return Err(invalid("timing.retry_delay_ms", "must be greater than zero"));
        }
        if self.pipeline.queue_capacity == 0 {
            return Err(invalid("pipeline.queue_capacity", "must be greater than zero"));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> VoicewireError {
    VoicewireError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
