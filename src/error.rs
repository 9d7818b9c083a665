//! Error types for voicewire.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoicewireError {
    // Configuration errors
    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio capture errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("Audio file error: {message}")]
    AudioFile { message: String },

    // Transport errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Handshake failed: {message}")]
    Handshake { message: String },

    // Protocol errors (malformed or unexpected frames)
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // Timeouts are distinct from transport failures so callers can tell
    // "never connected" apart from "server unresponsive after connecting"
    #[error("Timed out waiting for {what}")]
    Timeout { what: String },

    // Instance registry errors
    #[error("Registry error: {message}")]
    Registry { message: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl VoicewireError {
    /// Returns true if this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, VoicewireError::Timeout { .. })
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, VoicewireError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_invalid_value_display() {
        let error = VoicewireError::ConfigInvalidValue {
            key: "window.overlap".to_string(),
            message: "must be below 1.0".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for window.overlap: must be below 1.0"
        );
    }

    #[test]
    fn test_audio_device_not_found_display() {
        let error = VoicewireError::AudioDeviceNotFound {
            device: "default".to_string(),
        };
        assert_eq!(error.to_string(), "Audio device not found: default");
    }

    #[test]
    fn test_audio_capture_display() {
        let error = VoicewireError::AudioCapture {
            message: "buffer overflow".to_string(),
        };
        assert_eq!(error.to_string(), "Audio capture failed: buffer overflow");
    }

    #[test]
    fn test_transport_display() {
        let error = VoicewireError::Transport {
            message: "connection refused".to_string(),
        };
        assert_eq!(error.to_string(), "Transport error: connection refused");
    }

    #[test]
    fn test_handshake_display() {
        let error = VoicewireError::Handshake {
            message: "send failed".to_string(),
        };
        assert_eq!(error.to_string(), "Handshake failed: send failed");
    }

    #[test]
    fn test_protocol_display() {
        let error = VoicewireError::Protocol {
            message: "unexpected frame".to_string(),
        };
        assert_eq!(error.to_string(), "Protocol error: unexpected frame");
    }

    #[test]
    fn test_timeout_display_and_predicate() {
        let error = VoicewireError::Timeout {
            what: "server ready signal".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Timed out waiting for server ready signal"
        );
        assert!(error.is_timeout());

        let other = VoicewireError::Other("x".to_string());
        assert!(!other.is_timeout());
    }

    #[test]
    fn test_registry_display() {
        let error = VoicewireError::Registry {
            message: "duplicate client id".to_string(),
        };
        assert_eq!(error.to_string(), "Registry error: duplicate client id");
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "socket not found");
        let error: VoicewireError = io_error.into();
        assert!(error.to_string().contains("socket not found"));
    }

    #[test]
    fn test_from_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let error: VoicewireError = json_error.into();
        assert!(error.to_string().contains("JSON error"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: VoicewireError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<VoicewireError>();
        assert_sync::<VoicewireError>();
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(returns_result().unwrap(), 42);
    }
}
