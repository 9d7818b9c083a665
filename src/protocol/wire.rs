//! Wire codec for the transcription service protocol.
//!
//! Outbound: one JSON handshake per connection, then raw little-endian f32
//! mono PCM frames (one per analysis window), terminated by a fixed binary
//! sentinel. Inbound: JSON control and result frames.

use serde::{Deserialize, Serialize};

/// Binary end-of-stream marker.
///
/// The service distinguishes it from audio frames by its own framing; the
/// client sends it as-is, not length-prefixed.
pub const END_OF_AUDIO: &[u8] = b"END_OF_AUDIO";

/// Handshake sent once per connection, immediately after the socket opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientHandshake {
    /// Stable client identifier, unchanged across reconnects.
    pub uid: String,
    /// Fresh identifier for this connection attempt.
    pub session_id: String,
    pub language: String,
    pub task: String,
    pub use_vad: bool,
    pub backend: String,
}

impl ClientHandshake {
    /// Serialize the handshake to its wire form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// One transcribed segment of the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

/// Decoded inbound frame.
///
/// For `Transcript`, the last segment in the array carries the latest
/// partial/final text; earlier entries repeat previously delivered results.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Service is ready to accept audio.
    ServerReady,
    /// Service acknowledged the end-of-audio sentinel.
    EndOfAudioAck,
    /// Incremental transcription results.
    Transcript(Vec<Segment>),
    /// Service-side error report.
    Error(String),
    /// Anything the codec does not understand, including malformed JSON.
    /// Logged by the caller and otherwise a no-op — an unrecognized frame
    /// never tears down the connection.
    Unrecognized,
}

/// Raw shapes the service sends; tried in order by serde.
///
/// `Status` must come first: an error frame carries both `status` and
/// `message`, and would otherwise match the control shape.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawServerMessage {
    Status {
        status: String,
        message: Option<String>,
    },
    Control {
        message: String,
    },
    Segments {
        segments: Vec<Segment>,
    },
}

impl ServerMessage {
    /// Decode an inbound JSON frame. Never fails: unknown shapes, unknown
    /// control values, and malformed JSON all map to `Unrecognized`.
    pub fn from_json(raw: &str) -> Self {
        match serde_json::from_str::<RawServerMessage>(raw) {
            Ok(RawServerMessage::Status { status, message }) => {
                if status == "ERROR" {
                    ServerMessage::Error(message.unwrap_or_default())
                } else {
                    ServerMessage::Unrecognized
                }
            }
            Ok(RawServerMessage::Control { message }) => match message.as_str() {
                "SERVER_READY" => ServerMessage::ServerReady,
                "END_OF_AUDIO_RECEIVED" => ServerMessage::EndOfAudioAck,
                _ => ServerMessage::Unrecognized,
            },
            Ok(RawServerMessage::Segments { segments }) => ServerMessage::Transcript(segments),
            Err(_) => ServerMessage::Unrecognized,
        }
    }
}

/// Encode a window of mono samples as a binary audio frame.
pub fn encode_audio_frame(samples: &[f32]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(samples.len() * 4);
    for sample in samples {
        frame.extend_from_slice(&sample.to_le_bytes());
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_serializes_all_fields() {
        let handshake = ClientHandshake {
            uid: "client-1".to_string(),
            session_id: "session-1".to_string(),
            language: "en".to_string(),
            task: "transcribe".to_string(),
            use_vad: true,
            backend: "faster_whisper".to_string(),
        };
        let json = handshake.to_json().unwrap();
        assert!(json.contains(r#""uid":"client-1""#));
        assert!(json.contains(r#""session_id":"session-1""#));
        assert!(json.contains(r#""language":"en""#));
        assert!(json.contains(r#""task":"transcribe""#));
        assert!(json.contains(r#""use_vad":true"#));
        assert!(json.contains(r#""backend":"faster_whisper""#));
    }

    #[test]
    fn test_decode_server_ready() {
        let msg = ServerMessage::from_json(r#"{"message":"SERVER_READY"}"#);
        assert_eq!(msg, ServerMessage::ServerReady);
    }

    #[test]
    fn test_decode_end_of_audio_ack() {
        let msg = ServerMessage::from_json(r#"{"message":"END_OF_AUDIO_RECEIVED"}"#);
        assert_eq!(msg, ServerMessage::EndOfAudioAck);
    }

    #[test]
    fn test_decode_error_frame() {
        let msg = ServerMessage::from_json(r#"{"status":"ERROR","message":"model overloaded"}"#);
        assert_eq!(msg, ServerMessage::Error("model overloaded".to_string()));
    }

    #[test]
    fn test_decode_error_frame_without_message() {
        let msg = ServerMessage::from_json(r#"{"status":"ERROR"}"#);
        assert_eq!(msg, ServerMessage::Error(String::new()));
    }

    #[test]
    fn test_decode_segments() {
        let msg = ServerMessage::from_json(
            r#"{"segments":[
                {"text":"hello","start":0.0,"end":0.8},
                {"text":"hello world","start":0.0,"end":1.5}
            ]}"#,
        );
        match msg {
            ServerMessage::Transcript(segments) => {
                assert_eq!(segments.len(), 2);
                assert_eq!(segments[1].text, "hello world");
                assert_eq!(segments[1].start, 0.0);
                assert_eq!(segments[1].end, 1.5);
            }
            other => panic!("Expected Transcript, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_empty_segments() {
        let msg = ServerMessage::from_json(r#"{"segments":[]}"#);
        assert_eq!(msg, ServerMessage::Transcript(vec![]));
    }

    #[test]
    fn test_decode_unknown_control_value() {
        let msg = ServerMessage::from_json(r#"{"message":"DISCONNECT"}"#);
        assert_eq!(msg, ServerMessage::Unrecognized);
    }

    #[test]
    fn test_decode_unknown_status_value() {
        let msg = ServerMessage::from_json(r#"{"status":"WAIT","message":"queue full"}"#);
        assert_eq!(msg, ServerMessage::Unrecognized);
    }

    #[test]
    fn test_decode_unknown_shape() {
        let msg = ServerMessage::from_json(r#"{"foo":"bar"}"#);
        assert_eq!(msg, ServerMessage::Unrecognized);
    }

    #[test]
    fn test_decode_malformed_json() {
        let msg = ServerMessage::from_json("not json at all");
        assert_eq!(msg, ServerMessage::Unrecognized);
    }

    #[test]
    fn test_decode_missing_segment_fields() {
        let msg = ServerMessage::from_json(r#"{"segments":[{"text":"hi"}]}"#);
        assert_eq!(msg, ServerMessage::Unrecognized);
    }

    #[test]
    fn test_encode_audio_frame_little_endian() {
        let frame = encode_audio_frame(&[1.0, -0.5]);
        assert_eq!(frame.len(), 8);
        assert_eq!(&frame[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&frame[4..8], &(-0.5f32).to_le_bytes());
    }

    #[test]
    fn test_encode_audio_frame_empty() {
        assert!(encode_audio_frame(&[]).is_empty());
    }

    #[test]
    fn test_sentinel_is_distinguishable_text() {
        assert_eq!(END_OF_AUDIO, b"END_OF_AUDIO");
        // Sentinel length is not a multiple of 4, so it can never collide
        // with a well-formed f32 audio frame
        assert_ne!(END_OF_AUDIO.len() % 4, 0);
    }
}
