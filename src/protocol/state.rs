//! Connection lifecycle states.

use std::fmt;
use std::sync::Mutex;
use tracing::debug;

/// State of a client's connection to the transcription service.
///
/// Mutated only through [`StateCell::transition`]; every change is logged
/// with its old and new value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none in progress. Initial state; `cleanup()` always
    /// lands here.
    Disconnected,
    /// Socket connection attempt in flight.
    Connecting,
    /// Socket established, handshake sent, awaiting the server's ready signal.
    Connected,
    /// Server is ready to accept audio.
    Ready,
    /// Audio is streaming.
    Processing,
    /// End-of-audio sentinel sent, waiting for acknowledgment and trailing
    /// results.
    Finalizing,
    /// Orderly close in progress.
    Closing,
    /// Connection closed after a completed session.
    Closed,
    /// Socket-level failure (refused, reset, send error).
    ConnectError,
    /// Server reported an error while a session was active.
    ProcessingError,
    /// A bounded wait elapsed (connect, ready signal, or finalization).
    TimeoutError,
}

impl ConnectionState {
    /// True for states with a live, usable socket.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::Ready | ConnectionState::Processing
        )
    }

    /// True for states in which audio frames may be sent.
    pub fn can_stream(&self) -> bool {
        matches!(self, ConnectionState::Ready | ConnectionState::Processing)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Ready => "ready",
            ConnectionState::Processing => "processing",
            ConnectionState::Finalizing => "finalizing",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::ConnectError => "connect_error",
            ConnectionState::ProcessingError => "processing_error",
            ConnectionState::TimeoutError => "timeout_error",
        };
        write!(f, "{}", name)
    }
}

/// Single source of truth for a client's connection state.
///
/// The mutex serializes writers; transitions happen nowhere else. A poisoned
/// lock is recovered rather than propagated — state reads and writes must
/// keep working during teardown after a panicked thread.
pub struct StateCell {
    inner: Mutex<ConnectionState>,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ConnectionState::Disconnected),
        }
    }

    /// Current state snapshot.
    pub fn get(&self) -> ConnectionState {
        *self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move to `next`, logging the old → new change.
    pub fn transition(&self, next: ConnectionState) {
        let mut state = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *state != next {
            debug!(from = %*state, to = %next, "connection state changed");
            *state = next;
        }
    }

    /// Move to `next` only if the current state is `expected`.
    ///
    /// Returns true when the transition happened. Used by the message
    /// dispatcher, which may race with the connect/finalize flows.
    pub fn transition_if(&self, expected: ConnectionState, next: ConnectionState) -> bool {
        let mut state = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *state == expected {
            debug!(from = %*state, to = %next, "connection state changed");
            *state = next;
            true
        } else {
            false
        }
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
