//! Streaming transcription client.
//!
//! Owns the connection lifecycle: handshake, steady-state audio streaming,
//! graceful finalization, and error recovery with capped exponential backoff.
//! The transport's I/O thread never runs client logic; it enqueues events
//! that a dedicated dispatcher thread decodes and applies, so socket
//! callbacks can never re-enter the state machine.

use crate::config::ClientConfig;
use crate::error::{Result, VoicewireError};
use crate::protocol::state::{ConnectionState, StateCell};
use crate::protocol::wire::{ClientHandshake, END_OF_AUDIO, Segment, ServerMessage, encode_audio_frame};
use crate::registry::ClientRegistry;
use crate::transport::{Transport, TransportEvent, TransportFactory, WireFrame, WsTransport};
use crossbeam_channel::Receiver;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Callback receiving each decoded transcription segment.
pub type SegmentCallback = Box<dyn Fn(&Segment) + Send + Sync>;

/// State shared between the client and its dispatcher thread.
struct SharedState {
    state: StateCell,
    server_ready: AtomicBool,
    end_of_audio_ack: AtomicBool,
    socket_failed: AtomicBool,
    /// While false, inbound frames are ignored. Cleared first during cleanup
    /// so no callback races the teardown.
    processing_enabled: AtomicBool,
    last_error: Mutex<Option<String>>,
    last_activity: Mutex<Instant>,
    on_segment: Mutex<Option<SegmentCallback>>,
}

impl SharedState {
    fn new() -> Self {
        Self {
            state: StateCell::new(),
            server_ready: AtomicBool::new(false),
            end_of_audio_ack: AtomicBool::new(false),
            socket_failed: AtomicBool::new(false),
            processing_enabled: AtomicBool::new(true),
            last_error: Mutex::new(None),
            last_activity: Mutex::new(Instant::now()),
            on_segment: Mutex::new(None),
        }
    }

    fn reset_for_attempt(&self) {
        self.server_ready.store(false, Ordering::SeqCst);
        self.end_of_audio_ack.store(false, Ordering::SeqCst);
        self.socket_failed.store(false, Ordering::SeqCst);
        self.processing_enabled.store(true, Ordering::SeqCst);
        *lock_ignore_poison(&self.last_error) = None;
        self.touch();
    }

    fn touch(&self) {
        *lock_ignore_poison(&self.last_activity) = Instant::now();
    }

    fn record_error(&self, message: String) {
        *lock_ignore_poison(&self.last_error) = Some(message);
    }

    fn last_error(&self) -> Option<String> {
        lock_ignore_poison(&self.last_error).clone()
    }
}

/// Consumes transport events and applies them to the shared state.
///
/// All message-driven state mutation happens here, serialized on one thread.
/// Exits on the transport's final `Closed` event.
fn run_dispatcher(events: Receiver<TransportEvent>, shared: Arc<SharedState>) {
    for event in events.iter() {
        match event {
            TransportEvent::Opened => {}
            TransportEvent::Text(raw) => {
                if !shared.processing_enabled.load(Ordering::SeqCst) {
                    continue;
                }
                shared.touch();
                match ServerMessage::from_json(&raw) {
                    ServerMessage::ServerReady => {
                        debug!("server ready");
                        shared.server_ready.store(true, Ordering::SeqCst);
                        shared
                            .state
                            .transition_if(ConnectionState::Connected, ConnectionState::Ready);
                    }
                    ServerMessage::EndOfAudioAck => {
                        debug!("end of audio acknowledged");
                        shared.end_of_audio_ack.store(true, Ordering::SeqCst);
                    }
                    ServerMessage::Transcript(segments) => {
                        let callback = lock_ignore_poison(&shared.on_segment);
                        if let Some(callback) = callback.as_ref() {
                            for segment in &segments {
                                callback(segment);
                            }
                        }
                    }
                    ServerMessage::Error(reason) => {
                        warn!(%reason, "server reported an error");
                        shared.record_error(reason);
                        shared.state.transition_if(
                            ConnectionState::Processing,
                            ConnectionState::ProcessingError,
                        );
                    }
                    ServerMessage::Unrecognized => {
                        // Dropped frame, not a torn-down connection
                        debug!(%raw, "ignoring unrecognized frame");
                    }
                }
            }
            TransportEvent::Error(message) => {
                warn!(%message, "socket error");
                shared.socket_failed.store(true, Ordering::SeqCst);
                shared.record_error(message);
                if shared.processing_enabled.load(Ordering::SeqCst) {
                    fail_live_state(&shared.state);
                }
            }
            TransportEvent::Closed => {
                let state = shared.state.get();
                if shared.processing_enabled.load(Ordering::SeqCst)
                    && (state == ConnectionState::Connecting || state.is_live())
                {
                    // The socket went away underneath an active session
                    shared.socket_failed.store(true, Ordering::SeqCst);
                    fail_live_state(&shared.state);
                }
                break;
            }
        }
    }
}

fn fail_live_state(state: &StateCell) {
    let current = state.get();
    if current == ConnectionState::Connecting || current.is_live() {
        state.transition(ConnectionState::ConnectError);
    }
}

/// Builder for [`StreamingClient`].
pub struct ClientBuilder {
    config: ClientConfig,
    factory: Option<TransportFactory>,
    registry: Option<Arc<ClientRegistry>>,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            factory: None,
            registry: None,
        }
    }

    /// Sets a custom transport factory (for tests and alternate transports).
    pub fn with_transport_factory(mut self, factory: TransportFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Registers the client in `registry` instead of the process-wide one.
    pub fn with_registry(mut self, registry: Arc<ClientRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Validates the configuration, creates the client, and registers it.
    pub fn build(self) -> Result<Arc<StreamingClient>> {
        self.config.validate()?;

        let registry = self
            .registry
            .unwrap_or_else(|| Arc::clone(ClientRegistry::global()));
        let factory = self.factory.unwrap_or_else(WsTransport::factory);
        let client_id = Uuid::new_v4().to_string();

        let client = Arc::new(StreamingClient {
            config: self.config,
            client_id: client_id.clone(),
            session_id: Mutex::new(Uuid::new_v4().to_string()),
            shared: Arc::new(SharedState::new()),
            transport: Mutex::new(None),
            dispatcher: Mutex::new(None),
            last_attempt: Mutex::new(None),
            factory,
            registry,
            disposed: AtomicBool::new(false),
        });

        client.registry.register(Arc::clone(&client));
        info!(client_id = %client_id, "client created");
        Ok(client)
    }
}

/// A client instance streaming audio to one transcription service.
///
/// The client identity (`client_id`) is stable for the instance's lifetime;
/// the session identity is regenerated on every connection attempt, so logs
/// and server-side session state can be correlated across reconnects.
pub struct StreamingClient {
    config: ClientConfig,
    client_id: String,
    session_id: Mutex<String>,
    shared: Arc<SharedState>,
    transport: Mutex<Option<Box<dyn Transport>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    last_attempt: Mutex<Option<Instant>>,
    factory: TransportFactory,
    registry: Arc<ClientRegistry>,
    disposed: AtomicBool,
}

impl StreamingClient {
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// Stable identifier for this instance.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Identifier of the current (or most recent) connection attempt.
    pub fn session_id(&self) -> String {
        lock_ignore_poison(&self.session_id).clone()
    }

    /// Current connection state snapshot.
    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    /// The most recent socket or server error, if any.
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error()
    }

    /// Time since the last inbound message, for host diagnostics.
    pub fn idle_for(&self) -> Duration {
        lock_ignore_poison(&self.shared.last_activity).elapsed()
    }

    /// True when audio frames can be sent right now.
    pub fn is_ready(&self) -> bool {
        self.shared.state.get().can_stream() && self.transport_connected()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Registers the callback invoked for every decoded transcription
    /// segment. The callback runs on the dispatcher thread; keep it cheap.
    pub fn on_segment<F>(&self, callback: F)
    where
        F: Fn(&Segment) + Send + Sync + 'static,
    {
        *lock_ignore_poison(&self.shared.on_segment) = Some(Box::new(callback));
    }

    /// Connects to the service and waits until it is ready for audio.
    ///
    /// Idempotent: returns immediately when already connected with a live
    /// socket. Otherwise enforces the reconnect throttle, generates a fresh
    /// session id, and tries up to `max_retries` times with exponential
    /// backoff (doubled per failure, capped). Exhausting the retries
    /// surfaces the last error and leaves the client in the error state —
    /// the caller decides whether to abandon or call `connect` again.
    pub fn connect(&self, max_retries: u32) -> Result<()> {
        if self.shared.state.get().is_live() && self.transport_connected() {
            debug!("connect: already connected");
            return Ok(());
        }

        self.throttle();

        {
            let mut session_id = lock_ignore_poison(&self.session_id);
            *session_id = Uuid::new_v4().to_string();
            info!(session_id = %*session_id, "starting connection");
        }

        let attempts = max_retries.max(1);
        let mut delay = self.config.timing.retry_delay();
        let max_delay = self.config.timing.max_retry_delay();
        let mut last_error = VoicewireError::Transport {
            message: "no connection attempts made".to_string(),
        };

        for attempt in 1..=attempts {
            match self.try_connect_once(attempt) {
                Ok(()) => {
                    info!(attempt, "connected, server ready");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "connection attempt failed");
                    last_error = e;
                    if attempt < attempts {
                        thread::sleep(delay);
                        delay = (delay * 2).min(max_delay);
                    }
                }
            }
        }

        Err(last_error)
    }

    /// Blocks until at least `reconnect_delay` has passed since the previous
    /// `connect()` call.
    fn throttle(&self) {
        let reconnect_delay = self.config.timing.reconnect_delay();
        let wait = {
            let last_attempt = lock_ignore_poison(&self.last_attempt);
            match *last_attempt {
                Some(previous) => reconnect_delay.saturating_sub(previous.elapsed()),
                None => Duration::ZERO,
            }
        };
        if !wait.is_zero() {
            debug!(?wait, "throttling reconnect");
            thread::sleep(wait);
        }
        *lock_ignore_poison(&self.last_attempt) = Some(Instant::now());
    }

    /// One connection attempt: tear down anything stale, open the transport,
    /// handshake, and wait for the server's ready signal.
    fn try_connect_once(&self, attempt: u32) -> Result<()> {
        if let Err(e) = self.teardown_transport() {
            debug!(error = %e, "stale transport teardown reported a failure");
        }
        self.shared.reset_for_attempt();
        self.shared.state.transition(ConnectionState::Connecting);
        debug!(attempt, url = %self.config.server.url, "opening transport");

        let mut transport = (self.factory)(&self.config.server.url);
        let events = match transport.open() {
            Ok(events) => events,
            Err(e) => {
                self.shared.state.transition(ConnectionState::ConnectError);
                return Err(e);
            }
        };
        *lock_ignore_poison(&self.transport) = Some(transport);

        let shared = Arc::clone(&self.shared);
        *lock_ignore_poison(&self.dispatcher) =
            Some(thread::spawn(move || run_dispatcher(events, shared)));

        // Wait for the socket itself
        if !self.poll_until(self.config.timing.connect_timeout(), || {
            self.transport_connected()
        }) {
            return Err(self.fail_attempt("socket connection"));
        }
        self.shared.state.transition(ConnectionState::Connected);

        // Handshake, then wait for the ready signal while still Connected
        let handshake = ClientHandshake {
            uid: self.client_id.clone(),
            session_id: self.session_id(),
            language: self.config.server.language.clone(),
            task: self.config.server.task.clone(),
            use_vad: self.config.server.use_vad,
            backend: self.config.server.backend.clone(),
        };
        let payload = handshake.to_json().map_err(|e| VoicewireError::Handshake {
            message: format!("Failed to encode handshake: {}", e),
        })?;
        if let Err(e) = self.send_frame(WireFrame::Text(payload)) {
            self.shared.state.transition(ConnectionState::ConnectError);
            return Err(VoicewireError::Handshake {
                message: e.to_string(),
            });
        }

        if !self.poll_until(self.config.timing.ready_timeout(), || {
            self.shared.server_ready.load(Ordering::SeqCst)
        }) {
            return Err(self.fail_attempt("server ready signal"));
        }

        // The dispatcher normally performs Connected → Ready; cover the race
        // where the flag was set before the state caught up.
        self.shared
            .state
            .transition_if(ConnectionState::Connected, ConnectionState::Ready);
        Ok(())
    }

    /// Classifies a failed wait and moves to the matching error state.
    fn fail_attempt(&self, what: &str) -> VoicewireError {
        if self.shared.socket_failed.load(Ordering::SeqCst) {
            let message = self
                .shared
                .last_error()
                .unwrap_or_else(|| "socket error".to_string());
            self.shared.state.transition(ConnectionState::ConnectError);
            VoicewireError::Transport { message }
        } else {
            self.shared.state.transition(ConnectionState::TimeoutError);
            VoicewireError::Timeout {
                what: what.to_string(),
            }
        }
    }

    /// Bounded polling wait; returns false on timeout or socket failure.
    fn poll_until<F: Fn() -> bool>(&self, timeout: Duration, condition: F) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if condition() {
                return true;
            }
            if self.shared.socket_failed.load(Ordering::SeqCst) {
                return false;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(self.config.timing.poll_interval());
        }
    }

    /// Marks the start of audio streaming.
    pub fn start_processing(&self) -> Result<()> {
        if self.shared.state.get() == ConnectionState::Processing {
            return Ok(());
        }
        if self
            .shared
            .state
            .transition_if(ConnectionState::Ready, ConnectionState::Processing)
        {
            Ok(())
        } else {
            Err(VoicewireError::Protocol {
                message: format!(
                    "cannot start processing from state {}",
                    self.shared.state.get()
                ),
            })
        }
    }

    /// Sends one window of samples as a binary audio frame.
    ///
    /// Checks readiness defensively — the dispatcher may have failed the
    /// connection underneath us — and silently drops the frame when the
    /// client cannot stream. The stream's availability matters more than any
    /// single frame.
    pub fn send_audio(&self, samples: &[f32]) -> Result<()> {
        if !self.is_ready() {
            debug!(state = %self.state(), "dropping audio frame, client not ready");
            return Ok(());
        }
        match self.send_frame(WireFrame::Binary(encode_audio_frame(samples))) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.note_socket_failure(&e);
                Err(e)
            }
        }
    }

    /// Alias for [`StreamingClient::send_end_of_audio`].
    pub fn stop_processing(&self) -> Result<()> {
        self.send_end_of_audio()
    }

    /// Finalizes the stream: sends the end-of-audio sentinel, waits (bounded)
    /// for the acknowledgment, grants a grace period for trailing results,
    /// then closes the connection.
    ///
    /// Valid only from `Ready` or `Processing`. Ends in `Closed` whether or
    /// not the acknowledgment ever arrives.
    pub fn send_end_of_audio(&self) -> Result<()> {
        let state = self.shared.state.get();
        if !state.can_stream() {
            return Err(VoicewireError::Protocol {
                message: format!("cannot finalize from state {}", state),
            });
        }

        self.shared.end_of_audio_ack.store(false, Ordering::SeqCst);
        if let Err(e) = self.send_frame(WireFrame::Binary(END_OF_AUDIO.to_vec())) {
            self.note_socket_failure(&e);
            return Err(e);
        }
        self.shared.state.transition(ConnectionState::Finalizing);
        info!("finalizing: waiting for end-of-audio acknowledgment");

        let acked = self.poll_until(self.config.timing.final_wait(), || {
            self.shared.end_of_audio_ack.load(Ordering::SeqCst)
        });
        if !acked {
            warn!(
                final_wait = ?self.config.timing.final_wait(),
                "no acknowledgment before deadline, closing anyway"
            );
        }

        // Grace period for trailing result frames; the dispatcher keeps
        // delivering segments during this window
        let message_wait = self.config.timing.message_wait();
        if !message_wait.is_zero() {
            thread::sleep(message_wait);
        }

        self.shared.state.transition(ConnectionState::Closing);
        let teardown = self.teardown_transport();
        self.shared.state.transition(ConnectionState::Closed);
        if let Err(e) = teardown {
            warn!(error = %e, "transport teardown reported a failure");
        }
        Ok(())
    }

    /// Releases the connection unconditionally.
    ///
    /// Idempotent and safe from any state, including mid-failure: message
    /// processing is disabled first, the socket is closed, threads are
    /// joined with a bounded timeout, and the state always ends
    /// `Disconnected`. The returned error is informational only (close
    /// failure, join overrun) — cleanup never aborts.
    pub fn cleanup(&self) -> Result<()> {
        debug!("cleanup requested");
        self.shared.processing_enabled.store(false, Ordering::SeqCst);
        let result = self.teardown_transport();
        self.shared.state.transition(ConnectionState::Disconnected);
        result
    }

    /// Explicit end of life: cleans up and removes this instance from its
    /// registry. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.cleanup() {
            debug!(error = %e, "cleanup reported a failure during dispose");
        }
        self.registry.unregister(&self.client_id);
        info!(client_id = %self.client_id, "client disposed");
    }

    fn transport_connected(&self) -> bool {
        lock_ignore_poison(&self.transport)
            .as_ref()
            .map(|transport| transport.is_connected())
            .unwrap_or(false)
    }

    fn send_frame(&self, frame: WireFrame) -> Result<()> {
        let mut guard = lock_ignore_poison(&self.transport);
        match guard.as_mut() {
            Some(transport) => transport.send(frame),
            None => Err(VoicewireError::Transport {
                message: "transport is not open".to_string(),
            }),
        }
    }

    fn note_socket_failure(&self, error: &VoicewireError) {
        self.shared.socket_failed.store(true, Ordering::SeqCst);
        self.shared.record_error(error.to_string());
        fail_live_state(&self.shared.state);
    }

    /// Closes the transport and joins the I/O and dispatcher threads, each
    /// with a bounded timeout. Failures are collected, not escalated.
    fn teardown_transport(&self) -> Result<()> {
        let mut result = Ok(());

        // Take the transport out of the lock before the blocking close
        let transport = lock_ignore_poison(&self.transport).take();
        if let Some(mut transport) = transport {
            if let Err(e) = transport.close() {
                warn!(error = %e, "transport close failed");
                result = Err(e);
            }
        }

        // The dispatcher exits on the transport's final Closed event
        let dispatcher = lock_ignore_poison(&self.dispatcher).take();
        if let Some(handle) = dispatcher {
            let deadline = Instant::now() + self.config.timing.join_timeout();
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    warn!("dispatcher thread panicked");
                }
            } else {
                warn!("dispatcher did not stop in time, detaching");
                if result.is_ok() {
                    result = Err(VoicewireError::Timeout {
                        what: "dispatcher thread join".to_string(),
                    });
                }
            }
        }

        result
    }
}

impl Drop for StreamingClient {
    fn drop(&mut self) {
        if !self.disposed.load(Ordering::SeqCst) {
            warn!(client_id = %self.client_id, "client dropped without dispose(), cleaning up");
            let _ = self.cleanup();
        }
    }
}

fn lock_ignore_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
