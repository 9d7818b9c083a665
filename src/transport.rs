//! Transport session: thin owner of the socket/thread pair.
//!
//! A transport never runs client logic. Its I/O thread forwards inbound
//! frames as [`TransportEvent`]s on a channel, serialized in arrival order;
//! the client's dispatcher consumes them. Outbound frames are queued to the
//! I/O thread, so no caller ever blocks on the socket itself.

use crate::error::{Result, VoicewireError};
use crate::protocol::wire::END_OF_AUDIO;
use crossbeam_channel::{Receiver, Sender, unbounded};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite};
use tracing::{debug, warn};

/// An outbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum WireFrame {
    /// JSON control frame (the handshake).
    Text(String),
    /// Audio frame or the end-of-audio sentinel.
    Binary(Vec<u8>),
}

/// An event from the transport's I/O thread.
///
/// Events for one transport are serialized by that thread: no two are ever
/// delivered concurrently. `Closed` is always the final event.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Socket established.
    Opened,
    /// Inbound text frame, undecoded.
    Text(String),
    /// Socket-level failure.
    Error(String),
    /// The socket is gone; no further events follow.
    Closed,
}

/// Abstraction over the socket/thread pair, so the state machine can be
/// exercised against a scripted transport in tests.
pub trait Transport: Send {
    /// Kick off the connection and return the event channel.
    ///
    /// Opening is asynchronous: the socket reports readiness through
    /// `is_connected()` / the `Opened` event, and failures through `Error`.
    fn open(&mut self) -> Result<Receiver<TransportEvent>>;

    /// True while the socket is established.
    fn is_connected(&self) -> bool;

    /// Queue a frame for sending. Fails fast once the socket is gone.
    fn send(&mut self, frame: WireFrame) -> Result<()>;

    /// Close the socket and join the I/O thread with a bounded timeout.
    ///
    /// Idempotent. The returned error is informational (join overrun,
    /// close failure); the transport is unusable afterwards either way.
    fn close(&mut self) -> Result<()>;
}

/// Creates a fresh transport per connection attempt.
pub type TransportFactory = Box<dyn Fn(&str) -> Box<dyn Transport> + Send + Sync>;

/// WebSocket transport backed by one I/O thread.
pub struct WsTransport {
    url: String,
    join_timeout: Duration,
    connected: Arc<AtomicBool>,
    outbound: Option<tokio::sync::mpsc::UnboundedSender<WireFrame>>,
    io_thread: Option<JoinHandle<()>>,
}

impl WsTransport {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            join_timeout: crate::defaults::JOIN_TIMEOUT,
            connected: Arc::new(AtomicBool::new(false)),
            outbound: None,
            io_thread: None,
        }
    }

    /// Sets how long `close()` waits for the I/O thread before detaching it.
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// A factory producing one `WsTransport` per connection attempt.
    pub fn factory() -> TransportFactory {
        Box::new(|url: &str| Box::new(WsTransport::new(url)) as Box<dyn Transport>)
    }
}

impl Transport for WsTransport {
    fn open(&mut self) -> Result<Receiver<TransportEvent>> {
        if self.io_thread.is_some() {
            return Err(VoicewireError::Transport {
                message: "transport is already open".to_string(),
            });
        }

        let (event_tx, event_rx) = unbounded();
        let (out_tx, out_rx) = tokio::sync::mpsc::unbounded_channel();
        let url = self.url.clone();
        let connected = Arc::clone(&self.connected);

        let handle = std::thread::Builder::new()
            .name("voicewire-io".to_string())
            .spawn(move || run_io_loop(url, connected, out_rx, event_tx))
            .map_err(|e| VoicewireError::Transport {
                message: format!("Failed to spawn I/O thread: {}", e),
            })?;

        self.outbound = Some(out_tx);
        self.io_thread = Some(handle);
        Ok(event_rx)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&mut self, frame: WireFrame) -> Result<()> {
        let Some(outbound) = &self.outbound else {
            return Err(VoicewireError::Transport {
                message: "transport is not open".to_string(),
            });
        };
        outbound.send(frame).map_err(|_| VoicewireError::Transport {
            message: "socket is closed".to_string(),
        })
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the outbound sender tells the I/O loop to close the socket
        self.outbound = None;

        let mut result = Ok(());
        if let Some(handle) = self.io_thread.take() {
            let deadline = Instant::now() + self.join_timeout;
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    warn!("I/O thread panicked during close");
                }
            } else {
                // Dropping the JoinHandle detaches the thread; it dies with
                // the process.
                warn!(timeout = ?self.join_timeout, "I/O thread did not stop in time, detaching");
                result = Err(VoicewireError::Timeout {
                    what: "I/O thread join".to_string(),
                });
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        result
    }
}

/// Body of the I/O thread: connect, then pump frames both ways until either
/// side closes. Emits `Closed` last, unconditionally.
fn run_io_loop(
    url: String,
    connected: Arc<AtomicBool>,
    mut outbound: tokio::sync::mpsc::UnboundedReceiver<WireFrame>,
    events: Sender<TransportEvent>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = events.send(TransportEvent::Error(format!(
                "Failed to build I/O runtime: {}",
                e
            )));
            let _ = events.send(TransportEvent::Closed);
            return;
        }
    };

    runtime.block_on(async {
        let socket = match connect_async(url.as_str()).await {
            Ok((socket, _)) => socket,
            Err(e) => {
                let _ = events.send(TransportEvent::Error(format!("connect failed: {}", e)));
                return;
            }
        };
        connected.store(true, Ordering::SeqCst);
        let _ = events.send(TransportEvent::Opened);
        debug!(%url, "websocket connected");

        let (mut sink, mut stream) = socket.split();
        loop {
            tokio::select! {
                frame = outbound.recv() => match frame {
                    Some(WireFrame::Binary(bytes)) => {
                        if let Err(e) = sink.send(tungstenite::Message::Binary(bytes)).await {
                            let _ = events.send(TransportEvent::Error(format!("send failed: {}", e)));
                            break;
                        }
                    }
                    Some(WireFrame::Text(text)) => {
                        if let Err(e) = sink.send(tungstenite::Message::Text(text)).await {
                            let _ = events.send(TransportEvent::Error(format!("send failed: {}", e)));
                            break;
                        }
                    }
                    // Sender dropped: orderly close requested
                    None => {
                        let _ = sink.close().await;
                        break;
                    }
                },
                message = stream.next() => match message {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        let _ = events.send(TransportEvent::Text(text));
                    }
                    Some(Ok(tungstenite::Message::Close(_))) => break,
                    Some(Ok(_)) => {} // ping/pong/binary: nothing to deliver
                    Some(Err(e)) => {
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                    None => break,
                },
            }
        }
    });

    connected.store(false, Ordering::SeqCst);
    let _ = events.send(TransportEvent::Closed);
}

/// Scripted behavior for [`MockTransport`].
#[derive(Debug, Clone)]
struct MockBehavior {
    /// Refuse this many `open()` calls before connecting normally.
    /// `usize::MAX` refuses forever.
    connect_failures: usize,
    /// Open without ever reporting connected (drives connect timeouts).
    silent_connect: bool,
    /// Reply to the handshake with SERVER_READY.
    ready_on_handshake: bool,
    /// Reply to the end-of-audio sentinel with the acknowledgment.
    ack_end_of_audio: bool,
    fail_send: bool,
    fail_close: bool,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            connect_failures: 0,
            silent_connect: false,
            ready_on_handshake: true,
            ack_end_of_audio: true,
            fail_send: false,
            fail_close: false,
        }
    }
}

/// Shared record of everything a mock transport (and its factory siblings)
/// did, for assertions and event injection from tests.
#[derive(Default)]
pub struct MockTransportLog {
    open_calls: AtomicUsize,
    sent: Mutex<Vec<WireFrame>>,
    event_tx: Mutex<Option<Sender<TransportEvent>>>,
}

impl MockTransportLog {
    /// Number of `open()` calls across all transports sharing this log.
    pub fn open_count(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    /// All frames sent so far.
    pub fn sent_frames(&self) -> Vec<WireFrame> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Binary payloads sent so far.
    pub fn binary_frames(&self) -> Vec<Vec<u8>> {
        self.sent_frames()
            .into_iter()
            .filter_map(|frame| match frame {
                WireFrame::Binary(bytes) => Some(bytes),
                WireFrame::Text(_) => None,
            })
            .collect()
    }

    /// Inject an inbound text frame on the most recently opened transport.
    /// Returns false if no transport is open.
    pub fn inject_text(&self, raw: &str) -> bool {
        let guard = self
            .event_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match guard.as_ref() {
            Some(tx) => tx.send(TransportEvent::Text(raw.to_string())).is_ok(),
            None => false,
        }
    }

    /// Inject a socket error on the most recently opened transport.
    pub fn inject_error(&self, message: &str) -> bool {
        let guard = self
            .event_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match guard.as_ref() {
            Some(tx) => tx.send(TransportEvent::Error(message.to_string())).is_ok(),
            None => false,
        }
    }
}

/// Scripted transport for exercising the client state machine without a
/// network. By default it plays a well-behaved server: connects immediately,
/// answers the handshake with SERVER_READY, and acknowledges the end-of-audio
/// sentinel.
pub struct MockTransport {
    behavior: MockBehavior,
    log: Arc<MockTransportLog>,
    connected: Arc<AtomicBool>,
    event_tx: Option<Sender<TransportEvent>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            behavior: MockBehavior::default(),
            log: Arc::new(MockTransportLog::default()),
            connected: Arc::new(AtomicBool::new(false)),
            event_tx: None,
        }
    }

    /// Refuse every connection attempt.
    pub fn with_refused_connect(mut self) -> Self {
        self.behavior.connect_failures = usize::MAX;
        self
    }

    /// Refuse the first `n` connection attempts, then connect normally.
    pub fn with_connect_failures(mut self, n: usize) -> Self {
        self.behavior.connect_failures = n;
        self
    }

    /// Open without ever reporting connected.
    pub fn with_silent_connect(mut self) -> Self {
        self.behavior.silent_connect = true;
        self
    }

    /// Never answer the handshake with SERVER_READY.
    pub fn without_ready(mut self) -> Self {
        self.behavior.ready_on_handshake = false;
        self
    }

    /// Never acknowledge the end-of-audio sentinel.
    pub fn without_ack(mut self) -> Self {
        self.behavior.ack_end_of_audio = false;
        self
    }

    /// Fail every send.
    pub fn with_send_failure(mut self) -> Self {
        self.behavior.fail_send = true;
        self
    }

    /// Report a failure from `close()` (the transport still shuts down).
    pub fn with_close_failure(mut self) -> Self {
        self.behavior.fail_close = true;
        self
    }

    /// The shared activity log, for assertions after the mock has been moved
    /// into a factory.
    pub fn log(&self) -> Arc<MockTransportLog> {
        Arc::clone(&self.log)
    }

    /// Turn this mock into a factory producing one scripted transport per
    /// connection attempt, all sharing this mock's log.
    pub fn into_factory(self) -> TransportFactory {
        let behavior = self.behavior;
        let log = self.log;
        Box::new(move |_url: &str| {
            Box::new(MockTransport {
                behavior: behavior.clone(),
                log: Arc::clone(&log),
                connected: Arc::new(AtomicBool::new(false)),
                event_tx: None,
            }) as Box<dyn Transport>
        })
    }

    fn emit(&self, event: TransportEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn open(&mut self) -> Result<Receiver<TransportEvent>> {
        let attempt = self.log.open_calls.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = unbounded();
        *self
            .log
            .event_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(tx.clone());
        self.event_tx = Some(tx);

        if attempt < self.behavior.connect_failures {
            self.emit(TransportEvent::Error("connection refused".to_string()));
            self.emit(TransportEvent::Closed);
        } else if !self.behavior.silent_connect {
            self.connected.store(true, Ordering::SeqCst);
            self.emit(TransportEvent::Opened);
        }
        Ok(rx)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&mut self, frame: WireFrame) -> Result<()> {
        if self.behavior.fail_send {
            return Err(VoicewireError::Transport {
                message: "mock send failure".to_string(),
            });
        }
        if !self.is_connected() {
            return Err(VoicewireError::Transport {
                message: "socket is not open".to_string(),
            });
        }

        match &frame {
            WireFrame::Text(_) if self.behavior.ready_on_handshake => {
                self.emit(TransportEvent::Text(
                    r#"{"message":"SERVER_READY"}"#.to_string(),
                ));
            }
            WireFrame::Binary(bytes)
                if bytes.as_slice() == END_OF_AUDIO && self.behavior.ack_end_of_audio =>
            {
                self.emit(TransportEvent::Text(
                    r#"{"message":"END_OF_AUDIO_RECEIVED"}"#.to_string(),
                ));
            }
            _ => {}
        }

        self.log
            .sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(frame);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(tx) = self.event_tx.take() {
            let _ = tx.send(TransportEvent::Closed);
        }
        if self.behavior.fail_close {
            Err(VoicewireError::Transport {
                message: "mock close failure".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_send_before_open_fails() {
        let mut transport = WsTransport::new("ws://localhost:9090");
        assert!(!transport.is_connected());
        let result = transport.send(WireFrame::Binary(vec![0u8; 4]));
        assert!(matches!(result, Err(VoicewireError::Transport { .. })));
    }

    #[test]
    fn test_ws_close_without_open_is_noop() {
        let mut transport = WsTransport::new("ws://localhost:9090");
        assert!(transport.close().is_ok());
        assert!(transport.close().is_ok());
    }

    #[test]
    fn test_ws_double_open_rejected() {
        let mut transport =
            WsTransport::new("ws://127.0.0.1:1").with_join_timeout(Duration::from_millis(500));
        let _events = transport.open().unwrap();
        assert!(transport.open().is_err());
        let _ = transport.close();
    }

    #[test]
    fn test_ws_connect_refused_emits_error_then_closed() {
        // Port 1 is essentially never listening
        let mut transport =
            WsTransport::new("ws://127.0.0.1:1").with_join_timeout(Duration::from_millis(500));
        let events = transport.open().unwrap();

        let first = events
            .recv_timeout(Duration::from_secs(5))
            .expect("expected an event");
        assert!(matches!(first, TransportEvent::Error(_)));
        let second = events
            .recv_timeout(Duration::from_secs(5))
            .expect("expected Closed");
        assert_eq!(second, TransportEvent::Closed);
        assert!(!transport.is_connected());
        let _ = transport.close();
    }

    #[test]
    fn test_ws_handshake_failure_against_non_ws_server() {
        // A TCP listener that immediately drops the connection makes the
        // websocket handshake fail without needing a real server.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let accept_thread = std::thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                drop(stream);
            }
        });

        let mut transport = WsTransport::new(&format!("ws://{}", addr))
            .with_join_timeout(Duration::from_millis(500));
        let events = transport.open().unwrap();

        let mut saw_closed = false;
        while let Ok(event) = events.recv_timeout(Duration::from_secs(5)) {
            if event == TransportEvent::Closed {
                saw_closed = true;
                break;
            }
        }
        assert!(saw_closed);
        let _ = transport.close();
        let _ = accept_thread.join();
    }

    #[test]
    fn test_mock_connects_and_reports_opened() {
        let mut mock = MockTransport::new();
        let events = mock.open().unwrap();
        assert!(mock.is_connected());
        assert_eq!(events.try_recv().unwrap(), TransportEvent::Opened);
    }

    #[test]
    fn test_mock_refused_connect() {
        let mut mock = MockTransport::new().with_refused_connect();
        let events = mock.open().unwrap();
        assert!(!mock.is_connected());
        assert!(matches!(events.try_recv().unwrap(), TransportEvent::Error(_)));
        assert_eq!(events.try_recv().unwrap(), TransportEvent::Closed);
    }

    #[test]
    fn test_mock_connect_failures_then_success() {
        let factory = MockTransport::new().with_connect_failures(2).into_factory();

        let mut first = factory("ws://test");
        let _ = first.open().unwrap();
        assert!(!first.is_connected());

        let mut second = factory("ws://test");
        let _ = second.open().unwrap();
        assert!(!second.is_connected());

        let mut third = factory("ws://test");
        let _ = third.open().unwrap();
        assert!(third.is_connected());
    }

    #[test]
    fn test_mock_replies_ready_to_handshake() {
        let mut mock = MockTransport::new();
        let events = mock.open().unwrap();
        let _ = events.try_recv(); // Opened

        mock.send(WireFrame::Text("{\"uid\":\"x\"}".to_string()))
            .unwrap();
        match events.try_recv().unwrap() {
            TransportEvent::Text(raw) => assert!(raw.contains("SERVER_READY")),
            other => panic!("Expected ready reply, got {:?}", other),
        }
    }

    #[test]
    fn test_mock_acknowledges_sentinel() {
        let mut mock = MockTransport::new();
        let events = mock.open().unwrap();
        let _ = events.try_recv(); // Opened

        mock.send(WireFrame::Binary(END_OF_AUDIO.to_vec())).unwrap();
        match events.try_recv().unwrap() {
            TransportEvent::Text(raw) => assert!(raw.contains("END_OF_AUDIO_RECEIVED")),
            other => panic!("Expected acknowledgment, got {:?}", other),
        }
    }

    #[test]
    fn test_mock_without_ack_stays_silent() {
        let mut mock = MockTransport::new().without_ack();
        let events = mock.open().unwrap();
        let _ = events.try_recv(); // Opened

        mock.send(WireFrame::Binary(END_OF_AUDIO.to_vec())).unwrap();
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_mock_records_sent_frames() {
        let mut mock = MockTransport::new().without_ready().without_ack();
        let log = mock.log();
        let _events = mock.open().unwrap();

        mock.send(WireFrame::Binary(vec![1, 2, 3, 4])).unwrap();
        mock.send(WireFrame::Binary(vec![5, 6, 7, 8])).unwrap();

        assert_eq!(log.binary_frames(), vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8]]);
    }

    #[test]
    fn test_mock_send_after_close_fails() {
        let mut mock = MockTransport::new();
        let _events = mock.open().unwrap();
        mock.close().unwrap();
        assert!(mock.send(WireFrame::Binary(vec![0u8; 4])).is_err());
    }

    #[test]
    fn test_mock_close_failure_still_disconnects() {
        let mut mock = MockTransport::new().with_close_failure();
        let events = mock.open().unwrap();
        let _ = events.try_recv(); // Opened

        assert!(mock.close().is_err());
        assert!(!mock.is_connected());
        assert_eq!(events.try_recv().unwrap(), TransportEvent::Closed);
    }

    #[test]
    fn test_mock_log_injection() {
        let mut mock = MockTransport::new();
        let log = mock.log();
        let events = mock.open().unwrap();
        let _ = events.try_recv(); // Opened

        assert!(log.inject_text(r#"{"segments":[]}"#));
        match events.try_recv().unwrap() {
            TransportEvent::Text(raw) => assert!(raw.contains("segments")),
            other => panic!("Expected injected frame, got {:?}", other),
        }
    }
}
