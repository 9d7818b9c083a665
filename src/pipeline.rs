//! Capture/processing pipeline.
//!
//! One producer thread polls the audio source and pushes chunks into a
//! bounded queue for backpressure; one consumer thread drains the queue,
//! feeds the window assembler, and hands each emitted window to the caller.
//! `stop()` drains the queue, flushes the sub-window remainder, and joins
//! both threads with a bounded timeout.

use crate::audio::resample::resample;
use crate::audio::source::AudioSource;
use crate::audio::window::WindowAssembler;
use crate::config::ClientConfig;
use crate::error::{Result, VoicewireError};
use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// A raw capture buffer with its arrival order. Owned by the queue until the
/// consumer merges it into the window buffer.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    pub sequence: u64,
}

/// Capture pipeline: audio source → bounded queue → window assembler.
///
/// Restartable: `stop()` returns the pipeline to its idle state, and a later
/// `start()` begins a fresh windowing session.
pub struct CapturePipeline {
    config: ClientConfig,
    running: Arc<AtomicBool>,
    sequence: Arc<AtomicU64>,
    /// Sample rate of incoming chunks; set from the source at start.
    input_rate: Arc<AtomicU32>,
    chunk_tx: Mutex<Option<Sender<AudioChunk>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl CapturePipeline {
    pub fn new(config: ClientConfig) -> Self {
        let input_rate = config.window.target_sample_rate;
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            sequence: Arc::new(AtomicU64::new(0)),
            input_rate: Arc::new(AtomicU32::new(input_rate)),
            chunk_tx: Mutex::new(None),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Returns true while the pipeline is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts capture and windowing.
    ///
    /// Spawns exactly one producer (polls `source`) and one consumer (drains
    /// the queue, assembles windows, invokes `on_window` per emitted window).
    ///
    /// # Errors
    /// Fails if the pipeline is already running, the window configuration is
    /// unusable, or the source refuses to start.
    pub fn start<F>(&self, mut source: Box<dyn AudioSource>, on_window: F) -> Result<()>
    where
        F: FnMut(&[f32]) + Send + 'static,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(VoicewireError::Other(
                "pipeline is already running".to_string(),
            ));
        }

        let mut assembler = match WindowAssembler::new(
            self.config.window.window_size,
            self.config.window.overlap,
        ) {
            Ok(assembler) => assembler,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        if let Err(e) = source.start() {
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        self.input_rate
            .store(source.sample_rate(), Ordering::SeqCst);

        let (chunk_tx, chunk_rx) = bounded(self.config.pipeline.queue_capacity);
        *lock_ignore_poison(&self.chunk_tx) = Some(chunk_tx.clone());

        // Producer: poll the source, push chunks, drop when the queue is full
        let running = Arc::clone(&self.running);
        let sequence = Arc::clone(&self.sequence);
        let poll_interval = self.config.pipeline.capture_poll();
        let producer = thread::spawn(move || {
            let source_is_finite = source.is_finite();
            let mut consecutive_errors: u32 = 0;
            const MAX_CONSECUTIVE_ERRORS: u32 = 10;

            while running.load(Ordering::SeqCst) {
                let samples = match source.read_samples() {
                    Ok(samples) => {
                        consecutive_errors = 0;
                        samples
                    }
                    Err(e) => {
                        consecutive_errors += 1;
                        if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                            error!(
                                "audio capture failed {} times in a row: {}",
                                consecutive_errors, e
                            );
                            break;
                        }
                        thread::sleep(poll_interval);
                        continue;
                    }
                };

                if samples.is_empty() {
                    if source_is_finite {
                        // File/pipe source exhausted — exit polling loop.
                        break;
                    }
                    // Live source: empty reads are normal while the device
                    // buffers. Keep polling.
                    thread::sleep(poll_interval);
                    continue;
                }

                let chunk = AudioChunk {
                    samples,
                    sequence: sequence.fetch_add(1, Ordering::Relaxed),
                };
                if chunk_tx.try_send(chunk).is_err() {
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    debug!("capture queue full, dropping chunk");
                }

                thread::sleep(poll_interval);
            }

            if let Err(e) = source.stop() {
                warn!("failed to stop audio source: {}", e);
            }
        });

        // Consumer: drain the queue, assemble windows, emit them
        let input_rate = Arc::clone(&self.input_rate);
        let target_rate = self.config.window.target_sample_rate;
        let mut on_window = on_window;
        let consumer = thread::spawn(move || {
            loop {
                match chunk_rx.recv_timeout(Duration::from_millis(50)) {
                    Ok(chunk) => {
                        let from_rate = input_rate.load(Ordering::SeqCst);
                        let samples = if from_rate == target_rate {
                            chunk.samples
                        } else {
                            resample(&chunk.samples, from_rate, target_rate)
                        };
                        assembler.add_chunk(&samples);
                        while let Some(window) = assembler.take_window() {
                            on_window(&window);
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    // All senders gone: the drain is complete
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }

            // Emit the sub-window remainder verbatim, never padded
            if let Some(remainder) = assembler.flush() {
                on_window(&remainder);
            }
        });

        *lock_ignore_poison(&self.threads) = vec![producer, consumer];
        Ok(())
    }

    /// Pushes a raw capture chunk into the queue.
    ///
    /// Chunks must be at the source's sample rate and contain whole samples.
    /// While the pipeline is stopped this is a silent no-op — nothing is
    /// queued and nothing leaks across start/stop cycles. A full queue drops
    /// the chunk.
    pub fn process_audio(&self, samples: &[f32]) {
        let guard = lock_ignore_poison(&self.chunk_tx);
        let Some(chunk_tx) = guard.as_ref() else {
            return;
        };
        let chunk = AudioChunk {
            samples: samples.to_vec(),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        };
        if chunk_tx.try_send(chunk).is_err() {
            debug!("capture queue full, dropping chunk");
        }
    }

    /// Stops the pipeline: no new work is accepted, queued chunks are drained
    /// through the assembler, the partial remainder is flushed, and both
    /// threads are joined with a bounded timeout.
    ///
    /// Idempotent. A join overrun is logged, never fatal; after the deadline
    /// remaining threads are detached and die with the process.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        // Dropping the sender lets the consumer finish its drain
        *lock_ignore_poison(&self.chunk_tx) = None;

        let mut threads = std::mem::take(&mut *lock_ignore_poison(&self.threads));
        let deadline = Instant::now() + self.config.timing.join_timeout();

        loop {
            let mut remaining = Vec::new();
            for handle in threads.drain(..) {
                if handle.is_finished() {
                    if let Err(panic_info) = handle.join() {
                        let msg = panic_info
                            .downcast_ref::<&str>()
                            .copied()
                            .or_else(|| panic_info.downcast_ref::<String>().map(|s| s.as_str()))
                            .unwrap_or("unknown panic");
                        warn!("pipeline thread panicked: {}", msg);
                    }
                } else {
                    remaining.push(handle);
                }
            }
            threads = remaining;

            if threads.is_empty() {
                break;
            }

            if Instant::now() >= deadline {
                warn!(
                    count = threads.len(),
                    "shutdown timeout — detaching pipeline thread(s)"
                );
                break;
            }

            thread::sleep(Duration::from_millis(10));
        }
    }
}

fn lock_ignore_poison<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
