//! Audio source abstraction for the capture pipeline.

use crate::defaults;
use crate::error::{Result, VoicewireError};

/// Trait for audio source devices.
///
/// This trait allows swapping implementations (real audio device, WAV file,
/// or mock). Sources deliver mono float samples in `[-1.0, 1.0]`; the
/// pipeline resamples them to the service's target rate when needed.
pub trait AudioSource: Send {
    /// Start capturing audio from the source.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing audio from the source.
    fn stop(&mut self) -> Result<()>;

    /// Read whatever samples have accumulated since the last call.
    ///
    /// An empty result is normal for live sources between hardware buffers.
    fn read_samples(&mut self) -> Result<Vec<f32>>;

    /// Sample rate of the delivered samples, in Hz.
    fn sample_rate(&self) -> u32;

    /// Returns true if the source is finite (file or pipe) and an empty read
    /// means exhaustion rather than a quiet moment.
    fn is_finite(&self) -> bool {
        false
    }
}

/// Mock audio source for testing.
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    is_started: bool,
    samples: Vec<f32>,
    sample_rate: u32,
    finite: bool,
    exhausted: bool,
    should_fail_start: bool,
    should_fail_stop: bool,
    should_fail_read: bool,
    error_message: String,
}

impl MockAudioSource {
    /// Create a new mock audio source with default settings.
    pub fn new() -> Self {
        Self {
            is_started: false,
            samples: vec![0.0; 160],
            sample_rate: defaults::TARGET_SAMPLE_RATE,
            finite: false,
            exhausted: false,
            should_fail_start: false,
            should_fail_stop: false,
            should_fail_read: false,
            error_message: "mock audio error".to_string(),
        }
    }

    /// Configure the mock to return specific samples.
    pub fn with_samples(mut self, samples: Vec<f32>) -> Self {
        self.samples = samples;
        self
    }

    /// Configure the mock's reported sample rate.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Configure the mock as finite: the samples are delivered once, then
    /// every read returns empty.
    pub fn with_finite(mut self) -> Self {
        self.finite = true;
        self
    }

    /// Configure the mock to fail on start.
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on stop.
    pub fn with_stop_failure(mut self) -> Self {
        self.should_fail_stop = true;
        self
    }

    /// Configure the mock to fail on read.
    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    /// Configure the error message for failures.
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Check if the audio source is started.
    pub fn is_started(&self) -> bool {
        self.is_started
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            Err(VoicewireError::AudioCapture {
                message: self.error_message.clone(),
            })
        } else {
            self.is_started = true;
            Ok(())
        }
    }

    fn stop(&mut self) -> Result<()> {
        if self.should_fail_stop {
            Err(VoicewireError::AudioCapture {
                message: self.error_message.clone(),
            })
        } else {
            self.is_started = false;
            Ok(())
        }
    }

    fn read_samples(&mut self) -> Result<Vec<f32>> {
        if self.should_fail_read {
            return Err(VoicewireError::AudioCapture {
                message: self.error_message.clone(),
            });
        }
        if self.finite {
            if self.exhausted {
                return Ok(Vec::new());
            }
            self.exhausted = true;
        }
        Ok(self.samples.clone())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_finite(&self) -> bool {
        self.finite
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_returns_configured_samples() {
        let test_samples = vec![0.1, 0.2, 0.3];
        let mut source = MockAudioSource::new().with_samples(test_samples.clone());

        let result = source.read_samples().unwrap();
        assert_eq!(result, test_samples);
    }

    #[test]
    fn test_mock_returns_default_samples() {
        let mut source = MockAudioSource::new();
        let samples = source.read_samples().unwrap();
        assert_eq!(samples.len(), 160);
        assert!(samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_mock_read_failure() {
        let mut source = MockAudioSource::new()
            .with_read_failure()
            .with_error_message("buffer overflow");

        match source.read_samples() {
            Err(VoicewireError::AudioCapture { message }) => {
                assert_eq!(message, "buffer overflow");
            }
            other => panic!("Expected AudioCapture error, got: {:?}", other.is_ok()),
        }
    }

    #[test]
    fn test_mock_start_stop_state_management() {
        let mut source = MockAudioSource::new();
        assert!(!source.is_started());

        source.start().unwrap();
        assert!(source.is_started());

        source.stop().unwrap();
        assert!(!source.is_started());
    }

    #[test]
    fn test_mock_start_failure_leaves_stopped() {
        let mut source = MockAudioSource::new().with_start_failure();
        assert!(source.start().is_err());
        assert!(!source.is_started());
    }

    #[test]
    fn test_mock_stop_failure_leaves_started() {
        let mut source = MockAudioSource::new().with_stop_failure();
        source.start().unwrap();
        assert!(source.stop().is_err());
        assert!(source.is_started());
    }

    #[test]
    fn test_mock_finite_source_exhausts_after_one_read() {
        let mut source = MockAudioSource::new()
            .with_samples(vec![0.5; 100])
            .with_finite();
        assert!(source.is_finite());

        assert_eq!(source.read_samples().unwrap().len(), 100);
        assert!(source.read_samples().unwrap().is_empty());
        assert!(source.read_samples().unwrap().is_empty());
    }

    #[test]
    fn test_mock_infinite_source_repeats() {
        let mut source = MockAudioSource::new().with_samples(vec![0.5; 10]);
        assert!(!source.is_finite());
        assert_eq!(source.read_samples().unwrap().len(), 10);
        assert_eq!(source.read_samples().unwrap().len(), 10);
    }

    #[test]
    fn test_mock_sample_rate() {
        let source = MockAudioSource::new().with_sample_rate(48000);
        assert_eq!(source.sample_rate(), 48000);
    }

    #[test]
    fn test_audio_source_trait_is_object_safe() {
        let mut source: Box<dyn AudioSource> =
            Box::new(MockAudioSource::new().with_samples(vec![0.1, 0.2]));

        source.start().unwrap();
        assert_eq!(source.read_samples().unwrap(), vec![0.1, 0.2]);
        source.stop().unwrap();
    }
}
