//! WAV file audio source.
//!
//! Lets hosts stream recorded audio through the same pipeline as live
//! capture — useful for batch transcription and for tests.

use crate::audio::resample::{mix_to_mono, resample};
use crate::audio::source::AudioSource;
use crate::error::{Result, VoicewireError};
use std::io::Read;
use std::path::Path;

/// Samples delivered per `read_samples` call: 100ms at the target rate.
fn chunk_size(sample_rate: u32) -> usize {
    (sample_rate / 10) as usize
}

/// Finite audio source over a 16-bit PCM WAV file.
///
/// The file is decoded up front: mixed down to mono and resampled to the
/// target rate. `read_samples` then delivers it in 100ms chunks until the
/// file is exhausted, after which reads return empty.
pub struct WavFileSource {
    samples: Vec<f32>,
    cursor: usize,
    sample_rate: u32,
}

impl WavFileSource {
    /// Open a WAV file and prepare it for streaming at `target_rate`.
    ///
    /// # Errors
    /// Returns `VoicewireError::AudioFile` for unreadable files and
    /// unsupported formats (only 16-bit integer PCM is accepted).
    pub fn open(path: &Path, target_rate: u32) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| VoicewireError::AudioFile {
            message: format!("Failed to open {}: {}", path.display(), e),
        })?;
        Self::from_reader(std::io::BufReader::new(file), target_rate)
    }

    /// Decode WAV data from any reader.
    pub fn from_reader<R: Read>(reader: R, target_rate: u32) -> Result<Self> {
        let mut wav = hound::WavReader::new(reader).map_err(|e| VoicewireError::AudioFile {
            message: format!("Failed to parse WAV data: {}", e),
        })?;

        let spec = wav.spec();
        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(VoicewireError::AudioFile {
                message: format!(
                    "Unsupported WAV format: {}-bit {:?} (expected 16-bit integer PCM)",
                    spec.bits_per_sample, spec.sample_format
                ),
            });
        }

        let raw: Vec<f32> = wav
            .samples::<i16>()
            .map(|s| {
                s.map(|v| v as f32 / i16::MAX as f32)
                    .map_err(|e| VoicewireError::AudioFile {
                        message: format!("Failed to decode WAV samples: {}", e),
                    })
            })
            .collect::<Result<_>>()?;

        let mono = mix_to_mono(&raw, spec.channels as usize);
        let samples = resample(&mono, spec.sample_rate, target_rate);

        Ok(Self {
            samples,
            cursor: 0,
            sample_rate: target_rate,
        })
    }

    /// Total number of samples after conversion.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if the file contained no audio.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl AudioSource for WavFileSource {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<f32>> {
        if self.cursor >= self.samples.len() {
            return Ok(Vec::new());
        }
        let end = (self.cursor + chunk_size(self.sample_rate)).min(self.samples.len());
        let chunk = self.samples[self.cursor..end].to_vec();
        self.cursor = end;
        Ok(chunk)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_finite(&self) -> bool {
        true
    }
}
