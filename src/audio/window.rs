//! Window assembler for the streaming pipeline.
//!
//! Accumulates raw samples and emits fixed-size analysis windows. Consecutive
//! windows share a configurable overlap region: the buffer advances by
//! `window_size - overlap_size` per emission, and the leading overlap region
//! of each window is crossfaded against the tail of its predecessor so energy
//! transitions stay smooth across window boundaries.

use crate::error::{Result, VoicewireError};

/// Assembles fixed-size overlapping windows from an incoming sample stream.
///
/// `take_window` is non-blocking and restartable: call it repeatedly after
/// each `add_chunk` until it returns `None`, then feed more samples.
pub struct WindowAssembler {
    window_size: usize,
    overlap_size: usize,
    /// Accumulated samples not yet emitted.
    buffer: Vec<f32>,
    /// Most recently emitted window, kept for boundary crossfades.
    previous: Option<Vec<f32>>,
}

impl WindowAssembler {
    /// Creates an assembler emitting windows of `window_size` samples with
    /// the given overlap fraction.
    ///
    /// # Errors
    /// Returns `VoicewireError::ConfigInvalidValue` if `window_size` is zero
    /// or `overlap` is outside `[0, 1)`. An overlap of 1.0 or more would stop
    /// the stream from advancing.
    pub fn new(window_size: usize, overlap: f32) -> Result<Self> {
        if window_size == 0 {
            return Err(VoicewireError::ConfigInvalidValue {
                key: "window_size".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if !(0.0..1.0).contains(&overlap) {
            return Err(VoicewireError::ConfigInvalidValue {
                key: "overlap".to_string(),
                message: "must be in [0, 1)".to_string(),
            });
        }

        let overlap_size = (window_size as f32 * overlap).floor() as usize;
        Ok(Self {
            window_size,
            overlap_size,
            buffer: Vec::new(),
            previous: None,
        })
    }

    /// Number of samples shared between consecutive windows.
    pub fn overlap_size(&self) -> usize {
        self.overlap_size
    }

    /// Number of samples the buffer advances per emitted window.
    ///
    /// Always positive: the overlap fraction is capped below 1.0.
    pub fn step(&self) -> usize {
        self.window_size - self.overlap_size
    }

    /// Number of samples currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Appends decoded samples to the accumulation buffer.
    pub fn add_chunk(&mut self, samples: &[f32]) {
        self.buffer.extend_from_slice(samples);
    }

    /// Pulls the next window, if one is complete.
    ///
    /// Returns windows of exactly `window_size` samples. The leading overlap
    /// region is blended with the previous window's tail whenever a previous
    /// window exists and the overlap is non-zero.
    pub fn take_window(&mut self) -> Option<Vec<f32>> {
        if self.buffer.len() < self.window_size {
            return None;
        }

        let step = self.step();
        let mut window: Vec<f32> = self.buffer[..self.window_size].to_vec();
        self.blend_leading(&mut window);
        self.buffer.drain(..step);
        self.previous = Some(window.clone());
        Some(window)
    }

    /// Drains the sub-window remainder at end of stream.
    ///
    /// The remainder is emitted verbatim — blended at its leading overlap
    /// region like a regular window, but never padded to full size. Resets
    /// the previous-window memory; the assembler is empty afterwards.
    pub fn flush(&mut self) -> Option<Vec<f32>> {
        if self.buffer.is_empty() {
            self.previous = None;
            return None;
        }

        let mut remainder = std::mem::take(&mut self.buffer);
        self.blend_leading(&mut remainder);
        self.previous = None;
        Some(remainder)
    }

    /// Discards all buffered samples and the previous-window memory.
    ///
    /// The next window emitted after a clear starts unblended.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.previous = None;
    }

    /// Crossfades the leading overlap region of `window` against the tail of
    /// the previous window: a linear fade from the old tail (1 → 0) into the
    /// new head (0 → 1).
    fn blend_leading(&self, window: &mut [f32]) {
        let Some(previous) = &self.previous else {
            return;
        };
        let len = self.overlap_size.min(window.len());
        if len == 0 {
            return;
        }

        let tail = &previous[previous.len() - self.overlap_size..];
        for i in 0..len {
            let fade_in = i as f32 / self.overlap_size as f32;
            let fade_out = 1.0 - fade_in;
            window[i] = tail[i] * fade_out + window[i] * fade_in;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A ramp signal makes positions recognizable in assertions.
    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| i as f32).collect()
    }

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
            assert!(
                (a - e).abs() < 1e-3,
                "sample {} differs: {} vs {}",
                i,
                a,
                e
            );
        }
    }

    #[test]
    fn test_rejects_zero_window_size() {
        assert!(WindowAssembler::new(0, 0.2).is_err());
    }

    #[test]
    fn test_rejects_full_overlap() {
        assert!(WindowAssembler::new(1000, 1.0).is_err());
        assert!(WindowAssembler::new(1000, 1.5).is_err());
    }

    #[test]
    fn test_rejects_negative_overlap() {
        assert!(WindowAssembler::new(1000, -0.2).is_err());
    }

    #[test]
    fn test_step_positive_even_near_full_overlap() {
        let assembler = WindowAssembler::new(1000, 0.999).unwrap();
        assert!(assembler.step() >= 1);
    }

    #[test]
    fn test_no_window_until_enough_samples() {
        let mut assembler = WindowAssembler::new(1000, 0.2).unwrap();
        assembler.add_chunk(&ramp(999));
        assert!(assembler.take_window().is_none());
        assembler.add_chunk(&[999.0]);
        assert!(assembler.take_window().is_some());
    }

    #[test]
    fn test_every_window_has_exact_size() {
        let mut assembler = WindowAssembler::new(256, 0.25).unwrap();
        assembler.add_chunk(&ramp(3000));
        while let Some(window) = assembler.take_window() {
            assert_eq!(window.len(), 256);
        }
    }

    #[test]
    fn test_buffer_shrinks_by_step_per_emission() {
        let mut assembler = WindowAssembler::new(1000, 0.2).unwrap();
        assembler.add_chunk(&ramp(5000));
        let step = assembler.step();
        assert_eq!(step, 800);

        let mut before = assembler.buffered();
        while assembler.take_window().is_some() {
            let after = assembler.buffered();
            assert_eq!(before - after, step);
            before = after;
        }
    }

    #[test]
    fn test_zero_overlap_is_pure_tumbling() {
        let mut assembler = WindowAssembler::new(100, 0.0).unwrap();
        assert_eq!(assembler.step(), 100);

        let samples = ramp(250);
        assembler.add_chunk(&samples);

        let first = assembler.take_window().unwrap();
        let second = assembler.take_window().unwrap();
        assert!(assembler.take_window().is_none());

        // No blending: windows are verbatim slices of the stream
        assert_eq!(first, samples[0..100]);
        assert_eq!(second, samples[100..200]);
        assert_eq!(assembler.buffered(), 50);
    }

    #[test]
    fn test_first_window_is_unblended() {
        let mut assembler = WindowAssembler::new(1000, 0.2).unwrap();
        let samples = ramp(1200);
        assembler.add_chunk(&samples);
        let first = assembler.take_window().unwrap();
        assert_eq!(first, samples[0..1000]);
    }

    #[test]
    fn test_blended_region_stays_within_source_bounds() {
        let mut assembler = WindowAssembler::new(1000, 0.2).unwrap();
        assembler.add_chunk(&ramp(2600));

        let first = assembler.take_window().unwrap();
        let second = assembler.take_window().unwrap();
        let overlap = assembler.overlap_size();
        assert_eq!(overlap, 200);

        // The blended boundary is a convex combination of the previous tail
        // and the unblended head, so it can never overshoot either source.
        let prev_tail = &first[first.len() - overlap..];
        let raw_head = &ramp(2600)[800..800 + overlap];
        for i in 0..overlap {
            let lo = prev_tail[i].min(raw_head[i]) - 1e-3;
            let hi = prev_tail[i].max(raw_head[i]) + 1e-3;
            assert!(second[i] >= lo && second[i] <= hi, "overshoot at {}", i);
        }
    }

    #[test]
    fn test_window_walkthrough_2600_samples() {
        // window_size=1000, overlap=0.2 → overlap_size=200, step=800.
        // 2600 buffered → emit (1800 left) → emit (1000 left) → emit
        // (200 left) → stop: exactly three windows.
        let mut assembler = WindowAssembler::new(1000, 0.2).unwrap();
        let samples = ramp(2600);
        assembler.add_chunk(&samples);

        let mut windows = Vec::new();
        while let Some(window) = assembler.take_window() {
            windows.push(window);
        }
        assert_eq!(windows.len(), 3);
        assert_eq!(assembler.buffered(), 200);

        // Window contents track the stream at 800-sample steps; the shared
        // region blends the previous tail into the next head.
        assert_close(&windows[0], &samples[0..1000]);
        assert_close(&windows[1], &samples[800..1800]);
        assert_close(&windows[2], &samples[1600..2600]);
    }

    #[test]
    fn test_restartable_across_calls() {
        let mut assembler = WindowAssembler::new(100, 0.1).unwrap();

        assembler.add_chunk(&ramp(150));
        assert!(assembler.take_window().is_some());
        assert!(assembler.take_window().is_none());

        // Feeding more samples resumes where the stream left off
        assembler.add_chunk(&ramp(100));
        assert!(assembler.take_window().is_some());
    }

    #[test]
    fn test_multiple_windows_from_one_chunk() {
        let mut assembler = WindowAssembler::new(100, 0.0).unwrap();
        assembler.add_chunk(&ramp(1000));

        let mut count = 0;
        while assembler.take_window().is_some() {
            count += 1;
        }
        assert_eq!(count, 10);
    }

    #[test]
    fn test_clear_discards_buffer_and_previous_window() {
        let mut assembler = WindowAssembler::new(100, 0.5).unwrap();
        assembler.add_chunk(&vec![1.0; 150]);
        assert!(assembler.take_window().is_some());

        assembler.clear();
        assert_eq!(assembler.buffered(), 0);

        // The first window after a clear starts unblended
        let samples = vec![-1.0; 100];
        assembler.add_chunk(&samples);
        let window = assembler.take_window().unwrap();
        assert_eq!(window, samples);
    }

    #[test]
    fn test_flush_emits_remainder_verbatim_length() {
        let mut assembler = WindowAssembler::new(1000, 0.2).unwrap();
        assembler.add_chunk(&ramp(2600));
        while assembler.take_window().is_some() {}

        let remainder = assembler.flush().unwrap();
        assert_eq!(remainder.len(), 200);
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn test_flush_on_empty_buffer() {
        let mut assembler = WindowAssembler::new(1000, 0.2).unwrap();
        assert!(assembler.flush().is_none());
    }

    #[test]
    fn test_flush_resets_previous_window_memory() {
        let mut assembler = WindowAssembler::new(100, 0.5).unwrap();
        assembler.add_chunk(&vec![1.0; 120]);
        assert!(assembler.take_window().is_some());
        assembler.flush();

        let samples = vec![-1.0; 100];
        assembler.add_chunk(&samples);
        let window = assembler.take_window().unwrap();
        assert_eq!(window, samples);
    }

    #[test]
    fn test_half_overlap_small_window() {
        let mut assembler = WindowAssembler::new(4, 0.5).unwrap();
        assert_eq!(assembler.overlap_size(), 2);
        assert_eq!(assembler.step(), 2);

        assembler.add_chunk(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        let first = assembler.take_window().unwrap();
        assert_eq!(first, vec![0.0, 1.0, 2.0, 3.0]);

        let second = assembler.take_window().unwrap();
        assert_eq!(second.len(), 4);
        // fade_in = [0, 0.5] over the two shared samples
        assert_close(&second, &[2.0, 3.0, 4.0, 5.0]);
        assert!(assembler.take_window().is_none());
    }
}
