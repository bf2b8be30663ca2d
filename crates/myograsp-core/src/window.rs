//! Overlapping sample windower.
//!
//! Accumulates the continuous sample stream into fixed-length windows with
//! 50% overlap. The slide is incremental: when a window is emitted, the most
//! recent half is retained in place as the seed of the next window instead of
//! refilling from scratch.

use crate::error::PipelineError;
use crate::types::{EmgSample, MAX_CHANNELS};

/// Samples per analysis window.
pub const WINDOW_SIZE: usize = 256;

/// New samples between consecutive windows (50% overlap).
pub const WINDOW_STEP: usize = WINDOW_SIZE / 2;

/// One completed analysis window.
///
/// Holds `WINDOW_SIZE` filtered samples per channel, channel-major. A window
/// is exclusively owned by whichever stage currently processes it and moves
/// by value through the inter-stage queue.
#[derive(Clone, Debug, PartialEq)]
pub struct Window {
    /// Per-channel sample data; only the first `n_channels` rows are valid
    pub channels: [[f32; WINDOW_SIZE]; MAX_CHANNELS],
    /// Number of active channels
    pub n_channels: u8,
    /// Timestamp of the newest sample in the window, in microseconds
    pub timestamp_us: u64,
}

impl Window {
    /// Get the sample data for one channel.
    #[inline]
    #[must_use]
    pub fn channel(&self, ch: usize) -> &[f32; WINDOW_SIZE] {
        &self.channels[ch]
    }
}

/// Sliding windower over the continuous multi-channel stream.
///
/// `push` never silently discards raw samples; whether completed windows may
/// be dropped under backpressure is the coordinator's policy, not the
/// windower's.
#[derive(Clone, Debug)]
pub struct SampleWindower {
    buffers: [[f32; WINDOW_SIZE]; MAX_CHANNELS],
    n_channels: u8,
    /// Valid samples currently in the buffers
    fill: usize,
    /// Timestamp of the most recently pushed sample
    last_timestamp_us: u64,
}

impl SampleWindower {
    /// Create a windower for the given active channel count.
    #[must_use]
    pub fn new(n_channels: u8) -> Self {
        Self {
            buffers: [[0.0; WINDOW_SIZE]; MAX_CHANNELS],
            n_channels,
            fill: 0,
            last_timestamp_us: 0,
        }
    }

    /// Append one sample; returns a completed window when one is due.
    ///
    /// The first window is emitted once `WINDOW_SIZE` samples have
    /// accumulated; every `WINDOW_STEP` samples thereafter. After emission
    /// the newest `WINDOW_SIZE - WINDOW_STEP` samples are kept as the seed
    /// of the next window.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::BufferUnderrun`] when the sample's channel
    /// count does not match this session.
    pub fn push(&mut self, sample: &EmgSample) -> Result<Option<Window>, PipelineError> {
        if sample.n_channels != self.n_channels {
            return Err(PipelineError::BufferUnderrun {
                expected: self.n_channels,
                got: sample.n_channels,
            });
        }

        for ch in 0..self.n_channels as usize {
            self.buffers[ch][self.fill] = sample.channels[ch];
        }
        self.fill += 1;
        self.last_timestamp_us = sample.timestamp_us;

        if self.fill < WINDOW_SIZE {
            return Ok(None);
        }

        let window = Window {
            channels: self.buffers,
            n_channels: self.n_channels,
            timestamp_us: self.last_timestamp_us,
        };

        // Incremental slide: retain the newest half in place.
        for ch in 0..self.n_channels as usize {
            self.buffers[ch].copy_within(WINDOW_STEP..WINDOW_SIZE, 0);
        }
        self.fill = WINDOW_SIZE - WINDOW_STEP;

        Ok(Some(window))
    }

    /// Samples currently buffered toward the next window.
    #[inline]
    #[must_use]
    pub fn fill(&self) -> usize {
        self.fill
    }

    /// Discard all buffered samples.
    ///
    /// Used on pipeline reset so that no window mixes pre- and post-reset
    /// samples.
    pub fn reset(&mut self) {
        self.fill = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(value: f32, seq: u32) -> EmgSample {
        let mut s = EmgSample::new(u64::from(seq) * 1000, 4, seq);
        for ch in 0..4 {
            s.channels[ch] = value + ch as f32 * 1000.0;
        }
        s
    }

    #[test]
    fn test_window_emission_count() {
        // N samples with window 256 / step 128 emit floor((N-256)/128) + 1
        // windows.
        let n = 1000;
        let mut windower = SampleWindower::new(4);
        let mut emitted = 0;
        for i in 0..n {
            if windower.push(&sample(i as f32, i)).unwrap().is_some() {
                emitted += 1;
            }
        }
        assert_eq!(emitted, (n as usize - WINDOW_SIZE) / WINDOW_STEP + 1);
    }

    #[test]
    fn test_window_overlap_content() {
        let mut windower = SampleWindower::new(4);
        let mut windows = std::vec::Vec::new();
        for i in 0..WINDOW_SIZE as u32 + WINDOW_STEP as u32 {
            if let Some(w) = windower.push(&sample(i as f32, i)).unwrap() {
                windows.push(w);
            }
        }
        assert_eq!(windows.len(), 2);

        // Each window's first half equals the previous window's last half.
        for ch in 0..4 {
            assert_eq!(
                &windows[1].channel(ch)[..WINDOW_STEP],
                &windows[0].channel(ch)[WINDOW_STEP..]
            );
        }

        // And the content is the expected slice of the stream.
        assert_eq!(windows[0].channel(0)[0], 0.0);
        assert_eq!(windows[1].channel(0)[0], WINDOW_STEP as f32);
    }

    #[test]
    fn test_channel_mismatch_rejected() {
        let mut windower = SampleWindower::new(4);
        let bad = EmgSample::new(0, 2, 0);
        assert_eq!(
            windower.push(&bad),
            Err(PipelineError::BufferUnderrun { expected: 4, got: 2 })
        );
    }

    #[test]
    fn test_reset_discards_partial_window() {
        let mut windower = SampleWindower::new(4);
        for i in 0..100 {
            windower.push(&sample(i as f32, i)).unwrap();
        }
        assert_eq!(windower.fill(), 100);
        windower.reset();
        assert_eq!(windower.fill(), 0);

        // A full window is again required after the reset.
        let mut emitted = 0;
        for i in 0..WINDOW_SIZE as u32 {
            if windower.push(&sample(i as f32, i)).unwrap().is_some() {
                emitted += 1;
            }
        }
        assert_eq!(emitted, 1);
    }

    #[test]
    fn test_window_timestamp_is_newest_sample() {
        let mut windower = SampleWindower::new(4);
        let mut last = None;
        for i in 0..WINDOW_SIZE as u32 {
            last = windower.push(&sample(0.0, i)).unwrap();
        }
        let window = last.unwrap();
        assert_eq!(window.timestamp_us, (WINDOW_SIZE as u64 - 1) * 1000);
    }
}
