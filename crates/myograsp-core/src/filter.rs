//! Per-channel causal filter bank.
//!
//! Two stages per channel: a 20 Hz Butterworth high-pass for DC and
//! motion-artifact removal, and a narrow notch at the powerline frequency.
//! State persists across window boundaries: every raw sample is filtered
//! exactly once as it arrives, never re-filtered per extracted window, so
//! overlapping windows carry identical samples at their shared boundary.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::types::{EmgSample, MAX_CHANNELS};

/// Second-order IIR (biquad) section, Direct Form I.
///
/// y[n] = b0*x[n] + b1*x[n-1] + b2*x[n-2] - a1*y[n-1] - a2*y[n-2]
#[derive(Copy, Clone, Debug)]
pub struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,

    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl Biquad {
    /// Create a biquad with explicit normalized coefficients (a0 = 1).
    #[must_use]
    pub const fn new(b0: f32, b1: f32, b2: f32, a1: f32, a2: f32) -> Self {
        Self {
            b0,
            b1,
            b2,
            a1,
            a2,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    /// Second-order Butterworth high-pass via bilinear transform.
    #[must_use]
    pub fn highpass(sample_rate_hz: f32, cutoff_hz: f32) -> Self {
        let omega = core::f32::consts::PI * cutoff_hz / sample_rate_hz;
        let k = libm::tanf(omega);
        let k2 = k * k;
        let sqrt2 = core::f32::consts::SQRT_2;

        let norm = 1.0 / (1.0 + sqrt2 * k + k2);

        Self::new(
            norm,
            -2.0 * norm,
            norm,
            2.0 * (k2 - 1.0) * norm,
            (1.0 - sqrt2 * k + k2) * norm,
        )
    }

    /// Notch filter for powerline interference.
    #[must_use]
    pub fn notch(sample_rate_hz: f32, notch_hz: f32, q: f32) -> Self {
        let omega = 2.0 * core::f32::consts::PI * notch_hz / sample_rate_hz;
        let cos_omega = libm::cosf(omega);
        let sin_omega = libm::sinf(omega);
        let alpha = sin_omega / (2.0 * q);

        let norm = 1.0 / (1.0 + alpha);

        Self::new(
            norm,
            -2.0 * cos_omega * norm,
            norm,
            -2.0 * cos_omega * norm,
            (1.0 - alpha) * norm,
        )
    }

    /// Process a single sample.
    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;

        y
    }

    /// Zero the filter state.
    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

/// Persistent per-channel filter chain for the whole session.
///
/// Mutated only at the ingest point; reset only on a full pipeline reset.
#[derive(Clone, Debug)]
pub struct FilterBank {
    highpass: [Biquad; MAX_CHANNELS],
    notch: [Biquad; MAX_CHANNELS],
    n_channels: u8,
}

impl FilterBank {
    /// Build the filter bank for a session configuration.
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        let fs = config.sample_rate_hz as f32;
        let highpass = Biquad::highpass(fs, config.highpass_hz);
        let notch = Biquad::notch(fs, config.powerline_hz, config.notch_q);

        Self {
            highpass: [highpass; MAX_CHANNELS],
            notch: [notch; MAX_CHANNELS],
            n_channels: config.channels,
        }
    }

    /// Filter one value on one channel.
    #[inline]
    pub fn process_channel(&mut self, ch: usize, x: f32) -> f32 {
        let hp = self.highpass[ch].process(x);
        self.notch[ch].process(hp)
    }

    /// Filter a sample in place across all active channels.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::BufferUnderrun`] when the sample's channel
    /// count does not match this session.
    pub fn process(&mut self, sample: &mut EmgSample) -> Result<(), PipelineError> {
        if sample.n_channels != self.n_channels {
            return Err(PipelineError::BufferUnderrun {
                expected: self.n_channels,
                got: sample.n_channels,
            });
        }
        for ch in 0..self.n_channels as usize {
            sample.channels[ch] = self.process_channel(ch, sample.channels[ch]);
        }
        Ok(())
    }

    /// Zero all filter state on every channel.
    pub fn reset(&mut self) {
        for ch in 0..MAX_CHANNELS {
            self.highpass[ch].reset();
            self.notch[ch].reset();
        }
    }
}
