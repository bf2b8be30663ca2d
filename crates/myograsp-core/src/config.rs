//! Session configuration for the gesture recognition pipeline.
//!
//! Channel count and sample rate are fixed for a session: changing either
//! requires a full pipeline reset, including filter state.

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::features::{FeatureLayout, MAX_FEATURES};
use crate::types::MAX_CHANNELS;

/// Pipeline session configuration.
///
/// The defaults match the standard acquisition frontend: four forearm
/// channels at 1 kHz with European 50 Hz mains.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Sampling rate in Hz
    pub sample_rate_hz: u32,
    /// Number of active acquisition channels (1..=4)
    pub channels: u8,
    /// Powerline frequency to reject, in Hz (50 or 60)
    pub powerline_hz: f32,
    /// Notch quality factor
    pub notch_q: f32,
    /// High-pass cutoff for DC/motion-artifact removal, in Hz
    pub highpass_hz: f32,
    /// Hysteresis threshold for zero-crossing and slope-sign-change
    /// counters, in microvolts
    pub hysteresis_uv: f32,
    /// Which per-channel feature block to emit
    pub layout: FeatureLayout,
    /// Temporal-vote confidence gate in percent; classifications at or
    /// below this are not forwarded to actuation
    pub vote_gate_percent: u8,
}

impl PipelineConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for inconsistent settings and
    /// [`PipelineError::CapacityExceeded`] when the channel count and feature
    /// layout together overflow the feature-vector capacity.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.sample_rate_hz == 0 {
            return Err(PipelineError::InvalidConfig {
                reason: "sample rate must be non-zero",
            });
        }
        if self.channels == 0 || self.channels as usize > MAX_CHANNELS {
            return Err(PipelineError::InvalidConfig {
                reason: "channel count out of range",
            });
        }
        if self.vote_gate_percent > 100 {
            return Err(PipelineError::InvalidConfig {
                reason: "vote gate must be 0-100 percent",
            });
        }
        if !(self.powerline_hz > 0.0)
            || self.powerline_hz * 2.0 >= self.sample_rate_hz as f32
        {
            return Err(PipelineError::InvalidConfig {
                reason: "powerline frequency must be below Nyquist",
            });
        }
        if !(self.highpass_hz > 0.0)
            || self.highpass_hz * 2.0 >= self.sample_rate_hz as f32
        {
            return Err(PipelineError::InvalidConfig {
                reason: "high-pass cutoff must be below Nyquist",
            });
        }
        if !(self.notch_q > 0.0) {
            return Err(PipelineError::InvalidConfig {
                reason: "notch Q must be positive",
            });
        }
        if self.hysteresis_uv < 0.0 {
            return Err(PipelineError::InvalidConfig {
                reason: "hysteresis threshold must be non-negative",
            });
        }

        let features = self.feature_count();
        if features > MAX_FEATURES {
            return Err(PipelineError::CapacityExceeded {
                kind: "features",
                got: features,
                max: MAX_FEATURES,
            });
        }

        Ok(())
    }

    /// Total features emitted per window under this configuration.
    #[inline]
    #[must_use]
    pub fn feature_count(&self) -> usize {
        self.channels as usize * self.layout.features_per_channel()
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 1000,
            channels: MAX_CHANNELS as u8,
            powerline_hz: 50.0,
            notch_q: 30.0,
            highpass_hz: 20.0,
            hysteresis_uv: 10.0,
            layout: FeatureLayout::Compact,
            vote_gate_percent: 70,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.feature_count(), 28);
    }

    #[test]
    fn test_full_layout_overflows_on_four_channels() {
        let config = PipelineConfig {
            layout: FeatureLayout::Full,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::CapacityExceeded { kind: "features", .. })
        ));
    }

    #[test]
    fn test_full_layout_fits_two_channels() {
        let config = PipelineConfig {
            channels: 2,
            layout: FeatureLayout::Full,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.feature_count(), 24);
    }

    #[test]
    fn test_rejects_bad_settings() {
        let no_channels = PipelineConfig {
            channels: 0,
            ..PipelineConfig::default()
        };
        assert!(no_channels.validate().is_err());

        let no_rate = PipelineConfig {
            sample_rate_hz: 0,
            ..PipelineConfig::default()
        };
        assert!(no_rate.validate().is_err());

        let mains_above_nyquist = PipelineConfig {
            powerline_hz: 600.0,
            ..PipelineConfig::default()
        };
        assert!(mains_above_nyquist.validate().is_err());
    }
}
