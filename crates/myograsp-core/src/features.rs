//! Time- and frequency-domain feature extraction.
//!
//! Per channel, the time-domain set is computed directly from the filtered
//! window and the frequency-domain set from the magnitude spectrum. Blocks
//! are concatenated channel-major, time-domain before frequency-domain, into
//! one fixed-capacity vector. That ordering is a versioned contract with the
//! offline trainer: the normalization tables and tree feature indices of a
//! serialized model are only meaningful against the layout they were trained
//! for.

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::spectral::{SpectralAnalyzer, SPECTRUM_SIZE};
use crate::window::{Window, WINDOW_SIZE};

/// Maximum features in one vector; matches the trained-model contract.
pub const MAX_FEATURES: usize = 30;

/// Frequency bands for band-power features, in Hz (half-open intervals).
pub const FREQUENCY_BANDS: [(f32, f32); 4] =
    [(0.0, 50.0), (50.0, 150.0), (150.0, 250.0), (250.0, 500.0)];

// ============================================================================
// Feature Vector
// ============================================================================

/// Fixed-capacity ordered feature vector.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Feature values; only the first `len` entries are valid
    pub values: [f32; MAX_FEATURES],
    /// Number of active features
    pub len: usize,
    /// Timestamp of the source window, in microseconds
    pub timestamp_us: u64,
}

impl FeatureVector {
    /// Create an empty vector.
    #[inline]
    #[must_use]
    pub const fn new(timestamp_us: u64) -> Self {
        Self {
            values: [0.0; MAX_FEATURES],
            len: 0,
            timestamp_us,
        }
    }

    /// Append one feature.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::CapacityExceeded`] when the vector is full.
    #[inline]
    pub fn push(&mut self, value: f32) -> Result<(), PipelineError> {
        if self.len >= MAX_FEATURES {
            return Err(PipelineError::CapacityExceeded {
                kind: "features",
                got: self.len + 1,
                max: MAX_FEATURES,
            });
        }
        self.values[self.len] = value;
        self.len += 1;
        Ok(())
    }

    /// Active features as a slice.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.values[..self.len]
    }
}

// ============================================================================
// Feature Layout
// ============================================================================

/// Which per-channel feature block the extractor emits.
///
/// The layout, together with the channel count, fixes the meaning of every
/// feature index and must match the layout the model was trained with.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureLayout {
    /// Time-domain only: RMS, MAV, variance, ZC, SSC, WL (6 per channel)
    TimeDomain,
    /// Time-domain plus mean frequency (7 per channel); the default for
    /// four-channel sessions, 28 features total
    Compact,
    /// Time-domain plus mean/median frequency and four band powers
    /// (12 per channel); for sessions with at most two channels
    Full,
}

impl FeatureLayout {
    /// Features emitted per channel under this layout.
    #[inline]
    #[must_use]
    pub const fn features_per_channel(self) -> usize {
        match self {
            Self::TimeDomain => 6,
            Self::Compact => 7,
            Self::Full => 12,
        }
    }

    /// Short identifier used in logs and model tooling.
    #[inline]
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::TimeDomain => "td6",
            Self::Compact => "td6+mnf",
            Self::Full => "td6+fd6",
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for FeatureLayout {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{}", self.name());
    }
}

// ============================================================================
// Per-Channel Feature Sets
// ============================================================================

/// Time-domain features of one channel.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeDomainFeatures {
    /// Root mean square amplitude
    pub rms: f32,
    /// Mean absolute value
    pub mav: f32,
    /// Variance
    pub variance: f32,
    /// Zero crossings above the hysteresis threshold
    pub zero_crossings: u16,
    /// Slope sign changes above the hysteresis threshold
    pub slope_sign_changes: u16,
    /// Waveform length (cumulative absolute first difference)
    pub waveform_length: f32,
}

impl TimeDomainFeatures {
    /// Compute the time-domain set from one filtered channel.
    ///
    /// The zero-crossing and slope-sign-change counters only count
    /// transitions whose amplitude step exceeds `hysteresis`, rejecting
    /// noise-induced false transitions around the baseline.
    #[must_use]
    pub fn from_channel(samples: &[f32; WINDOW_SIZE], hysteresis: f32) -> Self {
        let n = WINDOW_SIZE as f32;

        let mut sum = 0.0;
        let mut sum_abs = 0.0;
        let mut sum_sq = 0.0;
        for &x in samples.iter() {
            sum += x;
            sum_abs += libm::fabsf(x);
            sum_sq += x * x;
        }
        let mean = sum / n;

        let rms = libm::sqrtf(sum_sq / n);
        let mav = sum_abs / n;
        let variance = sum_sq / n - mean * mean;

        let mut zero_crossings = 0u16;
        let mut waveform_length = 0.0;
        for i in 1..WINDOW_SIZE {
            let prev = samples[i - 1];
            let curr = samples[i];
            waveform_length += libm::fabsf(curr - prev);
            if (prev > 0.0) != (curr > 0.0) && libm::fabsf(curr - prev) >= hysteresis {
                zero_crossings += 1;
            }
        }

        let mut slope_sign_changes = 0u16;
        for i in 1..WINDOW_SIZE - 1 {
            let left = samples[i] - samples[i - 1];
            let right = samples[i] - samples[i + 1];
            if left * right > 0.0
                && (libm::fabsf(left) >= hysteresis || libm::fabsf(right) >= hysteresis)
            {
                slope_sign_changes += 1;
            }
        }

        Self {
            rms,
            mav,
            variance,
            zero_crossings,
            slope_sign_changes,
            waveform_length,
        }
    }
}

/// Frequency-domain features of one channel.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrequencyDomainFeatures {
    /// Power-weighted mean frequency in Hz
    pub mean_frequency: f32,
    /// Cumulative-power median frequency in Hz
    pub median_frequency: f32,
    /// Power per band of [`FREQUENCY_BANDS`]
    pub band_powers: [f32; 4],
}

impl FrequencyDomainFeatures {
    /// Compute the frequency-domain set from one channel's spectrum.
    #[must_use]
    pub fn from_spectrum(
        analyzer: &SpectralAnalyzer,
        spectrum: &[f32; SPECTRUM_SIZE],
    ) -> Self {
        let mut band_powers = [0.0; 4];
        for (i, &(low, high)) in FREQUENCY_BANDS.iter().enumerate() {
            band_powers[i] = analyzer.band_power(spectrum, low, high);
        }

        Self {
            mean_frequency: analyzer.mean_frequency(spectrum),
            median_frequency: analyzer.median_frequency(spectrum),
            band_powers,
        }
    }
}

// ============================================================================
// Feature Extractor
// ============================================================================

/// Extracts one feature vector per analysis window.
#[derive(Clone, Debug)]
pub struct FeatureExtractor {
    analyzer: SpectralAnalyzer,
    layout: FeatureLayout,
    hysteresis: f32,
}

impl FeatureExtractor {
    /// Build the extractor for a session configuration.
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            analyzer: SpectralAnalyzer::new(config.sample_rate_hz as f32),
            layout: config.layout,
            hysteresis: config.hysteresis_uv,
        }
    }

    /// The layout this extractor emits.
    #[inline]
    #[must_use]
    pub fn layout(&self) -> FeatureLayout {
        self.layout
    }

    /// Extract the configured feature vector from a window.
    ///
    /// Channel-major: channel 0's full block precedes channel 1's, and
    /// within a block time-domain features precede frequency-domain ones.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::CapacityExceeded`] when the channel count
    /// and layout overflow the vector capacity.
    pub fn extract(&self, window: &Window) -> Result<FeatureVector, PipelineError> {
        let mut features = FeatureVector::new(window.timestamp_us);

        for ch in 0..window.n_channels as usize {
            let samples = window.channel(ch);
            let td = TimeDomainFeatures::from_channel(samples, self.hysteresis);

            features.push(td.rms)?;
            features.push(td.mav)?;
            features.push(td.variance)?;
            features.push(f32::from(td.zero_crossings))?;
            features.push(f32::from(td.slope_sign_changes))?;
            features.push(td.waveform_length)?;

            if matches!(self.layout, FeatureLayout::TimeDomain) {
                continue;
            }

            let spectrum = self.analyzer.window_spectrum(samples);
            let fd = FrequencyDomainFeatures::from_spectrum(&self.analyzer, &spectrum);

            features.push(fd.mean_frequency)?;
            if matches!(self.layout, FeatureLayout::Full) {
                features.push(fd.median_frequency)?;
                for &power in &fd.band_powers {
                    features.push(power)?;
                }
            }
        }

        Ok(features)
    }
}
