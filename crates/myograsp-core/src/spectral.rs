//! Spectral analysis: Hamming window, fixed-size FFT, magnitude spectrum.
//!
//! The FFT is a 64-point iterative radix-2 transform with precomputed
//! twiddle and window tables; no allocation, bounded runtime. A 256-sample
//! analysis window is processed as four 64-sample sub-blocks whose power
//! spectra are averaged (Welch estimate) before the magnitude is taken.

use crate::window::WINDOW_SIZE;

/// FFT length (power of two).
pub const FFT_SIZE: usize = 64;

/// One-sided spectrum length.
pub const SPECTRUM_SIZE: usize = FFT_SIZE / 2;

/// Sub-blocks per analysis window.
const SUB_BLOCKS: usize = WINDOW_SIZE / FFT_SIZE;

const FFT_BITS: u32 = FFT_SIZE.trailing_zeros();

/// Fixed-size spectral analyzer with precomputed tables.
#[derive(Clone, Debug)]
pub struct SpectralAnalyzer {
    sample_rate_hz: f32,
    hamming: [f32; FFT_SIZE],
    tw_re: [f32; SPECTRUM_SIZE],
    tw_im: [f32; SPECTRUM_SIZE],
}

impl SpectralAnalyzer {
    /// Create an analyzer for the given sample rate.
    #[must_use]
    pub fn new(sample_rate_hz: f32) -> Self {
        let mut hamming = [0.0; FFT_SIZE];
        for (i, w) in hamming.iter_mut().enumerate() {
            *w = 0.54
                - 0.46
                    * libm::cosf(
                        2.0 * core::f32::consts::PI * i as f32 / (FFT_SIZE - 1) as f32,
                    );
        }

        let mut tw_re = [0.0; SPECTRUM_SIZE];
        let mut tw_im = [0.0; SPECTRUM_SIZE];
        for k in 0..SPECTRUM_SIZE {
            let angle = -2.0 * core::f32::consts::PI * k as f32 / FFT_SIZE as f32;
            tw_re[k] = libm::cosf(angle);
            tw_im[k] = libm::sinf(angle);
        }

        Self {
            sample_rate_hz,
            hamming,
            tw_re,
            tw_im,
        }
    }

    /// Frequency resolution in Hz per bin.
    #[inline]
    #[must_use]
    pub fn frequency_resolution(&self) -> f32 {
        self.sample_rate_hz / FFT_SIZE as f32
    }

    /// Magnitude spectrum of a single windowed sub-block.
    #[must_use]
    pub fn magnitude_spectrum(&self, block: &[f32; FFT_SIZE]) -> [f32; SPECTRUM_SIZE] {
        let mut re = [0.0; FFT_SIZE];
        let mut im = [0.0; FFT_SIZE];

        // Apply analysis window during the bit-reversal copy.
        for i in 0..FFT_SIZE {
            let j = bit_reverse(i);
            re[j] = block[i] * self.hamming[i];
        }

        self.fft_in_place(&mut re, &mut im);

        let mut magnitude = [0.0; SPECTRUM_SIZE];
        for k in 0..SPECTRUM_SIZE {
            magnitude[k] = libm::sqrtf(re[k] * re[k] + im[k] * im[k]);
        }
        magnitude
    }

    /// Welch-averaged magnitude spectrum of a full analysis window.
    ///
    /// Power spectra of the non-overlapping sub-blocks are averaged, then
    /// the square root restores a magnitude spectrum.
    #[must_use]
    pub fn window_spectrum(&self, samples: &[f32; WINDOW_SIZE]) -> [f32; SPECTRUM_SIZE] {
        let mut power = [0.0f32; SPECTRUM_SIZE];

        for block_idx in 0..SUB_BLOCKS {
            let mut block = [0.0; FFT_SIZE];
            block.copy_from_slice(&samples[block_idx * FFT_SIZE..(block_idx + 1) * FFT_SIZE]);
            let magnitude = self.magnitude_spectrum(&block);
            for k in 0..SPECTRUM_SIZE {
                power[k] += magnitude[k] * magnitude[k];
            }
        }

        let mut spectrum = [0.0; SPECTRUM_SIZE];
        for k in 0..SPECTRUM_SIZE {
            spectrum[k] = libm::sqrtf(power[k] / SUB_BLOCKS as f32);
        }
        spectrum
    }

    /// Power integrated over bins whose center frequency lies in the
    /// half-open interval `[low_hz, high_hz)`.
    #[must_use]
    pub fn band_power(
        &self,
        spectrum: &[f32; SPECTRUM_SIZE],
        low_hz: f32,
        high_hz: f32,
    ) -> f32 {
        let resolution = self.frequency_resolution();
        let mut power = 0.0;
        for (k, &magnitude) in spectrum.iter().enumerate() {
            let center = k as f32 * resolution;
            if center >= low_hz && center < high_hz {
                power += magnitude * magnitude;
            }
        }
        power
    }

    /// Total power across the one-sided spectrum.
    #[must_use]
    pub fn total_power(&self, spectrum: &[f32; SPECTRUM_SIZE]) -> f32 {
        spectrum.iter().map(|&m| m * m).sum()
    }

    /// Power-weighted mean frequency in Hz (0 when the spectrum is empty).
    #[must_use]
    pub fn mean_frequency(&self, spectrum: &[f32; SPECTRUM_SIZE]) -> f32 {
        let resolution = self.frequency_resolution();
        let mut weighted = 0.0;
        let mut total = 0.0;
        for (k, &magnitude) in spectrum.iter().enumerate() {
            let power = magnitude * magnitude;
            weighted += k as f32 * resolution * power;
            total += power;
        }
        if total > 0.0 {
            weighted / total
        } else {
            0.0
        }
    }

    /// Median frequency in Hz: the first bin at which cumulative power
    /// reaches half the total (0 when the spectrum is empty).
    #[must_use]
    pub fn median_frequency(&self, spectrum: &[f32; SPECTRUM_SIZE]) -> f32 {
        let total = self.total_power(spectrum);
        if total <= 0.0 {
            return 0.0;
        }

        let half = total / 2.0;
        let mut cumulative = 0.0;
        for (k, &magnitude) in spectrum.iter().enumerate() {
            cumulative += magnitude * magnitude;
            if cumulative >= half {
                return k as f32 * self.frequency_resolution();
            }
        }
        (SPECTRUM_SIZE - 1) as f32 * self.frequency_resolution()
    }

    /// Iterative radix-2 decimation-in-time butterfly passes.
    ///
    /// Inputs must already be in bit-reversed order.
    fn fft_in_place(&self, re: &mut [f32; FFT_SIZE], im: &mut [f32; FFT_SIZE]) {
        let mut len = 2;
        while len <= FFT_SIZE {
            let half = len / 2;
            let stride = FFT_SIZE / len;
            let mut start = 0;
            while start < FFT_SIZE {
                for k in 0..half {
                    let tw_re = self.tw_re[k * stride];
                    let tw_im = self.tw_im[k * stride];

                    let even = start + k;
                    let odd = even + half;

                    let odd_re = re[odd] * tw_re - im[odd] * tw_im;
                    let odd_im = re[odd] * tw_im + im[odd] * tw_re;

                    re[odd] = re[even] - odd_re;
                    im[odd] = im[even] - odd_im;
                    re[even] += odd_re;
                    im[even] += odd_im;
                }
                start += len;
            }
            len *= 2;
        }
    }
}

/// Reverse the low `FFT_BITS` bits of an index.
#[inline]
const fn bit_reverse(index: usize) -> usize {
    (index.reverse_bits() >> (usize::BITS - FFT_BITS)) & (FFT_SIZE - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq_hz: f32, fs: f32) -> [f32; FFT_SIZE] {
        let mut block = [0.0; FFT_SIZE];
        for (i, x) in block.iter_mut().enumerate() {
            *x = libm::sinf(2.0 * core::f32::consts::PI * freq_hz * i as f32 / fs);
        }
        block
    }

    #[test]
    fn test_frequency_resolution() {
        let analyzer = SpectralAnalyzer::new(1000.0);
        assert!((analyzer.frequency_resolution() - 15.625).abs() < 1e-6);
    }

    #[test]
    fn test_impulse_has_flat_spectrum() {
        let analyzer = SpectralAnalyzer::new(1000.0);
        let mut impulse = [0.0; FFT_SIZE];
        impulse[0] = 1.0;
        let spectrum = analyzer.magnitude_spectrum(&impulse);

        // The windowed impulse h[0]*delta has |X[k]| = h[0] for every bin.
        let expected = 0.54 - 0.46; // Hamming endpoint
        for &m in &spectrum {
            assert!((m - expected).abs() < 1e-4, "bin magnitude {m} != {expected}");
        }
    }

    #[test]
    fn test_tone_peaks_at_expected_bin() {
        let analyzer = SpectralAnalyzer::new(1000.0);
        // Bin 8 at 1 kHz / 64 = 125 Hz, exactly periodic in the block.
        let spectrum = analyzer.magnitude_spectrum(&tone(125.0, 1000.0));

        let peak = spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(k, _)| k)
            .unwrap();
        assert_eq!(peak, 8);
    }

    #[test]
    fn test_band_power_additivity() {
        let analyzer = SpectralAnalyzer::new(1000.0);

        // Broadband-ish deterministic test signal.
        let mut window = [0.0; WINDOW_SIZE];
        for (i, x) in window.iter_mut().enumerate() {
            let t = i as f32 / 1000.0;
            *x = libm::sinf(2.0 * core::f32::consts::PI * 40.0 * t)
                + 0.7 * libm::sinf(2.0 * core::f32::consts::PI * 120.0 * t)
                + 0.4 * libm::sinf(2.0 * core::f32::consts::PI * 333.0 * t);
        }
        let spectrum = analyzer.window_spectrum(&window);

        let bands = [(0.0, 50.0), (50.0, 150.0), (150.0, 250.0), (250.0, 500.0)];
        let band_sum: f32 = bands
            .iter()
            .map(|&(lo, hi)| analyzer.band_power(&spectrum, lo, hi))
            .sum();
        let total = analyzer.total_power(&spectrum);

        assert!(total > 0.0);
        assert!(
            (band_sum - total).abs() <= total * 1e-4,
            "bands {band_sum} != total {total}"
        );
    }

    #[test]
    fn test_half_open_band_edges() {
        let analyzer = SpectralAnalyzer::new(1000.0);
        let mut spectrum = [0.0; SPECTRUM_SIZE];
        // Put power exactly on the 250 Hz bin (bin 16).
        spectrum[16] = 2.0;

        // 250 Hz belongs to [250, 500), not [150, 250).
        assert_eq!(analyzer.band_power(&spectrum, 150.0, 250.0), 0.0);
        assert_eq!(analyzer.band_power(&spectrum, 250.0, 500.0), 4.0);
    }

    #[test]
    fn test_mean_and_median_of_tone() {
        let analyzer = SpectralAnalyzer::new(1000.0);
        let mut window = [0.0; WINDOW_SIZE];
        for (i, x) in window.iter_mut().enumerate() {
            *x = libm::sinf(2.0 * core::f32::consts::PI * 125.0 * i as f32 / 1000.0);
        }
        let spectrum = analyzer.window_spectrum(&window);

        let resolution = analyzer.frequency_resolution();
        let mean = analyzer.mean_frequency(&spectrum);
        let median = analyzer.median_frequency(&spectrum);
        assert!((mean - 125.0).abs() < resolution, "mean {mean}");
        assert!((median - 125.0).abs() <= resolution, "median {median}");
    }

    #[test]
    fn test_empty_spectrum_features_are_zero() {
        let analyzer = SpectralAnalyzer::new(1000.0);
        let spectrum = [0.0; SPECTRUM_SIZE];
        assert_eq!(analyzer.mean_frequency(&spectrum), 0.0);
        assert_eq!(analyzer.median_frequency(&spectrum), 0.0);
        assert_eq!(analyzer.total_power(&spectrum), 0.0);
    }

    #[test]
    fn test_bit_reverse_is_involution() {
        for i in 0..FFT_SIZE {
            assert!(bit_reverse(i) < FFT_SIZE);
            assert_eq!(bit_reverse(bit_reverse(i)), i);
        }
    }
}
