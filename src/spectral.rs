use rustfft::{num_complex::Complex64, FftPlanner};

use crate::error::{SignalError, SignalResult};
use crate::types::BandPowers;

/// Canonical EEG frequency bands, Hz
pub const THETA_HZ: (f64, f64) = (4.0, 8.0);
pub const ALPHA_HZ: (f64, f64) = (8.0, 13.0);
pub const BETA_HZ: (f64, f64) = (13.0, 30.0);
pub const GAMMA_HZ: (f64, f64) = (30.0, 100.0);

/// Minimum window length a transform can work with at all.
const MIN_WINDOW: usize = 4;

/// Decompose one channel's raw window into per-band power.
///
/// Odd-length windows are truncated by one sample. The window is transformed
/// with a forward DFT, the one-sided power spectral density is `|X|²/N`, and
/// each band integrates the PSD over its in-range bins with the trapezoidal
/// rule. A band whose range holds no bins contributes zero.
///
/// An all-zero window legitimately produces all-zero powers; callers must
/// treat zero total power as "no signal" rather than normalizing by it.
pub fn band_powers(window: &[f32], sample_rate_hz: f64) -> SignalResult<BandPowers> {
    let n = window.len() & !1;
    if n < MIN_WINDOW {
        return Err(SignalError::InsufficientData {
            got: window.len(),
            need: MIN_WINDOW,
        });
    }

    let mut buffer: Vec<Complex64> = window[..n]
        .iter()
        .map(|&v| Complex64::new(f64::from(v), 0.0))
        .collect();
    FftPlanner::<f64>::new().plan_fft_forward(n).process(&mut buffer);

    // One-sided spectrum: bins 0..=n/2
    let psd: Vec<f64> = buffer[..n / 2 + 1]
        .iter()
        .map(|c| c.norm_sqr() / n as f64)
        .collect();
    let bin_hz = sample_rate_hz / n as f64;

    let powers = BandPowers {
        theta: integrate(&psd, bin_hz, THETA_HZ),
        alpha: integrate(&psd, bin_hz, ALPHA_HZ),
        beta: integrate(&psd, bin_hz, BETA_HZ),
        gamma: integrate(&psd, bin_hz, GAMMA_HZ),
    };

    if !powers.is_finite() {
        return Err(SignalError::Transform);
    }
    Ok(powers)
}

/// Trapezoidal integration of the PSD over the bins whose center frequency
/// falls inside `range` (inclusive on both ends).
fn integrate(psd: &[f64], bin_hz: f64, range: (f64, f64)) -> f64 {
    let in_range: Vec<usize> = (0..psd.len())
        .filter(|&k| {
            let f = k as f64 * bin_hz;
            f >= range.0 && f <= range.1
        })
        .collect();
    if in_range.len() < 2 {
        return 0.0;
    }
    in_range
        .windows(2)
        .map(|pair| 0.5 * (psd[pair[0]] + psd[pair[1]]) * bin_hz)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU;

    fn sine_window(freq_hz: f32, amp: f32, rate_hz: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| amp * (TAU * freq_hz * i as f32 / rate_hz).sin())
            .collect()
    }

    #[test]
    fn too_few_samples_is_insufficient_data() {
        let err = band_powers(&[1.0, 2.0, 3.0], 250.0).unwrap_err();
        assert!(matches!(
            err,
            SignalError::InsufficientData { got: 3, need: 4 }
        ));
    }

    #[test]
    fn all_zero_window_yields_all_zero_powers() {
        let powers = band_powers(&[0.0; 256], 250.0).unwrap();
        assert_eq!(powers, BandPowers::ZERO);
        assert_eq!(powers.total(), 0.0);
    }

    #[test]
    fn odd_length_window_is_truncated_not_rejected() {
        let window = sine_window(10.0, 20.0, 250.0, 251);
        assert!(band_powers(&window, 250.0).is_ok());
    }

    #[test]
    fn alpha_tone_lands_in_the_alpha_band() {
        let window = sine_window(10.0, 30.0, 250.0, 500);
        let p = band_powers(&window, 250.0).unwrap();
        assert!(p.alpha > p.theta);
        assert!(p.alpha > p.beta);
        assert!(p.alpha > p.gamma);
    }

    #[test]
    fn beta_tone_lands_in_the_beta_band() {
        let window = sine_window(20.0, 30.0, 250.0, 500);
        let p = band_powers(&window, 250.0).unwrap();
        assert!(p.beta > p.alpha);
        assert!(p.beta > p.theta);
        assert!(p.beta > p.gamma);
    }

    #[test]
    fn short_coarse_window_still_resolves_a_dominant_band() {
        // 60 samples at 250 Hz leaves ~4.2 Hz bins; a 10 Hz tone must still
        // show up strongest in alpha.
        let window = sine_window(10.0, 40.0, 250.0, 60);
        let p = band_powers(&window, 250.0).unwrap();
        assert!(p.alpha > p.theta);
        assert!(p.alpha > p.beta);
        assert!(p.alpha > p.gamma);
    }

    #[test]
    fn band_with_no_bins_contributes_zero() {
        // 8 samples at 16 Hz puts bins at 0/2/4/6/8 Hz, nothing above 8.
        let window = sine_window(4.0, 10.0, 16.0, 8);
        let p = band_powers(&window, 16.0).unwrap();
        assert_eq!(p.beta, 0.0);
        assert_eq!(p.gamma, 0.0);
    }
}
