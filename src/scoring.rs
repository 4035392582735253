use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::error::{SignalError, SignalResult};
use crate::types::{BandPowers, EegFeatures, ModeProfile, ScoreSet, ScoringProfile, SourceKind};

/// Derives normalized state scores from band powers, absorbing every spectral
/// failure with a profile-appropriate substitute. The shared counter ticks on
/// every evaluation, so a consumer watching it can tell a stalled pipeline
/// from a quiet one.
pub struct StateScorer {
    profile: ScoringProfile,
    counter: Arc<AtomicU64>,
}

impl StateScorer {
    pub fn new(profile: ScoringProfile, counter: Arc<AtomicU64>) -> Self {
        Self { profile, counter }
    }

    /// Turn one cycle's spectral outcome into scores.
    ///
    /// Returns `None` when a hardware source has nothing to say yet (warm-up
    /// or silent electrodes). Synthetic sources never go quiet: any failure
    /// substitutes mode-profile defaults perturbed by the counter, so
    /// consecutive outputs visibly differ even with no new samples.
    pub fn evaluate(
        &self,
        spectral: SignalResult<BandPowers>,
        kind: SourceKind,
        mode_profile: ModeProfile,
    ) -> Option<EegFeatures> {
        let tick = self.counter.fetch_add(1, Ordering::Relaxed);

        let bands = match spectral {
            Ok(p) if p.is_finite() && p.total() > 0.0 => p,
            Ok(_) if kind == SourceKind::Synthetic => {
                debug!("no usable signal, substituting {mode_profile:?} defaults");
                fallback_powers(mode_profile, tick)
            }
            // Finite but zero total on hardware: no signal yet
            Ok(p) if p.is_finite() => return None,
            // Non-finite on hardware: neutral placeholder keeps the flow alive
            Ok(_) => BandPowers::NEUTRAL,
            Err(_) if kind == SourceKind::Synthetic => fallback_powers(mode_profile, tick),
            Err(SignalError::InsufficientData { got, need }) => {
                debug!("waiting for samples ({got}/{need})");
                return None;
            }
            Err(e) => {
                debug!("spectral fault absorbed: {e}");
                BandPowers::NEUTRAL
            }
        };

        let scores = match self.profile {
            ScoringProfile::TwoAxis => two_axis_scores(&bands),
            ScoringProfile::ThreeAxis => three_axis_scores(&bands),
        };
        Some(EegFeatures { bands, scores })
    }
}

/// Deterministic substitute band powers for a synthetic source.
///
/// Each band oscillates around its profile baseline at its own rate and
/// phase, driven purely by the monotonic counter.
pub fn fallback_powers(profile: ModeProfile, tick: u64) -> BandPowers {
    let base = profile.baseline_powers();
    let t = tick as f64;
    BandPowers {
        alpha: base.alpha * (1.0 + 0.25 * (0.53 * t).sin()),
        beta: base.beta * (1.0 + 0.22 * (0.71 * t + 1.3).sin()),
        theta: base.theta * (1.0 + 0.20 * (0.37 * t + 0.6).sin()),
        gamma: base.gamma * (1.0 + 0.18 * (0.89 * t + 2.1).sin()),
    }
}

fn two_axis_scores(p: &BandPowers) -> ScoreSet {
    let [alpha, beta, theta, gamma] = p.percentages();

    // Alpha dominance over theta reads as focus
    let mut focus = if theta > 0.1 {
        clip(50.0 + (alpha / (theta + 1e-6) - 1.0) * 25.0)
    } else {
        clip(alpha * 2.0)
    };
    // Beta share reads as cognitive load
    let mut load = clip(beta * 3.0);
    // An uneven band distribution reads as anomalous
    let mut anomaly = clip(std_dev(&[alpha, beta, theta, gamma]) / 20.0 * 100.0);

    if flat_spectrum(focus, load, anomaly) {
        // Pathologically flat spectra push all three scores toward zero.
        // Recompute from band ranges so downstream consumers still see
        // meaningful variation, clamped away from the extremes.
        let max_band = alpha.max(beta).max(theta).max(gamma);
        let min_band = alpha.min(beta).min(theta).min(gamma);
        focus = (40.0 + (alpha - theta) * 2.0).clamp(10.0, 90.0);
        load = (30.0 + beta * 1.5).clamp(10.0, 90.0);
        anomaly = (25.0 + (max_band - min_band) * 1.5).clamp(10.0, 90.0);
    }

    ScoreSet::TwoAxis {
        focus_score: clip(focus),
        load_score: clip(load),
        anomaly_score: clip(anomaly),
    }
}

/// Validity predicate for the two-axis recompute path: a spectrum so flat
/// that every score collapsed below 5.
fn flat_spectrum(focus: f64, load: f64, anomaly: f64) -> bool {
    focus < 5.0 && load < 5.0 && anomaly < 5.0
}

fn three_axis_scores(p: &BandPowers) -> ScoreSet {
    let [alpha, beta, _theta, gamma] = p.percentages();
    let pcts = p.percentages();

    // Calm blends alpha dominance with low beta+gamma arousal; stressed is
    // the symmetric opposite. Each half caps at 50.
    let alpha_dominance = (alpha / 40.0 * 50.0).min(50.0);
    let low_arousal = ((1.0 - (beta + gamma) / 50.0) * 50.0).clamp(0.0, 50.0);
    let calm = round1(clip(alpha_dominance + low_arousal));

    let arousal_dominance = ((beta + gamma) / 50.0 * 50.0).min(50.0);
    let low_alpha = ((1.0 - alpha / 40.0) * 50.0).clamp(0.0, 50.0);
    let stressed = round1(clip(arousal_dominance + low_alpha));

    // Normal is distance from the uniform 25% split, as mean absolute
    // deviation scaled so 0 deviation -> 100 and 25 points -> 0.
    let mad = pcts.iter().map(|v| (v - 25.0).abs()).sum::<f64>() / 4.0;
    let normal = round1(clip(100.0 * (1.0 - mad / 25.0)));

    ScoreSet::ThreeAxis {
        calm_score: calm,
        stressed_score: stressed,
        normal_score: normal,
    }
}

fn clip(v: f64) -> f64 {
    v.clamp(0.0, 100.0)
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Population standard deviation.
fn std_dev(values: &[f64]) -> f64 {
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer(profile: ScoringProfile) -> StateScorer {
        StateScorer::new(profile, Arc::new(AtomicU64::new(0)))
    }

    fn assert_in_range(scores: ScoreSet) {
        for v in scores.values() {
            assert!((0.0..=100.0).contains(&v), "score out of range: {v}");
        }
    }

    #[test]
    fn all_scores_stay_in_range_across_inputs() {
        let inputs = [
            BandPowers {
                alpha: 1000.0,
                beta: 0.001,
                theta: 0.0,
                gamma: 0.0,
            },
            BandPowers {
                alpha: 0.0,
                beta: 500.0,
                theta: 0.0,
                gamma: 500.0,
            },
            BandPowers::NEUTRAL,
            BandPowers {
                alpha: 0.25,
                beta: 0.25,
                theta: 0.25,
                gamma: 0.25,
            },
        ];
        for profile in [ScoringProfile::TwoAxis, ScoringProfile::ThreeAxis] {
            let s = scorer(profile);
            for p in inputs {
                let features = s
                    .evaluate(Ok(p), SourceKind::Hardware, ModeProfile::Normal)
                    .unwrap();
                assert_in_range(features.scores);
            }
        }
    }

    #[test]
    fn balanced_bands_give_neutral_two_axis_scores() {
        let s = scorer(ScoringProfile::TwoAxis);
        let features = s
            .evaluate(
                Ok(BandPowers::NEUTRAL),
                SourceKind::Hardware,
                ModeProfile::Normal,
            )
            .unwrap();
        match features.scores {
            ScoreSet::TwoAxis {
                focus_score,
                load_score,
                anomaly_score,
            } => {
                assert!((focus_score - 50.0).abs() < 1e-9);
                assert!((load_score - 75.0).abs() < 1e-9);
                assert!(anomaly_score.abs() < 1e-9);
            }
            other => panic!("wrong profile: {other:?}"),
        }
    }

    #[test]
    fn alpha_dominant_spectrum_scores_calmer_than_stressed() {
        let s = scorer(ScoringProfile::ThreeAxis);
        let features = s
            .evaluate(
                Ok(ModeProfile::Calm.baseline_powers()),
                SourceKind::Hardware,
                ModeProfile::Calm,
            )
            .unwrap();
        match features.scores {
            ScoreSet::ThreeAxis {
                calm_score,
                stressed_score,
                ..
            } => assert!(calm_score >= stressed_score),
            other => panic!("wrong profile: {other:?}"),
        }
    }

    #[test]
    fn beta_dominant_spectrum_scores_more_stressed_than_calm() {
        let s = scorer(ScoringProfile::ThreeAxis);
        let features = s
            .evaluate(
                Ok(ModeProfile::Stressed.baseline_powers()),
                SourceKind::Hardware,
                ModeProfile::Stressed,
            )
            .unwrap();
        match features.scores {
            ScoreSet::ThreeAxis {
                calm_score,
                stressed_score,
                ..
            } => assert!(stressed_score > calm_score),
            other => panic!("wrong profile: {other:?}"),
        }
    }

    #[test]
    fn three_axis_scores_are_rounded_to_one_decimal() {
        let s = scorer(ScoringProfile::ThreeAxis);
        let features = s
            .evaluate(
                Ok(BandPowers {
                    alpha: 3.3337,
                    beta: 1.991,
                    theta: 2.173,
                    gamma: 0.777,
                }),
                SourceKind::Hardware,
                ModeProfile::Normal,
            )
            .unwrap();
        for v in features.scores.values() {
            assert!((v * 10.0 - (v * 10.0).round()).abs() < 1e-9, "not rounded: {v}");
        }
    }

    #[test]
    fn hardware_warm_up_returns_nothing() {
        let s = scorer(ScoringProfile::TwoAxis);
        let out = s.evaluate(
            Err(SignalError::InsufficientData { got: 3, need: 50 }),
            SourceKind::Hardware,
            ModeProfile::Normal,
        );
        assert!(out.is_none());
    }

    #[test]
    fn hardware_zero_signal_returns_nothing() {
        let s = scorer(ScoringProfile::TwoAxis);
        let out = s.evaluate(
            Ok(BandPowers::ZERO),
            SourceKind::Hardware,
            ModeProfile::Normal,
        );
        assert!(out.is_none());
    }

    #[test]
    fn hardware_transform_fault_substitutes_neutral_bands() {
        let s = scorer(ScoringProfile::TwoAxis);
        let features = s
            .evaluate(
                Err(SignalError::Transform),
                SourceKind::Hardware,
                ModeProfile::Normal,
            )
            .unwrap();
        assert_eq!(features.bands, BandPowers::NEUTRAL);
    }

    #[test]
    fn synthetic_fallback_varies_between_consecutive_calls() {
        let s = scorer(ScoringProfile::TwoAxis);
        let first = s
            .evaluate(
                Err(SignalError::InsufficientData { got: 0, need: 50 }),
                SourceKind::Synthetic,
                ModeProfile::Calm,
            )
            .unwrap();
        let second = s
            .evaluate(
                Err(SignalError::InsufficientData { got: 0, need: 50 }),
                SourceKind::Synthetic,
                ModeProfile::Calm,
            )
            .unwrap();
        assert_ne!(first.bands, second.bands);
    }

    #[test]
    fn synthetic_fallback_is_deterministic_per_tick() {
        assert_eq!(
            fallback_powers(ModeProfile::Stressed, 7),
            fallback_powers(ModeProfile::Stressed, 7)
        );
        assert_ne!(
            fallback_powers(ModeProfile::Stressed, 7),
            fallback_powers(ModeProfile::Stressed, 8)
        );
    }

    #[test]
    fn fallback_keeps_the_profile_dominant_band() {
        for tick in 0..32 {
            let p = fallback_powers(ModeProfile::Calm, tick);
            assert!(p.alpha > p.beta && p.alpha > p.gamma);
        }
    }

    #[test]
    fn counter_ticks_on_every_evaluation() {
        let counter = Arc::new(AtomicU64::new(0));
        let s = StateScorer::new(ScoringProfile::TwoAxis, counter.clone());
        for _ in 0..3 {
            s.evaluate(
                Ok(BandPowers::NEUTRAL),
                SourceKind::Hardware,
                ModeProfile::Normal,
            );
        }
        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }
}
