use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::{SignalError, SignalResult};
use crate::scoring::StateScorer;
use crate::source::SignalSource;
use crate::spectral;
use crate::types::{ModeProfile, StreamPacket};

/// Tunables for one acquisition loop run.
#[derive(Debug, Clone, Copy)]
pub struct LoopConfig {
    /// Pause between polls. Trades feedback latency against device and CPU
    /// load; the two scoring profiles default differently.
    pub poll_interval: Duration,
    /// Smallest window worth transforming; shorter drains count as warm-up.
    pub min_window: usize,
    /// Grace period before the first poll so the board can accumulate an
    /// initial window.
    pub warmup: Duration,
}

/// The cooperative polling loop for one armed session.
///
/// Owns the source for the lifetime of the stream. Every cycle drains the
/// raw buffer, scores it, and pushes a packet downstream; any in-cycle fault
/// is logged and the next cycle proceeds. The loop ends only when `stop`
/// flips (or the downstream channel closes), and hands the source back so
/// the stop path can release the device strictly after the final cycle.
pub async fn run(
    mut source: Box<dyn SignalSource>,
    scorer: StateScorer,
    mode_profile: ModeProfile,
    config: LoopConfig,
    data_tx: mpsc::Sender<StreamPacket>,
    mut stop: watch::Receiver<bool>,
) -> Box<dyn SignalSource> {
    info!(
        "acquisition loop started (poll every {:?}, min window {})",
        config.poll_interval, config.min_window
    );

    tokio::select! {
        _ = tokio::time::sleep(config.warmup) => {}
        _ = stop.changed() => {}
    }

    let mut cycles: u64 = 0;
    while !*stop.borrow() {
        cycles += 1;
        match cycle(source.as_mut(), &scorer, mode_profile, config.min_window) {
            Ok(Some(packet)) => {
                if data_tx.send(packet).await.is_err() {
                    warn!("output channel closed, stopping acquisition");
                    break;
                }
            }
            Ok(None) => debug!("cycle {cycles}: no scorable window yet"),
            Err(e) => warn!("cycle {cycles} failed, continuing: {e}"),
        }

        tokio::select! {
            _ = tokio::time::sleep(config.poll_interval) => {}
            changed = stop.changed() => {
                if changed.is_err() {
                    // Controller went away without an explicit stop
                    break;
                }
            }
        }
    }

    info!("acquisition loop ended after {cycles} cycle(s)");
    source
}

/// One poll: drain, transform the reference channel, score, package.
fn cycle(
    source: &mut dyn SignalSource,
    scorer: &StateScorer,
    mode_profile: ModeProfile,
    min_window: usize,
) -> SignalResult<Option<StreamPacket>> {
    let channels = source.drain()?;
    // Reference channel is the first EEG channel
    let window: &[f32] = channels.first().map(Vec::as_slice).unwrap_or(&[]);

    let spectral = if window.len() >= min_window {
        spectral::band_powers(window, source.sample_rate_hz())
    } else {
        Err(SignalError::InsufficientData {
            got: window.len(),
            need: min_window,
        })
    };

    let features = scorer.evaluate(spectral, source.kind(), mode_profile);
    Ok(features.map(|features| StreamPacket {
        features,
        captured_at: Utc::now(),
    }))
}
