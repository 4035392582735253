use std::env;
use std::time::Duration;

use crate::types::{ConnectionParams, ScoringProfile};

/// Which source variant a deployment drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardKind {
    /// Generated mode-parameterized waveforms, for demos and tests
    Synthetic,
    /// Physical board over a serial/dongle transport
    Serial,
}

/// Board-facing configuration.
#[derive(Debug, Clone)]
pub struct BoardConfig {
    pub kind: BoardKind,
    /// Device identifier, used for logs and operator diagnostics
    pub board_id: String,
    pub sample_rate_hz: f64,
    pub channels: usize,
    pub baud: u32,
    /// Environment-provided transport addressing; explicit command fields
    /// override these, auto-detection fills in when both are absent
    pub params: ConnectionParams,
}

/// Service configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address the WebSocket endpoint binds to
    pub bind_addr: String,
    pub board: BoardConfig,
    /// Scoring formula set for this deployment
    pub scoring_profile: ScoringProfile,
    /// Explicit poll interval; when unset each profile uses its default
    pub poll_interval_override: Option<Duration>,
    /// Smallest raw window the spectral path will accept
    pub min_window_samples: usize,
    /// PostgreSQL event persistence, disabled when unset
    pub database_url: Option<String>,
    /// Remote event mirror, disabled when unset
    pub cloud_sync_url: Option<String>,
}

/// The two-axis profile targets fast mental-state feedback; the three-axis
/// profile can afford a slower cadence.
const TWO_AXIS_POLL: Duration = Duration::from_millis(250);
const THREE_AXIS_POLL: Duration = Duration::from_millis(500);

impl ServiceConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let kind = match env::var("BOARD_KIND").as_deref() {
            Ok("serial") => BoardKind::Serial,
            Ok("synthetic") | Err(_) => BoardKind::Synthetic,
            Ok(other) => {
                return Err(ConfigError::InvalidValue {
                    var: "BOARD_KIND",
                    value: other.to_string(),
                })
            }
        };

        let scoring_profile = match env::var("SCORING_PROFILE") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                var: "SCORING_PROFILE",
                value: raw.clone(),
            })?,
            Err(_) => ScoringProfile::TwoAxis,
        };

        Ok(Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8765".to_string()),
            board: BoardConfig {
                kind,
                board_id: env::var("BOARD_ID").unwrap_or_else(|_| "ganglion".to_string()),
                sample_rate_hz: parse_env("BOARD_SAMPLE_RATE_HZ", 250.0)?,
                channels: parse_env("BOARD_CHANNELS", 4)?,
                baud: parse_env("BOARD_BAUD", 115_200)?,
                params: ConnectionParams {
                    serial_port: env::var("BOARD_SERIAL_PORT").ok(),
                    mac_address: env::var("BOARD_MAC_ADDRESS").ok(),
                    dongle_port: env::var("BOARD_DONGLE_PORT").ok(),
                },
            },
            scoring_profile,
            poll_interval_override: env::var("POLL_INTERVAL_MS")
                .ok()
                .map(|raw| {
                    raw.parse::<u64>()
                        .map(Duration::from_millis)
                        .map_err(|_| ConfigError::InvalidValue {
                            var: "POLL_INTERVAL_MS",
                            value: raw,
                        })
                })
                .transpose()?,
            min_window_samples: parse_env("MIN_WINDOW_SAMPLES", 50)?,
            database_url: env::var("DATABASE_URL").ok(),
            cloud_sync_url: env::var("CLOUD_SYNC_URL").ok(),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval_override
            .unwrap_or(match self.scoring_profile {
                ScoringProfile::TwoAxis => TWO_AXIS_POLL,
                ScoringProfile::ThreeAxis => THREE_AXIS_POLL,
            })
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value: raw }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config(profile: ScoringProfile) -> ServiceConfig {
        ServiceConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            board: BoardConfig {
                kind: BoardKind::Synthetic,
                board_id: "test".to_string(),
                sample_rate_hz: 250.0,
                channels: 4,
                baud: 115_200,
                params: ConnectionParams::default(),
            },
            scoring_profile: profile,
            poll_interval_override: None,
            min_window_samples: 50,
            database_url: None,
            cloud_sync_url: None,
        }
    }

    #[test]
    fn profiles_poll_at_their_own_cadence() {
        assert_eq!(
            base_config(ScoringProfile::TwoAxis).poll_interval(),
            Duration::from_millis(250)
        );
        assert_eq!(
            base_config(ScoringProfile::ThreeAxis).poll_interval(),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn explicit_interval_overrides_the_profile_default() {
        let mut config = base_config(ScoringProfile::TwoAxis);
        config.poll_interval_override = Some(Duration::from_millis(40));
        assert_eq!(config.poll_interval(), Duration::from_millis(40));
    }
}
