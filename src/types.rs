use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identity of one connected broadcast endpoint
pub type SubscriberId = Uuid;

/// Integrated spectral power per canonical EEG band, in µV²·Hz.
///
/// Values handed to consumers are always finite; the scorer substitutes
/// defaults before anything non-finite can travel downstream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandPowers {
    pub alpha: f64,
    pub beta: f64,
    pub theta: f64,
    pub gamma: f64,
}

impl BandPowers {
    /// Neutral placeholder used when a hardware transform goes non-finite.
    pub const NEUTRAL: BandPowers = BandPowers {
        alpha: 1.0,
        beta: 1.0,
        theta: 1.0,
        gamma: 1.0,
    };

    pub const ZERO: BandPowers = BandPowers {
        alpha: 0.0,
        beta: 0.0,
        theta: 0.0,
        gamma: 0.0,
    };

    pub fn total(&self) -> f64 {
        self.alpha + self.beta + self.theta + self.gamma
    }

    pub fn is_finite(&self) -> bool {
        self.alpha.is_finite()
            && self.beta.is_finite()
            && self.theta.is_finite()
            && self.gamma.is_finite()
    }

    /// Per-band share of total power as percentages, `[alpha, beta, theta,
    /// gamma]`. The epsilon keeps a zero-total input from dividing by zero;
    /// callers treat zero total as "no signal" before ever reading these.
    pub fn percentages(&self) -> [f64; 4] {
        let denom = self.total() + 1e-10;
        [
            self.alpha / denom * 100.0,
            self.beta / denom * 100.0,
            self.theta / denom * 100.0,
            self.gamma / denom * 100.0,
        ]
    }
}

/// Normalized 0-100 state scores. Which variant is produced depends on the
/// deployment's scoring profile; the two are never active at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScoreSet {
    TwoAxis {
        focus_score: f64,
        load_score: f64,
        anomaly_score: f64,
    },
    ThreeAxis {
        calm_score: f64,
        stressed_score: f64,
        normal_score: f64,
    },
}

impl ScoreSet {
    pub fn values(&self) -> [f64; 3] {
        match *self {
            ScoreSet::TwoAxis {
                focus_score,
                load_score,
                anomaly_score,
            } => [focus_score, load_score, anomaly_score],
            ScoreSet::ThreeAxis {
                calm_score,
                stressed_score,
                normal_score,
            } => [calm_score, stressed_score, normal_score],
        }
    }
}

/// Band powers plus derived scores, flattened into one wire object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EegFeatures {
    #[serde(flatten)]
    pub bands: BandPowers,
    #[serde(flatten)]
    pub scores: ScoreSet,
}

/// Which scoring formula set a deployment runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringProfile {
    TwoAxis,
    ThreeAxis,
}

impl std::str::FromStr for ScoringProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "two_axis" => Ok(ScoringProfile::TwoAxis),
            "three_axis" => Ok(ScoringProfile::ThreeAxis),
            other => Err(format!("unknown scoring profile: {other}")),
        }
    }
}

/// Waveform parameterization for the synthetic board, and the baseline the
/// scorer falls back to when no usable spectrum exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeProfile {
    Calm,
    Stressed,
    Normal,
}

impl ModeProfile {
    /// Map a free-form session mode onto a waveform profile. Modes outside
    /// the known set get the balanced parameterization.
    pub fn from_mode(mode: &str) -> Self {
        match mode {
            "calm" => ModeProfile::Calm,
            "stressed" => ModeProfile::Stressed,
            _ => ModeProfile::Normal,
        }
    }

    /// Baseline band powers substituted when the spectral path yields
    /// nothing usable on a synthetic source.
    pub fn baseline_powers(&self) -> BandPowers {
        match self {
            ModeProfile::Calm => BandPowers {
                alpha: 12.0,
                beta: 2.5,
                theta: 4.0,
                gamma: 1.0,
            },
            ModeProfile::Stressed => BandPowers {
                alpha: 3.0,
                beta: 9.0,
                theta: 2.5,
                gamma: 6.0,
            },
            ModeProfile::Normal => BandPowers {
                alpha: 5.0,
                beta: 4.5,
                theta: 5.5,
                gamma: 4.0,
            },
        }
    }
}

/// Whether a source produces real measurements or generated ones. The scorer
/// picks its fallback behavior off this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Hardware,
    Synthetic,
}

/// Transport addressing for the physical board.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionParams {
    pub serial_port: Option<String>,
    pub mac_address: Option<String>,
    pub dongle_port: Option<String>,
}

impl ConnectionParams {
    pub fn is_empty(&self) -> bool {
        self.serial_port.is_none() && self.mac_address.is_none() && self.dongle_port.is_none()
    }

    /// Field-wise resolution, explicit values winning over the fallback.
    pub fn or(self, fallback: &ConnectionParams) -> ConnectionParams {
        ConnectionParams {
            serial_port: self.serial_port.or_else(|| fallback.serial_port.clone()),
            mac_address: self.mac_address.or_else(|| fallback.mac_address.clone()),
            dongle_port: self.dongle_port.or_else(|| fallback.dongle_port.clone()),
        }
    }
}

/// One scored acquisition cycle, as produced by the acquisition loop.
#[derive(Debug, Clone, Copy)]
pub struct StreamPacket {
    pub features: EegFeatures,
    pub captured_at: DateTime<Utc>,
}

/// Record handed to the persistence and cloud-sync sinks after each cycle.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredEvent {
    pub timestamp: DateTime<Utc>,
    pub mode: String,
    pub user_id: String,
    pub context: Value,
    #[serde(flatten)]
    pub features: EegFeatures,
}

/// Messages sent to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Current session state, sent to every subscriber on registration
    StateSync { is_recording: bool, mode: String },

    /// One scored acquisition cycle
    EegData {
        data: EegFeatures,
        mode: String,
        timestamp: DateTime<Utc>,
    },

    /// The session mode changed
    ModeChanged { mode: String },

    RecordingStarted,

    RecordingStopped,

    /// Non-fatal progress information for the originating client
    Info { message: String },

    /// Surfaced failure, with optional diagnostic detail
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
}

/// Commands accepted from clients. Unknown `type` values deserialize to
/// `Unknown` and are dropped without an error reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    SetMode {
        #[serde(default = "default_mode")]
        mode: String,
    },
    SetContext {
        #[serde(default)]
        context: Value,
    },
    SetUser {
        #[serde(default = "default_user")]
        user_id: String,
    },
    StartRecording {
        serial_port: Option<String>,
        mac_address: Option<String>,
        dongle_port: Option<String>,
    },
    StopRecording,
    #[serde(other)]
    Unknown,
}

pub(crate) fn default_mode() -> String {
    "normal".to_string()
}

pub(crate) fn default_user() -> String {
    "default".to_string()
}
