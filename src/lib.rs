pub mod acquisition;
pub mod broadcast;
pub mod config;
pub mod discovery;
pub mod error;
pub mod scoring;
pub mod session;
pub mod sink;
pub mod source;
pub mod spectral;
pub mod types;
pub mod websocket;

pub use broadcast::SubscriberRegistry;
pub use config::{BoardConfig, BoardKind, ServiceConfig};
pub use error::{SignalError, SignalResult};
pub use scoring::StateScorer;
pub use session::{RouterCommand, SessionHandle, SessionRouter};
pub use sink::{CloudEventSink, EventSink, PostgresEventSink};
pub use source::{SerialBoard, SignalSource, SyntheticBoard};
pub use types::*;
pub use websocket::{handle_websocket, AppState};
