use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::acquisition::{self, LoopConfig};
use crate::broadcast::SubscriberRegistry;
use crate::config::{BoardKind, ServiceConfig};
use crate::discovery;
use crate::scoring::StateScorer;
use crate::sink::EventSink;
use crate::source::{SerialBoard, SignalSource, SyntheticBoard};
use crate::types::{
    ClientCommand, ConnectionParams, ModeProfile, ScoredEvent, ServerMessage, StreamPacket,
    SubscriberId,
};

/// Where the session currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    Streaming,
}

/// The single acquisition context of the process. Owned exclusively by the
/// router task; everyone else sees it through [`SessionSnapshot`].
struct Session {
    mode: String,
    phase: Phase,
    context: Value,
    user_id: String,
    update_counter: Arc<AtomicU64>,
}

impl Session {
    fn new() -> Self {
        Self {
            mode: "normal".to_string(),
            phase: Phase::Idle,
            context: Value::Object(Default::default()),
            user_id: "default".to_string(),
            update_counter: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// Read-only view of the session, refreshed by the router on every
/// transition. Registration handlers use it to greet new subscribers.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub is_recording: bool,
    pub mode: String,
}

/// A client command tagged with the subscriber that issued it, so direct
/// replies can find their way back.
#[derive(Debug)]
pub struct RouterCommand {
    pub origin: SubscriberId,
    pub command: ClientCommand,
}

/// Handle through which WebSocket handlers talk to the router task.
#[derive(Clone)]
pub struct SessionHandle {
    pub commands: mpsc::Sender<RouterCommand>,
    snapshot: Arc<RwLock<SessionSnapshot>>,
    update_counter: Arc<AtomicU64>,
}

impl SessionHandle {
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.read().clone()
    }

    /// Monotonic count of scoring evaluations. A value that stops moving
    /// while the session claims to be streaming means a stalled pipeline,
    /// typically a hung device call.
    pub fn update_count(&self) -> u64 {
        self.update_counter.load(Ordering::Relaxed)
    }
}

/// The live acquisition machinery while streaming.
struct ActiveStream {
    data_rx: mpsc::Receiver<StreamPacket>,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<Box<dyn SignalSource>>,
}

/// Single-writer state machine governing the one acquisition session.
///
/// All commands from all connections and all packets from the acquisition
/// loop funnel into this task, so state transitions and outbound messages
/// are totally ordered without any session-wide lock.
pub struct SessionRouter {
    session: Session,
    config: ServiceConfig,
    registry: SubscriberRegistry,
    sinks: Vec<Arc<dyn EventSink>>,
    cmd_rx: mpsc::Receiver<RouterCommand>,
    stream: Option<ActiveStream>,
    snapshot: Arc<RwLock<SessionSnapshot>>,
}

enum Tick {
    Command(Option<RouterCommand>),
    Packet(Option<StreamPacket>),
}

impl SessionRouter {
    /// Spawn the router task. Returns the handle the WebSocket surface uses
    /// and the task itself.
    pub fn spawn(
        config: ServiceConfig,
        registry: SubscriberRegistry,
        sinks: Vec<Arc<dyn EventSink>>,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let session = Session::new();
        let update_counter = session.update_counter.clone();
        let snapshot = Arc::new(RwLock::new(SessionSnapshot {
            is_recording: false,
            mode: session.mode.clone(),
        }));

        let router = SessionRouter {
            session,
            config,
            registry,
            sinks,
            cmd_rx,
            stream: None,
            snapshot: snapshot.clone(),
        };
        let task = tokio::spawn(router.run());

        (
            SessionHandle {
                commands: cmd_tx,
                snapshot,
                update_counter,
            },
            task,
        )
    }

    async fn run(mut self) {
        info!("session router started");
        loop {
            let tick = {
                let cmd_rx = &mut self.cmd_rx;
                let stream = &mut self.stream;
                tokio::select! {
                    cmd = cmd_rx.recv() => Tick::Command(cmd),
                    // Resolves only while a stream is active; otherwise the
                    // branch pends forever and commands drive the loop alone.
                    packet = async {
                        match stream.as_mut() {
                            Some(active) => active.data_rx.recv().await,
                            None => std::future::pending().await,
                        }
                    } => Tick::Packet(packet),
                }
            };

            match tick {
                Tick::Command(Some(cmd)) => self.handle_command(cmd).await,
                Tick::Command(None) => break,
                Tick::Packet(Some(packet)) => self.relay(packet),
                Tick::Packet(None) => {
                    // The loop ended without a stop command; reconcile.
                    warn!("acquisition loop ended unexpectedly");
                    self.stop_recording().await;
                }
            }
        }
        // Command channel closed: release any live device before exiting.
        if self.stream.is_some() {
            self.stop_recording().await;
        }
        info!("session router stopped");
    }

    async fn handle_command(&mut self, RouterCommand { origin, command }: RouterCommand) {
        match command {
            ClientCommand::SetMode { mode } => {
                if mode != self.session.mode {
                    info!("mode changed to {mode}");
                    self.session.mode = mode.clone();
                    self.publish_snapshot();
                    self.registry
                        .broadcast(&ServerMessage::ModeChanged { mode });
                }
            }
            ClientCommand::SetContext { context } => {
                self.session.context = context;
            }
            ClientCommand::SetUser { user_id } => {
                self.session.user_id = user_id;
            }
            ClientCommand::StartRecording {
                serial_port,
                mac_address,
                dongle_port,
            } => {
                let explicit = ConnectionParams {
                    serial_port,
                    mac_address,
                    dongle_port,
                };
                self.start_recording(origin, explicit);
            }
            ClientCommand::StopRecording => {
                if self.stream.is_none() {
                    // Second stop in a row: nothing to do, nothing to release
                    debug!("stop requested while idle, ignoring");
                    return;
                }
                self.stop_recording().await;
            }
            ClientCommand::Unknown => debug!("ignoring command with unknown type"),
        }
    }

    fn start_recording(&mut self, origin: SubscriberId, explicit: ConnectionParams) {
        if self.session.phase != Phase::Idle {
            let _ = self.registry.send_to(
                origin,
                &ServerMessage::Info {
                    message: "Recording already in progress".to_string(),
                },
            );
            return;
        }

        self.session.phase = Phase::Connecting;
        let _ = self.registry.send_to(
            origin,
            &ServerMessage::Info {
                message: "Received start_recording command, initializing...".to_string(),
            },
        );

        let source = match self.open_source(origin, explicit) {
            Some(source) => source,
            None => {
                self.session.phase = Phase::Idle;
                return;
            }
        };

        let (data_tx, data_rx) = mpsc::channel(64);
        let (stop_tx, stop_rx) = watch::channel(false);
        let scorer = StateScorer::new(
            self.config.scoring_profile,
            self.session.update_counter.clone(),
        );
        let loop_config = LoopConfig {
            poll_interval: self.config.poll_interval(),
            min_window: self.config.min_window_samples,
            warmup: Duration::from_millis(300),
        };
        let mode_profile = ModeProfile::from_mode(&self.session.mode);
        let handle = tokio::spawn(acquisition::run(
            source,
            scorer,
            mode_profile,
            loop_config,
            data_tx,
            stop_rx,
        ));

        self.stream = Some(ActiveStream {
            data_rx,
            stop_tx,
            handle,
        });
        self.session.phase = Phase::Streaming;
        self.publish_snapshot();
        info!("recording started");
        self.registry.broadcast(&ServerMessage::RecordingStarted);
    }

    /// Build, connect and arm the configured source variant. On failure the
    /// origin gets an error with diagnostic detail and `None` comes back.
    fn open_source(
        &mut self,
        origin: SubscriberId,
        explicit: ConnectionParams,
    ) -> Option<Box<dyn SignalSource>> {
        let board = &self.config.board;
        let mut source: Box<dyn SignalSource> = match board.kind {
            BoardKind::Synthetic => {
                let mut synthetic = SyntheticBoard::new(board.sample_rate_hz, board.channels);
                synthetic.set_profile(ModeProfile::from_mode(&self.session.mode));
                Box::new(synthetic)
            }
            BoardKind::Serial => {
                // Explicit command fields win over environment-provided ones;
                // with neither we fall back to scanning for the dongle.
                let resolved = explicit.or(&board.params);
                if resolved.is_empty() {
                    let _ = self.registry.send_to(
                        origin,
                        &ServerMessage::Info {
                            message: "Attempting to auto-detect the acquisition dongle..."
                                .to_string(),
                        },
                    );
                    match discovery::auto_connect(board.baud, board.channels, board.sample_rate_hz)
                    {
                        Ok(connected) => Box::new(connected),
                        Err(e) => {
                            error!("auto-detection failed: {e}");
                            let _ = self.registry.send_to(
                                origin,
                                &ServerMessage::Error {
                                    message: e.to_string(),
                                    details: None,
                                },
                            );
                            return None;
                        }
                    }
                } else {
                    Box::new(SerialBoard::new(
                        resolved,
                        board.baud,
                        board.channels,
                        board.sample_rate_hz,
                    ))
                }
            }
        };

        if !source.is_connected() {
            if let Err(e) = source.connect() {
                error!("connect failed: {e}");
                let _ = self.registry.send_to(
                    origin,
                    &ServerMessage::Error {
                        message: "Failed to start recording. Make sure the board is powered on \
                                  and its transport is configured (see BOARD_SERIAL_PORT / \
                                  BOARD_DONGLE_PORT)."
                            .to_string(),
                        details: Some(e.to_string()),
                    },
                );
                return None;
            }
        }

        if let Err(e) = source.start_stream() {
            source.disconnect();
            error!("failed to arm the stream: {e}");
            let _ = self.registry.send_to(
                origin,
                &ServerMessage::Error {
                    message: "Failed to start the data stream".to_string(),
                    details: Some(e.to_string()),
                },
            );
            return None;
        }
        Some(source)
    }

    /// Cancel the loop, wait for its in-flight cycle, then release the
    /// device. The device handle is never touched while a poll may still be
    /// running.
    async fn stop_recording(&mut self) {
        let Some(stream) = self.stream.take() else {
            return;
        };
        let _ = stream.stop_tx.send(true);
        let mut data_rx = stream.data_rx;

        match stream.handle.await {
            Ok(mut source) => {
                source.stop_stream();
                source.disconnect();
            }
            Err(e) => error!("acquisition task failed: {e}"),
        }

        // Flush packets produced before the stop so nothing arrives after
        // recording_stopped.
        while let Ok(packet) = data_rx.try_recv() {
            self.relay(packet);
        }

        self.session.phase = Phase::Idle;
        self.publish_snapshot();
        info!("recording stopped");
        self.registry.broadcast(&ServerMessage::RecordingStopped);
    }

    /// Fan one scored packet out to subscribers, then hand it to the sinks
    /// without waiting on them.
    fn relay(&self, packet: StreamPacket) {
        self.registry.broadcast(&ServerMessage::EegData {
            data: packet.features,
            mode: self.session.mode.clone(),
            timestamp: packet.captured_at,
        });

        if self.sinks.is_empty() {
            return;
        }
        let event = ScoredEvent {
            timestamp: Utc::now(),
            mode: self.session.mode.clone(),
            user_id: self.session.user_id.clone(),
            context: self.session.context.clone(),
            features: packet.features,
        };
        for sink in &self.sinks {
            let sink = sink.clone();
            let event = event.clone();
            tokio::spawn(async move {
                if let Err(e) = sink.record(event).await {
                    warn!("{} sink write failed: {e:#}", sink.name());
                }
            });
        }
    }

    fn publish_snapshot(&self) {
        *self.snapshot.write() = SessionSnapshot {
            is_recording: self.session.phase == Phase::Streaming,
            mode: self.session.mode.clone(),
        };
    }
}
