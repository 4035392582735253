use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::broadcast::SubscriberRegistry;
use crate::session::{RouterCommand, SessionHandle};
use crate::types::{ClientCommand, ServerMessage};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: SubscriberRegistry,
    pub session: SessionHandle,
}

/// Handle WebSocket upgrade
pub async fn handle_websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle one WebSocket connection: register it as a subscriber, pump
/// outbound frames from its channel, and feed inbound commands to the
/// session router.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // New subscribers immediately learn the current session state.
    let snapshot = state.session.snapshot();
    if state
        .registry
        .register(
            id,
            tx,
            &ServerMessage::StateSync {
                is_recording: snapshot.is_recording,
                mode: snapshot.mode,
            },
        )
        .is_err()
    {
        error!("subscriber {id} could not be greeted, closing");
        return;
    }
    info!("client {id} connected ({} total)", state.registry.len());

    // Writer half: everything broadcast or replied lands in the channel and
    // is forwarded here. A failed socket write ends the pump; the dropped
    // receiver then makes future deliveries fail, which prunes us.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                error!("websocket error on {id}: {e}");
                break;
            }
        };

        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                Ok(ClientCommand::Unknown) => debug!("client {id} sent an unknown command type"),
                Ok(command) => {
                    if state
                        .session
                        .commands
                        .send(RouterCommand {
                            origin: id,
                            command,
                        })
                        .await
                        .is_err()
                    {
                        error!("session router is gone, closing {id}");
                        break;
                    }
                }
                Err(e) => {
                    // Malformed input gets an error reply; the connection
                    // stays open.
                    debug!("client {id} sent malformed JSON: {e}");
                    let _ = state.registry.send_to(
                        id,
                        &ServerMessage::Error {
                            message: format!("Invalid JSON: {e}"),
                            details: None,
                        },
                    );
                }
            },
            Message::Close(_) => {
                info!("client {id} closed the connection");
                break;
            }
            // Pings are answered by the protocol layer
            _ => {}
        }
    }

    state.registry.unregister(id);
    writer.abort();
    info!("client {id} disconnected ({} total)", state.registry.len());
}
