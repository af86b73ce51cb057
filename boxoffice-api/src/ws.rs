//! Seat-map fan-out over WebSocket.
//!
//! Client frames:
//! ```json
//! {"action": "join", "event_id": "550e8400-..."}
//! {"action": "leave", "event_id": "550e8400-..."}
//! ```
//!
//! Server frames:
//! ```json
//! {"type": "seat_update", "event_id": "550e8400-...", "seats": [{"seat_id": "...", "status": "held"}]}
//! {"type": "error", "message": "..."}
//! ```
//!
//! Delivery is at-most-once. A slow client loses deltas rather than
//! stalling the room.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use boxoffice_core::services::SubscriberId;
use boxoffice_core::{SeatChange, SeatDelta};

use crate::state::AppState;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientFrame {
    Join { event_id: Uuid },
    Leave { event_id: Uuid },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    SeatUpdate { event_id: Uuid, seats: Vec<SeatChange> },
    Error { message: String },
}

impl From<SeatDelta> for ServerFrame {
    fn from(delta: SeatDelta) -> Self {
        ServerFrame::SeatUpdate {
            event_id: delta.event_id,
            seats: delta.seats,
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/ws", get(ws_handler))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (subscriber, mut deltas) = state.hub.connect().await;
    info!(subscriber = %subscriber.0, "WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            delta = deltas.recv() => {
                let Some(delta) = delta else { break };
                if send_frame(&mut sender, &ServerFrame::from(delta)).await.is_err() {
                    debug!("Client disconnected during seat stream");
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_frame(&state, subscriber, text.as_str()).await {
                            if send_frame(&mut sender, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Client requested close");
                        break;
                    }
                    // Ping/pong is answered by axum
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "WebSocket receive failed");
                        break;
                    }
                }
            }
        }
    }

    state.hub.disconnect(subscriber).await;
    info!(subscriber = %subscriber.0, "WebSocket connection closed");
}

/// Applies a client frame. Returns a frame to send back, if any.
async fn handle_frame(state: &AppState, subscriber: SubscriberId, text: &str) -> Option<ServerFrame> {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::Join { event_id }) => {
            state.fanout.join(subscriber, event_id).await;
            None
        }
        Ok(ClientFrame::Leave { event_id }) => {
            state.fanout.leave(subscriber, event_id).await;
            None
        }
        Err(e) => Some(ServerFrame::Error {
            message: format!("unrecognised frame: {}", e),
        }),
    }
}

async fn send_frame<S>(sender: &mut S, frame: &ServerFrame) -> Result<(), ()>
where
    S: futures_util::Sink<Message> + Unpin,
{
    let json = serde_json::to_string(frame).map_err(|_| ())?;
    sender.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxoffice_core::SeatStatus;
    use serde_json::json;

    #[test]
    fn test_client_frames_parse() {
        let id = Uuid::new_v4();

        let join: ClientFrame = serde_json::from_value(json!({ "action": "join", "event_id": id })).unwrap();
        assert_eq!(join, ClientFrame::Join { event_id: id });

        let leave: ClientFrame = serde_json::from_value(json!({ "action": "leave", "event_id": id })).unwrap();
        assert_eq!(leave, ClientFrame::Leave { event_id: id });

        assert!(serde_json::from_value::<ClientFrame>(json!({ "action": "subscribe", "event_id": id })).is_err());
    }

    #[test]
    fn test_seat_update_frame_shape() {
        let event_id = Uuid::new_v4();
        let seat_id = Uuid::new_v4();
        let frame = ServerFrame::from(SeatDelta::uniform(event_id, &[seat_id], SeatStatus::Held));

        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({
                "type": "seat_update",
                "event_id": event_id,
                "seats": [{ "seat_id": seat_id, "status": "held" }],
            })
        );
    }
}
