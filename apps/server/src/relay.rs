use axum::{
	extract::{
		ws::{Message, WebSocket, WebSocketUpgrade},
		Query, State,
	},
	response::Response,
};
use ld_core_sync::{
	ld_event_log::StoreId, ClientMessage, RelayConnection, RelayRegistry, ServerMessage,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayQuery {
	store_id: StoreId,
}

/// `GET /api/websocket?storeId=..`: attaches the socket to the relay of its store.
pub async fn connect(
	ws: WebSocketUpgrade,
	State(state): State<AppState>,
	Query(RelayQuery { store_id }): Query<RelayQuery>,
) -> Response {
	ws.on_upgrade(move |socket| serve(socket, state.relays, store_id))
}

#[instrument(skip(socket, relays))]
async fn serve(mut socket: WebSocket, relays: RelayRegistry, store_id: StoreId) {
	let mut conn = relays.connect(store_id).await;

	loop {
		let reply = tokio::select! {
			msg = socket.recv() => match msg {
				Some(Ok(Message::Text(text))) => handle_text(&conn, &text).await,
				Some(Ok(Message::Close(_))) | None => break,
				Some(Ok(_)) => continue,
				Some(Err(e)) => {
					debug!(?e, "Relay socket errored;");
					break;
				}
			},
			broadcast = conn.next_broadcast() => match broadcast {
				Some(message) => message,
				None => break,
			},
		};

		let text = match serde_json::to_string(&reply) {
			Ok(text) => text,
			Err(e) => {
				warn!(?e, "Failed to encode relay message;");
				continue;
			}
		};

		if socket.send(Message::Text(text)).await.is_err() {
			break;
		}
	}

	debug!(connection_id = %conn.id(), "Relay socket closed;");
}

async fn handle_text(conn: &RelayConnection, text: &str) -> ServerMessage {
	match serde_json::from_str::<ClientMessage>(text) {
		Ok(message) => conn.handle(message).await,
		Err(e) => ServerMessage::PushNack {
			request_id: request_id_of(text).unwrap_or_default(),
			message: e.to_string(),
		},
	}
}

/// Best effort lookup so even undecodable pushes can be nacked by id.
fn request_id_of(text: &str) -> Option<String> {
	serde_json::from_str::<Value>(text)
		.ok()?
		.get("requestId")?
		.as_str()
		.map(str::to_owned)
}
