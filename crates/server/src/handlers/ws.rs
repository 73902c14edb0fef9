//! WebSocket transport: one reader loop and one writer task per connection

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::AppState;
use crate::hub::{Hub, Session};

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<Hub>) {
    let (mut sender, mut receiver) = socket.split();
    let (mut session, mut outbound) = Session::new(hub);
    let conn = session.handle().id();
    info!("[WS] connection {} opened", conn);

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let frame = match event.to_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    error!("[WS] failed to encode event for {}: {}", conn, e);
                    continue;
                }
            };
            if let Err(e) = sender.send(Message::Text(frame.into())).await {
                debug!("[WS] write to {} failed: {}", conn, e);
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => session.handle_frame(text.as_str()).await,
            Ok(Message::Close(_)) => break,
            // pings are answered by the websocket layer
            Ok(_) => {}
            Err(e) => {
                warn!("[WS] read from {} failed: {}", conn, e);
                break;
            }
        }
    }

    session.close().await;
    writer.abort();
    info!("[WS] connection {} closed", conn);
}
