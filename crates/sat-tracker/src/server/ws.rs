//! Websocket push channel
//!
//! The outbound half of the socket is handed to the session as its [`PushSink`]; the
//! inbound half stays here and turns client frames into session commands.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};

use crate::error::{Error, Result};
use crate::session::{PushSink, SessionHandle, SessionRunner};
use crate::types::{ClientEvent, SatelliteUpdate, ServerEvent};

use super::state::AppState;

/// Sends snapshots as `satelliteUpdate` text frames
pub struct WsPushSink {
    sender: SplitSink<WebSocket, Message>,
}

impl WsPushSink {
    pub fn new(sender: SplitSink<WebSocket, Message>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl PushSink for WsPushSink {
    async fn push(&mut self, update: &SatelliteUpdate) -> Result<()> {
        let text = serde_json::to_string(&ServerEvent::satellite_update(update))?;
        self.sender
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| Error::channel(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = SinkExt::close(&mut self.sender).await {
            tracing::debug!("Error closing websocket: {}", e);
        }
    }
}

/// Upgrade endpoint for the push channel
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sender, mut receiver) = socket.split();
    let (runner, handle) = SessionRunner::new(
        state.engine(),
        WsPushSink::new(sender),
        state.config().scheduler.initial_delay(),
    );
    let Some(handle) = state.sessions().spawn(runner, handle) else {
        tracing::debug!("Rejecting connection during shutdown");
        return;
    };

    loop {
        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => handle_client_frame(&handle, text.as_str()),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("Session {} receive error: {}", handle.id(), e);
                    break;
                }
            },
            _ = handle.closed() => break,
        }
    }

    handle.disconnect();
}

fn handle_client_frame(handle: &SessionHandle, text: &str) {
    match ClientEvent::parse(text) {
        Ok(ClientEvent::ViewportUpdate(bounds)) => {
            tracing::debug!("Session {} viewport updated", handle.id());
            handle.update_viewport(bounds);
        }
        Ok(ClientEvent::Unknown(event)) => {
            tracing::debug!("Session {} sent unknown event '{}'", handle.id(), event);
        }
        Err(e) => {
            tracing::warn!("Session {} frame dropped: {}", handle.id(), e);
        }
    }
}
