// crates/server/src/routes/logs.rs
//! Live log stream for one crawl session.
//!
//! - `WS /ws/logs/{session_id}`
//!
//! On connect the viewer gets the retained history as one catch-up frame
//! (when there is any) and a stats frame, then every live event in order.
//! Inbound text is treated as a control token: `ping` answers `pong`, `stop`
//! stops the session's run. A WebSocket ping goes out every 15 seconds.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::ws::{CloseFrame, Message, WebSocket},
    extract::{Path, State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};
use crawl_view_core::{BroadcastHub, ViewerEvent, ViewerId};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::routes::crawl::USER_STOP_REASON;
use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Close code sent when the hub dropped this viewer for falling behind.
const CLOSE_VIEWER_LAGGED: u16 = 4008;

/// Detaches the viewer when the handler exits, however it exits.
struct ViewerGuard {
    hub: Arc<BroadcastHub>,
    session_id: String,
    viewer: ViewerId,
}

impl Drop for ViewerGuard {
    fn drop(&mut self) {
        self.hub.detach(&self.session_id, self.viewer);
        tracing::debug!(
            session_id = %self.session_id,
            viewer_id = self.viewer,
            "ViewerGuard dropped"
        );
    }
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/ws/logs/{session_id}", get(ws_logs_handler))
}

/// Attaching happens inside the upgrade callback so a client that drops
/// during the handshake never leaves a viewer behind.
async fn ws_logs_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_logs_ws(socket, session_id, state))
}

async fn handle_logs_ws(mut socket: WebSocket, session_id: String, state: Arc<AppState>) {
    let (events_tx, events_rx) = mpsc::channel(state.viewer_queue);
    let viewer = match state.hub.attach(&session_id, events_tx) {
        Ok(viewer) => viewer,
        Err(err) => {
            tracing::warn!(session_id = %session_id, error = %err, "Viewer attach failed");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_VIEWER_LAGGED,
                    reason: "Catch-up exceeds viewer queue".into(),
                })))
                .await;
            return;
        }
    };
    let _guard = ViewerGuard {
        hub: Arc::clone(&state.hub),
        session_id: session_id.clone(),
        viewer,
    };
    tracing::info!(session_id = %session_id, viewer_id = viewer, "Viewer connected");

    let (sink, mut stream) = socket.split();
    let (control_tx, control_rx) = mpsc::channel::<ViewerEvent>(8);
    let mut writer = tokio::spawn(write_events(sink, events_rx, control_rx));

    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => match text.as_str().trim() {
                    "ping" => {
                        let _ = control_tx.try_send(ViewerEvent::Pong);
                    }
                    "stop" => {
                        let stopped = state.runner.stop(&session_id, USER_STOP_REASON);
                        tracing::debug!(session_id = %session_id, stopped, "Stop requested by viewer");
                    }
                    _ => {}
                },
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = &mut writer => break,
        }
    }

    writer.abort();
    tracing::info!(session_id = %session_id, viewer_id = viewer, "Viewer disconnected");
}

/// Drain the viewer's queue into the socket. Ends when the socket fails or
/// the hub drops the viewer (its sender goes away).
async fn write_events(
    mut sink: SplitSink<WebSocket, Message>,
    mut events: mpsc::Receiver<ViewerEvent>,
    mut control: mpsc::Receiver<ViewerEvent>,
) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        let frame = tokio::select! {
            event = events.recv() => match event {
                Some(event) => Message::Text(event.to_wire().into()),
                None => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: CLOSE_VIEWER_LAGGED,
                            reason: "Viewer fell behind".into(),
                        })))
                        .await;
                    break;
                }
            },
            Some(event) = control.recv() => Message::Text(event.to_wire().into()),
            _ = heartbeat.tick() => Message::Ping(Bytes::new()),
        };
        if sink.send(frame).await.is_err() {
            break;
        }
    }
}
