//! Listener / Acceptor: the WebSocket upgrade endpoint.
//!
//! Built on `axum::Router` and served over a plain `tokio::net::TcpListener`
//! with `axum::serve`, wrapped in a `tower_http::trace::TraceLayer` span per
//! request. The acceptor itself does no session work: it validates the
//! query parameters, and on success hands off to a freshly constructed
//! [`Session`] and returns immediately to accept the next upgrade.

use crate::{
    config::{Config, DEFAULT_WORKSPACE_PATH},
    container::ContainerEngine,
    error::GatewayError,
    session::Session,
};
use axum::{
    Router,
    extract::{
        Query, State,
        ws::{WebSocketUpgrade, close_code},
    },
    response::IntoResponse,
    routing::get,
};
use futures::StreamExt as _;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Everything a new connection needs that isn't carried on the socket
/// itself.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub engine: Arc<dyn ContainerEngine>,
    pub shutdown: CancellationToken,
}

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Deserialize)]
struct ConnectParams {
    #[serde(rename = "containerId", default)]
    container_id: Option<String>,
    #[serde(default)]
    workspace: Option<String>,
}

/// Build the gateway's router: a single upgrade route, traced.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(upgrade))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<GatewayState>,
) -> impl IntoResponse {
    let container_id = params.container_id.as_deref().map(str::trim).unwrap_or("");
    if container_id.is_empty() {
        let err = GatewayError::BadRequest("Missing containerId parameter".into());
        warn!("rejecting upgrade: {err}");
        return ws.on_upgrade(move |socket| reject(socket, err));
    }
    let container_id = container_id.to_string();

    let workspace_path = params
        .workspace
        .as_deref()
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_WORKSPACE_PATH.to_string());

    info!(container_id = %container_id, workspace_path = %workspace_path, "accepted upgrade");

    let session = Session::new(container_id, workspace_path, &state.config);
    let engine = state.engine.clone();
    let shutdown = state.shutdown.clone();

    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        session.run(sink, stream, engine, shutdown).await;
    })
}

/// Complete the upgrade only to immediately close it with the appropriate
/// policy-violation code: the client still needs a standard WebSocket close
/// frame, not a bare HTTP rejection, once the handshake has started.
async fn reject(socket: axum::extract::ws::WebSocket, err: GatewayError) {
    use axum::extract::ws::{CloseFrame, Message};
    use futures::SinkExt;

    let (mut sink, _stream) = socket.split();
    let frame = CloseFrame {
        code: err.close_code(),
        reason: err.reason().into(),
    };
    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
        debug!(error = %e, "failed to send close frame on rejected upgrade");
    }
    debug_assert_eq!(err.close_code(), close_code::POLICY);
}
