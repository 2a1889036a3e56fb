// SPDX-License-Identifier: AGPL-3.0
// Lanwire - HTTP server for receiving transfers
//
// Binds 0.0.0.0 so transfers work across LAN, Tailscale, and VPNs.
// Handlers hold no transfer state of their own; everything delegates to
// the orchestrator.

use axum::{
    body::Body,
    extract::{ConnectInfo, Query, State},
    http::StatusCode,
    response::{IntoResponse, Sse},
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventBus};
use crate::orchestrator::Orchestrator;
use crate::store::SettingsStore;
use crate::types::{PeerInfo, TransferRequest};

/// Shared state for all request handlers
pub struct ServerContext {
    pub orchestrator: Arc<Orchestrator>,
    pub settings: Arc<SettingsStore>,
    pub events: EventBus,
}

#[derive(Debug, Deserialize)]
struct StatusParams {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ChunkParams {
    id: String,
    file: usize,
    token: String,
}

/// Build the router for the transfer protocol
pub fn create_router(ctx: Arc<ServerContext>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/info", get(info_handler))
        .route("/transfer", post(transfer_handler))
        .route("/transfer/status", get(status_handler))
        .route("/chunk", post(chunk_handler))
        .route("/events", get(events_handler))
        .with_state(ctx)
}

/// Map an engine error onto the wire status codes
fn error_response(err: EngineError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &err {
        EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::Unauthorized => StatusCode::UNAUTHORIZED,
        EngineError::InvalidState { .. } | EngineError::Cancelled => StatusCode::CONFLICT,
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": err.to_string() })))
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "app": "lanwire",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn info_handler(State(ctx): State<Arc<ServerContext>>) -> impl IntoResponse {
    let settings = ctx.settings.get();
    Json(PeerInfo {
        device_name: settings.device_name,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Transfer announcement; trust policy decides accept-now vs pending
async fn transfer_handler(
    State(ctx): State<Arc<ServerContext>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<TransferRequest>,
) -> impl IntoResponse {
    let source_ip = addr.ip().to_string();
    match ctx.orchestrator.announce(&source_ip, request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

async fn status_handler(
    State(ctx): State<Arc<ServerContext>>,
    Query(params): Query<StatusParams>,
) -> impl IntoResponse {
    match ctx.orchestrator.poll_status(&params.id).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// One file's bytes, streamed straight to disk by the orchestrator
async fn chunk_handler(
    State(ctx): State<Arc<ServerContext>>,
    Query(params): Query<ChunkParams>,
    body: Body,
) -> impl IntoResponse {
    let stream = body.into_data_stream();
    match ctx
        .orchestrator
        .accept_chunk(&params.id, params.file, &params.token, stream)
        .await
    {
        Ok(bytes_received) => Json(serde_json::json!({
            "status": "ok",
            "file": params.file,
            "bytesReceived": bytes_received
        }))
        .into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// Long-lived push stream of engine events. Each connection gets its
/// own broadcast cursor; lagging consumers skip ahead instead of
/// blocking the engine.
async fn events_handler(
    State(ctx): State<Arc<ServerContext>>,
) -> Sse<impl futures_util::Stream<Item = Result<axum::response::sse::Event, std::convert::Infallible>>>
{
    let rx = ctx.events.subscribe();

    let stream = BroadcastStream::new(rx).map(|result: Result<EngineEvent, _>| {
        let event = match result {
            Ok(event) => event,
            Err(_) => {
                return Ok(axum::response::sse::Event::default().comment("lagged"));
            }
        };
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(axum::response::sse::Event::default().data(data))
    });

    Sse::new(stream)
}

/// A running server socket. Dropping the handle does not stop the
/// server; call `stop` (or rebind via the engine) for a clean shutdown.
pub struct ServerHandle {
    port: u16,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
    events: EventBus,
}

impl ServerHandle {
    /// The actual bound port (meaningful when configured with port 0)
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop accepting new connections. Connections already established
    /// (in-flight chunk uploads) drain to completion.
    pub async fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!("Server task ended abnormally: {}", e);
        }
        self.events.emit(EngineEvent::ServerStopped);
    }
}

/// Bind the listening socket and serve the protocol until stopped
pub async fn start_server(ctx: Arc<ServerContext>, port: u16) -> EngineResult<ServerHandle> {
    let app = create_router(ctx.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| EngineError::Network(format!("Failed to bind to port {}: {}", port, e)))?;

    let bound_port = listener
        .local_addr()
        .map_err(|e| EngineError::Network(format!("Failed to read bound address: {}", e)))?
        .port();

    tracing::info!("Server listening on port {}", bound_port);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();

    let task = tokio::spawn(async move {
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { signal.cancelled().await })
        .await;

        if let Err(e) = result {
            tracing::error!("Server error: {}", e);
        }
    });

    ctx.events.emit(EngineEvent::ServerStarted { port: bound_port });

    Ok(ServerHandle {
        port: bound_port,
        shutdown,
        task,
        events: ctx.events.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_match_the_wire_contract() {
        let (code, _) = error_response(EngineError::Validation("bad".into()));
        assert_eq!(code, StatusCode::BAD_REQUEST);

        let (code, _) = error_response(EngineError::Unauthorized);
        assert_eq!(code, StatusCode::UNAUTHORIZED);

        let (code, _) = error_response(EngineError::InvalidState {
            status: crate::types::TransferStatus::Completed,
            reason: "done".into(),
        });
        assert_eq!(code, StatusCode::CONFLICT);

        let (code, _) = error_response(EngineError::NotFound("t1".into()));
        assert_eq!(code, StatusCode::NOT_FOUND);

        let (code, _) = error_response(EngineError::FileIo("disk".into()));
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
