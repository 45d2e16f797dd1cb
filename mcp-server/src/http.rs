//! HTTP upstream transport: the `/mcp` POST/GET endpoint and `/health`
//! GET endpoint, built with `axum`, attaching shared state with
//! `.with_state(...)`. Each `Mcp-Session-Id` gets its own
//! [`MessageProcessor`] so concurrent upstream clients don't share
//! initialize/handshake state.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use axum::Json;
use axum::Router;
use dashmap::DashMap;
use hypertool_core::ProxyRuntime;
use mcp_types::JSONRPCMessage;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::cors::Any;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::message_processor::MessageProcessor;
use crate::shutdown::shutdown_signal;

const SESSION_HEADER: &str = "mcp-session-id";

struct HttpState {
    runtime: Arc<ProxyRuntime>,
    sessions: DashMap<String, Arc<Mutex<MessageProcessor>>>,
}

/// Serves the HTTP upstream transport on `addr` until a shutdown signal
/// arrives. Runs to completion; callers pick the port via the `--port` flag.
pub async fn serve(runtime: Arc<ProxyRuntime>, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let state = Arc::new(HttpState {
        runtime,
        sessions: DashMap::new(),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([axum::http::HeaderName::from_static(SESSION_HEADER)]);

    let app = Router::new()
        .route("/mcp", post(handle_mcp_post).get(handle_mcp_get))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "HTTP upstream transport listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "transport": "http",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// `GET /mcp` only exists to acknowledge a session probe; the proxy does
/// not stream server-initiated requests over HTTP in this transport, so
/// there is nothing to upgrade to SSE for.
async fn handle_mcp_get(headers: HeaderMap) -> impl IntoResponse {
    let session_id = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    match session_id {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => (StatusCode::BAD_REQUEST, "missing Mcp-Session-Id header").into_response(),
    }
}

async fn handle_mcp_post(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Json(message): Json<JSONRPCMessage>,
) -> Response {
    let session_id = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let processor = state
        .sessions
        .entry(session_id.clone())
        .or_insert_with(|| Arc::new(Mutex::new(MessageProcessor::new(state.runtime.clone()))))
        .clone();

    let mut processor = processor.lock().await;
    let reply = processor.handle(message).await;
    drop(processor);

    let mut response = match reply {
        Some(msg) => Json(msg).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };
    if let Ok(value) = HeaderValue::from_str(&session_id) {
        response
            .headers_mut()
            .insert(axum::http::HeaderName::from_static(SESSION_HEADER), value);
    }
    response
}
