use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use prometheus_client::encoding::text::encode;
use serde::Serialize;
use tracing::info;
use xds_core::metrics::ClientMetrics;

use crate::ClientSettings;
use crate::handler::ClientState;

#[derive(Clone)]
struct DebugState {
    settings: ClientSettings,
    metrics: Arc<ClientMetrics>,
    state: Arc<ClientState>,
}

#[derive(Serialize)]
struct ConfigDump {
    config: ClientSettings,
    in_contact: bool,
    resources_seen: u64,
}

async fn metrics_handler(State(state): State<DebugState>) -> Response {
    let mut buf = String::new();
    if let Err(e) = encode(&mut buf, &state.metrics.registry) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("encode error: {e}"),
        )
            .into_response();
    }
    let mut response = Response::new(axum::body::Body::from(buf));
    response.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/openmetrics-text; version=1.0.0; charset=utf-8"),
    );
    response
}

async fn healthz() -> Response {
    (StatusCode::OK, "ok").into_response()
}

async fn readyz(State(state): State<DebugState>) -> Response {
    // Ready once the management server has pushed data on the current stream.
    if state.state.is_in_contact() {
        (StatusCode::OK, "ok").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "no contact with management server").into_response()
    }
}

async fn config_dump(State(state): State<DebugState>) -> impl IntoResponse {
    axum::Json(ConfigDump {
        config: state.settings,
        in_contact: state.state.is_in_contact(),
        resources_seen: state.state.resources_seen(),
    })
}

pub async fn serve(
    port: u16,
    settings: ClientSettings,
    metrics: Arc<ClientMetrics>,
    client_state: Arc<ClientState>,
) {
    let state = DebugState {
        settings,
        metrics,
        state: client_state,
    };
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/debug/config", get(config_dump))
        .with_state(state);
    let addr: std::net::SocketAddr = ([0, 0, 0, 0], port).into();
    info!(%addr, "HTTP server listening (metrics, probes, debug)");
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("failed to bind metrics port {port}: {e}");
            return;
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("debug HTTP server error: {e}");
    }
}
