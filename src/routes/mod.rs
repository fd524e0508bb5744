//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! The sync core exposes a single websocket endpoint plus a health probe.
//! Whiteboard CRUD, login and the browser app are served elsewhere; the
//! frontend origin is allowed through CORS so it can open the socket.

pub mod ws;

use axum::Router;
use axum::http::{HeaderValue, StatusCode};
use axum::routing::get;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::state::AppState;

/// Build the application router. `frontend_origin` of `None` allows any
/// origin.
pub fn app(state: AppState, frontend_origin: Option<&str>) -> Router {
    Router::new()
        .route("/api/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(cors_layer(frontend_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(frontend_origin: Option<&str>) -> CorsLayer {
    let origin = match frontend_origin.map(str::parse::<HeaderValue>) {
        Some(Ok(value)) => AllowOrigin::exact(value),
        Some(Err(e)) => {
            warn!(error = %e, "invalid FRONTEND_ORIGIN; allowing any origin");
            AllowOrigin::any()
        }
        None => AllowOrigin::any(),
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
