//! Routes of the asset gateway.
//!
//! ## Structure
//! - `GET /_gateway/healthz` : liveness
//! - `GET /_gateway/readyz`  : readiness of the backing store
//! - anything else           : gated object read; the path (minus its
//!   leading `/`) is the object key, e.g. `GET /games/abc/index.html`
//!
//! Keys colliding with the two health routes are not reachable.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::serve_object,
    },
    services::gateway_service::AccessGateway,
};
use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub gateway: AccessGateway,
}

/// Build the router, including request tracing.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/_gateway/healthz", get(healthz))
        .route("/_gateway/readyz", get(readyz))
        .fallback(serve_object)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
