//! Health & readiness handlers.
//!
//! - GET /_gateway/healthz  -> simple liveness ("ok")
//! - GET /_gateway/readyz   -> readiness from the backing store's probes

use crate::routes::routes::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::BTreeMap;

/// `GET /_gateway/healthz`
///
/// Always 200; performs no I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /_gateway/readyz`
///
/// Runs every readiness probe of the backing store and reports each one.
/// 200 when all pass, 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let checks = state.gateway.store().health_checks().await;
    let overall_ok = checks.iter().all(|c| c.is_ok());

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks: checks
            .into_iter()
            .map(|c| {
                (
                    c.name,
                    CheckStatus {
                        ok: c.error.is_none(),
                        error: c.error,
                    },
                )
            })
            .collect(),
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
