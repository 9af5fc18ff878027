//! Health check handler

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;

use crate::config::Backend;
use crate::core::shared::state::AppState;

pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let db_ok = match &state.conn {
        Some(pool) => pool.get().is_ok(),
        None => state.config.backend == Backend::Memory,
    };

    let status = if db_ok { "healthy" } else { "degraded" };
    let code = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(serde_json::json!({
            "status": status,
            "service": "ipcrserver",
            "version": env!("CARGO_PKG_VERSION"),
            "backend": state.config.backend,
            "database": db_ok
        })),
    )
}
