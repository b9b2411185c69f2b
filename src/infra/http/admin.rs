use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{error, info};

use super::ProxyState;

#[derive(Debug, Deserialize)]
pub struct PurgeRequest {
    #[serde(default)]
    keys: Vec<String>,
}

/// Remove the named keys from the cache. Blank keys are skipped; unknown
/// keys are a no-op. Always answers `204` unless the payload is malformed.
pub async fn purge(
    State(state): State<ProxyState>,
    payload: Result<Json<PurgeRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(json) => json,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    let mut purged = 0usize;
    for key in &request.keys {
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        state.cache.delete(key);
        purged += 1;
    }
    info!(target: "specchio::http::admin", purged, "cache purge");

    StatusCode::NO_CONTENT.into_response()
}

pub async fn metrics(State(state): State<ProxyState>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            [(
                header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(target: "specchio::http::admin", error = %err, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn health() -> &'static str {
    "ok"
}
