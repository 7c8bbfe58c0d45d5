use axum::{extract::State, Json};
use serde_json::json;
use tokio::time::{timeout, Duration};

use crate::error::ApiError;
use crate::SharedState;

const READINESS_TIMEOUT: Duration = Duration::from_secs(1);

pub async fn livez() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Ready when not draining and both the system of record and the index answer.
pub async fn readyz(State(state): State<SharedState>) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.readiness.load(std::sync::atomic::Ordering::SeqCst) {
        return Err(ApiError::ServiceUnavailable("shutting_down".into()));
    }

    let client = timeout(READINESS_TIMEOUT, state.pool.get())
        .await
        .map_err(|_| ApiError::ServiceUnavailable("db_pool_timeout".into()))?
        .map_err(|err| ApiError::ServiceUnavailable(format!("failed to check out pool connection: {err}")))?;

    timeout(READINESS_TIMEOUT, client.simple_query("SELECT 1"))
        .await
        .map_err(|_| ApiError::ServiceUnavailable("db_ping_timeout".into()))?
        .map_err(|err| ApiError::ServiceUnavailable(format!("database check failed: {err}")))?;

    timeout(READINESS_TIMEOUT, state.index.ping())
        .await
        .map_err(|_| ApiError::ServiceUnavailable("index_ping_timeout".into()))?
        .map_err(|err| ApiError::ServiceUnavailable(format!("index check failed: {err}")))?;

    Ok(Json(json!({
        "status": "ok",
        "database": "ok",
        "index": "ok",
        "application": env!("CARGO_PKG_NAME"),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn readyz_rejects_when_readiness_disabled() {
        let state = crate::test_state();
        state.readiness.store(false, std::sync::atomic::Ordering::SeqCst);

        match readyz(State(state)).await {
            Err(ApiError::ServiceUnavailable(code)) => assert!(code.contains("shutting_down")),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
