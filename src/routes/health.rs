use axum::{extract::State, http::StatusCode, response::Json};
use diesel::{sql_query, RunQueryDsl};
use serde_json::json;

use crate::state::AppState;

/// Liveness plus a summary of which backends are reachable or configured.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let database = if !state.has_store() {
        "unconfigured"
    } else {
        match state.db() {
            Ok(mut conn) => match sql_query("SELECT 1").execute(&mut conn) {
                Ok(_) => "up",
                Err(_) => "down",
            },
            Err(_) => "down",
        }
    };

    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "database": database,
            "ai_classification": state.classifier.ai_enabled(),
            "email": state.config.email_api_key.is_some(),
            "webhook": state.config.webhook_url.is_some(),
        })),
    )
}
