use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use diesel::{pg::upsert::excluded, prelude::*};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use super::to_iso;
use crate::error::{AppError, AppResult};
use crate::models::{Agent, NewAgent};
use crate::schema::agents;
use crate::state::AppState;
use crate::validation::{optional_text, require_text};

#[derive(Serialize)]
pub struct AgentResponse {
    pub id: Uuid,
    pub name: String,
    pub kind: String,
    pub endpoint: Option<String>,
    pub capabilities: Value,
    pub metadata: Value,
    pub last_seen_at: String,
    pub created_at: String,
}

impl From<Agent> for AgentResponse {
    fn from(agent: Agent) -> Self {
        Self {
            id: agent.id,
            name: agent.name,
            kind: agent.kind,
            endpoint: agent.endpoint,
            capabilities: agent.capabilities,
            metadata: agent.metadata,
            last_seen_at: to_iso(agent.last_seen_at),
            created_at: to_iso(agent.created_at),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterAgentRequest {
    pub name: Option<String>,
    pub kind: Option<String>,
    pub endpoint: Option<String>,
    pub capabilities: Option<Value>,
    pub metadata: Option<Value>,
}

fn validate(payload: RegisterAgentRequest) -> AppResult<NewAgent> {
    let capabilities = match payload.capabilities {
        None | Some(Value::Null) => json!([]),
        Some(Value::Array(items)) if items.iter().all(Value::is_string) => Value::Array(items),
        Some(_) => {
            return Err(AppError::bad_request(
                "capabilities must be an array of strings",
            ))
        }
    };
    let metadata = match payload.metadata {
        None | Some(Value::Null) => json!({}),
        Some(value @ Value::Object(_)) => value,
        Some(_) => return Err(AppError::bad_request("metadata must be an object")),
    };

    Ok(NewAgent {
        id: Uuid::new_v4(),
        name: require_text("name", payload.name.as_deref(), 100)?,
        kind: require_text("kind", payload.kind.as_deref(), 64)?,
        endpoint: optional_text("endpoint", payload.endpoint.as_deref(), 2048)?,
        capabilities,
        metadata,
        last_seen_at: Utc::now().naive_utc(),
    })
}

/// Upserts by name: 201 for a new agent, 200 when an existing one checks in.
pub async fn register_agent(
    State(state): State<AppState>,
    Json(payload): Json<RegisterAgentRequest>,
) -> AppResult<(StatusCode, Json<AgentResponse>)> {
    let new_agent = validate(payload)?;
    let mut conn = state.db()?;

    let agent: Agent = diesel::insert_into(agents::table)
        .values(&new_agent)
        .on_conflict(agents::name)
        .do_update()
        .set((
            agents::kind.eq(excluded(agents::kind)),
            agents::endpoint.eq(excluded(agents::endpoint)),
            agents::capabilities.eq(excluded(agents::capabilities)),
            agents::metadata.eq(excluded(agents::metadata)),
            agents::last_seen_at.eq(excluded(agents::last_seen_at)),
        ))
        .get_result(&mut conn)?;

    let created = agent.id == new_agent.id;
    info!(agent_id = %agent.id, name = %agent.name, created, "agent registered");
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(AgentResponse::from(agent))))
}

pub async fn list_agents(State(state): State<AppState>) -> AppResult<Json<Vec<AgentResponse>>> {
    let mut conn = state.db()?;
    let rows: Vec<Agent> = agents::table
        .order(agents::name.asc())
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(AgentResponse::from).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(capabilities: Option<Value>, metadata: Option<Value>) -> RegisterAgentRequest {
        RegisterAgentRequest {
            name: Some("lead-triage".into()),
            kind: Some("worker".into()),
            endpoint: None,
            capabilities,
            metadata,
        }
    }

    #[test]
    fn defaults_empty_capabilities_and_metadata() {
        let agent = validate(request(None, None)).unwrap();
        assert_eq!(agent.capabilities, json!([]));
        assert_eq!(agent.metadata, json!({}));
    }

    #[test]
    fn rejects_malformed_capabilities() {
        assert!(validate(request(Some(json!("classify")), None)).is_err());
        assert!(validate(request(Some(json!([1, 2])), None)).is_err());
        assert!(validate(request(None, Some(json!([])))).is_err());
    }
}
