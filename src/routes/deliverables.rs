use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::{
    dsl::count_star,
    pg::{Pg, PgConnection},
    prelude::*,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use super::portal::{ensure_project_visible, scoped_project_ids};
use super::to_iso;
use crate::auth::AuthenticatedUser;
use crate::deliverables::{transition, DeliverableStatus, DELIVERABLE_STATUSES};
use crate::error::{AppError, AppResult};
use crate::models::{Client, Deliverable, NewDeliverable, Project, Task};
use crate::notify::Notification;
use crate::schema::{clients, deliverables, projects, tasks};
use crate::state::AppState;
use crate::utils::json::{classify_nullable, FieldPatch};
use crate::validation::{
    optional_text, parse_body_id, parse_path_id, require_one_of, require_text, Page, Pagination,
};

const TITLE_MAX: usize = 255;
const DESCRIPTION_MAX: usize = 5000;
const URL_MAX: usize = 2048;

#[derive(Serialize)]
pub struct DeliverableResponse {
    pub id: Uuid,
    pub project_id: Uuid,
    pub task_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub file_url: Option<String>,
    pub status: String,
    pub version: i32,
    pub client_approved: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Deliverable> for DeliverableResponse {
    fn from(d: Deliverable) -> Self {
        Self {
            id: d.id,
            project_id: d.project_id,
            task_id: d.task_id,
            title: d.title,
            description: d.description,
            file_url: d.file_url,
            status: d.status,
            version: d.version,
            client_approved: d.client_approved,
            created_at: to_iso(d.created_at),
            updated_at: to_iso(d.updated_at),
        }
    }
}

/// Builds the client-facing "ready for review" notice for a deliverable.
fn ready_notification(conn: &mut PgConnection, deliverable: &Deliverable) -> AppResult<Notification> {
    let (project, client): (Project, Client) = projects::table
        .inner_join(clients::table)
        .filter(projects::id.eq(deliverable.project_id))
        .select((projects::all_columns, clients::all_columns))
        .first(conn)?;
    Ok(Notification::DeliverableReady {
        deliverable_id: deliverable.id,
        client_name: client.name,
        client_email: client.email,
        project_name: project.name,
        title: deliverable.title.clone(),
        version: deliverable.version,
        file_url: deliverable.file_url.clone(),
    })
}

/// Runs after the write has committed, so failures are logged and never
/// turned into an error response.
fn spawn_ready_notice(state: &AppState, conn: &mut PgConnection, deliverable: &Deliverable) {
    match ready_notification(conn, deliverable) {
        Ok(notification) => state.notifier.spawn(notification),
        Err(err) => tracing::warn!(
            deliverable_id = %deliverable.id,
            error = %err,
            "could not build ready notification"
        ),
    }
}

#[derive(Debug, Deserialize)]
pub struct DeliverableListQuery {
    pub project_id: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn filtered_deliverables<'a>(
    visible: Option<&'a [Uuid]>,
    project_id: Option<Uuid>,
    status: Option<&'a str>,
) -> deliverables::BoxedQuery<'a, Pg> {
    let mut query = deliverables::table.into_boxed();
    if let Some(ids) = visible {
        query = query.filter(deliverables::project_id.eq_any(ids.to_vec()));
    }
    if let Some(project_id) = project_id {
        query = query.filter(deliverables::project_id.eq(project_id));
    }
    if let Some(status) = status {
        query = query.filter(deliverables::status.eq(status));
    }
    query
}

pub async fn list_deliverables(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<DeliverableListQuery>,
) -> AppResult<Json<Page<DeliverableResponse>>> {
    let pagination = Pagination::from_query(query.limit, query.offset)?;
    let project_id = query
        .project_id
        .as_deref()
        .map(|raw| parse_body_id("project_id", raw))
        .transpose()?;
    let status = query
        .status
        .as_deref()
        .map(|raw| require_one_of("status", raw, DELIVERABLE_STATUSES))
        .transpose()?;
    let scope = user.scope()?;

    let mut conn = state.db()?;
    let visible = scoped_project_ids(&mut conn, &scope)?;

    let total: i64 = filtered_deliverables(visible.as_deref(), project_id, status.as_deref())
        .select(count_star())
        .first(&mut conn)?;
    let rows: Vec<Deliverable> =
        filtered_deliverables(visible.as_deref(), project_id, status.as_deref())
            .order(deliverables::created_at.desc())
            .limit(pagination.limit)
            .offset(pagination.offset)
            .load(&mut conn)?;

    Ok(Json(Page::new(
        rows.into_iter().map(DeliverableResponse::from).collect(),
        total,
        pagination,
    )))
}

#[derive(Debug, Deserialize)]
pub struct CreateDeliverableRequest {
    pub project_id: Option<String>,
    pub task_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub file_url: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub notify_client: bool,
}

pub async fn create_deliverable(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateDeliverableRequest>,
) -> AppResult<(StatusCode, Json<DeliverableResponse>)> {
    user.require_staff()?;
    let project_id = parse_body_id(
        "project_id",
        payload
            .project_id
            .as_deref()
            .ok_or_else(|| AppError::bad_request("project_id is required"))?,
    )?;
    let task_id = payload
        .task_id
        .as_deref()
        .map(|raw| parse_body_id("task_id", raw))
        .transpose()?;
    let new_deliverable = NewDeliverable {
        id: Uuid::new_v4(),
        project_id,
        task_id,
        title: require_text("title", payload.title.as_deref(), TITLE_MAX)?,
        description: optional_text(
            "description",
            payload.description.as_deref(),
            DESCRIPTION_MAX,
        )?,
        file_url: optional_text("file_url", payload.file_url.as_deref(), URL_MAX)?,
        status: match payload.status.as_deref() {
            Some(raw) => require_one_of("status", raw, DELIVERABLE_STATUSES)?,
            None => DeliverableStatus::Pending.as_str().to_string(),
        },
    };

    let mut conn = state.db()?;
    if let Some(task_id) = task_id {
        let task: Task = tasks::table.find(task_id).first(&mut conn)?;
        if task.project_id != project_id {
            return Err(AppError::bad_request(
                "task_id must belong to the same project",
            ));
        }
    }

    let deliverable: Deliverable = diesel::insert_into(deliverables::table)
        .values(&new_deliverable)
        .get_result(&mut conn)?;
    info!(deliverable_id = %deliverable.id, %project_id, "deliverable created");

    if payload.notify_client {
        spawn_ready_notice(&state, &mut conn, &deliverable);
    }

    Ok((
        StatusCode::CREATED,
        Json(DeliverableResponse::from(deliverable)),
    ))
}

pub async fn get_deliverable(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
) -> AppResult<Json<DeliverableResponse>> {
    let deliverable_id = parse_path_id(&id)?;
    let scope = user.scope()?;
    let mut conn = state.db()?;
    let deliverable: Deliverable = deliverables::table.find(deliverable_id).first(&mut conn)?;
    ensure_project_visible(&mut conn, &scope, deliverable.project_id)?;
    Ok(Json(DeliverableResponse::from(deliverable)))
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = deliverables)]
struct DeliverableChangeset {
    title: Option<String>,
    description: Option<Option<String>>,
    file_url: Option<Option<String>>,
    status: Option<String>,
    client_approved: Option<bool>,
}

impl DeliverableChangeset {
    fn has_content_edits(&self) -> bool {
        self.title.is_some() || self.description.is_some() || self.file_url.is_some()
    }
}

fn nullable_patch(body: &Value, field: &str, max_len: usize) -> AppResult<Option<Option<String>>> {
    match classify_nullable(body, field).map_err(AppError::bad_request)? {
        FieldPatch::Omitted => Ok(None),
        FieldPatch::Null => Ok(Some(None)),
        FieldPatch::Set(value) => optional_text(field, Some(&value), max_len).map(Some),
    }
}

/// Clients may only approve or reject; staff may edit and move through the
/// whole lifecycle. The update is conditional on the status that was read.
pub async fn update_deliverable(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> AppResult<Json<DeliverableResponse>> {
    let deliverable_id = parse_path_id(&id)?;
    if !body.is_object() {
        return Err(AppError::bad_request("request body must be a JSON object"));
    }
    let scope = user.scope()?;

    let mut changes = DeliverableChangeset::default();
    if let FieldPatch::Set(title) = classify_nullable(&body, "title").map_err(AppError::bad_request)? {
        changes.title = Some(require_text("title", Some(&title), TITLE_MAX)?);
    }
    changes.description = nullable_patch(&body, "description", DESCRIPTION_MAX)?;
    changes.file_url = nullable_patch(&body, "file_url", URL_MAX)?;
    let requested = match classify_nullable(&body, "status").map_err(AppError::bad_request)? {
        FieldPatch::Omitted => None,
        FieldPatch::Null => return Err(AppError::bad_request("status cannot be null")),
        FieldPatch::Set(raw) => Some(DeliverableStatus::parse(&raw).ok_or_else(|| {
            AppError::bad_request(format!(
                "status must be one of: {}",
                DELIVERABLE_STATUSES.join(", ")
            ))
        })?),
    };

    if !user.is_staff() {
        let client_decision = requested.is_some_and(DeliverableStatus::is_client_decision);
        if changes.has_content_edits() || !client_decision {
            return Err(AppError::forbidden());
        }
    }

    let mut conn = state.db()?;
    let existing: Deliverable = deliverables::table.find(deliverable_id).first(&mut conn)?;
    ensure_project_visible(&mut conn, &scope, existing.project_id)?;

    let current = DeliverableStatus::parse(&existing.status)
        .ok_or_else(|| AppError::internal(format!("unknown deliverable status {}", existing.status)))?;
    let step = requested.map(|to| transition(current, to)).transpose()?;
    if let Some(step) = &step {
        changes.status = Some(step.to.as_str().to_string());
        changes.client_approved = step.client_approved;
    }

    if !changes.has_content_edits() && step.is_none() {
        return Ok(Json(DeliverableResponse::from(existing)));
    }

    let now = Utc::now().naive_utc();
    let target = deliverables::table
        .filter(deliverables::id.eq(deliverable_id))
        .filter(deliverables::status.eq(existing.status.clone()));
    let updated: Option<Deliverable> = if step.is_some_and(|s| s.bump_version) {
        diesel::update(target)
            .set((
                &changes,
                deliverables::version.eq(deliverables::version + 1),
                deliverables::updated_at.eq(now),
            ))
            .get_result(&mut conn)
            .optional()?
    } else {
        diesel::update(target)
            .set((&changes, deliverables::updated_at.eq(now)))
            .get_result(&mut conn)
            .optional()?
    };
    let updated = updated.ok_or_else(|| {
        AppError::conflict("deliverable status changed concurrently, reload and retry")
    })?;

    info!(
        deliverable_id = %updated.id,
        status = %updated.status,
        version = updated.version,
        by_client = !user.is_staff(),
        "deliverable updated"
    );

    if step.is_some_and(|s| s.notify_ready) {
        spawn_ready_notice(&state, &mut conn, &updated);
    }

    Ok(Json(DeliverableResponse::from(updated)))
}
