use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use diesel::{dsl::count_star, pg::Pg, prelude::*};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::portal::{ensure_project_visible, scoped_client};
use super::to_iso;
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{Client, Deliverable, Feedback, NewFeedback, Project};
use crate::notify::Notification;
use crate::schema::{clients, deliverables, feedback, projects};
use crate::state::AppState;
use crate::validation::{parse_body_id, require_text, Page, Pagination};

const COMMENT_MAX: usize = 5000;

#[derive(Serialize)]
pub struct FeedbackResponse {
    pub id: Uuid,
    pub deliverable_id: Uuid,
    pub client_id: Uuid,
    pub rating: Option<i32>,
    pub comment: String,
    pub created_at: String,
}

impl From<Feedback> for FeedbackResponse {
    fn from(f: Feedback) -> Self {
        Self {
            id: f.id,
            deliverable_id: f.deliverable_id,
            client_id: f.client_id,
            rating: f.rating,
            comment: f.comment,
            created_at: to_iso(f.created_at),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct FeedbackListQuery {
    pub deliverable_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn filtered_feedback(
    deliverable_id: Option<Uuid>,
    client_id: Option<Uuid>,
) -> feedback::BoxedQuery<'static, Pg> {
    let mut query = feedback::table.into_boxed();
    if let Some(deliverable_id) = deliverable_id {
        query = query.filter(feedback::deliverable_id.eq(deliverable_id));
    }
    if let Some(client_id) = client_id {
        query = query.filter(feedback::client_id.eq(client_id));
    }
    query
}

pub async fn list_feedback(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<FeedbackListQuery>,
) -> AppResult<Json<Page<FeedbackResponse>>> {
    let pagination = Pagination::from_query(query.limit, query.offset)?;
    let deliverable_id = query
        .deliverable_id
        .as_deref()
        .map(|raw| parse_body_id("deliverable_id", raw))
        .transpose()?;
    let scope = user.scope()?;

    let mut conn = state.db()?;
    let client_id = scoped_client(&mut conn, &scope)?.map(|client| client.id);

    let total: i64 = filtered_feedback(deliverable_id, client_id)
        .select(count_star())
        .first(&mut conn)?;
    let rows: Vec<Feedback> = filtered_feedback(deliverable_id, client_id)
        .order(feedback::created_at.desc())
        .limit(pagination.limit)
        .offset(pagination.offset)
        .load(&mut conn)?;

    Ok(Json(Page::new(
        rows.into_iter().map(FeedbackResponse::from).collect(),
        total,
        pagination,
    )))
}

#[derive(Debug, Deserialize)]
pub struct CreateFeedbackRequest {
    pub deliverable_id: Option<String>,
    pub rating: Option<i32>,
    pub comment: Option<String>,
}

/// Feedback is always attributed to the client that owns the deliverable's
/// project.
pub async fn create_feedback(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateFeedbackRequest>,
) -> AppResult<(StatusCode, Json<FeedbackResponse>)> {
    let deliverable_id = parse_body_id(
        "deliverable_id",
        payload
            .deliverable_id
            .as_deref()
            .ok_or_else(|| AppError::bad_request("deliverable_id is required"))?,
    )?;
    if let Some(rating) = payload.rating {
        if !(1..=5).contains(&rating) {
            return Err(AppError::bad_request("rating must be between 1 and 5"));
        }
    }
    let comment = require_text("comment", payload.comment.as_deref(), COMMENT_MAX)?;
    let scope = user.scope()?;

    let mut conn = state.db()?;
    let (deliverable, (project, client)): (Deliverable, (Project, Client)) = deliverables::table
        .inner_join(projects::table.inner_join(clients::table))
        .filter(deliverables::id.eq(deliverable_id))
        .select((
            deliverables::all_columns,
            (projects::all_columns, clients::all_columns),
        ))
        .first(&mut conn)?;
    ensure_project_visible(&mut conn, &scope, project.id)?;

    let row: Feedback = diesel::insert_into(feedback::table)
        .values(&NewFeedback {
            id: Uuid::new_v4(),
            deliverable_id,
            client_id: client.id,
            rating: payload.rating,
            comment,
        })
        .get_result(&mut conn)?;
    info!(feedback_id = %row.id, %deliverable_id, rating = ?row.rating, "feedback received");

    state.notifier.spawn(Notification::FeedbackReceived {
        feedback_id: row.id,
        deliverable_title: deliverable.title,
        project_name: project.name,
        client_name: client.name,
        rating: row.rating,
        comment: row.comment.clone(),
    });

    Ok((StatusCode::CREATED, Json(FeedbackResponse::from(row))))
}
