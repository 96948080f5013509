use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use diesel::{pg::PgConnection, prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::deliverables::DeliverableResponse;
use super::to_iso;
use crate::auth::{AuthenticatedUser, Scope};
use crate::error::{AppError, AppResult};
use crate::models::{Client, Deliverable, Project, Task};
use crate::portal::{progress, Progress};
use crate::schema::{clients, deliverables, projects, tasks};
use crate::state::AppState;
use crate::validation::RecordRef;

/// Resolves the client a scoped principal belongs to. `None` means staff.
pub(crate) fn scoped_client(conn: &mut PgConnection, scope: &Scope) -> AppResult<Option<Client>> {
    match scope {
        Scope::All => Ok(None),
        Scope::Client(slug) => clients::table
            .filter(clients::slug.eq(slug))
            .first::<Client>(conn)
            .optional()?
            .map(Some)
            .ok_or_else(AppError::forbidden),
    }
}

/// Projects visible to the principal, or `None` for unrestricted access.
pub(crate) fn scoped_project_ids(
    conn: &mut PgConnection,
    scope: &Scope,
) -> AppResult<Option<Vec<Uuid>>> {
    let Some(client) = scoped_client(conn, scope)? else {
        return Ok(None);
    };
    let ids = projects::table
        .filter(projects::client_id.eq(client.id))
        .select(projects::id)
        .load::<Uuid>(conn)?;
    Ok(Some(ids))
}

/// Rows outside the principal's scope are reported as missing.
pub(crate) fn ensure_project_visible(
    conn: &mut PgConnection,
    scope: &Scope,
    project_id: Uuid,
) -> AppResult<()> {
    match scoped_project_ids(conn, scope)? {
        Some(ids) if !ids.contains(&project_id) => Err(AppError::not_found()),
        _ => Ok(()),
    }
}

#[derive(Serialize)]
pub struct ClientSummary {
    pub slug: String,
    pub name: String,
}

#[derive(Serialize)]
pub struct ProjectSummary {
    pub id: Uuid,
    pub number: i32,
    pub name: String,
    pub description: Option<String>,
    pub client: ClientSummary,
    #[serde(flatten)]
    pub progress: Progress,
    pub created_at: String,
    pub updated_at: String,
}

impl ProjectSummary {
    fn new(project: Project, client: &Client, tasks: &[Task]) -> Self {
        Self {
            id: project.id,
            number: project.number,
            name: project.name,
            description: project.description,
            client: ClientSummary {
                slug: client.slug.clone(),
                name: client.name.clone(),
            },
            progress: progress(tasks),
            created_at: to_iso(project.created_at),
            updated_at: to_iso(project.updated_at),
        }
    }
}

#[derive(Serialize)]
pub struct TaskResponse {
    pub id: Uuid,
    pub title: String,
    pub phase: String,
    pub status: String,
    pub sort_order: i32,
    pub due_date: Option<String>,
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            title: task.title,
            phase: task.phase,
            status: task.status,
            sort_order: task.sort_order,
            due_date: task.due_date.map(|d| d.format("%Y-%m-%d").to_string()),
        }
    }
}

#[derive(Serialize)]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub summary: ProjectSummary,
    pub task_list: Vec<TaskResponse>,
    pub deliverables: Vec<DeliverableResponse>,
}

#[derive(Debug, Deserialize)]
pub struct ProjectListQuery {
    pub client: Option<String>,
}

pub async fn list_projects(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ProjectListQuery>,
) -> AppResult<Json<Vec<ProjectSummary>>> {
    let scope = user.scope()?;
    let mut conn = state.db()?;
    let own_client = scoped_client(&mut conn, &scope)?;

    let mut rows_query = projects::table
        .inner_join(clients::table)
        .select((projects::all_columns, clients::all_columns))
        .order(projects::number.asc())
        .into_boxed();
    match (own_client, query.client) {
        (Some(client), _) => rows_query = rows_query.filter(clients::id.eq(client.id)),
        (None, Some(slug)) if !slug.trim().is_empty() => {
            rows_query = rows_query.filter(clients::slug.eq(slug.trim().to_lowercase()));
        }
        (None, _) => {}
    }
    let rows: Vec<(Project, Client)> = rows_query.load(&mut conn)?;

    let project_ids: Vec<Uuid> = rows.iter().map(|(p, _)| p.id).collect();
    let mut tasks_by_project: HashMap<Uuid, Vec<Task>> = HashMap::new();
    for task in tasks::table
        .filter(tasks::project_id.eq_any(&project_ids))
        .load::<Task>(&mut conn)?
    {
        tasks_by_project.entry(task.project_id).or_default().push(task);
    }

    let summaries = rows
        .into_iter()
        .map(|(project, client)| {
            let tasks = tasks_by_project.remove(&project.id).unwrap_or_default();
            ProjectSummary::new(project, &client, &tasks)
        })
        .collect();
    Ok(Json(summaries))
}

pub async fn get_project(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(reference): Path<String>,
) -> AppResult<Json<ProjectDetail>> {
    let reference = RecordRef::parse(&reference).ok_or_else(AppError::not_found)?;
    let scope = user.scope()?;
    let mut conn = state.db()?;

    let base = projects::table.inner_join(clients::table);
    let (project, client): (Project, Client) = match reference {
        RecordRef::Id(id) => base
            .filter(projects::id.eq(id))
            .select((projects::all_columns, clients::all_columns))
            .first(&mut conn)?,
        RecordRef::Number(number) => base
            .filter(projects::number.eq(number))
            .select((projects::all_columns, clients::all_columns))
            .first(&mut conn)?,
    };
    ensure_project_visible(&mut conn, &scope, project.id)?;

    let task_list: Vec<Task> = tasks::table
        .filter(tasks::project_id.eq(project.id))
        .order((tasks::sort_order.asc(), tasks::created_at.asc()))
        .load(&mut conn)?;
    let deliverable_rows: Vec<Deliverable> = deliverables::table
        .filter(deliverables::project_id.eq(project.id))
        .order(deliverables::created_at.asc())
        .load(&mut conn)?;

    let summary = ProjectSummary::new(project, &client, &task_list);
    Ok(Json(ProjectDetail {
        summary,
        task_list: task_list.into_iter().map(TaskResponse::from).collect(),
        deliverables: deliverable_rows
            .into_iter()
            .map(DeliverableResponse::from)
            .collect(),
    }))
}
