use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::{dsl::count_star, pg::Pg, prelude::*};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use super::to_iso;
use crate::classifier::{Classification, LeadText, Tier};
use crate::error::{AppError, AppResult};
use crate::leads::{
    self, ClassificationWrite, COMPANY_MAX, LEAD_SOURCES, LEAD_STATUSES, MESSAGE_MAX, NAME_MAX,
    PHONE_MAX,
};
use crate::models::{Lead, NewLead};
use crate::notify::Notification;
use crate::schema::leads as leads_table;
use crate::state::AppState;
use crate::utils::json::{classify_nullable, FieldPatch};
use crate::utils::redact::redact_email;
use crate::validation::{
    is_valid_email, optional_text, parse_body_id, parse_path_id, require_email, require_one_of,
    require_text, Page, Pagination,
};

#[derive(Serialize)]
pub struct LeadResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub message: Option<String>,
    pub source: String,
    pub status: String,
    pub tier: Option<String>,
    pub ai_assessment: Option<Value>,
    pub intake_answers: Option<Value>,
    pub classified_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Lead> for LeadResponse {
    fn from(lead: Lead) -> Self {
        Self {
            id: lead.id,
            name: lead.name,
            email: lead.email,
            company: lead.company,
            phone: lead.phone,
            message: lead.message,
            source: lead.source,
            status: lead.status,
            tier: lead.tier,
            ai_assessment: lead.ai_assessment,
            intake_answers: lead.intake_answers,
            classified_at: lead.classified_at.map(to_iso),
            created_at: to_iso(lead.created_at),
            updated_at: to_iso(lead.updated_at),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LeadListQuery {
    pub status: Option<String>,
    pub tier: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_leads(
    State(state): State<AppState>,
    Query(query): Query<LeadListQuery>,
) -> AppResult<Json<Page<LeadResponse>>> {
    let pagination = Pagination::from_query(query.limit, query.offset)?;
    let status = query
        .status
        .as_deref()
        .map(|s| require_one_of("status", s, LEAD_STATUSES))
        .transpose()?;
    let tier = query
        .tier
        .as_deref()
        .map(|t| {
            Tier::parse(t).ok_or_else(|| {
                AppError::bad_request("tier must be one of: SOFTBALL, MEDIUM, HARD, DISQUALIFY")
            })
        })
        .transpose()?;

    let mut conn = state.db()?;

    let total: i64 = filtered_leads(status.as_deref(), tier)
        .select(count_star())
        .first(&mut conn)?;
    let rows: Vec<Lead> = filtered_leads(status.as_deref(), tier)
        .order(leads_table::created_at.desc())
        .limit(pagination.limit)
        .offset(pagination.offset)
        .load(&mut conn)?;

    Ok(Json(Page::new(
        rows.into_iter().map(LeadResponse::from).collect(),
        total,
        pagination,
    )))
}

fn filtered_leads(status: Option<&str>, tier: Option<Tier>) -> leads_table::BoxedQuery<'_, Pg> {
    let mut query = leads_table::table.into_boxed();
    if let Some(status) = status {
        query = query.filter(leads_table::status.eq(status));
    }
    if let Some(tier) = tier {
        query = query.filter(leads_table::tier.eq(tier.as_str()));
    }
    query
}

#[derive(Debug, Deserialize)]
pub struct CreateLeadRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub message: Option<String>,
    pub source: Option<String>,
    pub status: Option<String>,
}

pub async fn create_lead(
    State(state): State<AppState>,
    Json(payload): Json<CreateLeadRequest>,
) -> AppResult<(StatusCode, Json<LeadResponse>)> {
    let new_lead = NewLead {
        id: Uuid::new_v4(),
        name: require_text("name", payload.name.as_deref(), NAME_MAX)?,
        email: require_email("email", payload.email.as_deref())?,
        company: optional_text("company", payload.company.as_deref(), COMPANY_MAX)?,
        phone: optional_text("phone", payload.phone.as_deref(), PHONE_MAX)?,
        message: optional_text("message", payload.message.as_deref(), MESSAGE_MAX)?,
        source: match payload.source.as_deref() {
            Some(source) => require_one_of("source", source, LEAD_SOURCES)?,
            None => "website".to_string(),
        },
        status: match payload.status.as_deref() {
            Some(status) => require_one_of("status", status, LEAD_STATUSES)?,
            None => "incoming".to_string(),
        },
    };

    let mut conn = state.db()?;
    let lead = match leads::insert_lead(&mut conn, &new_lead) {
        Ok(lead) => lead,
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => return Err(AppError::conflict("a lead with this email already exists")),
        Err(err) => return Err(AppError::from(err)),
    };

    info!(lead_id = %lead.id, email = %redact_email(&lead.email), "lead created");
    Ok((StatusCode::CREATED, Json(LeadResponse::from(lead))))
}

pub async fn get_lead(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<LeadResponse>> {
    let lead_id = parse_path_id(&id)?;
    let mut conn = state.db()?;
    let lead = leads::find_lead(&mut conn, lead_id)?;
    Ok(Json(LeadResponse::from(lead)))
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = leads_table)]
struct UpdateLeadChangeset {
    name: Option<String>,
    email: Option<String>,
    company: Option<Option<String>>,
    phone: Option<Option<String>>,
    message: Option<Option<String>>,
    source: Option<String>,
    status: Option<String>,
    tier: Option<Option<String>>,
}

impl UpdateLeadChangeset {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.email.is_none()
            && self.company.is_none()
            && self.phone.is_none()
            && self.message.is_none()
            && self.source.is_none()
            && self.status.is_none()
            && self.tier.is_none()
    }
}

fn nullable_text(body: &Value, field: &str, max_len: usize) -> AppResult<Option<Option<String>>> {
    match classify_nullable(body, field).map_err(AppError::bad_request)? {
        FieldPatch::Omitted => Ok(None),
        FieldPatch::Null => Ok(Some(None)),
        FieldPatch::Set(value) if value.is_empty() => Ok(Some(None)),
        FieldPatch::Set(value) => optional_text(field, Some(&value), max_len).map(Some),
    }
}

fn required_patch(body: &Value, field: &str) -> AppResult<Option<String>> {
    match classify_nullable(body, field).map_err(AppError::bad_request)? {
        FieldPatch::Omitted => Ok(None),
        FieldPatch::Null => Err(AppError::bad_request(format!("{field} cannot be null"))),
        FieldPatch::Set(value) => Ok(Some(value)),
    }
}

fn build_lead_changeset(body: &Value) -> AppResult<UpdateLeadChangeset> {
    if !body.is_object() {
        return Err(AppError::bad_request("request body must be a JSON object"));
    }
    let mut changes = UpdateLeadChangeset::default();

    if let Some(name) = required_patch(body, "name")? {
        changes.name = Some(require_text("name", Some(&name), NAME_MAX)?);
    }
    if let Some(email) = required_patch(body, "email")? {
        let email = email.to_lowercase();
        if !is_valid_email(&email) {
            return Err(AppError::bad_request("email must be a valid email address"));
        }
        changes.email = Some(email);
    }
    changes.company = nullable_text(body, "company", COMPANY_MAX)?;
    changes.phone = nullable_text(body, "phone", PHONE_MAX)?;
    changes.message = nullable_text(body, "message", MESSAGE_MAX)?;
    if let Some(source) = required_patch(body, "source")? {
        changes.source = Some(require_one_of("source", &source, LEAD_SOURCES)?);
    }
    if let Some(status) = required_patch(body, "status")? {
        changes.status = Some(require_one_of("status", &status, LEAD_STATUSES)?);
    }
    changes.tier = match classify_nullable(body, "tier").map_err(AppError::bad_request)? {
        FieldPatch::Omitted => None,
        FieldPatch::Null => Some(None),
        FieldPatch::Set(raw) => {
            let tier = Tier::parse(&raw).ok_or_else(|| {
                AppError::bad_request("tier must be one of: SOFTBALL, MEDIUM, HARD, DISQUALIFY")
            })?;
            Some(Some(tier.as_str().to_string()))
        }
    };

    Ok(changes)
}

pub async fn update_lead(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> AppResult<Json<LeadResponse>> {
    let lead_id = parse_path_id(&id)?;
    let changes = build_lead_changeset(&body)?;
    let mut conn = state.db()?;

    if changes.is_empty() {
        return Ok(Json(LeadResponse::from(leads::find_lead(&mut conn, lead_id)?)));
    }

    let lead: Lead = diesel::update(leads_table::table.find(lead_id))
        .set((
            &changes,
            leads_table::updated_at.eq(Utc::now().naive_utc()),
        ))
        .get_result(&mut conn)?;

    info!(lead_id = %lead.id, status = %lead.status, "lead updated");
    Ok(Json(LeadResponse::from(lead)))
}

pub async fn delete_lead(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let lead_id = parse_path_id(&id)?;
    let mut conn = state.db()?;
    let deleted = diesel::delete(leads_table::table.find(lead_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }
    info!(%lead_id, "lead deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct ClassificationTiming {
    pub classify_ms: u128,
    pub store_ms: u128,
    pub total_ms: u128,
}

pub(crate) struct ClassifiedLead {
    pub classification: Classification,
    pub write: ClassificationWrite,
    pub timing: ClassificationTiming,
}

/// Classifies a lead and persists the verdict. The classifier itself never
/// fails; only the store write can.
pub(crate) async fn classify_and_store(state: &AppState, lead: &Lead) -> AppResult<ClassifiedLead> {
    let started = Instant::now();
    let classification = state
        .classifier
        .classify(&LeadText {
            name: &lead.name,
            company: lead.company.as_deref(),
            message: lead.message.as_deref(),
            source: &lead.source,
        })
        .await;
    let classify_ms = started.elapsed().as_millis();

    let store_started = Instant::now();
    let mut conn = state.db()?;
    let write = leads::apply_classification(&mut conn, lead.id, &classification, Utc::now())?;
    let store_ms = store_started.elapsed().as_millis();

    info!(
        lead_id = %lead.id,
        tier = %classification.tier,
        status = %write.lead.status,
        status_changed = write.status_changed,
        fallback = classification.fallback_reason.is_some(),
        "lead classified"
    );

    state.notifier.spawn(Notification::LeadClassified {
        lead_id: lead.id,
        tier: classification.tier.as_str().to_string(),
        status: write.lead.status.clone(),
        classification_source: classification.source.as_str().to_string(),
    });

    Ok(ClassifiedLead {
        classification,
        write,
        timing: ClassificationTiming {
            classify_ms,
            store_ms,
            total_ms: started.elapsed().as_millis(),
        },
    })
}

#[derive(Debug, Deserialize)]
pub struct ClassifyLeadRequest {
    pub lead_id: Option<String>,
}

#[derive(Serialize)]
pub struct ClassifyLeadResponse {
    pub lead_id: Uuid,
    pub classification: Classification,
    pub status: String,
    pub status_changed: bool,
    pub timing: ClassificationTiming,
}

pub async fn classify_lead(
    State(state): State<AppState>,
    Json(payload): Json<ClassifyLeadRequest>,
) -> AppResult<Json<ClassifyLeadResponse>> {
    let raw_id = payload
        .lead_id
        .ok_or_else(|| AppError::bad_request("lead_id is required"))?;
    let lead_id = parse_body_id("lead_id", &raw_id)?;

    let lead = {
        let mut conn = state.db()?;
        leads::find_lead(&mut conn, lead_id)?
    };

    let classified = classify_and_store(&state, &lead).await?;
    Ok(Json(ClassifyLeadResponse {
        lead_id,
        status: classified.write.lead.status.clone(),
        status_changed: classified.write.status_changed,
        classification: classified.classification,
        timing: classified.timing,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn changeset_distinguishes_null_from_omitted() {
        let changes = build_lead_changeset(&json!({
            "company": null,
            "status": "Contacted",
            "tier": "hard"
        }))
        .unwrap();
        assert_eq!(changes.company, Some(None));
        assert_eq!(changes.phone, None);
        assert_eq!(changes.status.as_deref(), Some("contacted"));
        assert_eq!(changes.tier, Some(Some("HARD".to_string())));
    }

    #[test]
    fn changeset_rejects_bad_values() {
        assert!(build_lead_changeset(&json!({"status": "won"})).is_err());
        assert!(build_lead_changeset(&json!({"tier": "EASY"})).is_err());
        assert!(build_lead_changeset(&json!({"name": null})).is_err());
        assert!(build_lead_changeset(&json!({"email": "nope"})).is_err());
        assert!(build_lead_changeset(&json!(["status"])).is_err());
    }

    #[test]
    fn empty_patch_is_detected() {
        assert!(build_lead_changeset(&json!({})).unwrap().is_empty());
    }
}
