use axum::{extract::State, http::StatusCode, Json};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use super::leads::classify_and_store;
use crate::error::{AppError, AppResult};
use crate::leads::{self, COMPANY_MAX, LEAD_SOURCES, MESSAGE_MAX, NAME_MAX, PHONE_MAX};
use crate::models::{Lead, NewLead};
use crate::notify::Notification;
use crate::outcome::{Outcome, Requirement};
use crate::state::AppState;
use crate::utils::redact::redact_email;
use crate::validation::{optional_text, require_email, require_one_of, require_text};

#[derive(Debug, Deserialize)]
pub struct ContactRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub message: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub source: Option<String>,
}

#[derive(Serialize)]
pub struct ContactResponse {
    pub ok: bool,
    pub lead_id: Option<Uuid>,
    pub tier: Option<String>,
    pub steps: Outcome,
}

struct StoredInquiry {
    lead: Lead,
    created: bool,
}

fn validate(payload: ContactRequest) -> AppResult<NewLead> {
    Ok(NewLead {
        id: Uuid::new_v4(),
        name: require_text("name", payload.name.as_deref(), NAME_MAX)?,
        email: require_email("email", payload.email.as_deref())?,
        company: optional_text("company", payload.company.as_deref(), COMPANY_MAX)?,
        phone: optional_text("phone", payload.phone.as_deref(), PHONE_MAX)?,
        message: Some(require_text(
            "message",
            payload.message.as_deref(),
            MESSAGE_MAX,
        )?),
        source: match payload.source.as_deref() {
            Some(source) => require_one_of("source", source, LEAD_SOURCES)?,
            None => "website".to_string(),
        },
        status: "incoming".to_string(),
    })
}

/// A repeat inquiry from a known address reuses the existing lead.
fn store_inquiry(state: &AppState, new_lead: &NewLead) -> AppResult<StoredInquiry> {
    let mut conn = state.db()?;
    match leads::insert_lead(&mut conn, new_lead) {
        Ok(lead) => Ok(StoredInquiry {
            lead,
            created: true,
        }),
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            let lead = leads::find_lead_by_email(&mut conn, &new_lead.email)?
                .ok_or_else(AppError::not_found)?;
            Ok(StoredInquiry {
                lead,
                created: false,
            })
        }
        Err(err) => Err(AppError::from(err)),
    }
}

/// Public contact form. Succeeds when the lead was stored or the staff
/// alert went out; everything else is best-effort.
pub async fn submit_contact(
    State(state): State<AppState>,
    Json(payload): Json<ContactRequest>,
) -> AppResult<(StatusCode, Json<ContactResponse>)> {
    let new_lead = validate(payload)?;
    let mut outcome = Outcome::new();

    let stored = store_inquiry(&state, &new_lead);
    outcome.record("store_lead", Requirement::Redundant, &stored);
    let stored = stored.ok();

    let alert = Notification::LeadAlert {
        lead_id: stored.as_ref().map(|s| s.lead.id),
        name: new_lead.name.clone(),
        email: new_lead.email.clone(),
        company: new_lead.company.clone(),
        phone: new_lead.phone.clone(),
        message: new_lead.message.clone(),
        source: new_lead.source.clone(),
    };
    let confirmation = Notification::LeadConfirmation {
        name: new_lead.name.clone(),
        email: new_lead.email.clone(),
    };
    let classification = async {
        match &stored {
            Some(inquiry) if inquiry.created && state.config.auto_classify_contacts => {
                Some(classify_and_store(&state, &inquiry.lead).await)
            }
            _ => None,
        }
    };

    let (alert_report, confirmation_result, classified) = tokio::join!(
        state.notifier.dispatch(&alert),
        state.notifier.email(&confirmation),
        classification
    );
    outcome.record(
        "lead_alert_email",
        Requirement::Redundant,
        &alert_report.email,
    );
    outcome.record(
        "confirmation_email",
        Requirement::Optional,
        &confirmation_result,
    );
    outcome.record("webhook", Requirement::Optional, &alert_report.webhook);
    if let Some(result) = &classified {
        outcome.record("classification", Requirement::Optional, result);
    }

    if !outcome.succeeded() {
        error!(
            email = %redact_email(&new_lead.email),
            failures = %outcome.failure_summary(),
            "contact submission could not be recorded"
        );
        return Err(AppError::internal(
            "unable to submit your inquiry right now, please try again later",
        ));
    }

    let tier = match classified {
        Some(Ok(classified)) => classified.write.lead.tier,
        _ => stored.as_ref().and_then(|s| s.lead.tier.clone()),
    };
    let lead_id = stored.as_ref().map(|s| s.lead.id);
    info!(
        lead_id = ?lead_id,
        email = %redact_email(&new_lead.email),
        "contact submission accepted"
    );

    Ok((
        StatusCode::CREATED,
        Json(ContactResponse {
            ok: true,
            lead_id,
            tier,
            steps: outcome,
        }),
    ))
}
