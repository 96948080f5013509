use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use super::to_iso;
use crate::error::{AppError, AppResult};
use crate::intake::{self, split_submission, validate_expiry_days};
use crate::leads;
use crate::models::Lead;
use crate::notify::Notification;
use crate::outcome::{Outcome, Requirement};
use crate::state::AppState;
use crate::validation::parse_body_id;

#[derive(Debug, Deserialize)]
pub struct CreateTokenRequest {
    pub lead_id: Option<String>,
    pub expires_in_days: Option<i64>,
    #[serde(default)]
    pub send_email: bool,
}

#[derive(Serialize)]
pub struct CreateTokenResponse {
    pub token: String,
    pub url: String,
    pub lead_id: Uuid,
    pub expires_at: String,
    pub reused: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_sent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_error: Option<String>,
}

pub async fn create_token(
    State(state): State<AppState>,
    Json(payload): Json<CreateTokenRequest>,
) -> AppResult<(StatusCode, Json<CreateTokenResponse>)> {
    let raw_id = payload
        .lead_id
        .ok_or_else(|| AppError::bad_request("lead_id is required"))?;
    let lead_id = parse_body_id("lead_id", &raw_id)?;
    let days = validate_expiry_days(
        payload
            .expires_in_days
            .unwrap_or(state.config.intake_default_expiry_days),
    )?;

    let (lead, issued) = {
        let mut conn = state.db()?;
        let lead = leads::find_lead(&mut conn, lead_id)?;
        let issued = intake::issue_token(&mut conn, lead_id, days, Utc::now())?;
        (lead, issued)
    };

    let url = state.config.intake_url(&issued.token.token);
    let expires_at = to_iso(issued.token.expires_at);
    info!(%lead_id, reused = issued.reused, "intake token issued");

    let (email_sent, email_error) = if payload.send_email {
        let invitation = Notification::IntakeInvitation {
            lead_id,
            name: lead.name.clone(),
            email: lead.email.clone(),
            url: url.clone(),
            expires_at: expires_at.clone(),
        };
        match state.notifier.email(&invitation).await {
            Ok(()) => (Some(true), None),
            Err(err) => (Some(false), Some(err.to_string())),
        }
    } else {
        (None, None)
    };

    let status = if issued.reused {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(CreateTokenResponse {
            token: issued.token.token,
            url,
            lead_id,
            expires_at,
            reused: issued.reused,
            email_sent,
            email_error,
        }),
    ))
}

#[derive(Serialize)]
pub struct IntakeFormResponse {
    pub name: String,
    pub company: Option<String>,
    pub expires_at: String,
}

pub async fn get_intake(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> AppResult<Json<IntakeFormResponse>> {
    let mut conn = state.db()?;
    let (token, lead) =
        intake::find_redeemable(&mut conn, token.trim(), Utc::now())?.ok_or_else(intake::not_found)?;
    Ok(Json(IntakeFormResponse {
        name: lead.name,
        company: lead.company,
        expires_at: to_iso(token.expires_at),
    }))
}

#[derive(Serialize)]
pub struct SubmitResponse {
    pub ok: bool,
    pub submission_id: Option<Uuid>,
    pub steps: Outcome,
}

/// Claims the token, then stores and announces the answers. After the claim
/// the request only fails when neither the submission row nor the staff
/// email went through.
pub async fn submit_intake(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> AppResult<(StatusCode, Json<SubmitResponse>)> {
    let (token, answers) = split_submission(body)?;
    let now = Utc::now();
    let mut conn = state.db()?;

    let claimed = intake::claim_token(&mut conn, &token, now)?.ok_or_else(intake::not_found)?;
    let lead_id = claimed.lead_id;
    let mut outcome = Outcome::new();

    let submission = intake::record_submission(&mut conn, &claimed, &answers);
    outcome.record("store_submission", Requirement::Redundant, &submission);

    let propagated = intake::propagate_answers(&mut conn, lead_id, &answers, now);
    outcome.record("update_lead", Requirement::Optional, &propagated);
    let lead: Option<Lead> = match propagated {
        Ok(lead) => Some(lead),
        Err(_) => leads::find_lead(&mut conn, lead_id).ok(),
    };
    drop(conn);

    let notification = Notification::IntakeSubmitted {
        lead_id,
        name: lead
            .as_ref()
            .map(|l| l.name.clone())
            .unwrap_or_else(|| "Unknown lead".to_string()),
        email: lead.as_ref().map(|l| l.email.clone()).unwrap_or_default(),
        answers: answers.clone(),
    };
    let report = state.notifier.dispatch(&notification).await;
    outcome.record("staff_email", Requirement::Redundant, &report.email);
    outcome.record("webhook", Requirement::Optional, &report.webhook);

    if !outcome.succeeded() {
        error!(%lead_id, failures = %outcome.failure_summary(), "intake submission lost");
        return Err(AppError::internal(
            "unable to save your answers right now, please contact us directly",
        ));
    }

    info!(%lead_id, answers = answers.len(), "intake submitted");
    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            ok: true,
            submission_id: submission.ok(),
            steps: outcome,
        }),
    ))
}
