//! Single-use, time-limited intake questionnaire tokens.
//!
//! A token is `issued` until it is either `consumed` (its submission claimed
//! it) or `expired` (wall clock reached `expires_at`, whether or not it was
//! used). Redemption checks are evaluated by the database so that two
//! concurrent submissions cannot both claim the same token.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::error::AppError;
use crate::leads::{COMPANY_MAX, PHONE_MAX};
use crate::models::{IntakeToken, Lead, NewIntakeSubmission, NewIntakeToken};
use crate::schema::{intake_submissions, intake_tokens, leads};

/// Same body for unknown, used and expired tokens.
pub const INTAKE_LINK_UNAVAILABLE: &str = "This intake link has expired";

pub const MIN_EXPIRY_DAYS: i64 = 1;
pub const MAX_EXPIRY_DAYS: i64 = 30;
const MAX_ANSWER_FIELDS: usize = 100;
const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenState {
    Issued,
    Consumed,
    Expired,
}

impl TokenState {
    pub fn of(token: &IntakeToken, now: NaiveDateTime) -> Self {
        if now >= token.expires_at {
            TokenState::Expired
        } else if token.used {
            TokenState::Consumed
        } else {
            TokenState::Issued
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntakeError {
    #[error("token is required")]
    MissingToken,
    #[error("submission body must be a JSON object")]
    NotAnObject,
    #[error("at least one answer is required")]
    NoAnswers,
    #[error("too many answer fields (max {})", MAX_ANSWER_FIELDS)]
    TooManyAnswers,
    #[error("expires_in_days must be between {} and {}", MIN_EXPIRY_DAYS, MAX_EXPIRY_DAYS)]
    InvalidExpiry,
}

impl From<IntakeError> for AppError {
    fn from(value: IntakeError) -> Self {
        AppError::bad_request(value.to_string())
    }
}

pub fn not_found() -> AppError {
    AppError::not_found_with(INTAKE_LINK_UNAVAILABLE)
}

pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn validate_expiry_days(days: i64) -> Result<i64, IntakeError> {
    if (MIN_EXPIRY_DAYS..=MAX_EXPIRY_DAYS).contains(&days) {
        Ok(days)
    } else {
        Err(IntakeError::InvalidExpiry)
    }
}

/// Splits a submission body into its token and the answer set.
pub fn split_submission(body: Value) -> Result<(String, Map<String, Value>), IntakeError> {
    let Value::Object(mut answers) = body else {
        return Err(IntakeError::NotAnObject);
    };
    let token = match answers.remove("token") {
        Some(Value::String(token)) if !token.trim().is_empty() => token.trim().to_string(),
        _ => return Err(IntakeError::MissingToken),
    };
    answers.retain(|_, value| !is_blank(value));
    if answers.is_empty() {
        return Err(IntakeError::NoAnswers);
    }
    if answers.len() > MAX_ANSWER_FIELDS {
        return Err(IntakeError::TooManyAnswers);
    }
    Ok((token, answers))
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

#[derive(Debug)]
pub struct IssuedToken {
    pub token: IntakeToken,
    pub reused: bool,
}

/// Returns the lead's current valid token, or creates one. The lead row is
/// locked for the duration so concurrent issuance for one lead serializes.
pub fn issue_token(
    conn: &mut PgConnection,
    lead_id: Uuid,
    expires_in_days: i64,
    now: DateTime<Utc>,
) -> QueryResult<IssuedToken> {
    let now_naive = now.naive_utc();
    conn.transaction(|conn| {
        leads::table
            .find(lead_id)
            .select(leads::id)
            .for_update()
            .first::<Uuid>(conn)?;

        let existing = intake_tokens::table
            .filter(intake_tokens::lead_id.eq(lead_id))
            .filter(intake_tokens::used.eq(false))
            .filter(intake_tokens::expires_at.gt(now_naive))
            .order(intake_tokens::expires_at.desc())
            .first::<IntakeToken>(conn)
            .optional()?;

        if let Some(token) = existing {
            return Ok(IssuedToken {
                token,
                reused: true,
            });
        }

        let new_token = NewIntakeToken {
            id: Uuid::new_v4(),
            token: generate_token(),
            lead_id,
            expires_at: (now + ChronoDuration::days(expires_in_days)).naive_utc(),
        };
        let token = diesel::insert_into(intake_tokens::table)
            .values(&new_token)
            .get_result::<IntakeToken>(conn)?;

        Ok(IssuedToken {
            token,
            reused: false,
        })
    })
}

/// Looks up a token that is still in the `issued` state together with its lead.
pub fn find_redeemable(
    conn: &mut PgConnection,
    token: &str,
    now: DateTime<Utc>,
) -> QueryResult<Option<(IntakeToken, Lead)>> {
    intake_tokens::table
        .inner_join(leads::table)
        .filter(intake_tokens::token.eq(token))
        .filter(intake_tokens::used.eq(false))
        .filter(intake_tokens::expires_at.gt(now.naive_utc()))
        .select((intake_tokens::all_columns, leads::all_columns))
        .first::<(IntakeToken, Lead)>(conn)
        .optional()
}

/// Moves a token from `issued` to `consumed`. Returns `None` when the token is
/// unknown, already consumed, or expired.
pub fn claim_token(
    conn: &mut PgConnection,
    token: &str,
    now: DateTime<Utc>,
) -> QueryResult<Option<IntakeToken>> {
    let now_naive = now.naive_utc();
    diesel::update(
        intake_tokens::table
            .filter(intake_tokens::token.eq(token))
            .filter(intake_tokens::used.eq(false))
            .filter(intake_tokens::expires_at.gt(now_naive)),
    )
    .set((
        intake_tokens::used.eq(true),
        intake_tokens::used_at.eq(Some(now_naive)),
    ))
    .get_result::<IntakeToken>(conn)
    .optional()
}

pub fn record_submission(
    conn: &mut PgConnection,
    token: &IntakeToken,
    answers: &Map<String, Value>,
) -> QueryResult<Uuid> {
    let submission = NewIntakeSubmission {
        id: Uuid::new_v4(),
        token_id: token.id,
        lead_id: token.lead_id,
        answers: Value::Object(answers.clone()),
    };
    diesel::insert_into(intake_submissions::table)
        .values(&submission)
        .execute(conn)?;
    Ok(submission.id)
}

/// Copies answers onto the lead. `company` and `phone` answers fill the lead's
/// columns only when those are still empty.
pub fn propagate_answers(
    conn: &mut PgConnection,
    lead_id: Uuid,
    answers: &Map<String, Value>,
    now: DateTime<Utc>,
) -> QueryResult<Lead> {
    let lead: Lead = leads::table.find(lead_id).first(conn)?;
    let company = lead
        .company
        .clone()
        .or_else(|| answer_text(answers, "company", COMPANY_MAX));
    let phone = lead
        .phone
        .clone()
        .or_else(|| answer_text(answers, "phone", PHONE_MAX));

    diesel::update(leads::table.find(lead_id))
        .set((
            leads::intake_answers.eq(Some(Value::Object(answers.clone()))),
            leads::company.eq(company),
            leads::phone.eq(phone),
            leads::updated_at.eq(now.naive_utc()),
        ))
        .get_result(conn)
}

/// Answers wider than the column are ignored; the full text is still kept
/// in `intake_answers`.
fn answer_text(answers: &Map<String, Value>, key: &str, max_chars: usize) -> Option<String> {
    answers
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.chars().count() <= max_chars)
        .map(str::to_owned)
}

/// Deletes tokens that expired without being used.
pub fn purge_expired(conn: &mut PgConnection, now: DateTime<Utc>) -> QueryResult<usize> {
    diesel::delete(
        intake_tokens::table
            .filter(intake_tokens::used.eq(false))
            .filter(intake_tokens::expires_at.le(now.naive_utc())),
    )
    .execute(conn)
}
