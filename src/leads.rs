use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classifier::Classification;
use crate::models::{Lead, NewLead};
use crate::schema::leads;

/// Column widths of the `leads` table.
pub const NAME_MAX: usize = 255;
pub const COMPANY_MAX: usize = 255;
pub const PHONE_MAX: usize = 64;
pub const MESSAGE_MAX: usize = 5000;

pub const LEAD_SOURCES: &[&str] = &["website", "referral", "linkedin", "other"];
pub const LEAD_STATUSES: &[&str] = &[
    "incoming",
    "qualified",
    "contacted",
    "converted",
    "disqualified",
];

/// Statuses classification is allowed to overwrite. Leads a person has
/// already contacted or converted keep their status.
pub const CLASSIFIABLE_STATUSES: &[&str] = &["incoming", "qualified", "disqualified"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
    Incoming,
    Qualified,
    Contacted,
    Converted,
    Disqualified,
}

impl LeadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LeadStatus::Incoming => "incoming",
            LeadStatus::Qualified => "qualified",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Converted => "converted",
            LeadStatus::Disqualified => "disqualified",
        }
    }
}

#[derive(Debug)]
pub struct ClassificationWrite {
    pub lead: Lead,
    pub status_changed: bool,
}

pub fn insert_lead(conn: &mut PgConnection, new_lead: &NewLead) -> QueryResult<Lead> {
    diesel::insert_into(leads::table)
        .values(new_lead)
        .get_result(conn)
}

pub fn find_lead(conn: &mut PgConnection, lead_id: Uuid) -> QueryResult<Lead> {
    leads::table.find(lead_id).first(conn)
}

pub fn find_lead_by_email(conn: &mut PgConnection, email: &str) -> QueryResult<Option<Lead>> {
    leads::table
        .filter(leads::email.eq(email))
        .first(conn)
        .optional()
}

/// Writes tier and assessment, and moves the status through the tier table
/// only while the row is still in a classification-owned status. The status
/// guard is evaluated by the database.
pub fn apply_classification(
    conn: &mut PgConnection,
    lead_id: Uuid,
    classification: &Classification,
    now: DateTime<Utc>,
) -> QueryResult<ClassificationWrite> {
    let now_naive = now.naive_utc();
    let assessment = classification.assessment(&now.to_rfc3339());
    let status = classification.tier.lead_status().as_str();

    conn.transaction(|conn| {
        let guarded = diesel::update(
            leads::table
                .filter(leads::id.eq(lead_id))
                .filter(leads::status.eq_any(CLASSIFIABLE_STATUSES)),
        )
        .set((
            leads::tier.eq(Some(classification.tier.as_str())),
            leads::status.eq(status),
            leads::ai_assessment.eq(Some(assessment.clone())),
            leads::classified_at.eq(Some(now_naive)),
            leads::updated_at.eq(now_naive),
        ))
        .get_result::<Lead>(conn)
        .optional()?;

        if let Some(lead) = guarded {
            return Ok(ClassificationWrite {
                lead,
                status_changed: true,
            });
        }

        let lead = diesel::update(leads::table.find(lead_id))
            .set((
                leads::tier.eq(Some(classification.tier.as_str())),
                leads::ai_assessment.eq(Some(assessment.clone())),
                leads::classified_at.eq(Some(now_naive)),
                leads::updated_at.eq(now_naive),
            ))
            .get_result::<Lead>(conn)?;

        Ok(ClassificationWrite {
            lead,
            status_changed: false,
        })
    })
}
