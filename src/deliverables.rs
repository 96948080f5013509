//! Deliverable review lifecycle.
//!
//! ```text
//! pending -> uploaded -> in_review -> approved
//!                ^            |
//!                |            v
//!                +------- rejected
//! ```
//!
//! Re-uploading after a rejection bumps `version`. Approval sets
//! `client_approved`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::AppError;

pub const DELIVERABLE_STATUSES: &[&str] = &["pending", "uploaded", "in_review", "approved", "rejected"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverableStatus {
    Pending,
    Uploaded,
    InReview,
    Approved,
    Rejected,
}

impl DeliverableStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliverableStatus::Pending => "pending",
            DeliverableStatus::Uploaded => "uploaded",
            DeliverableStatus::InReview => "in_review",
            DeliverableStatus::Approved => "approved",
            DeliverableStatus::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(DeliverableStatus::Pending),
            "uploaded" => Some(DeliverableStatus::Uploaded),
            "in_review" => Some(DeliverableStatus::InReview),
            "approved" => Some(DeliverableStatus::Approved),
            "rejected" => Some(DeliverableStatus::Rejected),
            _ => None,
        }
    }

    /// Decisions a client may make on their own deliverables.
    pub fn is_client_decision(self) -> bool {
        matches!(self, DeliverableStatus::Approved | DeliverableStatus::Rejected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub to: DeliverableStatus,
    pub bump_version: bool,
    pub client_approved: Option<bool>,
    /// The client should be told the deliverable is ready for review.
    pub notify_ready: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("deliverable is already {}", .0.as_str())]
    Unchanged(DeliverableStatus),
    #[error("cannot move deliverable from {} to {}", .from.as_str(), .to.as_str())]
    NotAllowed {
        from: DeliverableStatus,
        to: DeliverableStatus,
    },
}

impl From<TransitionError> for AppError {
    fn from(value: TransitionError) -> Self {
        AppError::bad_request(value.to_string())
    }
}

pub fn transition(
    from: DeliverableStatus,
    to: DeliverableStatus,
) -> Result<Transition, TransitionError> {
    use DeliverableStatus::*;

    if from == to {
        return Err(TransitionError::Unchanged(from));
    }
    let allowed = matches!(
        (from, to),
        (Pending, Uploaded)
            | (Uploaded, InReview)
            | (InReview, Approved)
            | (InReview, Rejected)
            | (Rejected, Uploaded)
    );
    if !allowed {
        return Err(TransitionError::NotAllowed { from, to });
    }

    Ok(Transition {
        to,
        bump_version: from == Rejected && to == Uploaded,
        client_approved: match to {
            Approved => Some(true),
            Uploaded => Some(false),
            _ => None,
        },
        notify_ready: to == InReview,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeliverableStatus::*;

    #[test]
    fn happy_path_approval() {
        assert!(transition(Pending, Uploaded).is_ok());
        let review = transition(Uploaded, InReview).unwrap();
        assert!(review.notify_ready);
        let approved = transition(InReview, Approved).unwrap();
        assert_eq!(approved.client_approved, Some(true));
        assert!(!approved.bump_version);
    }

    #[test]
    fn reupload_after_rejection_bumps_version() {
        let t = transition(Rejected, Uploaded).unwrap();
        assert!(t.bump_version);
        assert_eq!(t.client_approved, Some(false));
        assert!(!transition(Pending, Uploaded).unwrap().bump_version);
    }

    #[test]
    fn rejects_skips_and_reversals() {
        assert_eq!(
            transition(Pending, Approved),
            Err(TransitionError::NotAllowed {
                from: Pending,
                to: Approved
            })
        );
        assert!(transition(Approved, Rejected).is_err());
        assert_eq!(
            transition(InReview, InReview),
            Err(TransitionError::Unchanged(InReview))
        );
    }

    #[test]
    fn status_names_round_trip() {
        for name in DELIVERABLE_STATUSES {
            assert_eq!(DeliverableStatus::parse(name).unwrap().as_str(), *name);
        }
        assert_eq!(DeliverableStatus::parse("done"), None);
    }
}
