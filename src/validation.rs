use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub const DEFAULT_PAGE_LIMIT: i64 = 50;
pub const MAX_PAGE_LIMIT: i64 = 200;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

/// Identifier accepted where the portal exposes both the row id and the
/// human-facing sequential number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordRef {
    Id(Uuid),
    Number(i32),
}

impl RecordRef {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Ok(id) = Uuid::parse_str(raw) {
            return Some(RecordRef::Id(id));
        }
        let digits = raw.strip_prefix('#').unwrap_or(raw);
        if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
            return digits
                .parse::<i32>()
                .ok()
                .filter(|n| *n > 0)
                .map(RecordRef::Number);
        }
        None
    }
}

/// Malformed path identifiers are answered as missing rows.
pub fn parse_path_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::not_found())
}

pub fn parse_body_id(field: &str, raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| AppError::bad_request(format!("{field} must be a valid UUID")))
}

pub fn require_text(field: &str, value: Option<&str>, max_len: usize) -> AppResult<String> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::bad_request(format!("{field} is required")))?;
    if value.chars().count() > max_len {
        return Err(AppError::bad_request(format!(
            "{field} must be {max_len} characters or less"
        )));
    }
    Ok(value.to_string())
}

pub fn optional_text(field: &str, value: Option<&str>, max_len: usize) -> AppResult<Option<String>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) if v.chars().count() > max_len => Err(AppError::bad_request(format!(
            "{field} must be {max_len} characters or less"
        ))),
        Some(v) => Ok(Some(v.to_string())),
    }
}

pub fn is_valid_email(email: &str) -> bool {
    email.len() <= 255 && EMAIL_RE.is_match(email)
}

pub fn require_email(field: &str, value: Option<&str>) -> AppResult<String> {
    let email = require_text(field, value, 255)?.to_lowercase();
    if !is_valid_email(&email) {
        return Err(AppError::bad_request(format!(
            "{field} must be a valid email address"
        )));
    }
    Ok(email)
}

pub fn require_one_of(field: &str, value: &str, allowed: &[&str]) -> AppResult<String> {
    let normalized = value.trim().to_lowercase();
    if allowed.iter().any(|candidate| *candidate == normalized) {
        Ok(normalized)
    } else {
        Err(AppError::bad_request(format!(
            "{field} must be one of: {}",
            allowed.join(", ")
        )))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
}

impl Pagination {
    pub fn from_query(limit: Option<i64>, offset: Option<i64>) -> AppResult<Self> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
            return Err(AppError::bad_request(format!(
                "limit must be between 1 and {MAX_PAGE_LIMIT}"
            )));
        }
        let offset = offset.unwrap_or(0);
        if offset < 0 {
            return Err(AppError::bad_request("offset must not be negative"));
        }
        Ok(Self { limit, offset })
    }
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, pagination: Pagination) -> Self {
        Self {
            items,
            total,
            limit: pagination.limit,
            offset: pagination.offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn record_ref_accepts_uuid_and_numbers() {
        let id = Uuid::new_v4();
        assert_eq!(RecordRef::parse(&id.to_string()), Some(RecordRef::Id(id)));
        assert_eq!(RecordRef::parse("42"), Some(RecordRef::Number(42)));
        assert_eq!(RecordRef::parse("#7"), Some(RecordRef::Number(7)));
        assert_eq!(RecordRef::parse("0"), None);
        assert_eq!(RecordRef::parse("12abc"), None);
        assert_eq!(RecordRef::parse("99999999999"), None);
    }

    #[test]
    fn malformed_path_id_is_not_found() {
        let err = parse_path_id("not-a-uuid").unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn email_validation() {
        assert_eq!(
            require_email("email", Some(" A@B.com ")).unwrap(),
            "a@b.com"
        );
        assert!(require_email("email", Some("nope")).is_err());
        let missing = require_email("email", None).unwrap_err();
        assert_eq!(missing.message(), "email is required");
    }

    #[test]
    fn enum_values_are_normalized() {
        let allowed = &["website", "referral"];
        assert_eq!(
            require_one_of("source", " Referral", allowed).unwrap(),
            "referral"
        );
        let err = require_one_of("source", "tiktok", allowed).unwrap_err();
        assert_eq!(err.message(), "source must be one of: website, referral");
    }

    #[test]
    fn pagination_bounds() {
        assert_eq!(
            Pagination::from_query(None, None).unwrap(),
            Pagination {
                limit: DEFAULT_PAGE_LIMIT,
                offset: 0
            }
        );
        assert!(Pagination::from_query(Some(0), None).is_err());
        assert!(Pagination::from_query(Some(MAX_PAGE_LIMIT + 1), None).is_err());
        assert!(Pagination::from_query(Some(10), Some(-1)).is_err());
    }

    #[test]
    fn text_length_limits() {
        assert!(require_text("name", Some("abc"), 2).is_err());
        assert_eq!(optional_text("company", Some("   "), 10).unwrap(), None);
    }
}
