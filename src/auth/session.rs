//! Opaque store-backed sessions. Only the sha256 of a token is persisted.

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::{NewSession, User};
use crate::schema::{sessions, users};

pub const SESSION_COOKIE_NAME: &str = "session";

pub fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn hash_session_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

pub struct IssuedSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub fn create_session(
    conn: &mut PgConnection,
    user_id: Uuid,
    client: &ClientInfo,
    lifetime: ChronoDuration,
    now: DateTime<Utc>,
) -> QueryResult<IssuedSession> {
    let token = generate_session_token();
    let expires_at = now + lifetime;
    let session = NewSession {
        id: Uuid::new_v4(),
        user_id,
        token_hash: hash_session_token(&token),
        ip_address: client.ip_address.clone(),
        user_agent: client.user_agent.clone(),
        expires_at: expires_at.naive_utc(),
    };
    diesel::insert_into(sessions::table)
        .values(&session)
        .execute(conn)?;
    Ok(IssuedSession { token, expires_at })
}

/// Resolves an unexpired session token to its user.
pub fn find_session_user(
    conn: &mut PgConnection,
    token: &str,
    now: NaiveDateTime,
) -> QueryResult<Option<User>> {
    sessions::table
        .inner_join(users::table)
        .filter(sessions::token_hash.eq(hash_session_token(token)))
        .filter(sessions::expires_at.gt(now))
        .select(users::all_columns)
        .first::<User>(conn)
        .optional()
}

pub fn delete_session(conn: &mut PgConnection, token: &str) -> QueryResult<usize> {
    diesel::delete(sessions::table.filter(sessions::token_hash.eq(hash_session_token(token))))
        .execute(conn)
}

pub fn purge_expired_sessions(conn: &mut PgConnection, now: NaiveDateTime) -> QueryResult<usize> {
    diesel::delete(sessions::table.filter(sessions::expires_at.le(now))).execute(conn)
}

pub fn session_cookie(
    config: &AppConfig,
    token: &str,
    expires_at: DateTime<Utc>,
) -> Result<HeaderValue> {
    let max_age = ChronoDuration::hours(config.session_expiry_hours).num_seconds();

    let mut parts = vec![format!("{}={}", SESSION_COOKIE_NAME, token)];
    parts.push("Path=/".into());
    parts.push("HttpOnly".into());
    parts.push("SameSite=Strict".into());
    parts.push(format!("Max-Age={}", max_age));
    parts.push(format!("Expires={}", expires_at.to_rfc2822()));
    push_cookie_scope(config, &mut parts);

    HeaderValue::from_str(&parts.join("; ")).context("invalid session cookie")
}

pub fn clear_session_cookie(config: &AppConfig) -> Result<HeaderValue> {
    let mut parts = vec![format!("{}=", SESSION_COOKIE_NAME)];
    parts.push("Path=/".into());
    parts.push("HttpOnly".into());
    parts.push("SameSite=Strict".into());
    parts.push("Max-Age=0".into());
    parts.push("Expires=Thu, 01 Jan 1970 00:00:00 GMT".into());
    push_cookie_scope(config, &mut parts);

    HeaderValue::from_str(&parts.join("; ")).context("invalid session cookie")
}

fn push_cookie_scope(config: &AppConfig, parts: &mut Vec<String>) {
    if config.session_cookie_secure {
        parts.push("Secure".into());
    }
    if let Some(domain) = &config.session_cookie_domain {
        parts.push(format!("Domain={}", domain));
    }
}
