use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use super::session::ClientInfo;
use crate::models::NewSecurityLog;
use crate::schema::security_logs;
use crate::utils::redact::redact_email;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEvent {
    LoginSuccess,
    LoginFailure,
    AccountLocked,
    LoginRejectedLocked,
    Logout,
}

impl SecurityEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            SecurityEvent::LoginSuccess => "login_success",
            SecurityEvent::LoginFailure => "login_failure",
            SecurityEvent::AccountLocked => "account_locked",
            SecurityEvent::LoginRejectedLocked => "login_rejected_locked",
            SecurityEvent::Logout => "logout",
        }
    }
}

/// Writes a security log row. Failures are logged and swallowed.
pub fn record_event(
    conn: &mut PgConnection,
    event: SecurityEvent,
    user_id: Option<Uuid>,
    email: Option<&str>,
    client: &ClientInfo,
    details: Value,
) {
    let row = NewSecurityLog {
        id: Uuid::new_v4(),
        user_id,
        email: email.map(redact_email),
        event: event.as_str().to_string(),
        ip_address: client.ip_address.clone(),
        user_agent: client.user_agent.clone(),
        details,
    };
    if let Err(err) = diesel::insert_into(security_logs::table)
        .values(&row)
        .execute(conn)
    {
        warn!(event = event.as_str(), error = %err, "failed to write security log");
    }
}
