use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    Json,
};
use chrono::{Duration as ChronoDuration, Utc};
use diesel::{pg::PgConnection, prelude::*};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::{
    auth::{
        audit::{self, SecurityEvent},
        client_info,
        lockout::{self, LockoutPolicy},
        password,
        session::{self, ClientInfo},
        AuthenticatedUser, PrincipalSource, Role, SessionToken,
    },
    error::{AppError, AppResult},
    models::User,
    schema::users,
    state::AppState,
    utils::redact::redact_email,
    validation::require_email,
};

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub user: AuthenticatedUser,
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(HeaderMap, Json<LoginResponse>)> {
    let email = require_email("email", payload.email.as_deref())?;
    let password = payload
        .password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::bad_request("password is required"))?;
    let client = client_info(&headers);

    // Fallback users only sign in while the store cannot be reached.
    let response = match state.db() {
        Ok(mut conn) => login_with_store(&state, &mut conn, &email, &password, &client)?,
        Err(err) => {
            warn!(error = %err, "store unavailable; trying fallback users");
            login_with_fallback(&state, &email, &password)?
        }
    };

    let expires_at = Utc::now() + ChronoDuration::seconds(response.expires_in);
    let mut out = HeaderMap::new();
    out.insert(
        SET_COOKIE,
        session::session_cookie(&state.config, &response.token, expires_at)?,
    );
    Ok((out, Json(response)))
}

fn login_with_store(
    state: &AppState,
    conn: &mut PgConnection,
    email: &str,
    password: &str,
    client: &ClientInfo,
) -> AppResult<LoginResponse> {
    let now = Utc::now();
    let policy = LockoutPolicy::from_config(&state.config);

    let Some(user) = users::table
        .filter(users::email.eq(email))
        .first::<User>(conn)
        .optional()?
    else {
        audit::record_event(
            conn,
            SecurityEvent::LoginFailure,
            None,
            Some(email),
            client,
            json!({ "reason": "unknown_email" }),
        );
        return Err(AppError::unauthorized());
    };

    if policy.is_locked(user.locked_until, now.naive_utc()) {
        audit::record_event(
            conn,
            SecurityEvent::LoginRejectedLocked,
            Some(user.id),
            Some(email),
            client,
            json!({}),
        );
        return Err(AppError::locked());
    }

    let valid = password::verify_password(password, &user.password_hash).unwrap_or_else(|err| {
        warn!(user_id = %user.id, error = %err, "stored password hash is unreadable");
        false
    });

    if !valid {
        let outcome = policy.record_failure(conn, user.id, now)?;
        audit::record_event(
            conn,
            SecurityEvent::LoginFailure,
            Some(user.id),
            Some(email),
            client,
            json!({ "attempts": outcome.attempts }),
        );
        if let Some(until) = outcome.locked_until {
            warn!(user_id = %user.id, email = %redact_email(email), "account locked");
            audit::record_event(
                conn,
                SecurityEvent::AccountLocked,
                Some(user.id),
                Some(email),
                client,
                json!({ "locked_until": super::to_iso(until) }),
            );
        }
        return Err(AppError::unauthorized());
    }

    let role = Role::parse(&user.role)
        .ok_or_else(|| AppError::internal(format!("user has unknown role {}", user.role)))?;
    lockout::record_success(conn, user.id, now)?;
    let lifetime = ChronoDuration::hours(state.config.session_expiry_hours);
    let issued = session::create_session(conn, user.id, client, lifetime, now)?;
    audit::record_event(
        conn,
        SecurityEvent::LoginSuccess,
        Some(user.id),
        Some(email),
        client,
        json!({}),
    );
    info!(user_id = %user.id, email = %redact_email(email), "login succeeded");

    Ok(LoginResponse {
        token: issued.token,
        token_type: "Bearer",
        expires_in: lifetime.num_seconds(),
        user: AuthenticatedUser {
            user_id: Some(user.id),
            email: user.email,
            role,
            client_slug: user.client_slug,
            source: PrincipalSource::Store,
        },
    })
}

fn login_with_fallback(state: &AppState, email: &str, password: &str) -> AppResult<LoginResponse> {
    let user = state
        .config
        .fallback_users
        .iter()
        .find(|user| user.email == email && user.password == password)
        .ok_or_else(AppError::unauthorized)?;

    let token = state.jwt.issue(user)?;
    info!(email = %redact_email(email), "fallback user signed in");

    Ok(LoginResponse {
        token,
        token_type: "Bearer",
        expires_in: state.jwt.expires_in_seconds(),
        user: AuthenticatedUser {
            user_id: None,
            email: user.email.clone(),
            role: user.role,
            client_slug: user.client_slug.clone(),
            source: PrincipalSource::Config,
        },
    })
}

pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    SessionToken(token): SessionToken,
    headers: HeaderMap,
) -> AppResult<(HeaderMap, StatusCode)> {
    if user.source == PrincipalSource::Store {
        let mut conn = state.db()?;
        if let Some(token) = token {
            session::delete_session(&mut conn, &token)?;
        }
        audit::record_event(
            &mut conn,
            SecurityEvent::Logout,
            user.user_id,
            Some(&user.email),
            &client_info(&headers),
            json!({}),
        );
    }

    let mut out = HeaderMap::new();
    out.insert(SET_COOKIE, session::clear_session_cookie(&state.config)?);
    Ok((out, StatusCode::NO_CONTENT))
}

pub async fn me(user: AuthenticatedUser) -> Json<AuthenticatedUser> {
    Json(user)
}
