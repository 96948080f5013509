pub mod audit;
pub mod jwt;
pub mod lockout;
pub mod password;
pub mod session;

use std::convert::Infallible;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use axum_extra::headers::{authorization::Bearer, Authorization, Cookie};
use axum_extra::TypedHeader;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, state::AppState};
use session::{ClientInfo, SESSION_COOKIE_NAME};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Internal,
    Client,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Internal => "internal",
            Role::Client => "client",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "internal" => Some(Role::Internal),
            "client" => Some(Role::Client),
            _ => None,
        }
    }

    pub fn is_staff(self) -> bool {
        matches!(self, Role::Admin | Role::Internal)
    }
}

/// Where a principal was authenticated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalSource {
    Store,
    Config,
}

/// Which projects a principal may see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Client(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: Option<Uuid>,
    pub email: String,
    pub role: Role,
    pub client_slug: Option<String>,
    pub source: PrincipalSource,
}

impl AuthenticatedUser {
    pub fn is_staff(&self) -> bool {
        self.role.is_staff()
    }

    pub fn require_staff(&self) -> Result<(), AppError> {
        if self.is_staff() {
            Ok(())
        } else {
            Err(AppError::forbidden())
        }
    }

    /// Clients without a slug are not linked to any projects and are refused.
    pub fn scope(&self) -> Result<Scope, AppError> {
        if self.is_staff() {
            return Ok(Scope::All);
        }
        self.client_slug
            .clone()
            .map(Scope::Client)
            .ok_or_else(AppError::forbidden)
    }
}

/// Session token from `Authorization: Bearer` or the session cookie.
pub async fn request_token(parts: &mut Parts, state: &AppState) -> Option<String> {
    if let Ok(TypedHeader(Authorization(bearer))) =
        TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state).await
    {
        return Some(bearer.token().to_string());
    }
    let TypedHeader(cookies) = TypedHeader::<Cookie>::from_request_parts(parts, state)
        .await
        .ok()?;
    cookies
        .get(SESSION_COOKIE_NAME)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub fn client_info(headers: &HeaderMap) -> ClientInfo {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };
    let ip_address = header("x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .or_else(|| header("x-real-ip"))
        .map(|value| value.chars().take(64).collect());
    let user_agent = header("user-agent").map(|value| value.chars().take(512).collect());
    ClientInfo {
        ip_address,
        user_agent,
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = request_token(parts, state)
            .await
            .ok_or_else(AppError::unauthorized)?;

        // Store tokens are hex; only signed fallback sessions contain dots.
        if token.contains('.') {
            return authenticate_fallback(state, &token);
        }

        if !state.has_store() {
            return Err(AppError::unauthorized());
        }
        let mut conn = state.db()?;
        let user = session::find_session_user(&mut conn, &token, Utc::now().naive_utc())?
            .ok_or_else(AppError::unauthorized)?;
        let role = Role::parse(&user.role).ok_or_else(AppError::unauthorized)?;

        Ok(AuthenticatedUser {
            user_id: Some(user.id),
            email: user.email,
            role,
            client_slug: user.client_slug,
            source: PrincipalSource::Store,
        })
    }
}

fn authenticate_fallback(state: &AppState, token: &str) -> Result<AuthenticatedUser, AppError> {
    let claims = state
        .jwt
        .verify(token)
        .map_err(|_| AppError::unauthorized())?;
    // A user removed from configuration loses access even with a live token.
    let user = state
        .config
        .fallback_users
        .iter()
        .find(|user| user.email == claims.sub && user.role == claims.role)
        .ok_or_else(AppError::unauthorized)?;

    Ok(AuthenticatedUser {
        user_id: None,
        email: user.email.clone(),
        role: user.role,
        client_slug: user.client_slug.clone(),
        source: PrincipalSource::Config,
    })
}

/// The raw session token, if the request carried one.
pub struct SessionToken(pub Option<String>);

#[async_trait]
impl FromRequestParts<AppState> for SessionToken {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(SessionToken(request_token(parts, state).await))
    }
}

/// Route-layer guard for staff-only routers.
pub struct StaffUser(pub AuthenticatedUser);

#[async_trait]
impl FromRequestParts<AppState> for StaffUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthenticatedUser::from_request_parts(parts, state).await?;
        user.require_staff()?;
        Ok(StaffUser(user))
    }
}
