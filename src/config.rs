use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::{rngs::OsRng, RngCore};
use serde::Deserialize;
use url::Url;

use crate::auth::Role;
use crate::db::DEFAULT_MAX_POOL_SIZE;

pub const DEFAULT_AI_API_URL: &str = "https://api.anthropic.com/v1/messages";
pub const DEFAULT_AI_MODEL: &str = "claude-3-5-haiku-latest";
pub const DEFAULT_EMAIL_API_URL: &str = "https://api.resend.com/emails";

/// A user that can sign in while the database is unavailable. Loaded from
/// `FALLBACK_USERS` as a JSON array.
#[derive(Clone, Debug, Deserialize)]
pub struct FallbackUser {
    pub email: String,
    pub password: String,
    pub role: Role,
    #[serde(default)]
    pub client_slug: Option<String>,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    pub public_site_url: String,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub session_expiry_hours: i64,
    pub session_cookie_secure: bool,
    pub session_cookie_domain: Option<String>,
    pub cors_allowed_origin: Option<String>,
    pub ai_api_url: String,
    pub ai_api_key: Option<String>,
    pub ai_model: String,
    pub email_api_url: String,
    pub email_api_key: Option<String>,
    pub email_from: String,
    pub admin_notification_email: Option<String>,
    pub webhook_url: Option<String>,
    pub outbound_timeout_secs: u64,
    pub login_max_failures: i32,
    pub login_lockout_minutes: i64,
    pub intake_default_expiry_days: i64,
    pub auto_classify_contacts: bool,
    pub fallback_users: Vec<FallbackUser>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = non_empty_var("DATABASE_URL");
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("SERVER_PORT must be a valid u16")?;
        let public_site_url = env::var("PUBLIC_SITE_URL")
            .unwrap_or_else(|_| format!("http://{server_host}:{server_port}"));
        let public_site_url = public_site_url.trim_end_matches('/').to_string();
        let jwt_secret = non_empty_var("JWT_SECRET").unwrap_or_else(|| {
            tracing::warn!("JWT_SECRET not set; fallback sessions will not survive a restart");
            random_secret()
        });
        let jwt_issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "leadline".to_string());
        let jwt_audience =
            env::var("JWT_AUDIENCE").unwrap_or_else(|_| "leadline-portal".to_string());
        let session_expiry_hours = env::var("SESSION_EXPIRY_HOURS")
            .unwrap_or_else(|_| "168".to_string())
            .parse()
            .context("SESSION_EXPIRY_HOURS must be an integer")?;
        let session_cookie_secure = env::var("SESSION_COOKIE_SECURE")
            .map(|v| parse_flag(&v))
            .unwrap_or(false);
        let session_cookie_domain = non_empty_var("SESSION_COOKIE_DOMAIN");
        let cors_allowed_origin = non_empty_var("CORS_ALLOWED_ORIGIN");
        let ai_api_url = env::var("AI_API_URL").unwrap_or_else(|_| DEFAULT_AI_API_URL.to_string());
        let ai_api_key = non_empty_var("AI_API_KEY");
        let ai_model = env::var("AI_MODEL").unwrap_or_else(|_| DEFAULT_AI_MODEL.to_string());
        let email_api_url =
            env::var("EMAIL_API_URL").unwrap_or_else(|_| DEFAULT_EMAIL_API_URL.to_string());
        let email_api_key = non_empty_var("EMAIL_API_KEY");
        let email_from =
            env::var("EMAIL_FROM").unwrap_or_else(|_| "Leadline <noreply@localhost>".to_string());
        let admin_notification_email = non_empty_var("ADMIN_NOTIFICATION_EMAIL");
        let webhook_url = non_empty_var("WEBHOOK_URL");
        let outbound_timeout_secs = env::var("OUTBOUND_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("OUTBOUND_TIMEOUT_SECS must be an integer")?;
        let login_max_failures = env::var("LOGIN_MAX_FAILURES")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .context("LOGIN_MAX_FAILURES must be an integer")?;
        let login_lockout_minutes = env::var("LOGIN_LOCKOUT_MINUTES")
            .unwrap_or_else(|_| "15".to_string())
            .parse()
            .context("LOGIN_LOCKOUT_MINUTES must be an integer")?;
        let intake_default_expiry_days = env::var("INTAKE_DEFAULT_EXPIRY_DAYS")
            .unwrap_or_else(|_| "7".to_string())
            .parse()
            .context("INTAKE_DEFAULT_EXPIRY_DAYS must be an integer")?;
        let auto_classify_contacts = env::var("AUTO_CLASSIFY_CONTACTS")
            .map(|v| parse_flag(&v))
            .unwrap_or(true);
        let fallback_users = match non_empty_var("FALLBACK_USERS") {
            Some(raw) => parse_fallback_users(&raw)?,
            None => Vec::new(),
        };

        Ok(Self {
            database_url,
            database_max_pool_size,
            server_host,
            server_port,
            public_site_url,
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            session_expiry_hours,
            session_cookie_secure,
            session_cookie_domain,
            cors_allowed_origin,
            ai_api_url,
            ai_api_key,
            ai_model,
            email_api_url,
            email_api_key,
            email_from,
            admin_notification_email,
            webhook_url,
            outbound_timeout_secs,
            login_max_failures,
            login_lockout_minutes,
            intake_default_expiry_days,
            auto_classify_contacts,
            fallback_users,
        })
    }

    pub fn outbound_timeout(&self) -> Duration {
        Duration::from_secs(self.outbound_timeout_secs.max(1))
    }

    pub fn redacted_database_url(&self) -> String {
        self.database_url
            .as_deref()
            .map(redact_database_url)
            .unwrap_or_else(|| "<unset>".to_string())
    }

    pub fn intake_url(&self, token: &str) -> String {
        format!("{}/intake/{}", self.public_site_url, token)
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn random_secret() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn parse_fallback_users(raw: &str) -> Result<Vec<FallbackUser>> {
    let mut users: Vec<FallbackUser> =
        serde_json::from_str(raw).context("FALLBACK_USERS must be a JSON array of users")?;
    for user in &mut users {
        user.email = user.email.trim().to_lowercase();
    }
    users.retain(|user| !user.email.is_empty() && !user.password.is_empty());
    Ok(users)
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("*****"));
            }
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
