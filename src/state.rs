use std::sync::Arc;

use anyhow::Result;
use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    auth::jwt::JwtService,
    classifier::{CompletionClient, HttpCompletionClient, LeadClassifier},
    config::AppConfig,
    db::PgPool,
    error::{AppError, AppResult},
    notify::{HttpMailer, HttpWebhook, Mailer, Notifier, WebhookSink},
};

type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    /// Absent when no database is configured.
    pub pool: Option<PgPool>,
    pub config: Arc<AppConfig>,
    pub classifier: LeadClassifier,
    pub notifier: Notifier,
    pub jwt: JwtService,
}

impl AppState {
    pub fn new(
        pool: Option<PgPool>,
        config: AppConfig,
        classifier: LeadClassifier,
        notifier: Notifier,
        jwt: JwtService,
    ) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            classifier,
            notifier,
            jwt,
        }
    }

    /// Wires the outbound HTTP services that have credentials configured.
    pub fn from_config(pool: Option<PgPool>, config: AppConfig) -> Result<Self> {
        let timeout = config.outbound_timeout();

        let completion: Option<Arc<dyn CompletionClient>> = match &config.ai_api_key {
            Some(key) => Some(Arc::new(HttpCompletionClient::new(
                config.ai_api_url.clone(),
                key.clone(),
                config.ai_model.clone(),
                timeout,
            )?)),
            None => None,
        };
        let mailer: Option<Arc<dyn Mailer>> = match &config.email_api_key {
            Some(key) => Some(Arc::new(HttpMailer::new(
                config.email_api_url.clone(),
                key.clone(),
                config.email_from.clone(),
                timeout,
            )?)),
            None => None,
        };
        let webhook: Option<Arc<dyn WebhookSink>> = match &config.webhook_url {
            Some(url) => Some(Arc::new(HttpWebhook::new(url.clone(), timeout)?)),
            None => None,
        };

        let classifier = LeadClassifier::new(completion, timeout);
        let notifier = Notifier::new(
            mailer,
            webhook,
            config.admin_notification_email.clone(),
            timeout,
        );
        let jwt = JwtService::from_config(&config)?;
        Ok(Self::new(pool, config, classifier, notifier, jwt))
    }

    pub fn has_store(&self) -> bool {
        self.pool.is_some()
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| AppError::internal("database unavailable"))?;
        pool.get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }
}
