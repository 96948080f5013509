use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::NaiveDateTime;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::MigrationHarness;
use http_body_util::BodyExt;
use leadline::auth::jwt::JwtService;
use leadline::auth::password::hash_password;
use leadline::classifier::{CompletionClient, LeadClassifier};
use leadline::config::{AppConfig, FallbackUser};
use leadline::db::{self, PgPool, MIGRATIONS};
use leadline::models::{NewClient, NewIntakeToken, NewProject, NewTask, NewUser};
use leadline::notify::{Mailer, Notifier, OutboundEmail, WebhookSink};
use leadline::routes;
use leadline::state::AppState;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[allow(dead_code)]
pub const STAFF_INBOX: &str = "team@example.com";
#[allow(dead_code)]
pub const FALLBACK_ADMIN: (&str, &str) = ("owner@example.com", "fallback-pass");

#[derive(Default)]
pub struct FakeMailer {
    sent: Mutex<Vec<OutboundEmail>>,
    failure: Mutex<Option<String>>,
}

#[async_trait]
impl Mailer for FakeMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<()> {
        if let Some(reason) = self.failure.lock().await.clone() {
            bail!(reason);
        }
        self.sent.lock().await.push(email.clone());
        Ok(())
    }
}

impl FakeMailer {
    #[allow(dead_code)]
    pub async fn fail_with(&self, reason: &str) {
        *self.failure.lock().await = Some(reason.to_string());
    }

    #[allow(dead_code)]
    pub async fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().await.clone()
    }
}

#[derive(Default)]
pub struct FakeWebhook {
    posted: Mutex<Vec<Value>>,
    failure: Mutex<Option<String>>,
}

#[async_trait]
impl WebhookSink for FakeWebhook {
    async fn post(&self, payload: &Value) -> Result<()> {
        if let Some(reason) = self.failure.lock().await.clone() {
            bail!(reason);
        }
        self.posted.lock().await.push(payload.clone());
        Ok(())
    }
}

impl FakeWebhook {
    #[allow(dead_code)]
    pub async fn fail_with(&self, reason: &str) {
        *self.failure.lock().await = Some(reason.to_string());
    }

    #[allow(dead_code)]
    pub async fn posted(&self) -> Vec<Value> {
        self.posted.lock().await.clone()
    }
}

/// Replies with whatever was last scripted; errors when nothing is.
#[derive(Default)]
pub struct FakeCompletion {
    reply: Mutex<Option<String>>,
}

#[async_trait]
impl CompletionClient for FakeCompletion {
    fn model(&self) -> &str {
        "fake-model"
    }

    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String> {
        self.reply
            .lock()
            .await
            .clone()
            .ok_or_else(|| anyhow!("completion service unavailable"))
    }
}

impl FakeCompletion {
    #[allow(dead_code)]
    pub async fn reply_with(&self, reply: &str) {
        *self.reply.lock().await = Some(reply.to_string());
    }
}

pub struct TestApp {
    pub state: AppState,
    pub mailer: Arc<FakeMailer>,
    pub webhook: Arc<FakeWebhook>,
    pub completion: Arc<FakeCompletion>,
    router: Router,
}

fn test_config(database_url: Option<String>) -> AppConfig {
    AppConfig {
        database_url,
        database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        public_site_url: "https://studio.test".to_string(),
        jwt_secret: "test-secret".to_string(),
        jwt_issuer: "test-issuer".to_string(),
        jwt_audience: "test-audience".to_string(),
        session_expiry_hours: 24,
        session_cookie_secure: false,
        session_cookie_domain: None,
        cors_allowed_origin: None,
        ai_api_url: "http://completion.invalid".to_string(),
        ai_api_key: None,
        ai_model: "fake-model".to_string(),
        email_api_url: "http://email.invalid".to_string(),
        email_api_key: None,
        email_from: "Studio <noreply@studio.test>".to_string(),
        admin_notification_email: Some(STAFF_INBOX.to_string()),
        webhook_url: None,
        outbound_timeout_secs: 2,
        login_max_failures: 3,
        login_lockout_minutes: 15,
        intake_default_expiry_days: 7,
        auto_classify_contacts: true,
        fallback_users: vec![FallbackUser {
            email: FALLBACK_ADMIN.0.to_string(),
            password: FALLBACK_ADMIN.1.to_string(),
            role: leadline::auth::Role::Admin,
            client_slug: None,
        }],
    }
}

impl TestApp {
    /// Backed by the database at `TEST_DATABASE_URL`, or `None` when that is
    /// unset so the calling test can skip.
    pub async fn new() -> Result<Option<Self>> {
        let Ok(database_url) = env::var("TEST_DATABASE_URL") else {
            eprintln!("TEST_DATABASE_URL not set; skipping database test");
            return Ok(None);
        };

        let pool = db::init_pool_with_size(&database_url, db::DEFAULT_MAX_POOL_SIZE);
        prepare_database(&pool).await?;
        Ok(Some(Self::build(Some(pool), test_config(Some(database_url)))?))
    }

    /// No store at all: exercises the degraded paths.
    pub fn offline() -> Result<Self> {
        Self::build(None, test_config(None))
    }

    /// A configured database that refuses connections.
    #[allow(dead_code)]
    pub fn unreachable_store() -> Result<Self> {
        let url = "postgres://leadline@127.0.0.1:1/leadline";
        let pool = db::init_pool_with_size(url, 1);
        Self::build(Some(pool), test_config(Some(url.to_string())))
    }

    fn build(pool: Option<PgPool>, config: AppConfig) -> Result<Self> {
        let mailer = Arc::new(FakeMailer::default());
        let webhook = Arc::new(FakeWebhook::default());
        let completion = Arc::new(FakeCompletion::default());
        let timeout = Duration::from_secs(config.outbound_timeout_secs);

        let mailer_for_state: Arc<dyn Mailer> = mailer.clone();
        let webhook_for_state: Arc<dyn WebhookSink> = webhook.clone();
        let completion_for_state: Arc<dyn CompletionClient> = completion.clone();
        let notifier = Notifier::new(
            Some(mailer_for_state),
            Some(webhook_for_state),
            config.admin_notification_email.clone(),
            timeout,
        );
        let classifier = LeadClassifier::new(Some(completion_for_state), timeout);
        let jwt = JwtService::from_config(&config)?;

        let state = AppState::new(pool, config, classifier, notifier, jwt);
        let router = routes::create_router(state.clone());
        Ok(Self {
            state,
            mailer,
            webhook,
            completion,
            router,
        })
    }

    /// Raw SQL for tests that need to break a table on purpose. Constraints
    /// named `reject_*` are dropped again by `cleanup`.
    #[allow(dead_code)]
    pub async fn execute_sql(&self, sql: &'static str) -> Result<()> {
        self.with_conn(move |conn| {
            conn.batch_execute(sql)
                .with_context(|| format!("failed to execute `{sql}`"))
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn cleanup(&self) -> Result<()> {
        self.with_conn(|conn| truncate_all(conn)).await
    }

    #[allow(dead_code)]
    pub async fn insert_user(
        &self,
        email: &str,
        password: &str,
        role: &str,
        client_slug: Option<&str>,
    ) -> Result<Uuid> {
        let user = NewUser {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: hash_password(password)?,
            role: role.to_string(),
            client_slug: client_slug.map(str::to_string),
        };
        self.with_conn(move |conn| {
            diesel::insert_into(leadline::schema::users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(user.id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn insert_client(&self, slug: &str, name: &str) -> Result<Uuid> {
        let client = NewClient {
            id: Uuid::new_v4(),
            slug: slug.to_string(),
            name: name.to_string(),
            email: format!("{slug}@clients.test"),
        };
        self.with_conn(move |conn| {
            diesel::insert_into(leadline::schema::clients::table)
                .values(&client)
                .execute(conn)
                .context("failed to insert client")?;
            Ok(client.id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn insert_project(&self, client_id: Uuid, name: &str) -> Result<Uuid> {
        let project = NewProject {
            id: Uuid::new_v4(),
            client_id,
            name: name.to_string(),
            description: None,
        };
        self.with_conn(move |conn| {
            diesel::insert_into(leadline::schema::projects::table)
                .values(&project)
                .execute(conn)
                .context("failed to insert project")?;
            Ok(project.id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn insert_task(
        &self,
        project_id: Uuid,
        title: &str,
        phase: &str,
        status: &str,
        sort_order: i32,
    ) -> Result<Uuid> {
        let task = NewTask {
            id: Uuid::new_v4(),
            project_id,
            title: title.to_string(),
            phase: phase.to_string(),
            status: status.to_string(),
            sort_order,
            due_date: None,
        };
        self.with_conn(move |conn| {
            diesel::insert_into(leadline::schema::tasks::table)
                .values(&task)
                .execute(conn)
                .context("failed to insert task")?;
            Ok(task.id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn insert_intake_token(
        &self,
        lead_id: Uuid,
        token: &str,
        expires_at: NaiveDateTime,
    ) -> Result<()> {
        let row = NewIntakeToken {
            id: Uuid::new_v4(),
            token: token.to_string(),
            lead_id,
            expires_at,
        };
        self.with_conn(move |conn| {
            diesel::insert_into(leadline::schema::intake_tokens::table)
                .values(&row)
                .execute(conn)
                .context("failed to insert intake token")?;
            Ok(())
        })
        .await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<hyper::Response<Body>> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            email: &'a str,
            password: &'a str,
        }

        self.post_json("/api/auth/login", &LoginPayload { email, password }, None)
            .await
    }

    #[allow(dead_code)]
    pub async fn login_token(&self, email: &str, password: &str) -> Result<String> {
        let response = self.login(email, password).await?;
        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        let body = body_json(response).await?;
        body["token"]
            .as_str()
            .map(str::to_string)
            .context("login response missing token")
    }

    /// Creates a staff account and signs it in.
    #[allow(dead_code)]
    pub async fn staff_token(&self) -> Result<String> {
        self.insert_user("staff@studio.test", "staff-pass", "admin", None)
            .await?;
        self.login_token("staff@studio.test", "staff-pass").await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PATCH, path, payload, token).await
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let builder = Request::builder().method(Method::DELETE).uri(path);
        let builder = if let Some(token) = token {
            builder.header("authorization", format!("Bearer {token}"))
        } else {
            builder
        };
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self
            .state
            .pool
            .clone()
            .context("test app has no database")?;
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

pub async fn body_json(response: hyper::Response<Body>) -> Result<Value> {
    let bytes = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&bytes).context("response body was not JSON")
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "ALTER TABLE intake_submissions DROP CONSTRAINT IF EXISTS reject_submissions; \
         ALTER TABLE leads DROP CONSTRAINT IF EXISTS reject_intake_answers;",
    )
    .context("failed to drop test constraints")?;
    conn.batch_execute(
        "TRUNCATE TABLE feedback, deliverables, tasks, projects, clients, \
         intake_submissions, intake_tokens, leads, security_logs, sessions, users, agents \
         RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
