//! Notification fan-out: transactional email plus the automation webhook.
//!
//! Every channel call is bounded by a timeout and returns its failure as a
//! [`NotifyError`] value. Callers decide whether a failed channel matters;
//! nothing here fails a request.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub mod mailer;
pub mod webhook;

pub use mailer::{HttpMailer, Mailer, OutboundEmail};
pub use webhook::{HttpWebhook, WebhookSink};

use crate::utils::redact::redact_email;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("{0} not configured")]
    NotConfigured(&'static str),
    #[error("notification has no email template")]
    NoTemplate,
    #[error("timed out after {0}ms")]
    Timeout(u128),
    #[error("{0}")]
    Failed(String),
}

pub type NotifyResult = Result<(), NotifyError>;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    LeadAlert {
        lead_id: Option<Uuid>,
        name: String,
        email: String,
        company: Option<String>,
        phone: Option<String>,
        message: Option<String>,
        source: String,
    },
    LeadConfirmation {
        name: String,
        email: String,
    },
    LeadClassified {
        lead_id: Uuid,
        tier: String,
        status: String,
        classification_source: String,
    },
    IntakeInvitation {
        lead_id: Uuid,
        name: String,
        email: String,
        url: String,
        expires_at: String,
    },
    /// Carries the full answer set so the email and webhook can stand in
    /// for a failed store write.
    IntakeSubmitted {
        lead_id: Uuid,
        name: String,
        email: String,
        answers: Map<String, Value>,
    },
    DeliverableReady {
        deliverable_id: Uuid,
        client_name: String,
        client_email: String,
        project_name: String,
        title: String,
        version: i32,
        file_url: Option<String>,
    },
    FeedbackReceived {
        feedback_id: Uuid,
        deliverable_title: String,
        project_name: String,
        client_name: String,
        rating: Option<i32>,
        comment: String,
    },
}

/// Who an email goes to.
enum Audience {
    Staff,
    Person(String),
}

impl Notification {
    pub fn event(&self) -> &'static str {
        match self {
            Notification::LeadAlert { .. } => "lead.created",
            Notification::LeadConfirmation { .. } => "lead.confirmation",
            Notification::LeadClassified { .. } => "lead.classified",
            Notification::IntakeInvitation { .. } => "intake.invited",
            Notification::IntakeSubmitted { .. } => "intake.submitted",
            Notification::DeliverableReady { .. } => "deliverable.ready",
            Notification::FeedbackReceived { .. } => "feedback.received",
        }
    }

    fn audience(&self) -> Option<Audience> {
        match self {
            Notification::LeadAlert { .. }
            | Notification::IntakeSubmitted { .. }
            | Notification::FeedbackReceived { .. } => Some(Audience::Staff),
            Notification::LeadConfirmation { email, .. }
            | Notification::IntakeInvitation { email, .. } => Some(Audience::Person(email.clone())),
            Notification::DeliverableReady { client_email, .. } => {
                Some(Audience::Person(client_email.clone()))
            }
            Notification::LeadClassified { .. } => None,
        }
    }

    fn reply_to(&self) -> Option<String> {
        match self {
            Notification::LeadAlert { email, .. } | Notification::IntakeSubmitted { email, .. } => {
                Some(email.clone())
            }
            _ => None,
        }
    }

    /// Subject and plain-text body.
    pub fn render(&self) -> Option<(String, String)> {
        let rendered = match self {
            Notification::LeadAlert {
                name,
                email,
                company,
                phone,
                message,
                source,
                ..
            } => (
                format!("New lead: {name}"),
                format!(
                    "Name: {name}\nEmail: {email}\nCompany: {}\nPhone: {}\nSource: {source}\n\n{}",
                    company.as_deref().unwrap_or("-"),
                    phone.as_deref().unwrap_or("-"),
                    message.as_deref().unwrap_or("(no message)")
                ),
            ),
            Notification::LeadConfirmation { name, .. } => (
                "Thanks for reaching out".to_string(),
                format!(
                    "Hi {name},\n\nThanks for getting in touch. We read every inquiry and will \
                     reply within two business days.\n"
                ),
            ),
            Notification::IntakeInvitation {
                name,
                url,
                expires_at,
                ..
            } => (
                "Your project questionnaire".to_string(),
                format!(
                    "Hi {name},\n\nPlease tell us more about your project here:\n{url}\n\n\
                     The link works once and expires on {expires_at}.\n"
                ),
            ),
            Notification::IntakeSubmitted {
                lead_id,
                name,
                email,
                answers,
            } => (
                format!("Intake questionnaire submitted: {name}"),
                format!(
                    "{name} <{email}> answered {} intake questions.\nLead: {lead_id}\n\n{}",
                    answers.len(),
                    render_answers(answers)
                ),
            ),
            Notification::DeliverableReady {
                client_name,
                project_name,
                title,
                version,
                file_url,
                ..
            } => (
                format!("{project_name}: \"{title}\" is ready for review"),
                format!(
                    "Hi {client_name},\n\nVersion {version} of \"{title}\" is ready in your \
                     project portal.{}\n",
                    file_url
                        .as_deref()
                        .map(|url| format!("\n\nDirect link: {url}"))
                        .unwrap_or_default()
                ),
            ),
            Notification::FeedbackReceived {
                deliverable_title,
                project_name,
                client_name,
                rating,
                comment,
                ..
            } => (
                format!("Feedback on {project_name}: {deliverable_title}"),
                format!(
                    "{client_name} left feedback{}:\n\n{comment}\n",
                    rating
                        .map(|r| format!(" (rating {r}/5)"))
                        .unwrap_or_default()
                ),
            ),
            Notification::LeadClassified { .. } => return None,
        };
        Some(rendered)
    }
}

fn render_answers(answers: &Map<String, Value>) -> String {
    answers
        .iter()
        .map(|(question, answer)| match answer {
            Value::String(text) => format!("{question}: {text}\n"),
            other => format!("{question}: {other}\n"),
        })
        .collect()
}

#[derive(Debug)]
pub struct DispatchReport {
    pub email: NotifyResult,
    pub webhook: NotifyResult,
}

#[derive(Clone)]
pub struct Notifier {
    mailer: Option<Arc<dyn Mailer>>,
    webhook: Option<Arc<dyn WebhookSink>>,
    admin_email: Option<String>,
    timeout: Duration,
}

impl Notifier {
    pub fn new(
        mailer: Option<Arc<dyn Mailer>>,
        webhook: Option<Arc<dyn WebhookSink>>,
        admin_email: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            mailer,
            webhook,
            admin_email,
            timeout,
        }
    }

    pub async fn email(&self, notification: &Notification) -> NotifyResult {
        let (subject, text) = notification.render().ok_or(NotifyError::NoTemplate)?;
        let mailer = self
            .mailer
            .as_ref()
            .ok_or(NotifyError::NotConfigured("email provider"))?;
        let to = match notification.audience() {
            Some(Audience::Staff) => self
                .admin_email
                .clone()
                .ok_or(NotifyError::NotConfigured("admin notification email"))?,
            Some(Audience::Person(email)) => email,
            None => return Err(NotifyError::NoTemplate),
        };

        let email = OutboundEmail {
            to,
            subject,
            text,
            reply_to: notification.reply_to(),
        };
        let result = match tokio::time::timeout(self.timeout, mailer.send(&email)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(NotifyError::Failed(format!("{err:#}"))),
            Err(_) => Err(NotifyError::Timeout(self.timeout.as_millis())),
        };

        let recipient = redact_email(&email.to);
        match &result {
            Ok(()) => info!(event = notification.event(), %recipient, "notification email sent"),
            Err(err) => warn!(
                event = notification.event(),
                %recipient,
                error = %err,
                "notification email failed"
            ),
        }
        result
    }

    pub async fn webhook(&self, notification: &Notification) -> NotifyResult {
        let sink = self
            .webhook
            .as_ref()
            .ok_or(NotifyError::NotConfigured("webhook"))?;
        let payload = json!({
            "event": notification.event(),
            "data": notification,
            "sent_at": Utc::now().to_rfc3339(),
        });

        let result = match tokio::time::timeout(self.timeout, sink.post(&payload)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(NotifyError::Failed(format!("{err:#}"))),
            Err(_) => Err(NotifyError::Timeout(self.timeout.as_millis())),
        };
        if let Err(err) = &result {
            warn!(event = notification.event(), error = %err, "webhook delivery failed");
        }
        result
    }

    /// Runs both channels concurrently. Notifications without an email
    /// template only go to the webhook.
    pub async fn dispatch(&self, notification: &Notification) -> DispatchReport {
        let email = async {
            if notification.render().is_some() {
                self.email(notification).await
            } else {
                Err(NotifyError::NoTemplate)
            }
        };
        let (email, webhook) = tokio::join!(email, self.webhook(notification));
        DispatchReport { email, webhook }
    }

    /// Fire-and-forget dispatch for notifications the request does not wait on.
    pub fn spawn(&self, notification: Notification) {
        let notifier = self.clone();
        tokio::spawn(async move {
            let report = notifier.dispatch(&notification).await;
            info!(
                event = notification.event(),
                email_ok = report.email.is_ok(),
                webhook_ok = report.webhook.is_ok(),
                "background notification finished"
            );
        });
    }
}
