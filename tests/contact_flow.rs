mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_json, TestApp, STAFF_INBOX};
use serde_json::{json, Value};

fn inquiry(email: &str) -> Value {
    json!({
        "name": "Dana Fox",
        "email": email,
        "company": "Fox & Co",
        "message": "We need a quick landing page refresh before launch.",
    })
}

fn step<'a>(body: &'a Value, name: &str) -> Option<&'a Value> {
    body["steps"]
        .as_array()?
        .iter()
        .find(|step| step["name"] == name)
}

#[tokio::test]
async fn accepted_without_store_when_alert_email_goes_out() -> Result<()> {
    let app = TestApp::offline()?;

    let response = app
        .post_json("/api/contact", &inquiry("dana@example.com"), None)
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await?;
    assert_eq!(body["ok"], true);
    assert!(body["lead_id"].is_null());
    assert_eq!(step(&body, "store_lead").unwrap()["ok"], false);
    assert_eq!(step(&body, "lead_alert_email").unwrap()["ok"], true);
    assert!(step(&body, "classification").is_none());

    let sent = app.mailer.sent().await;
    assert!(sent.iter().any(|email| email.to == STAFF_INBOX
        && email.reply_to.as_deref() == Some("dana@example.com")));
    assert!(sent.iter().any(|email| email.to == "dana@example.com"));
    Ok(())
}

#[tokio::test]
async fn fails_when_neither_store_nor_alert_succeeds() -> Result<()> {
    let app = TestApp::offline()?;
    app.mailer.fail_with("provider down").await;

    let response = app
        .post_json("/api/contact", &inquiry("dana@example.com"), None)
        .await?;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await?;
    assert!(body["error"].as_str().unwrap().contains("unable to submit"));
    Ok(())
}

#[tokio::test]
async fn webhook_failure_does_not_fail_submission() -> Result<()> {
    let app = TestApp::offline()?;
    app.webhook.fail_with("sink unreachable").await;

    let response = app
        .post_json("/api/contact", &inquiry("dana@example.com"), None)
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await?;
    assert_eq!(step(&body, "webhook").unwrap()["ok"], false);
    Ok(())
}

#[tokio::test]
async fn rejects_invalid_submissions() -> Result<()> {
    let app = TestApp::offline()?;

    let missing_message = json!({ "name": "Dana", "email": "dana@example.com" });
    let response = app.post_json("/api/contact", &missing_message, None).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let bad_email = json!({ "name": "Dana", "email": "not-an-email", "message": "hi" });
    let response = app.post_json("/api/contact", &bad_email, None).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(app.mailer.sent().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn stores_and_classifies_new_leads() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    app.completion
        .reply_with(r#"{"tier": "SOFTBALL", "confidence": 0.9, "rationale": "Small, well scoped."}"#)
        .await;

    let response = app
        .post_json("/api/contact", &inquiry("dana@example.com"), None)
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await?;
    assert!(body["lead_id"].is_string());
    assert_eq!(body["tier"], "SOFTBALL");
    assert_eq!(step(&body, "store_lead").unwrap()["ok"], true);
    assert_eq!(step(&body, "classification").unwrap()["ok"], true);

    // A repeat inquiry lands on the same lead and is not reclassified.
    let response = app
        .post_json("/api/contact", &inquiry("Dana@Example.com"), None)
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let repeat = body_json(response).await?;
    assert_eq!(repeat["lead_id"], body["lead_id"]);
    assert!(step(&repeat, "classification").is_none());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn health_reports_missing_store() -> Result<()> {
    let app = TestApp::offline()?;

    let response = app.get("/api/health", None).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "unconfigured");
    assert_eq!(body["ai_classification"], true);
    Ok(())
}

#[tokio::test]
async fn health_reports_unreachable_store_as_down() -> Result<()> {
    let app = TestApp::unreachable_store()?;

    let response = app.get("/api/health", None).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "down");
    assert!(app.state.has_store());
    Ok(())
}
