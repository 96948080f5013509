mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_json, TestApp};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn clients_only_see_their_own_projects() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let staff = app.staff_token().await?;

    let acme = app.insert_client("acme", "Acme").await?;
    let globex = app.insert_client("globex", "Globex").await?;
    let acme_project = app.insert_project(acme, "Acme relaunch").await?;
    let globex_project = app.insert_project(globex, "Globex shop").await?;
    app.insert_task(acme_project, "Kickoff", "Discovery", "done", 1)
        .await?;
    app.insert_task(acme_project, "Wireframes", "Design", "in_progress", 2)
        .await?;
    app.insert_task(acme_project, "Build", "Development", "todo", 3)
        .await?;

    app.insert_user("buyer@acme.test", "client-pass", "client", Some("acme"))
        .await?;
    let client = app.login_token("buyer@acme.test", "client-pass").await?;

    let response = app.get("/api/portal/projects", Some(&client)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let projects = body_json(response).await?;
    let projects = projects.as_array().unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0]["client"]["slug"], "acme");
    assert_eq!(projects[0]["phase"], "Design");
    assert_eq!(projects[0]["completion_percent"], 33);

    let response = app
        .get(&format!("/api/portal/projects/{acme_project}"), Some(&client))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let detail = body_json(response).await?;
    assert_eq!(detail["task_list"].as_array().map(Vec::len), Some(3));
    assert_eq!(detail["task_list"][0]["title"], "Kickoff");

    let response = app
        .get(&format!("/api/portal/projects/{globex_project}"), Some(&client))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Staff can narrow the listing to one client.
    let response = app.get("/api/portal/projects", Some(&staff)).await?;
    assert_eq!(body_json(response).await?.as_array().map(Vec::len), Some(2));
    let response = app
        .get("/api/portal/projects?client=globex", Some(&staff))
        .await?;
    let narrowed = body_json(response).await?;
    assert_eq!(narrowed.as_array().map(Vec::len), Some(1));
    assert_eq!(narrowed[0]["name"], "Globex shop");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn deliverable_review_cycle() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let staff = app.staff_token().await?;
    let acme = app.insert_client("acme", "Acme").await?;
    let project = app.insert_project(acme, "Acme relaunch").await?;
    app.insert_user("buyer@acme.test", "client-pass", "client", Some("acme"))
        .await?;
    let client = app.login_token("buyer@acme.test", "client-pass").await?;

    let response = app
        .post_json(
            "/api/deliverables",
            &json!({ "project_id": project, "title": "Homepage design" }),
            Some(&client),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .post_json(
            "/api/deliverables",
            &json!({ "project_id": project, "title": "Homepage design" }),
            Some(&staff),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let deliverable = body_json(response).await?;
    assert_eq!(deliverable["status"], "pending");
    assert_eq!(deliverable["version"], 1);
    let path = format!("/api/deliverables/{}", deliverable["id"].as_str().unwrap());

    // Skipping review is not a legal move.
    let response = app
        .patch_json(&path, &json!({ "status": "approved" }), Some(&staff))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    for status in ["uploaded", "in_review"] {
        let response = app
            .patch_json(&path, &json!({ "status": status }), Some(&staff))
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .patch_json(&path, &json!({ "title": "Renamed" }), Some(&client))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .patch_json(&path, &json!({ "status": "rejected" }), Some(&client))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await?["status"], "rejected");

    let response = app
        .patch_json(&path, &json!({ "status": "uploaded" }), Some(&staff))
        .await?;
    let reuploaded = body_json(response).await?;
    assert_eq!(reuploaded["version"], 2);
    assert_eq!(reuploaded["client_approved"], false);

    app.patch_json(&path, &json!({ "status": "in_review" }), Some(&staff))
        .await?;
    let response = app
        .patch_json(&path, &json!({ "status": "approved" }), Some(&client))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let approved = body_json(response).await?;
    assert_eq!(approved["status"], "approved");
    assert_eq!(approved["client_approved"], true);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn feedback_is_scoped_to_the_client() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let staff = app.staff_token().await?;
    let acme = app.insert_client("acme", "Acme").await?;
    let globex = app.insert_client("globex", "Globex").await?;
    let acme_project = app.insert_project(acme, "Acme relaunch").await?;
    let globex_project = app.insert_project(globex, "Globex shop").await?;
    app.insert_user("buyer@acme.test", "client-pass", "client", Some("acme"))
        .await?;
    let client = app.login_token("buyer@acme.test", "client-pass").await?;

    let mut ids = Vec::new();
    for project in [acme_project, globex_project] {
        let response = app
            .post_json(
                "/api/deliverables",
                &json!({ "project_id": project, "title": "Logo" }),
                Some(&staff),
            )
            .await?;
        ids.push(body_json(response).await?["id"].as_str().unwrap().to_string());
    }

    let response = app
        .post_json(
            "/api/feedback",
            &json!({ "deliverable_id": ids[0], "rating": 6, "comment": "Great" }),
            Some(&client),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            "/api/feedback",
            &json!({ "deliverable_id": ids[0], "rating": 5, "comment": "Great work" }),
            Some(&client),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await?["client_id"], acme.to_string());

    let response = app
        .post_json(
            "/api/feedback",
            &json!({ "deliverable_id": ids[1], "comment": "Not mine" }),
            Some(&client),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .post_json(
            "/api/feedback",
            &json!({ "deliverable_id": ids[1], "comment": "Internal note" }),
            Some(&staff),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app.get("/api/feedback", Some(&client)).await?;
    let page = body_json(response).await?;
    assert_eq!(page["total"], 1);
    let response = app.get("/api/feedback", Some(&staff)).await?;
    assert_eq!(body_json(response).await?["total"], 2);

    let response = app.get("/api/deliverables", Some(&client)).await?;
    assert_eq!(body_json(response).await?["total"], 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn deliverable_create_checks_references() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let staff = app.staff_token().await?;
    let acme = app.insert_client("acme", "Acme").await?;
    let globex = app.insert_client("globex", "Globex").await?;
    let project = app.insert_project(acme, "Acme relaunch").await?;
    let other_project = app.insert_project(globex, "Globex shop").await?;
    let other_task = app
        .insert_task(other_project, "Checkout", "Development", "todo", 1)
        .await?;

    let response = app
        .post_json(
            "/api/deliverables",
            &json!({ "project_id": Uuid::new_v4(), "title": "Orphan" }),
            Some(&staff),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .post_json(
            "/api/deliverables",
            &json!({ "project_id": project, "task_id": other_task, "title": "Crossed" }),
            Some(&staff),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            "/api/deliverables",
            &json!({ "project_id": project, "task_id": Uuid::new_v4(), "title": "Dangling" }),
            Some(&staff),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .post_json(
            "/api/deliverables",
            &json!({
                "project_id": project,
                "title": "Style guide",
                "file_url": "https://files.test/style.pdf",
                "notify_client": true,
            }),
            Some(&staff),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    // The ready notice is sent in the background.
    let mut delivered = false;
    for _ in 0..50 {
        if app
            .mailer
            .sent()
            .await
            .iter()
            .any(|email| email.to == "acme@clients.test" && email.text.contains("style.pdf"))
        {
            delivered = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(delivered);

    let response = app.get("/api/deliverables", Some(&staff)).await?;
    let listed = body_json(response).await?;
    assert_eq!(listed["items"].as_array().map(Vec::len), Some(1));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn unknown_client_slug_is_forbidden() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let acme = app.insert_client("acme", "Acme").await?;
    app.insert_project(acme, "Acme relaunch").await?;
    app.insert_user("ghost@nowhere.test", "client-pass", "client", Some("ghost"))
        .await?;
    let client = app.login_token("ghost@nowhere.test", "client-pass").await?;

    for path in ["/api/portal/projects", "/api/deliverables", "/api/feedback"] {
        let response = app.get(path, Some(&client)).await?;
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "{path}");
    }

    app.cleanup().await?;
    Ok(())
}
