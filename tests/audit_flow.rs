mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, expect_status, TestApp};
use serde_json::json;
use uuid::Uuid;

struct Env {
    company: Uuid,
    finance: Uuid,
    manager: Uuid,
    employee: Uuid,
    admin: Uuid,
    request_type: Uuid,
}

async fn seed_env(app: &TestApp) -> Result<Env> {
    let company = app.seed_company("Acme Corp").await?;
    let finance = app.seed_department(company, "Finance").await?;
    Ok(Env {
        company,
        finance,
        manager: app
            .seed_user(company, Some(finance), "manager", "Fatima Manager")
            .await?,
        employee: app
            .seed_user(company, Some(finance), "employee", "Evan Employee")
            .await?,
        admin: app.seed_user(company, None, "admin", "Ada Admin").await?,
        request_type: app.seed_request_type(company, "Purchase Order").await?,
    })
}

/// Walks a one-step request to closure and returns its id. Closing writes
/// the `requests` UPDATE audit entry the rollback tests operate on.
async fn close_request(app: &TestApp, env: &Env) -> Result<Uuid> {
    let employee_token = app.token_for(env.employee)?;
    let manager_token = app.token_for(env.manager)?;

    let response = app
        .post_json(
            "/api/requests",
            &json!({
                "request_type_id": env.request_type,
                "title": "Office chairs",
                "target_department_id": env.finance,
            }),
            Some(&employee_token),
        )
        .await?;
    let body = expect_status(response, StatusCode::CREATED).await?;
    let request_id = Uuid::parse_str(body["request"]["id"].as_str().unwrap())?;
    let step1 = Uuid::parse_str(body["first_step"]["id"].as_str().unwrap())?;

    let response = app
        .post_json(
            &format!("/api/steps/{step1}/assign"),
            &json!({ "assignee_id": env.employee }),
            Some(&manager_token),
        )
        .await?;
    expect_status(response, StatusCode::OK).await?;
    let response = app
        .post_json(
            &format!("/api/steps/{step1}/complete"),
            &json!({}),
            Some(&employee_token),
        )
        .await?;
    expect_status(response, StatusCode::OK).await?;
    let response = app
        .post_json(
            &format!("/api/steps/{step1}/approve"),
            &json!({}),
            Some(&manager_token),
        )
        .await?;
    expect_status(response, StatusCode::OK).await?;

    Ok(request_id)
}

#[tokio::test]
async fn every_mutation_leaves_an_audit_trail() -> Result<()> {
    let _guard = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let env = seed_env(&app).await?;

    close_request(&app, &env).await?;

    let admin_token = app.token_for(env.admin)?;
    let response = app.get("/api/views/audit", Some(&admin_token)).await?;
    let body = expect_status(response, StatusCode::OK).await?;
    let entries = body.as_array().unwrap();

    let mut tables: Vec<(&str, &str)> = entries
        .iter()
        .map(|e| {
            (
                e["table_name"].as_str().unwrap(),
                e["action"].as_str().unwrap(),
            )
        })
        .collect();
    tables.sort();
    assert!(tables.contains(&("requests", "INSERT")));
    assert!(tables.contains(&("requests", "UPDATE")));
    assert!(tables.contains(&("request_steps", "INSERT")));
    assert!(tables.contains(&("request_steps", "UPDATE")));

    // Every entry carries a before or after snapshot.
    for entry in entries {
        assert!(
            !entry["old_data"].is_null() || !entry["new_data"].is_null(),
            "audit entry without snapshots: {entry}"
        );
    }

    // The table filter narrows the view.
    let response = app
        .get("/api/views/audit?table=requests", Some(&admin_token))
        .await?;
    let body = expect_status(response, StatusCode::OK).await?;
    assert!(body
        .as_array()
        .unwrap()
        .iter()
        .all(|e| e["table_name"] == "requests"));

    // Employees have no audit access.
    let employee_token = app.token_for(env.employee)?;
    let response = app.get("/api/views/audit", Some(&employee_token)).await?;
    expect_status(response, StatusCode::FORBIDDEN).await?;

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn audit_view_is_scoped_by_visibility() -> Result<()> {
    let _guard = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let env = seed_env(&app).await?;

    let legal = app.seed_department(env.company, "Legal").await?;
    let ceo = app.seed_user(env.company, None, "ceo", "Cleo Chief").await?;
    let legal_manager = app
        .seed_user(env.company, Some(legal), "manager", "Lena Counsel")
        .await?;

    close_request(&app, &env).await?;

    // The CEO reads the whole company trail.
    let ceo_token = app.token_for(ceo)?;
    let response = app.get("/api/views/audit", Some(&ceo_token)).await?;
    let body = expect_status(response, StatusCode::OK).await?;
    assert!(!body.as_array().unwrap().is_empty());

    // The finance manager sees only entries tied to requests routed
    // through their department; each carries a request reference.
    let manager_token = app.token_for(env.manager)?;
    let response = app.get("/api/views/audit", Some(&manager_token)).await?;
    let body = expect_status(response, StatusCode::OK).await?;
    let entries = body.as_array().unwrap();
    assert!(!entries.is_empty());
    assert!(entries.iter().all(|e| !e["request_id"].is_null()));

    // A manager whose department never touched the request sees nothing.
    let legal_token = app.token_for(legal_manager)?;
    let response = app.get("/api/views/audit", Some(&legal_token)).await?;
    let body = expect_status(response, StatusCode::OK).await?;
    assert!(body.as_array().unwrap().is_empty());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn rollback_restores_the_pre_image_once() -> Result<()> {
    let _guard = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let env = seed_env(&app).await?;

    let request_id = close_request(&app, &env).await?;
    let admin_token = app.token_for(env.admin)?;

    let response = app
        .get("/api/views/audit?table=requests", Some(&admin_token))
        .await?;
    let body = expect_status(response, StatusCode::OK).await?;
    let close_entry = body
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["action"] == "UPDATE" && e["new_data"]["request_status"] == "closed")
        .expect("closing audit entry")
        .clone();
    let audit_id = close_entry["id"].as_i64().unwrap();

    let response = app
        .post_empty(
            &format!("/api/admin/audit/{audit_id}/rollback"),
            Some(&admin_token),
        )
        .await?;
    let body = expect_status(response, StatusCode::OK).await?;
    assert_eq!(body["request_status"], "open");
    assert!(body["closed_at"].is_null());

    let employee_token = app.token_for(env.employee)?;
    let response = app
        .get(&format!("/api/requests/{request_id}"), Some(&employee_token))
        .await?;
    let body = expect_status(response, StatusCode::OK).await?;
    assert_eq!(body["request"]["request_status"], "open");
    assert!(body["events"]
        .as_array()
        .unwrap()
        .iter()
        .any(|e| e["event_type"] == "audit_rollback"));

    // The live row no longer matches the entry's post-image.
    let response = app
        .post_empty(
            &format!("/api/admin/audit/{audit_id}/rollback"),
            Some(&admin_token),
        )
        .await?;
    expect_status(response, StatusCode::CONFLICT).await?;

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn rollback_is_limited_to_request_updates_and_admins() -> Result<()> {
    let _guard = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let env = seed_env(&app).await?;

    close_request(&app, &env).await?;
    let admin_token = app.token_for(env.admin)?;

    // A step entry is not a rollback target.
    let response = app
        .get("/api/views/audit?table=request_steps", Some(&admin_token))
        .await?;
    let body = expect_status(response, StatusCode::OK).await?;
    let step_entry_id = body.as_array().unwrap()[0]["id"].as_i64().unwrap();
    let response = app
        .post_empty(
            &format!("/api/admin/audit/{step_entry_id}/rollback"),
            Some(&admin_token),
        )
        .await?;
    expect_status(response, StatusCode::BAD_REQUEST).await?;

    // Non-admins cannot roll back anything.
    let manager_token = app.token_for(env.manager)?;
    let response = app
        .post_empty("/api/admin/audit/1/rollback", Some(&manager_token))
        .await?;
    expect_status(response, StatusCode::FORBIDDEN).await?;

    // Unknown entries are a 404.
    let response = app
        .post_empty("/api/admin/audit/999999/rollback", Some(&admin_token))
        .await?;
    expect_status(response, StatusCode::NOT_FOUND).await?;

    app.cleanup().await?;
    Ok(())
}
