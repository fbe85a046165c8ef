mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, expect_status, TestApp};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn role_matrix_governs_step_management() -> Result<()> {
    let _guard = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let company = app.seed_company("Acme Corp").await?;
    let finance = app.seed_department(company, "Finance").await?;
    let legal = app.seed_department(company, "Legal").await?;
    let finance_manager = app
        .seed_user(company, Some(finance), "manager", "Fatima Manager")
        .await?;
    let finance_employee = app
        .seed_user(company, Some(finance), "employee", "Evan Employee")
        .await?;
    let legal_manager = app
        .seed_user(company, Some(legal), "manager", "Lena Manager")
        .await?;
    let ceo = app.seed_user(company, None, "ceo", "Carla Ceo").await?;
    let request_type = app.seed_request_type(company, "Purchase Order").await?;

    let employee_token = app.token_for(finance_employee)?;
    let response = app
        .post_json(
            "/api/requests",
            &json!({
                "request_type_id": request_type,
                "title": "Quarterly audit support",
                "target_department_id": finance,
            }),
            Some(&employee_token),
        )
        .await?;
    let body = expect_status(response, StatusCode::CREATED).await?;
    let step1 = Uuid::parse_str(body["first_step"]["id"].as_str().unwrap())?;

    // Employees never manage assignments, even in their own department.
    let response = app
        .post_json(
            &format!("/api/steps/{step1}/assign"),
            &json!({ "assignee_id": finance_employee }),
            Some(&employee_token),
        )
        .await?;
    expect_status(response, StatusCode::FORBIDDEN).await?;

    // A manager of another department is refused.
    let legal_token = app.token_for(legal_manager)?;
    let response = app
        .post_json(
            &format!("/api/steps/{step1}/assign"),
            &json!({ "assignee_id": finance_employee }),
            Some(&legal_token),
        )
        .await?;
    expect_status(response, StatusCode::FORBIDDEN).await?;

    // The CEO manages every department of the company.
    let ceo_token = app.token_for(ceo)?;
    let response = app
        .post_json(
            &format!("/api/steps/{step1}/assign"),
            &json!({ "assignee_id": finance_employee }),
            Some(&ceo_token),
        )
        .await?;
    expect_status(response, StatusCode::OK).await?;

    // The assignee must belong to the step's department.
    let response = app
        .post_json(
            &format!("/api/steps/{step1}/assign"),
            &json!({ "assignee_id": legal_manager }),
            Some(&ceo_token),
        )
        .await?;
    expect_status(response, StatusCode::BAD_REQUEST).await?;

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn pre_assignment_requires_management_rights() -> Result<()> {
    let _guard = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let company = app.seed_company("Acme Corp").await?;
    let finance = app.seed_department(company, "Finance").await?;
    let finance_employee = app
        .seed_user(company, Some(finance), "employee", "Evan Employee")
        .await?;
    let finance_manager = app
        .seed_user(company, Some(finance), "manager", "Fatima Manager")
        .await?;
    let request_type = app.seed_request_type(company, "Purchase Order").await?;

    // An employee may raise into any department but not pick the assignee.
    let employee_token = app.token_for(finance_employee)?;
    let response = app
        .post_json(
            "/api/requests",
            &json!({
                "request_type_id": request_type,
                "title": "New badge",
                "target_department_id": finance,
                "target_assignee_id": finance_employee,
            }),
            Some(&employee_token),
        )
        .await?;
    expect_status(response, StatusCode::FORBIDDEN).await?;

    // The department's manager may.
    let manager_token = app.token_for(finance_manager)?;
    let response = app
        .post_json(
            "/api/requests",
            &json!({
                "request_type_id": request_type,
                "title": "New badge",
                "target_department_id": finance,
                "target_assignee_id": finance_employee,
            }),
            Some(&manager_token),
        )
        .await?;
    let body = expect_status(response, StatusCode::CREATED).await?;
    assert_eq!(
        body["first_step"]["assigned_to"].as_str().unwrap(),
        finance_employee.to_string()
    );

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn visibility_is_scoped_by_role_and_company() -> Result<()> {
    let _guard = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let company = app.seed_company("Acme Corp").await?;
    let other_company = app.seed_company("Rival Inc").await?;
    let finance = app.seed_department(company, "Finance").await?;
    let legal = app.seed_department(company, "Legal").await?;
    let other_dept = app.seed_department(other_company, "Ops").await?;

    let requester = app
        .seed_user(company, Some(finance), "employee", "Evan Employee")
        .await?;
    let bystander = app
        .seed_user(company, Some(legal), "employee", "Bella Bystander")
        .await?;
    let legal_manager = app
        .seed_user(company, Some(legal), "manager", "Lena Manager")
        .await?;
    let outsider = app
        .seed_user(other_company, Some(other_dept), "admin", "Oscar Outsider")
        .await?;
    let request_type = app.seed_request_type(company, "Purchase Order").await?;

    let requester_token = app.token_for(requester)?;
    let response = app
        .post_json(
            "/api/requests",
            &json!({
                "request_type_id": request_type,
                "title": "Confidential purchase",
                "target_department_id": finance,
            }),
            Some(&requester_token),
        )
        .await?;
    let body = expect_status(response, StatusCode::CREATED).await?;
    let request_id = Uuid::parse_str(body["request"]["id"].as_str().unwrap())?;
    let step1 = Uuid::parse_str(body["first_step"]["id"].as_str().unwrap())?;

    // The requester sees their own request.
    let response = app
        .get(&format!("/api/requests/{request_id}"), Some(&requester_token))
        .await?;
    expect_status(response, StatusCode::OK).await?;

    // A colleague in an untouched department does not.
    let bystander_token = app.token_for(bystander)?;
    let response = app
        .get(&format!("/api/requests/{request_id}"), Some(&bystander_token))
        .await?;
    expect_status(response, StatusCode::NOT_FOUND).await?;

    // Neither does the Legal manager until the request touches Legal.
    let legal_token = app.token_for(legal_manager)?;
    let response = app
        .get(&format!("/api/requests/{request_id}"), Some(&legal_token))
        .await?;
    expect_status(response, StatusCode::NOT_FOUND).await?;

    // Other companies never see it, not even admins, and cannot act on it.
    let outsider_token = app.token_for(outsider)?;
    let response = app
        .get(&format!("/api/requests/{request_id}"), Some(&outsider_token))
        .await?;
    expect_status(response, StatusCode::NOT_FOUND).await?;
    let response = app
        .post_json(
            &format!("/api/steps/{step1}/assign"),
            &json!({ "assignee_id": outsider }),
            Some(&outsider_token),
        )
        .await?;
    expect_status(response, StatusCode::NOT_FOUND).await?;

    // List views honor the same scope.
    let response = app.get("/api/views/requests", Some(&bystander_token)).await?;
    let body = expect_status(response, StatusCode::OK).await?;
    assert!(body.as_array().unwrap().is_empty());
    let response = app.get("/api/views/requests", Some(&requester_token)).await?;
    let body = expect_status(response, StatusCode::OK).await?;
    assert_eq!(body.as_array().unwrap().len(), 1);

    // Workload is for managers and above.
    let response = app.get("/api/views/workload", Some(&requester_token)).await?;
    expect_status(response, StatusCode::FORBIDDEN).await?;
    let response = app.get("/api/views/workload", Some(&legal_token)).await?;
    expect_status(response, StatusCode::OK).await?;

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn admin_and_sys_surfaces_are_gated() -> Result<()> {
    let _guard = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let company = app.seed_company("Acme Corp").await?;
    let finance = app.seed_department(company, "Finance").await?;
    let manager = app
        .seed_user(company, Some(finance), "manager", "Fatima Manager")
        .await?;
    let admin = app.seed_user(company, None, "admin", "Ada Admin").await?;
    let employee = app
        .seed_user(company, Some(finance), "employee", "Evan Employee")
        .await?;

    // Role changes need the admin role.
    let manager_token = app.token_for(manager)?;
    let response = app
        .post_json(
            &format!("/api/admin/users/{employee}/role"),
            &json!({ "role": "manager", "department_id": finance }),
            Some(&manager_token),
        )
        .await?;
    expect_status(response, StatusCode::FORBIDDEN).await?;

    let admin_token = app.token_for(admin)?;
    let response = app
        .post_json(
            &format!("/api/admin/users/{employee}/role"),
            &json!({ "role": "manager", "department_id": finance }),
            Some(&admin_token),
        )
        .await?;
    let body = expect_status(response, StatusCode::OK).await?;
    assert_eq!(body["role"], "manager");

    // Company admins are not system admins.
    let response = app
        .post_json(
            "/api/sys/companies",
            &json!({ "name": "Shadow Corp" }),
            Some(&admin_token),
        )
        .await?;
    expect_status(response, StatusCode::FORBIDDEN).await?;

    let sys_admin = app.seed_system_admin(company).await?;
    let sys_token = app.token_for(sys_admin)?;
    let response = app
        .post_json(
            "/api/sys/companies",
            &json!({ "name": "Shadow Corp", "default_department": "General" }),
            Some(&sys_token),
        )
        .await?;
    let body = expect_status(response, StatusCode::CREATED).await?;
    assert_eq!(body["company"]["name"], "Shadow Corp");
    assert_eq!(body["default_department"]["name"], "General");

    // Requests require a token at all.
    let response = app.get("/api/views/requests", None).await?;
    expect_status(response, StatusCode::FORBIDDEN).await?;

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn deactivated_profiles_are_locked_out() -> Result<()> {
    let _guard = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let company = app.seed_company("Acme Corp").await?;
    let finance = app.seed_department(company, "Finance").await?;
    let employee = app
        .seed_user(company, Some(finance), "employee", "Evan Employee")
        .await?;
    let sys_admin = app.seed_system_admin(company).await?;

    let employee_token = app.token_for(employee)?;
    let response = app.get("/api/me", Some(&employee_token)).await?;
    expect_status(response, StatusCode::OK).await?;

    let sys_token = app.token_for(sys_admin)?;
    let response = app
        .post_json(
            &format!("/api/sys/users/{employee}/active"),
            &json!({ "active": false }),
            Some(&sys_token),
        )
        .await?;
    expect_status(response, StatusCode::OK).await?;

    // The token still verifies but the profile gate refuses.
    let response = app.get("/api/me", Some(&employee_token)).await?;
    expect_status(response, StatusCode::FORBIDDEN).await?;

    app.cleanup().await?;
    Ok(())
}
