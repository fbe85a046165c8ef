mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, expect_status, TestApp};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn attachments_are_stored_and_served_via_presigned_urls() -> Result<()> {
    let _guard = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let company = app.seed_company("Acme Corp").await?;
    let finance = app.seed_department(company, "Finance").await?;
    let employee = app
        .seed_user(company, Some(finance), "employee", "Evan Employee")
        .await?;
    let bystander_dept = app.seed_department(company, "Legal").await?;
    let bystander = app
        .seed_user(company, Some(bystander_dept), "employee", "Bella Bystander")
        .await?;
    let request_type = app.seed_request_type(company, "Purchase Order").await?;

    let token = app.token_for(employee)?;
    let response = app
        .post_json(
            "/api/requests",
            &json!({
                "request_type_id": request_type,
                "title": "New laptop purchase",
                "target_department_id": finance,
            }),
            Some(&token),
        )
        .await?;
    let body = expect_status(response, StatusCode::CREATED).await?;
    let request_id = Uuid::parse_str(body["request"]["id"].as_str().unwrap())?;

    let response = app
        .post_bytes(
            &format!("/api/requests/{request_id}/attachments?file_name=quote.pdf"),
            "application/pdf",
            b"%PDF-1.4 fake quote",
            &token,
        )
        .await?;
    let body = expect_status(response, StatusCode::CREATED).await?;
    let attachment_id = Uuid::parse_str(body["id"].as_str().unwrap())?;
    assert_eq!(body["file_name"], "quote.pdf");
    assert_eq!(body["mime_type"], "application/pdf");
    assert_eq!(body["byte_size"], 19);

    // The bytes landed in object storage under the recorded key.
    let storage_path = body["storage_path"].as_str().unwrap().to_string();
    let stored = app.storage().get(&storage_path).await.expect("stored object");
    assert_eq!(stored.bytes, b"%PDF-1.4 fake quote");

    let response = app
        .get(
            &format!("/api/requests/{request_id}/attachments/{attachment_id}/download"),
            Some(&token),
        )
        .await?;
    let body = expect_status(response, StatusCode::OK).await?;
    assert!(body["url"].as_str().unwrap().contains(&storage_path));
    assert_eq!(body["expires_in_minutes"], 30);

    // Download links honor request visibility.
    let bystander_token = app.token_for(bystander)?;
    let response = app
        .get(
            &format!("/api/requests/{request_id}/attachments/{attachment_id}/download"),
            Some(&bystander_token),
        )
        .await?;
    expect_status(response, StatusCode::NOT_FOUND).await?;

    // Empty uploads are rejected before touching storage.
    let response = app
        .post_bytes(
            &format!("/api/requests/{request_id}/attachments?file_name=empty.bin"),
            "application/octet-stream",
            b"",
            &token,
        )
        .await?;
    expect_status(response, StatusCode::BAD_REQUEST).await?;
    assert_eq!(app.storage().object_count().await, 1);

    app.cleanup().await?;
    Ok(())
}
