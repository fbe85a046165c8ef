use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::context::load_context;
use crate::error::{AppError, AppResult};
use crate::models::{Request, RequestAttachment, RequestComment, RequestStep};
use crate::queries;
use crate::state::AppState;
use crate::workflow;

#[derive(Deserialize)]
pub struct CreateRequestPayload {
    pub request_type_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub target_department_id: Uuid,
    pub target_assignee_id: Option<Uuid>,
    pub priority: Option<i32>,
    pub due_at: Option<NaiveDateTime>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Serialize)]
pub struct CreatedRequest {
    pub request: Request,
    pub first_step: RequestStep,
}

pub async fn create_request(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateRequestPayload>,
) -> AppResult<(StatusCode, Json<CreatedRequest>)> {
    let mut conn = state.db()?;
    let ctx = load_context(&mut conn, user.user_id)?;

    let (request, first_step) = workflow::create_request(
        &mut conn,
        &ctx,
        workflow::CreateRequestParams {
            request_type_id: payload.request_type_id,
            title: payload.title,
            description: payload.description,
            target_department_id: payload.target_department_id,
            target_assignee_id: payload.target_assignee_id,
            priority: payload.priority,
            due_at: payload.due_at,
            metadata: payload.metadata,
        },
    )?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedRequest {
            request,
            first_step,
        }),
    ))
}

pub async fn list_requests(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<queries::RequestOverview>>> {
    let mut conn = state.db()?;
    let ctx = load_context(&mut conn, user.user_id)?;
    Ok(Json(queries::list_requests(&mut conn, &ctx)?))
}

pub async fn get_request(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<queries::RequestDetail>> {
    let mut conn = state.db()?;
    let ctx = load_context(&mut conn, user.user_id)?;
    Ok(Json(queries::request_detail(&mut conn, &ctx, request_id)?))
}

#[derive(Deserialize)]
pub struct CommentPayload {
    pub body: String,
    pub step_id: Option<Uuid>,
}

pub async fn add_comment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<CommentPayload>,
) -> AppResult<(StatusCode, Json<RequestComment>)> {
    let mut conn = state.db()?;
    let ctx = load_context(&mut conn, user.user_id)?;
    let comment = workflow::add_comment(&mut conn, &ctx, request_id, payload.step_id, payload.body)?;
    Ok((StatusCode::CREATED, Json(comment)))
}

#[derive(Deserialize)]
pub struct UploadParams {
    pub file_name: String,
    pub step_id: Option<Uuid>,
}

pub async fn upload_attachment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(request_id): Path<Uuid>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<(StatusCode, Json<RequestAttachment>)> {
    if body.is_empty() {
        return Err(AppError::validation("attachment body must not be empty"));
    }

    let mut conn = state.db()?;
    let ctx = load_context(&mut conn, user.user_id)?;

    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let storage_path = format!(
        "{}/{}/{}-{}",
        ctx.company_id,
        request_id,
        Uuid::new_v4(),
        params.file_name
    );
    let byte_size = body.len() as i64;

    state
        .storage
        .put_object(&storage_path, body.to_vec(), mime_type.clone())
        .await?;

    let attachment = workflow::add_attachment(
        &mut conn,
        &ctx,
        workflow::AddAttachmentParams {
            request_id,
            step_id: params.step_id,
            storage_bucket: state.config.attachments_bucket.clone(),
            storage_path,
            file_name: params.file_name,
            mime_type,
            byte_size: Some(byte_size),
        },
    )?;

    Ok((StatusCode::CREATED, Json(attachment)))
}

#[derive(Serialize)]
pub struct DownloadLink {
    pub url: String,
    pub expires_in_minutes: u64,
}

pub async fn download_attachment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((request_id, attachment_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<DownloadLink>> {
    let mut conn = state.db()?;
    let ctx = load_context(&mut conn, user.user_id)?;

    // Reuses the detail projection's access check before presigning.
    let detail = queries::request_detail(&mut conn, &ctx, request_id)?;
    let attachment = detail
        .attachments
        .into_iter()
        .find(|a| a.id == attachment_id)
        .ok_or_else(AppError::not_found)?;

    let expiry = state.config.attachment_url_expiry_minutes;
    let url = state
        .storage
        .presign_get_object(&attachment.storage_path, Duration::from_secs(expiry * 60))
        .await?;

    Ok(Json(DownloadLink {
        url,
        expires_in_minutes: expiry,
    }))
}
