use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::admin;
use crate::auth::AuthenticatedUser;
use crate::authz::require_admin;
use crate::context::load_context;
use crate::error::AppResult;
use crate::models::{DepartmentRequestTypeSetting, Membership, Request, RequestType};
use crate::outbox::{self, BatchSummary, DispatchOptions};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SetRolePayload {
    pub role: String,
    pub department_id: Option<Uuid>,
}

pub async fn set_user_role(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(target_user_id): Path<Uuid>,
    Json(payload): Json<SetRolePayload>,
) -> AppResult<Json<Membership>> {
    let mut conn = state.db()?;
    let ctx = load_context(&mut conn, user.user_id)?;
    let membership = admin::set_user_role(
        &mut conn,
        &ctx,
        target_user_id,
        &payload.role,
        payload.department_id,
    )?;
    Ok(Json(membership))
}

#[derive(Deserialize)]
pub struct RequestTypePayload {
    pub id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub default_priority: i32,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

pub async fn upsert_request_type(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<RequestTypePayload>,
) -> AppResult<Json<RequestType>> {
    let mut conn = state.db()?;
    let ctx = load_context(&mut conn, user.user_id)?;
    let request_type = admin::upsert_request_type(
        &mut conn,
        &ctx,
        admin::UpsertRequestTypeParams {
            id: payload.id,
            name: payload.name,
            description: payload.description,
            default_priority: payload.default_priority,
            active: payload.active,
        },
    )?;
    Ok(Json(request_type))
}

#[derive(Deserialize)]
pub struct AutomationPayload {
    pub department_id: Uuid,
    pub request_type_id: Uuid,
    pub approval_mode: String,
    #[serde(default)]
    pub auto_close: bool,
    pub default_next_department_id: Option<Uuid>,
}

pub async fn set_automation_setting(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<AutomationPayload>,
) -> AppResult<Json<DepartmentRequestTypeSetting>> {
    let mut conn = state.db()?;
    let ctx = load_context(&mut conn, user.user_id)?;
    let setting = admin::set_automation_setting(
        &mut conn,
        &ctx,
        admin::AutomationSettingParams {
            department_id: payload.department_id,
            request_type_id: payload.request_type_id,
            approval_mode: payload.approval_mode,
            auto_close: payload.auto_close,
            default_next_department_id: payload.default_next_department_id,
        },
    )?;
    Ok(Json(setting))
}

pub async fn rollback_audit_entry(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(audit_id): Path<i64>,
) -> AppResult<Json<Request>> {
    let mut conn = state.db()?;
    let ctx = load_context(&mut conn, user.user_id)?;
    let restored = admin::rollback_audit_entry(&mut conn, &ctx, audit_id)?;
    Ok(Json(restored))
}

/// Drains one outbox batch on demand, with the same transport the
/// background dispatcher uses.
pub async fn run_outbox(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<BatchSummary>> {
    let mut conn = state.db()?;
    let ctx = load_context(&mut conn, user.user_id)?;
    require_admin(&ctx)?;

    let opts = DispatchOptions {
        batch_size: state.config.outbox_max_batch,
        max_attempts: state.config.outbox_max_attempts,
        lease_minutes: state.config.outbox_lease_minutes,
        worker_id: format!("http-{}", ctx.user_id),
    };
    let summary = outbox::run_batch(&mut conn, state.delivery.as_ref(), &opts).await?;
    Ok(Json(summary))
}
