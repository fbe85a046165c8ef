use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::context::load_context;
use crate::error::AppResult;
use crate::models::RequestStep;
use crate::state::AppState;
use crate::workflow;

#[derive(Deserialize)]
pub struct AssignPayload {
    pub assignee_id: Uuid,
}

pub async fn assign_step(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(step_id): Path<Uuid>,
    Json(payload): Json<AssignPayload>,
) -> AppResult<Json<RequestStep>> {
    let mut conn = state.db()?;
    let ctx = load_context(&mut conn, user.user_id)?;
    let step = workflow::assign_step(&mut conn, &ctx, step_id, payload.assignee_id)?;
    Ok(Json(step))
}

pub async fn start_step(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(step_id): Path<Uuid>,
) -> AppResult<Json<RequestStep>> {
    let mut conn = state.db()?;
    let ctx = load_context(&mut conn, user.user_id)?;
    let step = workflow::start_step(&mut conn, &ctx, step_id)?;
    Ok(Json(step))
}

#[derive(Deserialize, Default)]
pub struct CompletePayload {
    pub notes: Option<String>,
}

pub async fn complete_step(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(step_id): Path<Uuid>,
    payload: Option<Json<CompletePayload>>,
) -> AppResult<Json<RequestStep>> {
    let mut conn = state.db()?;
    let ctx = load_context(&mut conn, user.user_id)?;
    let notes = payload.and_then(|Json(p)| p.notes);
    let step = workflow::complete_step(&mut conn, &ctx, step_id, notes)?;
    Ok(Json(step))
}

#[derive(Deserialize, Default)]
pub struct ApprovePayload {
    pub next_department_id: Option<Uuid>,
    pub next_assignee_id: Option<Uuid>,
    pub notes: Option<String>,
}

pub async fn approve_step(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(step_id): Path<Uuid>,
    payload: Option<Json<ApprovePayload>>,
) -> AppResult<Json<RequestStep>> {
    let mut conn = state.db()?;
    let ctx = load_context(&mut conn, user.user_id)?;
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    let step = workflow::approve_step(
        &mut conn,
        &ctx,
        step_id,
        payload.next_department_id,
        payload.next_assignee_id,
        payload.notes,
    )?;
    Ok(Json(step))
}

#[derive(Deserialize)]
pub struct ReturnPayload {
    pub reason: String,
    pub assignee_id: Option<Uuid>,
}

pub async fn return_step(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(step_id): Path<Uuid>,
    Json(payload): Json<ReturnPayload>,
) -> AppResult<Json<RequestStep>> {
    let mut conn = state.db()?;
    let ctx = load_context(&mut conn, user.user_id)?;
    let step = workflow::return_step(&mut conn, &ctx, step_id, payload.reason, payload.assignee_id)?;
    Ok(Json(step))
}

#[derive(Deserialize)]
pub struct SuspendPayload {
    pub notes: String,
}

pub async fn hold_step(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(step_id): Path<Uuid>,
    Json(payload): Json<SuspendPayload>,
) -> AppResult<Json<RequestStep>> {
    let mut conn = state.db()?;
    let ctx = load_context(&mut conn, user.user_id)?;
    let step = workflow::set_on_hold(&mut conn, &ctx, step_id, payload.notes)?;
    Ok(Json(step))
}

pub async fn request_info(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(step_id): Path<Uuid>,
    Json(payload): Json<SuspendPayload>,
) -> AppResult<Json<RequestStep>> {
    let mut conn = state.db()?;
    let ctx = load_context(&mut conn, user.user_id)?;
    let step = workflow::set_info_required(&mut conn, &ctx, step_id, payload.notes)?;
    Ok(Json(step))
}

pub async fn resume_step(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(step_id): Path<Uuid>,
) -> AppResult<Json<RequestStep>> {
    let mut conn = state.db()?;
    let ctx = load_context(&mut conn, user.user_id)?;
    let step = workflow::resume_step(&mut conn, &ctx, step_id)?;
    Ok(Json(step))
}
