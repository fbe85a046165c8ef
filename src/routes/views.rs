use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::auth::AuthenticatedUser;
use crate::context::load_context;
use crate::error::AppResult;
use crate::models::AuditLogEntry;
use crate::queries;
use crate::state::AppState;

pub async fn requests_overview(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<queries::RequestOverview>>> {
    let mut conn = state.db()?;
    let ctx = load_context(&mut conn, user.user_id)?;
    Ok(Json(queries::list_requests(&mut conn, &ctx)?))
}

pub async fn sla_open_steps(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<queries::SlaStepView>>> {
    let mut conn = state.db()?;
    let ctx = load_context(&mut conn, user.user_id)?;
    Ok(Json(queries::sla_open_steps(&mut conn, &ctx)?))
}

pub async fn department_workload(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<queries::WorkloadRow>>> {
    let mut conn = state.db()?;
    let ctx = load_context(&mut conn, user.user_id)?;
    Ok(Json(queries::department_workload(&mut conn, &ctx)?))
}

pub async fn dashboard(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<queries::DashboardKpis>> {
    let mut conn = state.db()?;
    let ctx = load_context(&mut conn, user.user_id)?;
    Ok(Json(queries::dashboard(&mut conn, &ctx)?))
}

#[derive(Deserialize, Default)]
pub struct AuditQuery {
    pub table: Option<String>,
    pub limit: Option<i64>,
}

pub async fn audit_entries(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<AuditQuery>,
) -> AppResult<Json<Vec<AuditLogEntry>>> {
    let mut conn = state.db()?;
    let ctx = load_context(&mut conn, user.user_id)?;
    Ok(Json(queries::audit_entries(
        &mut conn,
        &ctx,
        query.table,
        query.limit,
    )?))
}
