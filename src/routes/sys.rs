//! Cross-company provisioning endpoints, restricted to profiles carrying
//! the global system-administrator flag.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::admin;
use crate::auth::AuthenticatedUser;
use crate::context::load_system_admin;
use crate::error::AppResult;
use crate::models::{Company, Department, Membership, Profile};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateCompanyPayload {
    pub name: String,
    pub default_department: Option<String>,
}

#[derive(Serialize)]
pub struct CreatedCompany {
    pub company: Company,
    pub default_department: Option<Department>,
}

pub async fn create_company(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateCompanyPayload>,
) -> AppResult<(StatusCode, Json<CreatedCompany>)> {
    let mut conn = state.db()?;
    let admin = load_system_admin(&mut conn, user.user_id)?;
    let (company, default_department) = admin::sys_create_company(
        &mut conn,
        &admin,
        &payload.name,
        payload.default_department.as_deref(),
    )?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedCompany {
            company,
            default_department,
        }),
    ))
}

#[derive(Deserialize)]
pub struct CreateDepartmentPayload {
    pub name: String,
}

pub async fn create_department(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(company_id): Path<Uuid>,
    Json(payload): Json<CreateDepartmentPayload>,
) -> AppResult<(StatusCode, Json<Department>)> {
    let mut conn = state.db()?;
    let admin = load_system_admin(&mut conn, user.user_id)?;
    let department = admin::sys_create_department(&mut conn, &admin, company_id, &payload.name)?;
    Ok((StatusCode::CREATED, Json(department)))
}

#[derive(Deserialize, Default)]
pub struct ListUsersQuery {
    pub company_id: Option<Uuid>,
}

pub async fn list_users(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListUsersQuery>,
) -> AppResult<Json<Vec<admin::DirectoryEntry>>> {
    let mut conn = state.db()?;
    load_system_admin(&mut conn, user.user_id)?;
    Ok(Json(admin::sys_list_users(&mut conn, query.company_id)?))
}

#[derive(Deserialize)]
pub struct MoveUserPayload {
    pub company_id: Uuid,
    pub department_id: Option<Uuid>,
    pub role: String,
}

pub async fn move_user_to_company(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(target_user_id): Path<Uuid>,
    Json(payload): Json<MoveUserPayload>,
) -> AppResult<Json<Profile>> {
    let mut conn = state.db()?;
    let admin = load_system_admin(&mut conn, user.user_id)?;
    let profile = admin::sys_move_user_to_company(
        &mut conn,
        &admin,
        target_user_id,
        payload.company_id,
        payload.department_id,
        &payload.role,
    )?;
    Ok(Json(profile))
}

#[derive(Deserialize)]
pub struct MembershipRolePayload {
    pub company_id: Uuid,
    pub role: String,
    pub department_id: Option<Uuid>,
}

pub async fn set_membership_role(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(target_user_id): Path<Uuid>,
    Json(payload): Json<MembershipRolePayload>,
) -> AppResult<Json<Membership>> {
    let mut conn = state.db()?;
    let admin = load_system_admin(&mut conn, user.user_id)?;
    let membership = admin::sys_set_membership_role(
        &mut conn,
        &admin,
        target_user_id,
        payload.company_id,
        &payload.role,
        payload.department_id,
    )?;
    Ok(Json(membership))
}

#[derive(Deserialize)]
pub struct SetActivePayload {
    pub active: bool,
}

pub async fn set_profile_active(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(target_user_id): Path<Uuid>,
    Json(payload): Json<SetActivePayload>,
) -> AppResult<Json<Profile>> {
    let mut conn = state.db()?;
    let admin = load_system_admin(&mut conn, user.user_id)?;
    let profile =
        admin::sys_set_profile_active(&mut conn, &admin, target_user_id, payload.active)?;
    Ok(Json(profile))
}
