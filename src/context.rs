use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::authz::Role;
use crate::error::{AppError, AppResult};
use crate::models::{Membership, Profile};
use crate::schema::{memberships, profiles};

/// The caller's resolved company context. Built from the profile's active
/// company and the matching membership row, never from client claims.
#[derive(Debug, Clone, Serialize)]
pub struct CallerContext {
    pub user_id: Uuid,
    pub company_id: Uuid,
    pub full_name: String,
    pub email: String,
    pub department_id: Option<Uuid>,
    pub role: Role,
    pub is_system_admin: bool,
}

pub fn load_context(conn: &mut PgConnection, user_id: Uuid) -> AppResult<CallerContext> {
    let profile: Profile = profiles::table
        .find(user_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::authorization("no profile for this user"))?;

    if !profile.is_active {
        return Err(AppError::authorization("profile is deactivated"));
    }

    let membership: Membership = memberships::table
        .filter(memberships::user_id.eq(user_id))
        .filter(memberships::company_id.eq(profile.company_id))
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::authorization("no membership in the active company"))?;

    let role = Role::parse(&membership.role)
        .ok_or_else(|| AppError::internal(format!("unknown role {:?}", membership.role)))?;

    Ok(CallerContext {
        user_id,
        company_id: profile.company_id,
        full_name: profile.full_name,
        email: profile.email,
        department_id: membership.department_id.or(profile.department_id),
        role,
        is_system_admin: profile.is_system_admin,
    })
}

/// System admins may not have a membership anywhere; resolve them by the
/// global profile flag alone.
pub fn load_system_admin(conn: &mut PgConnection, user_id: Uuid) -> AppResult<Profile> {
    let profile: Profile = profiles::table
        .find(user_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::authorization("no profile for this user"))?;

    if !profile.is_active {
        return Err(AppError::authorization("profile is deactivated"));
    }
    if !profile.is_system_admin {
        return Err(AppError::authorization("system administrator access required"));
    }

    Ok(profile)
}
