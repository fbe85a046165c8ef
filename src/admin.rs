//! Company administration and cross-company provisioning. Company admins
//! work inside their own company; the `sys_*` functions require the global
//! system-administrator flag and may touch any company.

use diesel::prelude::*;
use diesel::upsert::excluded;
use serde::Serialize;
use uuid::Uuid;

use crate::audit::{self, snapshot, ACTION_INSERT, ACTION_UPDATE};
use crate::authz::{require_admin, Role};
use crate::context::CallerContext;
use crate::error::{AppError, AppResult};
use crate::models::{
    Company, Department, DepartmentRequestTypeSetting, Membership, NewCompany, NewDepartment,
    NewDepartmentRequestTypeSetting, NewMembership, NewRequestType, Profile, RequestType,
};
use crate::schema::{
    companies, department_request_type_settings, departments, memberships, profiles,
    request_types,
};
use crate::workflow::{APPROVAL_MODE_AUTO, APPROVAL_MODE_MANUAL};

/// Changes a user's role (and department for scoped roles) inside the
/// caller's company.
pub fn set_user_role(
    conn: &mut PgConnection,
    ctx: &CallerContext,
    user_id: Uuid,
    role: &str,
    department_id: Option<Uuid>,
) -> AppResult<Membership> {
    require_admin(ctx)?;

    let role = Role::parse(role).ok_or_else(|| AppError::validation("unknown role"))?;

    let department_id = if role.is_company_wide() {
        None
    } else {
        let department_id = department_id
            .ok_or_else(|| AppError::validation("this role requires a department"))?;
        require_department(conn, ctx.company_id, department_id)?;
        Some(department_id)
    };

    conn.transaction(|conn| {
        let membership: Membership = memberships::table
            .filter(memberships::user_id.eq(user_id))
            .filter(memberships::company_id.eq(ctx.company_id))
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::validation("user is not a member of this company"))?;

        let old = snapshot(&membership)?;
        diesel::update(memberships::table.find(membership.id))
            .set((
                memberships::role.eq(role.as_str()),
                memberships::department_id.eq(department_id),
            ))
            .execute(conn)?;
        diesel::update(profiles::table.find(user_id))
            .set(profiles::department_id.eq(department_id))
            .execute(conn)?;
        let updated: Membership = memberships::table.find(membership.id).first(conn)?;

        audit::record(
            conn,
            ctx.company_id,
            audit::TABLE_MEMBERSHIPS,
            ACTION_UPDATE,
            updated.id,
            None,
            None,
            Some(old),
            Some(snapshot(&updated)?),
            Some(ctx.user_id),
        )?;

        Ok(updated)
    })
}

#[derive(Debug)]
pub struct UpsertRequestTypeParams {
    pub id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub default_priority: i32,
    pub active: bool,
}

pub fn upsert_request_type(
    conn: &mut PgConnection,
    ctx: &CallerContext,
    params: UpsertRequestTypeParams,
) -> AppResult<RequestType> {
    require_admin(ctx)?;

    let name = params.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::validation("request type name must not be empty"));
    }
    if !(1..=4).contains(&params.default_priority) {
        return Err(AppError::validation("default priority must be between 1 and 4"));
    }

    conn.transaction(|conn| match params.id {
        Some(id) => {
            let existing: RequestType = request_types::table
                .find(id)
                .filter(request_types::company_id.eq(ctx.company_id))
                .first(conn)
                .optional()?
                .ok_or_else(AppError::not_found)?;

            let old = snapshot(&existing)?;
            diesel::update(request_types::table.find(id))
                .set((
                    request_types::name.eq(&name),
                    request_types::description.eq(&params.description),
                    request_types::default_priority.eq(params.default_priority),
                    request_types::active.eq(params.active),
                ))
                .execute(conn)?;
            let updated: RequestType = request_types::table.find(id).first(conn)?;

            audit::record(
                conn,
                ctx.company_id,
                audit::TABLE_REQUEST_TYPES,
                ACTION_UPDATE,
                id,
                None,
                None,
                Some(old),
                Some(snapshot(&updated)?),
                Some(ctx.user_id),
            )?;
            Ok(updated)
        }
        None => {
            let new_type = NewRequestType {
                id: Uuid::new_v4(),
                company_id: ctx.company_id,
                name,
                description: params.description,
                default_priority: params.default_priority,
                active: params.active,
            };
            diesel::insert_into(request_types::table)
                .values(&new_type)
                .execute(conn)?;
            let created: RequestType = request_types::table.find(new_type.id).first(conn)?;

            audit::record(
                conn,
                ctx.company_id,
                audit::TABLE_REQUEST_TYPES,
                ACTION_INSERT,
                created.id,
                None,
                None,
                None,
                Some(snapshot(&created)?),
                Some(ctx.user_id),
            )?;
            Ok(created)
        }
    })
}

#[derive(Debug)]
pub struct AutomationSettingParams {
    pub department_id: Uuid,
    pub request_type_id: Uuid,
    pub approval_mode: String,
    pub auto_close: bool,
    pub default_next_department_id: Option<Uuid>,
}

/// Upserts the automation rule for one (department, request type) pair.
pub fn set_automation_setting(
    conn: &mut PgConnection,
    ctx: &CallerContext,
    params: AutomationSettingParams,
) -> AppResult<DepartmentRequestTypeSetting> {
    require_admin(ctx)?;

    if params.approval_mode != APPROVAL_MODE_MANUAL && params.approval_mode != APPROVAL_MODE_AUTO {
        return Err(AppError::validation("approval mode must be manual or auto"));
    }
    require_department(conn, ctx.company_id, params.department_id)?;
    if let Some(next) = params.default_next_department_id {
        if next == params.department_id {
            return Err(AppError::validation(
                "a department cannot forward to itself",
            ));
        }
        require_department(conn, ctx.company_id, next)?;
    }
    let type_exists: i64 = request_types::table
        .filter(request_types::id.eq(params.request_type_id))
        .filter(request_types::company_id.eq(ctx.company_id))
        .count()
        .get_result(conn)?;
    if type_exists == 0 {
        return Err(AppError::validation("unknown request type"));
    }

    conn.transaction(|conn| {
        let existing: Option<DepartmentRequestTypeSetting> =
            department_request_type_settings::table
                .filter(department_request_type_settings::company_id.eq(ctx.company_id))
                .filter(department_request_type_settings::department_id.eq(params.department_id))
                .filter(
                    department_request_type_settings::request_type_id
                        .eq(params.request_type_id),
                )
                .first(conn)
                .optional()?;
        let old = existing.as_ref().map(snapshot).transpose()?;

        let new_setting = NewDepartmentRequestTypeSetting {
            id: Uuid::new_v4(),
            company_id: ctx.company_id,
            department_id: params.department_id,
            request_type_id: params.request_type_id,
            approval_mode: params.approval_mode.clone(),
            auto_close: params.auto_close,
            default_next_department_id: params.default_next_department_id,
        };
        diesel::insert_into(department_request_type_settings::table)
            .values(&new_setting)
            .on_conflict((
                department_request_type_settings::company_id,
                department_request_type_settings::department_id,
                department_request_type_settings::request_type_id,
            ))
            .do_update()
            .set((
                department_request_type_settings::approval_mode
                    .eq(excluded(department_request_type_settings::approval_mode)),
                department_request_type_settings::auto_close
                    .eq(excluded(department_request_type_settings::auto_close)),
                department_request_type_settings::default_next_department_id.eq(excluded(
                    department_request_type_settings::default_next_department_id,
                )),
            ))
            .execute(conn)?;

        let saved: DepartmentRequestTypeSetting = department_request_type_settings::table
            .filter(department_request_type_settings::company_id.eq(ctx.company_id))
            .filter(department_request_type_settings::department_id.eq(params.department_id))
            .filter(department_request_type_settings::request_type_id.eq(params.request_type_id))
            .first(conn)?;

        audit::record(
            conn,
            ctx.company_id,
            audit::TABLE_AUTOMATION_SETTINGS,
            if old.is_some() { ACTION_UPDATE } else { ACTION_INSERT },
            saved.id,
            None,
            None,
            old,
            Some(snapshot(&saved)?),
            Some(ctx.user_id),
        )?;

        Ok(saved)
    })
}

pub fn rollback_audit_entry(
    conn: &mut PgConnection,
    ctx: &CallerContext,
    audit_id: i64,
) -> AppResult<crate::models::Request> {
    require_admin(ctx)?;
    audit::rollback(conn, ctx.company_id, audit_id, ctx.user_id)
}

// --- cross-company provisioning ---

pub fn sys_create_company(
    conn: &mut PgConnection,
    admin: &Profile,
    name: &str,
    default_department: Option<&str>,
) -> AppResult<(Company, Option<Department>)> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::validation("company name must not be empty"));
    }

    conn.transaction(|conn| {
        let new_company = NewCompany {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };
        diesel::insert_into(companies::table)
            .values(&new_company)
            .execute(conn)?;
        let company: Company = companies::table.find(new_company.id).first(conn)?;

        audit::record(
            conn,
            company.id,
            "companies",
            ACTION_INSERT,
            company.id,
            None,
            None,
            None,
            Some(snapshot(&company)?),
            Some(admin.user_id),
        )?;

        let department = match default_department.map(str::trim).filter(|n| !n.is_empty()) {
            Some(department_name) => {
                Some(create_department(conn, admin, company.id, department_name)?)
            }
            None => None,
        };

        Ok((company, department))
    })
}

pub fn sys_create_department(
    conn: &mut PgConnection,
    admin: &Profile,
    company_id: Uuid,
    name: &str,
) -> AppResult<Department> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::validation("department name must not be empty"));
    }
    companies::table
        .find(company_id)
        .first::<Company>(conn)
        .optional()?
        .ok_or_else(|| AppError::validation("unknown company"))?;

    conn.transaction(|conn| create_department(conn, admin, company_id, name))
}

/// Moves a user into another company: the profile is re-homed and any old
/// memberships are replaced by one in the target company.
pub fn sys_move_user_to_company(
    conn: &mut PgConnection,
    admin: &Profile,
    user_id: Uuid,
    company_id: Uuid,
    department_id: Option<Uuid>,
    role: &str,
) -> AppResult<Profile> {
    let role = Role::parse(role).ok_or_else(|| AppError::validation("unknown role"))?;
    companies::table
        .find(company_id)
        .first::<Company>(conn)
        .optional()?
        .ok_or_else(|| AppError::validation("unknown company"))?;
    let department_id = if role.is_company_wide() {
        None
    } else {
        match department_id {
            Some(department_id) => {
                require_department(conn, company_id, department_id)?;
                Some(department_id)
            }
            None => None,
        }
    };

    conn.transaction(|conn| {
        let profile: Profile = profiles::table
            .find(user_id)
            .first(conn)
            .optional()?
            .ok_or_else(AppError::not_found)?;
        let old = snapshot(&profile)?;

        diesel::delete(memberships::table.filter(memberships::user_id.eq(user_id)))
            .execute(conn)?;
        let new_membership = NewMembership {
            id: Uuid::new_v4(),
            company_id,
            user_id,
            role: role.as_str().to_string(),
            department_id,
        };
        diesel::insert_into(memberships::table)
            .values(&new_membership)
            .execute(conn)?;

        diesel::update(profiles::table.find(user_id))
            .set((
                profiles::company_id.eq(company_id),
                profiles::department_id.eq(department_id),
            ))
            .execute(conn)?;
        let updated: Profile = profiles::table.find(user_id).first(conn)?;

        audit::record(
            conn,
            company_id,
            "profiles",
            ACTION_UPDATE,
            user_id,
            None,
            None,
            Some(old),
            Some(snapshot(&updated)?),
            Some(admin.user_id),
        )?;

        Ok(updated)
    })
}

pub fn sys_set_membership_role(
    conn: &mut PgConnection,
    admin: &Profile,
    user_id: Uuid,
    company_id: Uuid,
    role: &str,
    department_id: Option<Uuid>,
) -> AppResult<Membership> {
    let parsed = Role::parse(role).ok_or_else(|| AppError::validation("unknown role"))?;
    let ctx = CallerContext {
        user_id: admin.user_id,
        company_id,
        full_name: admin.full_name.clone(),
        email: admin.email.clone(),
        department_id: None,
        role: Role::Admin,
        is_system_admin: true,
    };
    set_user_role(conn, &ctx, user_id, parsed.as_str(), department_id)
}

pub fn sys_set_profile_active(
    conn: &mut PgConnection,
    admin: &Profile,
    user_id: Uuid,
    active: bool,
) -> AppResult<Profile> {
    conn.transaction(|conn| {
        let profile: Profile = profiles::table
            .find(user_id)
            .first(conn)
            .optional()?
            .ok_or_else(AppError::not_found)?;
        let old = snapshot(&profile)?;

        diesel::update(profiles::table.find(user_id))
            .set(profiles::is_active.eq(active))
            .execute(conn)?;
        let updated: Profile = profiles::table.find(user_id).first(conn)?;

        audit::record(
            conn,
            profile.company_id,
            "profiles",
            ACTION_UPDATE,
            user_id,
            None,
            None,
            Some(old),
            Some(snapshot(&updated)?),
            Some(admin.user_id),
        )?;

        Ok(updated)
    })
}

#[derive(Debug, Serialize)]
pub struct DirectoryEntry {
    pub profile: Profile,
    pub company_name: Option<String>,
    pub role: Option<String>,
}

pub fn sys_list_users(
    conn: &mut PgConnection,
    company_filter: Option<Uuid>,
) -> AppResult<Vec<DirectoryEntry>> {
    let mut query = profiles::table.order(profiles::created_at.asc()).into_boxed();
    if let Some(company_id) = company_filter {
        query = query.filter(profiles::company_id.eq(company_id));
    }
    let rows: Vec<Profile> = query.load(conn)?;

    let company_ids: Vec<Uuid> = rows.iter().map(|p| p.company_id).collect();
    let company_rows: Vec<Company> = companies::table
        .filter(companies::id.eq_any(&company_ids))
        .load(conn)?;
    let company_names: std::collections::HashMap<Uuid, String> =
        company_rows.into_iter().map(|c| (c.id, c.name)).collect();

    let user_ids: Vec<Uuid> = rows.iter().map(|p| p.user_id).collect();
    let membership_rows: Vec<Membership> = memberships::table
        .filter(memberships::user_id.eq_any(&user_ids))
        .load(conn)?;
    let roles: std::collections::HashMap<(Uuid, Uuid), String> = membership_rows
        .into_iter()
        .map(|m| ((m.user_id, m.company_id), m.role))
        .collect();

    Ok(rows
        .into_iter()
        .map(|profile| DirectoryEntry {
            company_name: company_names.get(&profile.company_id).cloned(),
            role: roles.get(&(profile.user_id, profile.company_id)).cloned(),
            profile,
        })
        .collect())
}

fn create_department(
    conn: &mut PgConnection,
    admin: &Profile,
    company_id: Uuid,
    name: &str,
) -> AppResult<Department> {
    let new_department = NewDepartment {
        id: Uuid::new_v4(),
        company_id,
        name: name.to_string(),
        code: None,
    };
    diesel::insert_into(departments::table)
        .values(&new_department)
        .execute(conn)?;
    let department: Department = departments::table.find(new_department.id).first(conn)?;

    audit::record(
        conn,
        company_id,
        "departments",
        ACTION_INSERT,
        department.id,
        None,
        None,
        None,
        Some(snapshot(&department)?),
        Some(admin.user_id),
    )?;

    Ok(department)
}

fn require_department(
    conn: &mut PgConnection,
    company_id: Uuid,
    department_id: Uuid,
) -> AppResult<Department> {
    departments::table
        .find(department_id)
        .filter(departments::company_id.eq(company_id))
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::validation("unknown department"))
}
