use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::context::CallerContext;
use crate::error::{AppError, AppResult};
use crate::schema::{request_steps, requests};

pub const ROLE_EMPLOYEE: &str = "employee";
pub const ROLE_MANAGER: &str = "manager";
pub const ROLE_CEO: &str = "ceo";
pub const ROLE_ADMIN: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Employee,
    Manager,
    Ceo,
    Admin,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            ROLE_EMPLOYEE => Some(Self::Employee),
            ROLE_MANAGER => Some(Self::Manager),
            ROLE_CEO => Some(Self::Ceo),
            ROLE_ADMIN => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Employee => ROLE_EMPLOYEE,
            Self::Manager => ROLE_MANAGER,
            Self::Ceo => ROLE_CEO,
            Self::Admin => ROLE_ADMIN,
        }
    }

    /// Roles that carry a company-wide scope and therefore no department.
    pub fn is_company_wide(&self) -> bool {
        matches!(self, Self::Ceo | Self::Admin)
    }
}

/// The single management predicate consulted by every transition: may the
/// caller act on steps owned by `department_id`? Admin and CEO may act on
/// any department of their company; a manager only on their own. The same
/// matrix gates pre-assigning people into a department.
pub fn can_act_on(ctx: &CallerContext, department_id: Uuid) -> bool {
    match ctx.role {
        Role::Admin | Role::Ceo => true,
        Role::Manager => ctx.department_id == Some(department_id),
        Role::Employee => false,
    }
}

pub fn require_admin(ctx: &CallerContext) -> AppResult<()> {
    if ctx.role == Role::Admin {
        Ok(())
    } else {
        Err(AppError::authorization("administrator role required"))
    }
}

/// Row-level visibility shared by every read projection.
#[derive(Debug, Clone, Copy)]
pub enum Visibility {
    /// Admin and CEO read every request of the company.
    Company,
    /// Managers read requests that touch their department, past or present.
    Department(Uuid),
    /// Employees read requests they raised or were assigned to.
    Personal(Uuid),
}

pub fn visibility(ctx: &CallerContext) -> Visibility {
    match ctx.role {
        Role::Admin | Role::Ceo => Visibility::Company,
        Role::Manager => match ctx.department_id {
            Some(department_id) => Visibility::Department(department_id),
            None => Visibility::Personal(ctx.user_id),
        },
        Role::Employee => Visibility::Personal(ctx.user_id),
    }
}

/// Resolves the set of request ids the caller may read. `None` means every
/// request of the caller's company is visible.
pub fn visible_request_ids(
    conn: &mut PgConnection,
    ctx: &CallerContext,
) -> AppResult<Option<Vec<Uuid>>> {
    match visibility(ctx) {
        Visibility::Company => Ok(None),
        Visibility::Department(department_id) => {
            let ids = request_steps::table
                .filter(request_steps::company_id.eq(ctx.company_id))
                .filter(request_steps::department_id.eq(department_id))
                .select(request_steps::request_id)
                .distinct()
                .load(conn)?;
            Ok(Some(ids))
        }
        Visibility::Personal(user_id) => {
            let mut ids: Vec<Uuid> = requests::table
                .filter(requests::company_id.eq(ctx.company_id))
                .filter(requests::requester_user_id.eq(user_id))
                .select(requests::id)
                .load(conn)?;
            let assigned: Vec<Uuid> = request_steps::table
                .filter(request_steps::company_id.eq(ctx.company_id))
                .filter(request_steps::assigned_to.eq(user_id))
                .select(request_steps::request_id)
                .distinct()
                .load(conn)?;
            for id in assigned {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            Ok(Some(ids))
        }
    }
}

/// Read access to a single request, used by comments, attachments and the
/// detail projection.
pub fn can_read_request(
    conn: &mut PgConnection,
    ctx: &CallerContext,
    request_id: Uuid,
) -> AppResult<bool> {
    match visibility(ctx) {
        Visibility::Company => Ok(true),
        Visibility::Department(department_id) => {
            let touched: i64 = request_steps::table
                .filter(request_steps::request_id.eq(request_id))
                .filter(request_steps::department_id.eq(department_id))
                .count()
                .get_result(conn)?;
            Ok(touched > 0)
        }
        Visibility::Personal(user_id) => {
            let raised: i64 = requests::table
                .filter(requests::id.eq(request_id))
                .filter(requests::requester_user_id.eq(user_id))
                .count()
                .get_result(conn)?;
            if raised > 0 {
                return Ok(true);
            }
            let assigned: i64 = request_steps::table
                .filter(request_steps::request_id.eq(request_id))
                .filter(request_steps::assigned_to.eq(user_id))
                .count()
                .get_result(conn)?;
            Ok(assigned > 0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(role: Role, department_id: Option<Uuid>) -> CallerContext {
        CallerContext {
            user_id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            full_name: "Test User".to_string(),
            email: "test@example.com".to_string(),
            department_id,
            role,
            is_system_admin: false,
        }
    }

    #[test]
    fn admin_and_ceo_manage_any_department() {
        let dept = Uuid::new_v4();
        assert!(can_act_on(&ctx(Role::Admin, None), dept));
        assert!(can_act_on(&ctx(Role::Ceo, None), dept));
    }

    #[test]
    fn manager_manages_only_own_department() {
        let own = Uuid::new_v4();
        let other = Uuid::new_v4();
        let manager = ctx(Role::Manager, Some(own));
        assert!(can_act_on(&manager, own));
        assert!(!can_act_on(&manager, other));
    }

    #[test]
    fn employee_never_manages() {
        let dept = Uuid::new_v4();
        assert!(!can_act_on(&ctx(Role::Employee, Some(dept)), dept));
    }

    #[test]
    fn role_round_trips_through_strings() {
        for role in [Role::Employee, Role::Manager, Role::Ceo, Role::Admin] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("superuser"), None);
    }
}
