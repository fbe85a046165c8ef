//! Read-side projections. All of them funnel through the same visibility
//! rules as the command side and compute derived fields (current step,
//! ages, SLA margins) at read time instead of storing them.

use std::collections::HashMap;

use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::authz::{self, visible_request_ids};
use crate::context::CallerContext;
use crate::error::{AppError, AppResult};
use crate::models::{
    AuditLogEntry, Department, Profile, Request, RequestAttachment, RequestComment, RequestEvent,
    RequestStep,
};
use crate::schema::{
    audit_log, departments, profiles, request_attachments, request_comments, request_events,
    request_steps, requests,
};
use crate::workflow::{
    REQUEST_OPEN, STEP_DONE_PENDING_APPROVAL, STEP_INFO_REQUIRED, STEP_IN_PROGRESS, STEP_ON_HOLD,
    STEP_QUEUED,
};

const MAX_LIST_ROWS: i64 = 200;
const MAX_TIMELINE_ROWS: i64 = 100;

const OPEN_STEP_STATUSES: [&str; 5] = [
    STEP_QUEUED,
    STEP_IN_PROGRESS,
    STEP_ON_HOLD,
    STEP_INFO_REQUIRED,
    STEP_DONE_PENDING_APPROVAL,
];

#[derive(Debug, Serialize)]
pub struct CurrentStepView {
    pub step_id: Uuid,
    pub step_no: i32,
    pub status: String,
    pub department_id: Uuid,
    pub department_name: String,
    pub assigned_to: Option<Uuid>,
    pub assignee_name: Option<String>,
    pub due_at: Option<NaiveDateTime>,
}

#[derive(Debug, Serialize)]
pub struct RequestOverview {
    pub id: Uuid,
    pub reference_code: String,
    pub title: String,
    pub priority: i32,
    pub request_status: String,
    pub requester_user_id: Uuid,
    pub requester_name: Option<String>,
    pub created_at: NaiveDateTime,
    pub due_at: Option<NaiveDateTime>,
    pub closed_at: Option<NaiveDateTime>,
    pub age_hours: i64,
    pub current_step: Option<CurrentStepView>,
}

/// The request list with its derived current step. The current step of an
/// open request is its highest-numbered step; closed requests have none.
pub fn list_requests(
    conn: &mut PgConnection,
    ctx: &CallerContext,
) -> AppResult<Vec<RequestOverview>> {
    let scope = visible_request_ids(conn, ctx)?;

    let mut query = requests::table
        .filter(requests::company_id.eq(ctx.company_id))
        .order(requests::created_at.desc())
        .limit(MAX_LIST_ROWS)
        .into_boxed();
    if let Some(ids) = &scope {
        query = query.filter(requests::id.eq_any(ids.clone()));
    }
    let rows: Vec<Request> = query.load(conn)?;

    let request_ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let steps: Vec<RequestStep> = request_steps::table
        .filter(request_steps::request_id.eq_any(&request_ids))
        .order((request_steps::request_id, request_steps::step_no.asc()))
        .load(conn)?;

    let mut latest: HashMap<Uuid, RequestStep> = HashMap::new();
    for step in steps {
        latest.insert(step.request_id, step);
    }

    let departments = department_names(conn, ctx.company_id)?;
    let mut user_ids: Vec<Uuid> = rows.iter().map(|r| r.requester_user_id).collect();
    user_ids.extend(latest.values().filter_map(|s| s.assigned_to));
    let names = profile_names(conn, &user_ids)?;

    let now = Utc::now().naive_utc();
    let overviews = rows
        .into_iter()
        .map(|request| {
            let current_step = if request.request_status == REQUEST_OPEN {
                latest.get(&request.id).map(|step| CurrentStepView {
                    step_id: step.id,
                    step_no: step.step_no,
                    status: step.status.clone(),
                    department_id: step.department_id,
                    department_name: departments
                        .get(&step.department_id)
                        .cloned()
                        .unwrap_or_default(),
                    assigned_to: step.assigned_to,
                    assignee_name: step.assigned_to.and_then(|id| names.get(&id).cloned()),
                    due_at: step.due_at,
                })
            } else {
                None
            };

            RequestOverview {
                age_hours: (now - request.created_at).num_hours(),
                id: request.id,
                reference_code: request.reference_code,
                title: request.title,
                priority: request.priority,
                request_status: request.request_status,
                requester_user_id: request.requester_user_id,
                requester_name: names.get(&request.requester_user_id).cloned(),
                created_at: request.created_at,
                due_at: request.due_at,
                closed_at: request.closed_at,
                current_step,
            }
        })
        .collect();

    Ok(overviews)
}

#[derive(Debug, Serialize)]
pub struct SlaStepView {
    pub step_id: Uuid,
    pub request_id: Uuid,
    pub reference_code: String,
    pub title: String,
    pub priority: i32,
    pub step_no: i32,
    pub status: String,
    pub department_id: Uuid,
    pub department_name: String,
    pub assigned_to: Option<Uuid>,
    pub assignee_name: Option<String>,
    pub due_at: NaiveDateTime,
    pub hours_to_due: i64,
    pub is_overdue: bool,
}

/// Open steps that carry a deadline, most endangered first. Negative
/// `hours_to_due` means the deadline already passed.
pub fn sla_open_steps(
    conn: &mut PgConnection,
    ctx: &CallerContext,
) -> AppResult<Vec<SlaStepView>> {
    let scope = visible_request_ids(conn, ctx)?;

    let mut query = request_steps::table
        .inner_join(requests::table)
        .filter(request_steps::company_id.eq(ctx.company_id))
        .filter(request_steps::status.eq_any(OPEN_STEP_STATUSES))
        .filter(requests::request_status.eq(REQUEST_OPEN))
        .filter(request_steps::due_at.is_not_null())
        .order(request_steps::due_at.asc())
        .limit(MAX_LIST_ROWS)
        .select((RequestStep::as_select(), Request::as_select()))
        .into_boxed();
    if let Some(ids) = &scope {
        query = query.filter(request_steps::request_id.eq_any(ids.clone()));
    }
    let rows: Vec<(RequestStep, Request)> = query.load(conn)?;

    let departments = department_names(conn, ctx.company_id)?;
    let user_ids: Vec<Uuid> = rows.iter().filter_map(|(s, _)| s.assigned_to).collect();
    let names = profile_names(conn, &user_ids)?;

    let now = Utc::now().naive_utc();
    let views = rows
        .into_iter()
        .filter_map(|(step, request)| {
            let due_at = step.due_at?;
            let hours_to_due = (due_at - now).num_hours();
            Some(SlaStepView {
                step_id: step.id,
                request_id: request.id,
                reference_code: request.reference_code,
                title: request.title,
                priority: request.priority,
                step_no: step.step_no,
                status: step.status,
                department_id: step.department_id,
                department_name: departments
                    .get(&step.department_id)
                    .cloned()
                    .unwrap_or_default(),
                assigned_to: step.assigned_to,
                assignee_name: step.assigned_to.and_then(|id| names.get(&id).cloned()),
                due_at,
                hours_to_due,
                is_overdue: due_at < now,
            })
        })
        .collect();

    Ok(views)
}

#[derive(Debug, Default, Serialize)]
pub struct WorkloadRow {
    pub department_id: Uuid,
    pub department_name: String,
    pub user_id: Option<Uuid>,
    pub full_name: Option<String>,
    pub queued: u32,
    pub in_progress: u32,
    pub suspended: u32,
    pub pending_approval: u32,
    pub total: u32,
    pub avg_age_hours: i64,
}

/// Open-step counts per (department, assignee) with the average step age.
/// Unassigned steps roll up into a row with no user. Managers see their own
/// department, admin and CEO the whole company, employees nothing.
pub fn department_workload(
    conn: &mut PgConnection,
    ctx: &CallerContext,
) -> AppResult<Vec<WorkloadRow>> {
    let department_filter = match authz::visibility(ctx) {
        authz::Visibility::Company => None,
        authz::Visibility::Department(department_id) => Some(department_id),
        authz::Visibility::Personal(_) => {
            return Err(AppError::authorization(
                "workload is limited to managers and above",
            ))
        }
    };

    let mut query = request_steps::table
        .inner_join(requests::table)
        .filter(request_steps::company_id.eq(ctx.company_id))
        .filter(request_steps::status.eq_any(OPEN_STEP_STATUSES))
        .filter(requests::request_status.eq(REQUEST_OPEN))
        .select(RequestStep::as_select())
        .into_boxed();
    if let Some(department_id) = department_filter {
        query = query.filter(request_steps::department_id.eq(department_id));
    }
    let steps: Vec<RequestStep> = query.load(conn)?;

    let departments = department_names(conn, ctx.company_id)?;
    let user_ids: Vec<Uuid> = steps.iter().filter_map(|s| s.assigned_to).collect();
    let names = profile_names(conn, &user_ids)?;

    let now = Utc::now().naive_utc();
    let mut rows: HashMap<(Uuid, Option<Uuid>), WorkloadRow> = HashMap::new();
    let mut age_sums: HashMap<(Uuid, Option<Uuid>), i64> = HashMap::new();
    for step in steps {
        let key = (step.department_id, step.assigned_to);
        let row = rows.entry(key).or_insert_with(|| WorkloadRow {
            department_id: step.department_id,
            department_name: departments
                .get(&step.department_id)
                .cloned()
                .unwrap_or_default(),
            user_id: step.assigned_to,
            full_name: step.assigned_to.and_then(|id| names.get(&id).cloned()),
            ..WorkloadRow::default()
        });
        match step.status.as_str() {
            STEP_QUEUED => row.queued += 1,
            STEP_IN_PROGRESS => row.in_progress += 1,
            STEP_ON_HOLD | STEP_INFO_REQUIRED => row.suspended += 1,
            STEP_DONE_PENDING_APPROVAL => row.pending_approval += 1,
            _ => {}
        }
        row.total += 1;
        *age_sums.entry(key).or_default() += (now - step.created_at).num_hours();
    }
    for (key, row) in rows.iter_mut() {
        if row.total > 0 {
            row.avg_age_hours = age_sums.get(key).copied().unwrap_or(0) / row.total as i64;
        }
    }

    let mut rows: Vec<WorkloadRow> = rows.into_values().collect();
    rows.sort_by(|a, b| {
        (&a.department_name, &a.full_name).cmp(&(&b.department_name, &b.full_name))
    });
    Ok(rows)
}

#[derive(Debug, Serialize)]
pub struct DashboardKpis {
    pub active_requests: i64,
    pub overdue_steps: i64,
    pub pending_approval: i64,
    pub unassigned_steps: i64,
    pub on_hold_steps: i64,
    pub info_required_steps: i64,
    pub avg_cycle_time_hours: Option<i64>,
}

/// Headline numbers for the landing page, scoped like every other read.
/// Cycle time averages requests closed in the last 30 days.
pub fn dashboard(conn: &mut PgConnection, ctx: &CallerContext) -> AppResult<DashboardKpis> {
    let scope = visible_request_ids(conn, ctx)?;
    let now = Utc::now().naive_utc();

    let open_requests: Vec<Uuid> = {
        let mut query = requests::table
            .filter(requests::company_id.eq(ctx.company_id))
            .filter(requests::request_status.eq(REQUEST_OPEN))
            .select(requests::id)
            .into_boxed();
        if let Some(ids) = &scope {
            query = query.filter(requests::id.eq_any(ids.clone()));
        }
        query.load(conn)?
    };

    let open_steps: Vec<RequestStep> = request_steps::table
        .filter(request_steps::request_id.eq_any(&open_requests))
        .filter(request_steps::status.eq_any(OPEN_STEP_STATUSES))
        .select(RequestStep::as_select())
        .load(conn)?;

    let mut overdue = 0;
    let mut pending_approval = 0;
    let mut unassigned = 0;
    let mut on_hold = 0;
    let mut info_required = 0;
    for step in &open_steps {
        if step.due_at.map(|due| due < now).unwrap_or(false) {
            overdue += 1;
        }
        match step.status.as_str() {
            STEP_DONE_PENDING_APPROVAL => pending_approval += 1,
            STEP_ON_HOLD => on_hold += 1,
            STEP_INFO_REQUIRED => info_required += 1,
            _ => {}
        }
        if step.assigned_to.is_none() {
            unassigned += 1;
        }
    }

    let window_start = now - chrono::Duration::days(30);
    let closed: Vec<Request> = {
        let mut query = requests::table
            .filter(requests::company_id.eq(ctx.company_id))
            .filter(requests::closed_at.gt(window_start))
            .select(Request::as_select())
            .into_boxed();
        if let Some(ids) = &scope {
            query = query.filter(requests::id.eq_any(ids.clone()));
        }
        query.load(conn)?
    };
    let cycle_hours: Vec<i64> = closed
        .iter()
        .filter_map(|r| r.closed_at.map(|closed_at| (closed_at - r.created_at).num_hours()))
        .collect();
    let avg_cycle_time_hours = if cycle_hours.is_empty() {
        None
    } else {
        Some(cycle_hours.iter().sum::<i64>() / cycle_hours.len() as i64)
    };

    Ok(DashboardKpis {
        active_requests: open_requests.len() as i64,
        overdue_steps: overdue,
        pending_approval,
        unassigned_steps: unassigned,
        on_hold_steps: on_hold,
        info_required_steps: info_required,
        avg_cycle_time_hours,
    })
}

/// The raw audit trail, newest first. Admin and CEO read every company row;
/// managers only rows tied to requests they can see, which drops entries
/// without a request reference (role changes, settings).
pub fn audit_entries(
    conn: &mut PgConnection,
    ctx: &CallerContext,
    table_filter: Option<String>,
    limit: Option<i64>,
) -> AppResult<Vec<AuditLogEntry>> {
    let scope = match authz::visibility(ctx) {
        authz::Visibility::Personal(_) => {
            return Err(AppError::authorization(
                "the audit view is limited to managers and above",
            ))
        }
        _ => visible_request_ids(conn, ctx)?,
    };

    let limit = limit.unwrap_or(MAX_LIST_ROWS).clamp(1, MAX_LIST_ROWS);
    let mut query = audit_log::table
        .filter(audit_log::company_id.eq(ctx.company_id))
        .order(audit_log::id.desc())
        .limit(limit)
        .into_boxed();
    if let Some(ids) = scope {
        query = query.filter(audit_log::request_id.eq_any(ids));
    }
    if let Some(table_name) = table_filter {
        query = query.filter(audit_log::table_name.eq(table_name));
    }

    Ok(query.load(conn)?)
}

#[derive(Debug, Serialize)]
pub struct StepView {
    #[serde(flatten)]
    pub step: RequestStep,
    pub department_name: String,
    pub assignee_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RequestDetail {
    pub request: Request,
    pub requester_name: Option<String>,
    pub steps: Vec<StepView>,
    pub events: Vec<RequestEvent>,
    pub comments: Vec<RequestComment>,
    pub attachments: Vec<RequestAttachment>,
}

pub fn request_detail(
    conn: &mut PgConnection,
    ctx: &CallerContext,
    request_id: Uuid,
) -> AppResult<RequestDetail> {
    let request: Request = requests::table
        .find(request_id)
        .filter(requests::company_id.eq(ctx.company_id))
        .first(conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    if !authz::can_read_request(conn, ctx, request.id)? {
        return Err(AppError::not_found());
    }

    let steps: Vec<RequestStep> = request_steps::table
        .filter(request_steps::request_id.eq(request.id))
        .order(request_steps::step_no.asc())
        .load(conn)?;

    let events: Vec<RequestEvent> = request_events::table
        .filter(request_events::request_id.eq(request.id))
        .order(request_events::created_at.desc())
        .limit(MAX_TIMELINE_ROWS)
        .load(conn)?;

    let comments: Vec<RequestComment> = request_comments::table
        .filter(request_comments::request_id.eq(request.id))
        .order(request_comments::created_at.asc())
        .load(conn)?;

    let attachments: Vec<RequestAttachment> = request_attachments::table
        .filter(request_attachments::request_id.eq(request.id))
        .order(request_attachments::created_at.asc())
        .load(conn)?;

    let departments = department_names(conn, ctx.company_id)?;
    let mut user_ids: Vec<Uuid> = steps.iter().filter_map(|s| s.assigned_to).collect();
    user_ids.push(request.requester_user_id);
    let names = profile_names(conn, &user_ids)?;

    let steps = steps
        .into_iter()
        .map(|step| StepView {
            department_name: departments
                .get(&step.department_id)
                .cloned()
                .unwrap_or_default(),
            assignee_name: step.assigned_to.and_then(|id| names.get(&id).cloned()),
            step,
        })
        .collect();

    Ok(RequestDetail {
        requester_name: names.get(&request.requester_user_id).cloned(),
        request,
        steps,
        events,
        comments,
        attachments,
    })
}

fn department_names(
    conn: &mut PgConnection,
    company_id: Uuid,
) -> AppResult<HashMap<Uuid, String>> {
    let rows: Vec<Department> = departments::table
        .filter(departments::company_id.eq(company_id))
        .load(conn)?;
    Ok(rows.into_iter().map(|d| (d.id, d.name)).collect())
}

fn profile_names(conn: &mut PgConnection, user_ids: &[Uuid]) -> AppResult<HashMap<Uuid, String>> {
    if user_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<Profile> = profiles::table
        .filter(profiles::user_id.eq_any(user_ids))
        .load(conn)?;
    Ok(rows.into_iter().map(|p| (p.user_id, p.full_name)).collect())
}
