//! The request/step state machine. Every operation here is one atomic
//! transaction: it locks the affected rows, validates the caller and the
//! step state, applies the transition, and appends audit and timeline
//! records before committing. Request and step rows are never mutated
//! outside these functions.

use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use rand::Rng;
use uuid::Uuid;

use crate::audit::{self, snapshot, ACTION_INSERT, ACTION_UPDATE};
use crate::authz::can_act_on;
use crate::context::CallerContext;
use crate::error::{AppError, AppResult};
use crate::models::{
    Department, DepartmentRequestTypeSetting, NewRequest, NewRequestAttachment, NewRequestComment,
    NewRequestStep, Profile, Request, RequestAttachment, RequestComment, RequestStep, RequestType,
};
use crate::outbox;
use crate::schema::{
    department_request_type_settings, departments, profiles, request_attachments,
    request_comments, request_steps, request_types, requests,
};

pub const STEP_QUEUED: &str = "queued";
pub const STEP_IN_PROGRESS: &str = "in_progress";
pub const STEP_DONE_PENDING_APPROVAL: &str = "done_pending_approval";
pub const STEP_ON_HOLD: &str = "on_hold";
pub const STEP_INFO_REQUIRED: &str = "info_required";
pub const STEP_APPROVED: &str = "approved";
pub const STEP_RETURNED: &str = "returned";
pub const STEP_REJECTED: &str = "rejected";
pub const STEP_CANCELED: &str = "canceled";

pub const REQUEST_OPEN: &str = "open";
pub const REQUEST_CLOSED: &str = "closed";
pub const REQUEST_REJECTED: &str = "rejected";
pub const REQUEST_ARCHIVED: &str = "archived";

pub const APPROVAL_MODE_MANUAL: &str = "manual";
pub const APPROVAL_MODE_AUTO: &str = "auto";

const MIN_NOTES_LEN: usize = 3;

#[derive(Debug)]
pub struct CreateRequestParams {
    pub request_type_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub target_department_id: Uuid,
    pub target_assignee_id: Option<Uuid>,
    pub priority: Option<i32>,
    pub due_at: Option<NaiveDateTime>,
    pub metadata: Option<serde_json::Value>,
}

pub fn create_request(
    conn: &mut PgConnection,
    ctx: &CallerContext,
    params: CreateRequestParams,
) -> AppResult<(Request, RequestStep)> {
    conn.transaction(|conn| {
        let title = params.title.trim();
        if title.is_empty() {
            return Err(AppError::validation("title must not be empty"));
        }

        let request_type: RequestType = request_types::table
            .find(params.request_type_id)
            .filter(request_types::company_id.eq(ctx.company_id))
            .filter(request_types::active.eq(true))
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::validation("unknown or inactive request type"))?;

        let target = department_in_company(conn, ctx.company_id, params.target_department_id)?;

        let priority = params.priority.unwrap_or(request_type.default_priority);
        if !(1..=4).contains(&priority) {
            return Err(AppError::validation("priority must be between 1 and 4"));
        }

        if let Some(assignee_id) = params.target_assignee_id {
            if !can_act_on(ctx, target.id) {
                return Err(AppError::authorization(
                    "cannot pre-assign in a department you do not manage",
                ));
            }
            require_member_of_department(conn, ctx.company_id, assignee_id, target.id)?;
        }

        let request_id = Uuid::new_v4();
        let new_request = NewRequest {
            id: request_id,
            company_id: ctx.company_id,
            reference_code: generate_reference_code(),
            title: title.to_string(),
            description: params
                .description
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
            request_type_id: request_type.id,
            priority,
            request_status: REQUEST_OPEN.to_string(),
            requester_user_id: ctx.user_id,
            origin_department_id: ctx.department_id,
            due_at: params.due_at,
            metadata: params.metadata.unwrap_or_else(|| serde_json::json!({})),
        };

        let request = insert_request(conn, new_request)?;

        let new_step = NewRequestStep {
            id: Uuid::new_v4(),
            request_id,
            company_id: ctx.company_id,
            step_no: 1,
            from_department_id: None,
            department_id: target.id,
            assigned_to: params.target_assignee_id,
            status: STEP_QUEUED.to_string(),
            created_by: Some(ctx.user_id),
            related_step_id: None,
            due_at: params.due_at,
        };
        diesel::insert_into(request_steps::table)
            .values(&new_step)
            .execute(conn)?;
        let step: RequestStep = request_steps::table.find(new_step.id).first(conn)?;

        audit::record(
            conn,
            ctx.company_id,
            audit::TABLE_REQUESTS,
            ACTION_INSERT,
            request.id,
            Some(request.id),
            None,
            None,
            Some(snapshot(&request)?),
            Some(ctx.user_id),
        )?;
        audit::record(
            conn,
            ctx.company_id,
            audit::TABLE_REQUEST_STEPS,
            ACTION_INSERT,
            step.id,
            Some(request.id),
            Some(step.id),
            None,
            Some(snapshot(&step)?),
            Some(ctx.user_id),
        )?;
        audit::record_event(
            conn,
            ctx.company_id,
            request.id,
            Some(step.id),
            "request_created",
            format!(
                "request {} created and queued in {}",
                request.reference_code, target.name
            ),
            Some(ctx.user_id),
        )?;

        if let Some(assignee_id) = step.assigned_to {
            notify_assignee(conn, &request, &step, assignee_id)?;
        }

        Ok((request, step))
    })
}

pub fn assign_step(
    conn: &mut PgConnection,
    ctx: &CallerContext,
    step_id: Uuid,
    assignee_id: Uuid,
) -> AppResult<RequestStep> {
    conn.transaction(|conn| {
        let (request, step) = lock_current_step(conn, ctx, step_id)?;

        if !can_act_on(ctx, step.department_id) {
            return Err(AppError::authorization(
                "cannot manage steps of this department",
            ));
        }
        require_status(&step, &[STEP_QUEUED, STEP_IN_PROGRESS])?;
        require_member_of_department(conn, ctx.company_id, assignee_id, step.department_id)?;

        let old = snapshot(&step)?;
        diesel::update(request_steps::table.find(step.id))
            .set(request_steps::assigned_to.eq(Some(assignee_id)))
            .execute(conn)?;
        let updated: RequestStep = request_steps::table.find(step.id).first(conn)?;

        record_step_update(conn, ctx, &request, &updated, old)?;
        audit::record_event(
            conn,
            ctx.company_id,
            request.id,
            Some(updated.id),
            "step_assigned",
            format!("step {} assigned", updated.step_no),
            Some(ctx.user_id),
        )?;
        notify_assignee(conn, &request, &updated, assignee_id)?;
        touch_request(conn, request.id)?;

        Ok(updated)
    })
}

pub fn start_step(
    conn: &mut PgConnection,
    ctx: &CallerContext,
    step_id: Uuid,
) -> AppResult<RequestStep> {
    conn.transaction(|conn| {
        let (request, step) = lock_current_step(conn, ctx, step_id)?;

        require_assignee(ctx, &step)?;
        require_status(&step, &[STEP_QUEUED])?;

        let old = snapshot(&step)?;
        let now = Utc::now().naive_utc();
        diesel::update(request_steps::table.find(step.id))
            .set((
                request_steps::status.eq(STEP_IN_PROGRESS),
                request_steps::started_at.eq(Some(now)),
            ))
            .execute(conn)?;
        let updated: RequestStep = request_steps::table.find(step.id).first(conn)?;

        record_step_update(conn, ctx, &request, &updated, old)?;
        audit::record_event(
            conn,
            ctx.company_id,
            request.id,
            Some(updated.id),
            "step_started",
            format!("step {} started", updated.step_no),
            Some(ctx.user_id),
        )?;
        touch_request(conn, request.id)?;

        Ok(updated)
    })
}

pub fn complete_step(
    conn: &mut PgConnection,
    ctx: &CallerContext,
    step_id: Uuid,
    completion_notes: Option<String>,
) -> AppResult<RequestStep> {
    conn.transaction(|conn| {
        let (request, step) = lock_current_step(conn, ctx, step_id)?;

        require_assignee(ctx, &step)?;
        require_status(&step, &[STEP_QUEUED, STEP_IN_PROGRESS])?;

        let old = snapshot(&step)?;
        let now = Utc::now().naive_utc();
        diesel::update(request_steps::table.find(step.id))
            .set((
                request_steps::status.eq(STEP_DONE_PENDING_APPROVAL),
                request_steps::completed_at.eq(Some(now)),
                request_steps::completion_notes.eq(trimmed(completion_notes)),
            ))
            .execute(conn)?;
        let updated: RequestStep = request_steps::table.find(step.id).first(conn)?;

        record_step_update(conn, ctx, &request, &updated, old)?;
        audit::record_event(
            conn,
            ctx.company_id,
            request.id,
            Some(updated.id),
            "step_completed",
            format!("step {} submitted for approval", updated.step_no),
            Some(ctx.user_id),
        )?;
        touch_request(conn, request.id)?;

        // Per-(department, type) automation may approve in the same
        // transaction, so completion and routing commit or abort together.
        let setting: Option<DepartmentRequestTypeSetting> =
            department_request_type_settings::table
                .filter(department_request_type_settings::company_id.eq(ctx.company_id))
                .filter(department_request_type_settings::department_id.eq(updated.department_id))
                .filter(
                    department_request_type_settings::request_type_id.eq(request.request_type_id),
                )
                .first(conn)
                .optional()?;

        if let Some(setting) = setting {
            if setting.approval_mode == APPROVAL_MODE_AUTO {
                let route = match setting.default_next_department_id {
                    Some(next) => Some(next),
                    None if setting.auto_close => None,
                    // No route and no auto-close: leave the step for a
                    // human approver.
                    None => return Ok(updated),
                };
                let approved = apply_approval(
                    conn,
                    ctx,
                    &request,
                    &updated,
                    route,
                    None,
                    None,
                    true,
                )?;
                return Ok(approved);
            }
        }

        Ok(updated)
    })
}

pub fn approve_step(
    conn: &mut PgConnection,
    ctx: &CallerContext,
    step_id: Uuid,
    next_department_id: Option<Uuid>,
    next_assignee_id: Option<Uuid>,
    approval_notes: Option<String>,
) -> AppResult<RequestStep> {
    conn.transaction(|conn| {
        let (request, step) = lock_current_step(conn, ctx, step_id)?;

        if !can_act_on(ctx, step.department_id) {
            return Err(AppError::authorization(
                "cannot approve steps of this department",
            ));
        }
        require_status(&step, &[STEP_DONE_PENDING_APPROVAL])?;

        if let Some(assignee_id) = next_assignee_id {
            let next = next_department_id.ok_or_else(|| {
                AppError::validation("next assignee requires a next department")
            })?;
            if !can_act_on(ctx, next) {
                return Err(AppError::authorization(
                    "cannot pre-assign in a department you do not manage",
                ));
            }
            require_member_of_department(conn, ctx.company_id, assignee_id, next)?;
        }

        apply_approval(
            conn,
            ctx,
            &request,
            &step,
            next_department_id,
            next_assignee_id,
            trimmed(approval_notes),
            false,
        )
    })
}

pub fn return_step(
    conn: &mut PgConnection,
    ctx: &CallerContext,
    step_id: Uuid,
    reason: String,
    return_to_assignee_id: Option<Uuid>,
) -> AppResult<RequestStep> {
    conn.transaction(|conn| {
        let (request, step) = lock_current_step(conn, ctx, step_id)?;

        let reason = reason.trim().to_string();
        if reason.len() < MIN_NOTES_LEN {
            return Err(AppError::validation(
                "return reason must be at least 3 characters",
            ));
        }
        if !can_act_on(ctx, step.department_id) {
            return Err(AppError::authorization(
                "cannot return steps of this department",
            ));
        }
        require_status(
            &step,
            &[STEP_QUEUED, STEP_IN_PROGRESS, STEP_DONE_PENDING_APPROVAL],
        )?;

        // Returns always go to the previous department in the chain.
        let previous_department_id = step.from_department_id.ok_or_else(|| {
            AppError::validation("the first step has no previous department to return to")
        })?;
        let previous = department_in_company(conn, ctx.company_id, previous_department_id)?;

        if let Some(assignee_id) = return_to_assignee_id {
            if !can_act_on(ctx, previous.id) {
                return Err(AppError::authorization(
                    "cannot pre-assign in a department you do not manage",
                ));
            }
            require_member_of_department(conn, ctx.company_id, assignee_id, previous.id)?;
        }

        let old = snapshot(&step)?;
        let now = Utc::now().naive_utc();
        diesel::update(request_steps::table.find(step.id))
            .set((
                request_steps::status.eq(STEP_RETURNED),
                request_steps::returned_at.eq(Some(now)),
                request_steps::return_reason.eq(Some(reason.clone())),
            ))
            .execute(conn)?;
        let returned: RequestStep = request_steps::table.find(step.id).first(conn)?;
        record_step_update(conn, ctx, &request, &returned, old)?;

        let new_step = NewRequestStep {
            id: Uuid::new_v4(),
            request_id: request.id,
            company_id: ctx.company_id,
            step_no: returned.step_no + 1,
            from_department_id: Some(returned.department_id),
            department_id: previous.id,
            assigned_to: return_to_assignee_id,
            status: STEP_QUEUED.to_string(),
            created_by: Some(ctx.user_id),
            related_step_id: Some(returned.id),
            due_at: request.due_at,
        };
        diesel::insert_into(request_steps::table)
            .values(&new_step)
            .execute(conn)?;
        let created: RequestStep = request_steps::table.find(new_step.id).first(conn)?;

        audit::record(
            conn,
            ctx.company_id,
            audit::TABLE_REQUEST_STEPS,
            ACTION_INSERT,
            created.id,
            Some(request.id),
            Some(created.id),
            None,
            Some(snapshot(&created)?),
            Some(ctx.user_id),
        )?;
        audit::record_event(
            conn,
            ctx.company_id,
            request.id,
            Some(returned.id),
            "step_returned",
            format!(
                "step {} returned to {}: {}",
                returned.step_no, previous.name, reason
            ),
            Some(ctx.user_id),
        )?;
        if let Some(assignee_id) = created.assigned_to {
            notify_assignee(conn, &request, &created, assignee_id)?;
        }
        touch_request(conn, request.id)?;

        Ok(created)
    })
}

pub fn set_on_hold(
    conn: &mut PgConnection,
    ctx: &CallerContext,
    step_id: Uuid,
    notes: String,
) -> AppResult<RequestStep> {
    suspend_step(conn, ctx, step_id, notes, STEP_ON_HOLD, "step_on_hold")
}

pub fn set_info_required(
    conn: &mut PgConnection,
    ctx: &CallerContext,
    step_id: Uuid,
    notes: String,
) -> AppResult<RequestStep> {
    suspend_step(
        conn,
        ctx,
        step_id,
        notes,
        STEP_INFO_REQUIRED,
        "step_info_required",
    )
}

pub fn resume_step(
    conn: &mut PgConnection,
    ctx: &CallerContext,
    step_id: Uuid,
) -> AppResult<RequestStep> {
    conn.transaction(|conn| {
        let (request, step) = lock_current_step(conn, ctx, step_id)?;

        if !is_assignee(ctx, &step) && !can_act_on(ctx, step.department_id) {
            return Err(AppError::authorization(
                "only the assignee or a department approver can resume",
            ));
        }
        require_status(&step, &[STEP_ON_HOLD, STEP_INFO_REQUIRED])?;

        let restored = step
            .resume_status
            .clone()
            .unwrap_or_else(|| STEP_QUEUED.to_string());

        let old = snapshot(&step)?;
        diesel::update(request_steps::table.find(step.id))
            .set((
                request_steps::status.eq(restored),
                request_steps::resume_status.eq(None::<String>),
            ))
            .execute(conn)?;
        let updated: RequestStep = request_steps::table.find(step.id).first(conn)?;

        record_step_update(conn, ctx, &request, &updated, old)?;
        audit::record_event(
            conn,
            ctx.company_id,
            request.id,
            Some(updated.id),
            "step_resumed",
            format!("step {} resumed as {}", updated.step_no, updated.status),
            Some(ctx.user_id),
        )?;
        touch_request(conn, request.id)?;

        Ok(updated)
    })
}

pub fn add_comment(
    conn: &mut PgConnection,
    ctx: &CallerContext,
    request_id: Uuid,
    step_id: Option<Uuid>,
    body: String,
) -> AppResult<RequestComment> {
    conn.transaction(|conn| {
        let body = body.trim().to_string();
        if body.is_empty() {
            return Err(AppError::validation("comment body must not be empty"));
        }

        let request = readable_request(conn, ctx, request_id)?;

        let new_comment = NewRequestComment {
            id: Uuid::new_v4(),
            request_id: request.id,
            step_id,
            company_id: ctx.company_id,
            user_id: ctx.user_id,
            body,
        };
        diesel::insert_into(request_comments::table)
            .values(&new_comment)
            .execute(conn)?;
        let comment: RequestComment = request_comments::table.find(new_comment.id).first(conn)?;

        audit::record(
            conn,
            ctx.company_id,
            audit::TABLE_REQUEST_COMMENTS,
            ACTION_INSERT,
            comment.id,
            Some(request.id),
            step_id,
            None,
            Some(snapshot(&comment)?),
            Some(ctx.user_id),
        )?;
        audit::record_event(
            conn,
            ctx.company_id,
            request.id,
            step_id,
            "comment_added",
            format!("comment added by {}", ctx.full_name),
            Some(ctx.user_id),
        )?;

        Ok(comment)
    })
}

#[derive(Debug)]
pub struct AddAttachmentParams {
    pub request_id: Uuid,
    pub step_id: Option<Uuid>,
    pub storage_bucket: String,
    pub storage_path: String,
    pub file_name: String,
    pub mime_type: Option<String>,
    pub byte_size: Option<i64>,
}

pub fn add_attachment(
    conn: &mut PgConnection,
    ctx: &CallerContext,
    params: AddAttachmentParams,
) -> AppResult<RequestAttachment> {
    conn.transaction(|conn| {
        if params.storage_path.trim().is_empty() {
            return Err(AppError::validation("storage path must not be empty"));
        }
        if params.file_name.trim().is_empty() {
            return Err(AppError::validation("file name must not be empty"));
        }

        let request = readable_request(conn, ctx, params.request_id)?;

        let new_attachment = NewRequestAttachment {
            id: Uuid::new_v4(),
            request_id: request.id,
            step_id: params.step_id,
            company_id: ctx.company_id,
            uploaded_by: ctx.user_id,
            storage_bucket: params.storage_bucket,
            storage_path: params.storage_path,
            file_name: params.file_name,
            mime_type: params.mime_type,
            byte_size: params.byte_size,
        };
        diesel::insert_into(request_attachments::table)
            .values(&new_attachment)
            .execute(conn)?;
        let attachment: RequestAttachment = request_attachments::table
            .find(new_attachment.id)
            .first(conn)?;

        audit::record(
            conn,
            ctx.company_id,
            audit::TABLE_REQUEST_ATTACHMENTS,
            ACTION_INSERT,
            attachment.id,
            Some(request.id),
            attachment.step_id,
            None,
            Some(snapshot(&attachment)?),
            Some(ctx.user_id),
        )?;
        audit::record_event(
            conn,
            ctx.company_id,
            request.id,
            attachment.step_id,
            "attachment_added",
            format!("attachment {} added", attachment.file_name),
            Some(ctx.user_id),
        )?;

        Ok(attachment)
    })
}

/// The current step of an open request: the highest-numbered step. Derived,
/// never stored.
pub fn current_step(
    conn: &mut PgConnection,
    request_id: Uuid,
) -> AppResult<Option<RequestStep>> {
    let request: Request = requests::table.find(request_id).first(conn)?;
    if request.request_status != REQUEST_OPEN {
        return Ok(None);
    }
    let step = request_steps::table
        .filter(request_steps::request_id.eq(request_id))
        .order(request_steps::step_no.desc())
        .first(conn)
        .optional()?;
    Ok(step)
}

// --- internals ---

/// Locks the step and its request, then verifies the request is open and
/// the step is the current one. Concurrent racers serialize on the row
/// locks; the loser re-reads a changed status and fails the precondition.
fn lock_current_step(
    conn: &mut PgConnection,
    ctx: &CallerContext,
    step_id: Uuid,
) -> AppResult<(Request, RequestStep)> {
    let step: RequestStep = request_steps::table
        .find(step_id)
        .for_update()
        .first(conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    if step.company_id != ctx.company_id {
        return Err(AppError::not_found());
    }

    let request: Request = requests::table
        .find(step.request_id)
        .for_update()
        .first(conn)?;

    if request.request_status != REQUEST_OPEN {
        return Err(AppError::invalid_state("request is not open"));
    }

    let max_step_no: Option<i32> = request_steps::table
        .filter(request_steps::request_id.eq(request.id))
        .select(diesel::dsl::max(request_steps::step_no))
        .first(conn)?;
    if Some(step.step_no) != max_step_no {
        return Err(AppError::invalid_state("step is not the current step"));
    }

    Ok((request, step))
}

fn require_status(step: &RequestStep, allowed: &[&str]) -> AppResult<()> {
    if allowed.contains(&step.status.as_str()) {
        Ok(())
    } else {
        Err(AppError::invalid_state(format!(
            "step is {}, expected one of {}",
            step.status,
            allowed.join("|")
        )))
    }
}

fn is_assignee(ctx: &CallerContext, step: &RequestStep) -> bool {
    step.assigned_to == Some(ctx.user_id)
}

fn require_assignee(ctx: &CallerContext, step: &RequestStep) -> AppResult<()> {
    if is_assignee(ctx, step) {
        Ok(())
    } else {
        Err(AppError::authorization(
            "only the current assignee can perform this action",
        ))
    }
}

fn department_in_company(
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

fn require_member_of_department(
    conn: &mut PgConnection,
    company_id: Uuid,
    user_id: Uuid,
    department_id: Uuid,
) -> AppResult<Profile> {
    let profile: Option<Profile> = profiles::table
        .find(user_id)
        .filter(profiles::company_id.eq(company_id))
        .filter(profiles::is_active.eq(true))
        .first(conn)
        .optional()?;

    match profile {
        Some(profile) if profile.department_id == Some(department_id) => Ok(profile),
        _ => Err(AppError::validation(
            "assignee is not an active member of the target department",
        )),
    }
}

fn record_step_update(
    conn: &mut PgConnection,
    ctx: &CallerContext,
    request: &Request,
    updated: &RequestStep,
    old: serde_json::Value,
) -> AppResult<()> {
    audit::record(
        conn,
        ctx.company_id,
        audit::TABLE_REQUEST_STEPS,
        ACTION_UPDATE,
        updated.id,
        Some(request.id),
        Some(updated.id),
        Some(old),
        Some(snapshot(updated)?),
        Some(ctx.user_id),
    )
}

fn touch_request(conn: &mut PgConnection, request_id: Uuid) -> AppResult<()> {
    diesel::update(requests::table.find(request_id))
        .set(requests::updated_at.eq(Utc::now().naive_utc()))
        .execute(conn)?;
    Ok(())
}

/// Marks the step approved and either forwards the request into the next
/// department or closes it. Shared by manual approval and the automation
/// path of `complete_step`.
#[allow(clippy::too_many_arguments)]
fn apply_approval(
    conn: &mut PgConnection,
    ctx: &CallerContext,
    request: &Request,
    step: &RequestStep,
    next_department_id: Option<Uuid>,
    next_assignee_id: Option<Uuid>,
    approval_notes: Option<String>,
    auto: bool,
) -> AppResult<RequestStep> {
    let now = Utc::now().naive_utc();
    let approved_by = if auto { None } else { Some(ctx.user_id) };

    let old = snapshot(step)?;
    diesel::update(request_steps::table.find(step.id))
        .set((
            request_steps::status.eq(STEP_APPROVED),
            request_steps::approved_at.eq(Some(now)),
            request_steps::approved_by.eq(approved_by),
            request_steps::auto_approved.eq(auto),
            request_steps::approval_notes.eq(approval_notes),
        ))
        .execute(conn)?;
    let approved: RequestStep = request_steps::table.find(step.id).first(conn)?;
    record_step_update(conn, ctx, request, &approved, old)?;

    match next_department_id {
        Some(next_department_id) => {
            let next = department_in_company(conn, ctx.company_id, next_department_id)?;

            let new_step = NewRequestStep {
                id: Uuid::new_v4(),
                request_id: request.id,
                company_id: ctx.company_id,
                step_no: approved.step_no + 1,
                from_department_id: Some(approved.department_id),
                department_id: next.id,
                assigned_to: next_assignee_id,
                status: STEP_QUEUED.to_string(),
                created_by: approved_by,
                related_step_id: None,
                due_at: request.due_at,
            };
            diesel::insert_into(request_steps::table)
                .values(&new_step)
                .execute(conn)?;
            let created: RequestStep = request_steps::table.find(new_step.id).first(conn)?;

            audit::record(
                conn,
                ctx.company_id,
                audit::TABLE_REQUEST_STEPS,
                ACTION_INSERT,
                created.id,
                Some(request.id),
                Some(created.id),
                None,
                Some(snapshot(&created)?),
                approved_by,
            )?;
            audit::record_event(
                conn,
                ctx.company_id,
                request.id,
                Some(approved.id),
                "step_approved",
                format!(
                    "step {} approved and forwarded to {}",
                    approved.step_no, next.name
                ),
                approved_by,
            )?;
            if let Some(assignee_id) = created.assigned_to {
                notify_assignee(conn, request, &created, assignee_id)?;
            }
            touch_request(conn, request.id)?;

            Ok(created)
        }
        None => {
            let old_request = snapshot(request)?;
            diesel::update(requests::table.find(request.id))
                .set((
                    requests::request_status.eq(REQUEST_CLOSED),
                    requests::closed_at.eq(Some(now)),
                    requests::updated_at.eq(now),
                ))
                .execute(conn)?;
            let closed: Request = requests::table.find(request.id).first(conn)?;

            audit::record(
                conn,
                ctx.company_id,
                audit::TABLE_REQUESTS,
                ACTION_UPDATE,
                request.id,
                Some(request.id),
                None,
                Some(old_request),
                Some(snapshot(&closed)?),
                approved_by,
            )?;
            audit::record_event(
                conn,
                ctx.company_id,
                request.id,
                Some(approved.id),
                "request_closed",
                format!(
                    "step {} approved; request {} closed",
                    approved.step_no, request.reference_code
                ),
                approved_by,
            )?;

            Ok(approved)
        }
    }
}

fn suspend_step(
    conn: &mut PgConnection,
    ctx: &CallerContext,
    step_id: Uuid,
    notes: String,
    target_status: &str,
    event_type: &str,
) -> AppResult<RequestStep> {
    conn.transaction(|conn| {
        let (request, step) = lock_current_step(conn, ctx, step_id)?;

        let notes = notes.trim().to_string();
        if notes.len() < MIN_NOTES_LEN {
            return Err(AppError::validation(
                "status notes must be at least 3 characters",
            ));
        }
        if !is_assignee(ctx, &step) && !can_act_on(ctx, step.department_id) {
            return Err(AppError::authorization(
                "only the assignee or a department approver can suspend",
            ));
        }
        // Suspensions do not stack; a suspended step must resume first.
        require_status(&step, &[STEP_QUEUED, STEP_IN_PROGRESS])?;

        let old = snapshot(&step)?;
        diesel::update(request_steps::table.find(step.id))
            .set((
                request_steps::status.eq(target_status),
                request_steps::resume_status.eq(Some(step.status.clone())),
                request_steps::status_notes.eq(Some(notes.clone())),
            ))
            .execute(conn)?;
        let updated: RequestStep = request_steps::table.find(step.id).first(conn)?;

        record_step_update(conn, ctx, &request, &updated, old)?;
        audit::record_event(
            conn,
            ctx.company_id,
            request.id,
            Some(updated.id),
            event_type,
            format!("step {} {}: {}", updated.step_no, target_status, notes),
            Some(ctx.user_id),
        )?;
        touch_request(conn, request.id)?;

        Ok(updated)
    })
}

fn readable_request(
    conn: &mut PgConnection,
    ctx: &CallerContext,
    request_id: Uuid,
) -> AppResult<Request> {
    let request: Request = requests::table
        .find(request_id)
        .filter(requests::company_id.eq(ctx.company_id))
        .first(conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    if !crate::authz::can_read_request(conn, ctx, request.id)? {
        return Err(AppError::not_found());
    }

    Ok(request)
}

fn notify_assignee(
    conn: &mut PgConnection,
    request: &Request,
    step: &RequestStep,
    assignee_id: Uuid,
) -> AppResult<()> {
    let profile: Option<Profile> = profiles::table
        .find(assignee_id)
        .first(conn)
        .optional()?;

    if let Some(profile) = profile {
        outbox::enqueue(
            conn,
            &profile.email,
            &format!(
                "[{}] step {} assigned to you",
                request.reference_code, step.step_no
            ),
            &format!(
                "Request {} ({}) has a step waiting for you in your department queue.",
                request.reference_code, request.title
            ),
        )?;
    }
    Ok(())
}

/// Inserts the request row, retrying once with a fresh reference code when
/// the generated one collides. The first attempt runs in a savepoint so the
/// unique violation does not abort the surrounding transaction.
pub fn insert_request(conn: &mut PgConnection, new_request: NewRequest) -> AppResult<Request> {
    let request_id = new_request.id;

    let attempt = conn.transaction(|conn| {
        diesel::insert_into(requests::table)
            .values(&new_request)
            .execute(conn)
    });
    match attempt {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => {
            let retry = NewRequest {
                reference_code: generate_reference_code(),
                ..new_request
            };
            diesel::insert_into(requests::table)
                .values(&retry)
                .execute(conn)?;
        }
        Err(err) => return Err(AppError::from(err)),
    }

    Ok(requests::table.find(request_id).first(conn)?)
}

fn trimmed(notes: Option<String>) -> Option<String> {
    notes
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

fn generate_reference_code() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0xFF_FFFF);
    format!("REQ-{}-{:06X}", Utc::now().format("%Y%m"), suffix)
}

#[cfg(test)]
mod tests {
    use super::generate_reference_code;

    #[test]
    fn reference_codes_have_expected_shape() {
        let code = generate_reference_code();
        assert!(code.starts_with("REQ-"));
        let parts: Vec<&str> = code.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].len(), 6);
        assert_eq!(parts[2].len(), 6);
    }
}
