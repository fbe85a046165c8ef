use chrono::Utc;
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{AuditLogEntry, NewAuditLogEntry, NewRequestEvent, Request};
use crate::schema::{audit_log, request_events, requests};

pub const ACTION_INSERT: &str = "INSERT";
pub const ACTION_UPDATE: &str = "UPDATE";
pub const ACTION_DELETE: &str = "DELETE";

pub const TABLE_REQUESTS: &str = "requests";
pub const TABLE_REQUEST_STEPS: &str = "request_steps";
pub const TABLE_REQUEST_COMMENTS: &str = "request_comments";
pub const TABLE_REQUEST_ATTACHMENTS: &str = "request_attachments";
pub const TABLE_MEMBERSHIPS: &str = "memberships";
pub const TABLE_REQUEST_TYPES: &str = "request_types";
pub const TABLE_AUTOMATION_SETTINGS: &str = "department_request_type_settings";

/// Serializes a row snapshot for the audit trail.
pub fn snapshot<T: Serialize>(value: &T) -> AppResult<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}

/// Appends one immutable audit row with old/new snapshots of the mutated
/// record. Must run inside the mutating transaction.
#[allow(clippy::too_many_arguments)]
pub fn record(
    conn: &mut PgConnection,
    company_id: Uuid,
    table_name: &str,
    action: &str,
    record_pk: impl ToString,
    request_id: Option<Uuid>,
    step_id: Option<Uuid>,
    old_data: Option<serde_json::Value>,
    new_data: Option<serde_json::Value>,
    changed_by: Option<Uuid>,
) -> AppResult<()> {
    let entry = NewAuditLogEntry {
        company_id,
        table_name: table_name.to_string(),
        action: action.to_string(),
        record_pk: record_pk.to_string(),
        request_id,
        step_id,
        old_data,
        new_data,
        changed_by,
    };

    diesel::insert_into(audit_log::table)
        .values(&entry)
        .execute(conn)?;
    Ok(())
}

/// Appends a human-readable timeline entry. Not authoritative; the audit
/// log is.
pub fn record_event(
    conn: &mut PgConnection,
    company_id: Uuid,
    request_id: Uuid,
    step_id: Option<Uuid>,
    event_type: &str,
    message: impl Into<String>,
    created_by: Option<Uuid>,
) -> AppResult<()> {
    let event = NewRequestEvent {
        id: Uuid::new_v4(),
        request_id,
        step_id,
        company_id,
        event_type: event_type.to_string(),
        message: message.into(),
        created_by,
    };

    diesel::insert_into(request_events::table)
        .values(&event)
        .execute(conn)?;
    Ok(())
}

/// Re-applies the pre-image of a `requests` UPDATE entry as a fresh audited
/// mutation. Fails with a conflict when the live row drifted from the
/// entry's post-image since it was written.
pub fn rollback(
    conn: &mut PgConnection,
    company_id: Uuid,
    audit_id: i64,
    changed_by: Uuid,
) -> AppResult<Request> {
    conn.transaction(|conn| {
        let entry: AuditLogEntry = audit_log::table
            .find(audit_id)
            .filter(audit_log::company_id.eq(company_id))
            .first(conn)
            .optional()?
            .ok_or_else(AppError::not_found)?;

        if entry.table_name != TABLE_REQUESTS || entry.action != ACTION_UPDATE {
            return Err(AppError::validation(
                "only requests UPDATE entries can be rolled back",
            ));
        }

        let old_data = entry
            .old_data
            .clone()
            .ok_or_else(|| AppError::conflict("audit entry has no pre-image"))?;
        let new_data = entry
            .new_data
            .clone()
            .ok_or_else(|| AppError::conflict("audit entry has no post-image"))?;

        let request_id = entry
            .request_id
            .ok_or_else(|| AppError::conflict("audit entry has no request reference"))?;

        let live: Request = requests::table
            .find(request_id)
            .for_update()
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::conflict("the audited request no longer exists"))?;

        if serde_json::to_value(&live)? != new_data {
            return Err(AppError::conflict(
                "the request changed since this audit entry was written",
            ));
        }

        let pre_image: Request = serde_json::from_value(old_data)
            .map_err(|err| AppError::conflict(format!("unreadable pre-image: {err}")))?;

        let now = Utc::now().naive_utc();
        diesel::update(requests::table.find(request_id))
            .set((
                requests::title.eq(&pre_image.title),
                requests::description.eq(&pre_image.description),
                requests::priority.eq(pre_image.priority),
                requests::request_status.eq(&pre_image.request_status),
                requests::due_at.eq(pre_image.due_at),
                requests::metadata.eq(&pre_image.metadata),
                requests::closed_at.eq(pre_image.closed_at),
                requests::updated_at.eq(now),
            ))
            .execute(conn)?;

        let restored: Request = requests::table.find(request_id).first(conn)?;

        record(
            conn,
            company_id,
            TABLE_REQUESTS,
            ACTION_UPDATE,
            request_id,
            Some(request_id),
            None,
            Some(snapshot(&live)?),
            Some(snapshot(&restored)?),
            Some(changed_by),
        )?;
        record_event(
            conn,
            company_id,
            request_id,
            None,
            "audit_rollback",
            format!("audit entry {} rolled back", entry.id),
            Some(changed_by),
        )?;

        Ok(restored)
    })
}
