use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = companies)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = companies)]
pub struct NewCompany {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = departments)]
pub struct Department {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub code: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = departments)]
pub struct NewDepartment {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub code: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = profiles)]
#[diesel(primary_key(user_id))]
pub struct Profile {
    pub user_id: Uuid,
    pub company_id: Uuid,
    pub full_name: String,
    pub email: String,
    pub department_id: Option<Uuid>,
    pub job_title: Option<String>,
    pub is_active: bool,
    pub is_system_admin: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = profiles)]
pub struct NewProfile {
    pub user_id: Uuid,
    pub company_id: Uuid,
    pub full_name: String,
    pub email: String,
    pub department_id: Option<Uuid>,
    pub job_title: Option<String>,
    pub is_active: bool,
    pub is_system_admin: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = memberships)]
pub struct Membership {
    pub id: Uuid,
    pub company_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub department_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = memberships)]
pub struct NewMembership {
    pub id: Uuid,
    pub company_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub department_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = request_types)]
pub struct RequestType {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub default_priority: i32,
    pub active: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = request_types)]
pub struct NewRequestType {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub default_priority: i32,
    pub active: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = department_request_type_settings)]
pub struct DepartmentRequestTypeSetting {
    pub id: Uuid,
    pub company_id: Uuid,
    pub department_id: Uuid,
    pub request_type_id: Uuid,
    pub approval_mode: String,
    pub auto_close: bool,
    pub default_next_department_id: Option<Uuid>,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = department_request_type_settings)]
pub struct NewDepartmentRequestTypeSetting {
    pub id: Uuid,
    pub company_id: Uuid,
    pub department_id: Uuid,
    pub request_type_id: Uuid,
    pub approval_mode: String,
    pub auto_close: bool,
    pub default_next_department_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = requests)]
pub struct Request {
    pub id: Uuid,
    pub company_id: Uuid,
    pub reference_code: String,
    pub title: String,
    pub description: Option<String>,
    pub request_type_id: Uuid,
    pub priority: i32,
    pub request_status: String,
    pub requester_user_id: Uuid,
    pub origin_department_id: Option<Uuid>,
    pub due_at: Option<NaiveDateTime>,
    pub metadata: serde_json::Value,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub closed_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = requests)]
pub struct NewRequest {
    pub id: Uuid,
    pub company_id: Uuid,
    pub reference_code: String,
    pub title: String,
    pub description: Option<String>,
    pub request_type_id: Uuid,
    pub priority: i32,
    pub request_status: String,
    pub requester_user_id: Uuid,
    pub origin_department_id: Option<Uuid>,
    pub due_at: Option<NaiveDateTime>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable, Serialize)]
#[diesel(table_name = request_steps)]
#[diesel(belongs_to(Request))]
pub struct RequestStep {
    pub id: Uuid,
    pub request_id: Uuid,
    pub company_id: Uuid,
    pub step_no: i32,
    pub from_department_id: Option<Uuid>,
    pub department_id: Uuid,
    pub assigned_to: Option<Uuid>,
    pub status: String,
    pub resume_status: Option<String>,
    pub created_by: Option<Uuid>,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub completion_notes: Option<String>,
    pub approved_at: Option<NaiveDateTime>,
    pub approved_by: Option<Uuid>,
    pub auto_approved: bool,
    pub approval_notes: Option<String>,
    pub returned_at: Option<NaiveDateTime>,
    pub return_reason: Option<String>,
    pub status_notes: Option<String>,
    pub related_step_id: Option<Uuid>,
    pub due_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = request_steps)]
pub struct NewRequestStep {
    pub id: Uuid,
    pub request_id: Uuid,
    pub company_id: Uuid,
    pub step_no: i32,
    pub from_department_id: Option<Uuid>,
    pub department_id: Uuid,
    pub assigned_to: Option<Uuid>,
    pub status: String,
    pub created_by: Option<Uuid>,
    pub related_step_id: Option<Uuid>,
    pub due_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(table_name = request_comments)]
#[diesel(belongs_to(Request))]
pub struct RequestComment {
    pub id: Uuid,
    pub request_id: Uuid,
    pub step_id: Option<Uuid>,
    pub company_id: Uuid,
    pub user_id: Uuid,
    pub body: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = request_comments)]
pub struct NewRequestComment {
    pub id: Uuid,
    pub request_id: Uuid,
    pub step_id: Option<Uuid>,
    pub company_id: Uuid,
    pub user_id: Uuid,
    pub body: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(table_name = request_attachments)]
#[diesel(belongs_to(Request))]
pub struct RequestAttachment {
    pub id: Uuid,
    pub request_id: Uuid,
    pub step_id: Option<Uuid>,
    pub company_id: Uuid,
    pub uploaded_by: Uuid,
    pub storage_bucket: String,
    pub storage_path: String,
    pub file_name: String,
    pub mime_type: Option<String>,
    pub byte_size: Option<i64>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = request_attachments)]
pub struct NewRequestAttachment {
    pub id: Uuid,
    pub request_id: Uuid,
    pub step_id: Option<Uuid>,
    pub company_id: Uuid,
    pub uploaded_by: Uuid,
    pub storage_bucket: String,
    pub storage_path: String,
    pub file_name: String,
    pub mime_type: Option<String>,
    pub byte_size: Option<i64>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Serialize)]
#[diesel(table_name = request_events)]
#[diesel(belongs_to(Request))]
pub struct RequestEvent {
    pub id: Uuid,
    pub request_id: Uuid,
    pub step_id: Option<Uuid>,
    pub company_id: Uuid,
    pub event_type: String,
    pub message: String,
    pub created_by: Option<Uuid>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = request_events)]
pub struct NewRequestEvent {
    pub id: Uuid,
    pub request_id: Uuid,
    pub step_id: Option<Uuid>,
    pub company_id: Uuid,
    pub event_type: String,
    pub message: String,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = audit_log)]
pub struct AuditLogEntry {
    pub id: i64,
    pub company_id: Uuid,
    pub table_name: String,
    pub action: String,
    pub record_pk: String,
    pub request_id: Option<Uuid>,
    pub step_id: Option<Uuid>,
    pub old_data: Option<serde_json::Value>,
    pub new_data: Option<serde_json::Value>,
    pub changed_by: Option<Uuid>,
    pub changed_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = audit_log)]
pub struct NewAuditLogEntry {
    pub company_id: Uuid,
    pub table_name: String,
    pub action: String,
    pub record_pk: String,
    pub request_id: Option<Uuid>,
    pub step_id: Option<Uuid>,
    pub old_data: Option<serde_json::Value>,
    pub new_data: Option<serde_json::Value>,
    pub changed_by: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = notification_outbox)]
pub struct OutboxMessage {
    pub id: i64,
    pub channel: String,
    pub to_email: String,
    pub subject: String,
    pub body: String,
    pub status: String,
    pub attempts: i32,
    pub next_attempt_at: NaiveDateTime,
    pub locked_at: Option<NaiveDateTime>,
    pub locked_by: Option<String>,
    pub error: Option<String>,
    pub sent_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = notification_outbox)]
pub struct NewOutboxMessage {
    pub channel: String,
    pub to_email: String,
    pub subject: String,
    pub body: String,
    pub status: String,
    pub next_attempt_at: NaiveDateTime,
}
