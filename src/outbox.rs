//! Durable email outbox. Mutating transactions enqueue rows; the
//! dispatcher drains them in insertion order with claim-based locking so
//! several dispatcher processes can run side by side.

use chrono::{Duration as ChronoDuration, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::Serialize;

use crate::delivery::EmailDelivery;
use crate::error::AppResult;
use crate::models::{NewOutboxMessage, OutboxMessage};
use crate::schema::notification_outbox;

pub const STATUS_QUEUED: &str = "queued";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_SENT: &str = "sent";
pub const STATUS_FAILED: &str = "failed";

pub const CHANNEL_EMAIL: &str = "email";

/// Fixed retry delay. Transient provider errors are not worth an
/// exponential schedule at this volume.
const RETRY_DELAY_MINUTES: i64 = 10;

pub fn enqueue(
    conn: &mut PgConnection,
    to_email: &str,
    subject: &str,
    body: &str,
) -> AppResult<()> {
    let message = NewOutboxMessage {
        channel: CHANNEL_EMAIL.to_string(),
        to_email: to_email.to_string(),
        subject: subject.to_string(),
        body: body.to_string(),
        status: STATUS_QUEUED.to_string(),
        next_attempt_at: Utc::now().naive_utc(),
    };

    diesel::insert_into(notification_outbox::table)
        .values(&message)
        .execute(conn)?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub batch_size: i64,
    pub max_attempts: i32,
    pub lease_minutes: i64,
    pub worker_id: String,
}

#[derive(Debug, Default, Serialize)]
pub struct BatchSummary {
    pub processed: u32,
    pub sent: u32,
    pub failed: u32,
}

/// Drains one batch of due messages, oldest first. Each message is claimed
/// with `FOR UPDATE SKIP LOCKED` and flipped to `processing` before any
/// network call, so a crashed dispatcher can never double-send after its
/// lease expires.
pub async fn run_batch(
    conn: &mut PgConnection,
    delivery: &dyn EmailDelivery,
    opts: &DispatchOptions,
) -> AppResult<BatchSummary> {
    reclaim_expired_leases(conn, opts.lease_minutes)?;

    let mut summary = BatchSummary::default();

    while (summary.processed as i64) < opts.batch_size {
        let message = match claim_next(conn, &opts.worker_id)? {
            Some(message) => message,
            None => break,
        };
        summary.processed += 1;

        // Validation failures retry on the same schedule as delivery
        // failures; the attempt cap decides when they become terminal.
        if let Err(reason) = validate(&message) {
            if message.attempts >= opts.max_attempts {
                mark_failed(conn, message.id, &reason)?;
                summary.failed += 1;
            } else {
                requeue_with_backoff(conn, message.id, &reason)?;
            }
            continue;
        }

        match delivery
            .send(&message.to_email, &message.subject, &message.body)
            .await
        {
            Ok(()) => {
                mark_sent(conn, message.id)?;
                summary.sent += 1;
            }
            Err(err) => {
                if message.attempts >= opts.max_attempts {
                    mark_failed(conn, message.id, &err.to_string())?;
                    summary.failed += 1;
                } else {
                    requeue_with_backoff(conn, message.id, &err.to_string())?;
                }
            }
        }
    }

    Ok(summary)
}

/// Returns `processing` rows whose lease ran out back to `queued`,
/// preserving the attempt counter.
fn reclaim_expired_leases(conn: &mut PgConnection, lease_minutes: i64) -> AppResult<usize> {
    let cutoff = (Utc::now() - ChronoDuration::minutes(lease_minutes)).naive_utc();

    let reclaimed = diesel::update(
        notification_outbox::table
            .filter(notification_outbox::status.eq(STATUS_PROCESSING))
            .filter(notification_outbox::locked_at.lt(cutoff)),
    )
    .set((
        notification_outbox::status.eq(STATUS_QUEUED),
        notification_outbox::locked_at.eq(None::<chrono::NaiveDateTime>),
        notification_outbox::locked_by.eq(None::<String>),
    ))
    .execute(conn)?;

    if reclaimed > 0 {
        tracing::warn!(reclaimed, "reclaimed outbox messages with expired leases");
    }
    Ok(reclaimed)
}

fn claim_next(conn: &mut PgConnection, worker_id: &str) -> AppResult<Option<OutboxMessage>> {
    let now = Utc::now().naive_utc();

    let claimed = conn.transaction(|conn| {
        let message_opt = notification_outbox::table
            .filter(notification_outbox::channel.eq(CHANNEL_EMAIL))
            .filter(notification_outbox::status.eq(STATUS_QUEUED))
            .filter(notification_outbox::next_attempt_at.le(now))
            .order(notification_outbox::id.asc())
            .for_update()
            .skip_locked()
            .first::<OutboxMessage>(conn)
            .optional()?;

        if let Some(message) = message_opt {
            diesel::update(notification_outbox::table.find(message.id))
                .set((
                    notification_outbox::status.eq(STATUS_PROCESSING),
                    notification_outbox::attempts.eq(message.attempts + 1),
                    notification_outbox::locked_at.eq(Some(now)),
                    notification_outbox::locked_by.eq(Some(worker_id.to_string())),
                ))
                .execute(conn)?;

            let refreshed = notification_outbox::table.find(message.id).first(conn)?;
            Ok::<Option<OutboxMessage>, diesel::result::Error>(Some(refreshed))
        } else {
            Ok::<Option<OutboxMessage>, diesel::result::Error>(None)
        }
    })?;

    Ok(claimed)
}

fn validate(message: &OutboxMessage) -> Result<(), String> {
    if !message.to_email.contains('@') {
        return Err(format!("invalid recipient address {:?}", message.to_email));
    }
    if message.subject.trim().is_empty() {
        return Err("empty subject".to_string());
    }
    Ok(())
}

fn mark_sent(conn: &mut PgConnection, message_id: i64) -> AppResult<()> {
    diesel::update(notification_outbox::table.find(message_id))
        .set((
            notification_outbox::status.eq(STATUS_SENT),
            notification_outbox::sent_at.eq(Some(Utc::now().naive_utc())),
            notification_outbox::error.eq(None::<String>),
            notification_outbox::locked_at.eq(None::<chrono::NaiveDateTime>),
            notification_outbox::locked_by.eq(None::<String>),
        ))
        .execute(conn)?;
    Ok(())
}

fn requeue_with_backoff(
    conn: &mut PgConnection,
    message_id: i64,
    error_message: &str,
) -> AppResult<()> {
    let next_attempt = (Utc::now() + ChronoDuration::minutes(RETRY_DELAY_MINUTES)).naive_utc();

    diesel::update(notification_outbox::table.find(message_id))
        .set((
            notification_outbox::status.eq(STATUS_QUEUED),
            notification_outbox::next_attempt_at.eq(next_attempt),
            notification_outbox::error.eq(Some(error_message.to_string())),
            notification_outbox::locked_at.eq(None::<chrono::NaiveDateTime>),
            notification_outbox::locked_by.eq(None::<String>),
        ))
        .execute(conn)?;
    Ok(())
}

fn mark_failed(conn: &mut PgConnection, message_id: i64, error_message: &str) -> AppResult<()> {
    diesel::update(notification_outbox::table.find(message_id))
        .set((
            notification_outbox::status.eq(STATUS_FAILED),
            notification_outbox::error.eq(Some(error_message.to_string())),
            notification_outbox::locked_at.eq(None::<chrono::NaiveDateTime>),
            notification_outbox::locked_by.eq(None::<String>),
        ))
        .execute(conn)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(to_email: &str, subject: &str) -> OutboxMessage {
        let now = Utc::now().naive_utc();
        OutboxMessage {
            id: 1,
            channel: CHANNEL_EMAIL.to_string(),
            to_email: to_email.to_string(),
            subject: subject.to_string(),
            body: "body".to_string(),
            status: STATUS_QUEUED.to_string(),
            attempts: 0,
            next_attempt_at: now,
            locked_at: None,
            locked_by: None,
            error: None,
            sent_at: None,
            created_at: now,
        }
    }

    #[test]
    fn rejects_addresses_without_at_sign() {
        assert!(validate(&message("not-an-address", "hello")).is_err());
    }

    #[test]
    fn rejects_blank_subjects() {
        assert!(validate(&message("ops@example.com", "   ")).is_err());
    }

    #[test]
    fn accepts_wellformed_messages() {
        assert!(validate(&message("ops@example.com", "hello")).is_ok());
    }
}
