use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;

use crate::error::{AppError, AppResult};

/// Outbound email transport used by the outbox dispatcher. Implementations
/// must treat a returned error as retryable; permanent rejects are decided
/// by the dispatcher's attempt counter.
#[async_trait]
pub trait EmailDelivery: Send + Sync + 'static {
    async fn send(&self, to: &str, subject: &str, body: &str) -> AppResult<()>;
}

#[derive(Serialize)]
struct ResendPayload<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
}

pub struct ResendDelivery {
    client: reqwest::Client,
    api_key: String,
    from_email: String,
}

impl ResendDelivery {
    pub fn new(
        api_key: impl Into<String>,
        from_email: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("failed to build resend http client")?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            from_email: from_email.into(),
        })
    }
}

#[async_trait]
impl EmailDelivery for ResendDelivery {
    async fn send(&self, to: &str, subject: &str, body: &str) -> AppResult<()> {
        let payload = ResendPayload {
            from: &self.from_email,
            to: [to],
            subject,
            text: body,
        };

        let response = self
            .client
            .post("https://api.resend.com/emails")
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| AppError::Delivery(format!("resend request failed: {err}")))?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            Err(AppError::Delivery(format!(
                "resend returned {status}: {detail}"
            )))
        }
    }
}

/// Transport that records nothing and always succeeds. Backs dry-run mode,
/// where the dispatcher walks the queue without sending anything.
pub struct NoopDelivery;

#[async_trait]
impl EmailDelivery for NoopDelivery {
    async fn send(&self, _to: &str, _subject: &str, _body: &str) -> AppResult<()> {
        Ok(())
    }
}
