//! Standalone outbox dispatcher. Polls the notification outbox and
//! delivers due emails in batches; safe to run alongside other dispatcher
//! instances thanks to claim-based locking.

use std::{sync::Arc, time::Duration};

use tokio::signal;
use tracing_subscriber::EnvFilter;

use opscore::{
    config::AppConfig,
    db::{self, PgPool},
    delivery::{EmailDelivery, NoopDelivery, ResendDelivery},
    outbox::{self, DispatchOptions},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "dispatcher",
        database_url = %config.redacted_database_url(),
        dry_run = config.outbox_dry_run,
        batch_size = config.outbox_max_batch,
        poll_seconds = config.outbox_poll_seconds,
        "loaded configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let delivery: Arc<dyn EmailDelivery> = if config.outbox_dry_run {
        tracing::warn!("dry-run enabled, emails will not be sent");
        Arc::new(NoopDelivery)
    } else {
        let api_key = config
            .resend_api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("RESEND_API_KEY is required unless OUTBOX_DRY_RUN is set"))?;
        Arc::new(ResendDelivery::new(api_key, config.outbox_from_email.clone())?)
    };

    let opts = DispatchOptions {
        batch_size: config.outbox_max_batch,
        max_attempts: config.outbox_max_attempts,
        lease_minutes: config.outbox_lease_minutes,
        worker_id: format!("dispatcher-{}", std::process::id()),
    };
    let poll_interval = Duration::from_secs(config.outbox_poll_seconds);

    tokio::select! {
        result = run_loop(pool, delivery, opts, poll_interval) => result?,
        _ = signal::ctrl_c() => {
            tracing::info!("dispatcher received shutdown signal");
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

async fn run_loop(
    pool: PgPool,
    delivery: Arc<dyn EmailDelivery>,
    opts: DispatchOptions,
    poll_interval: Duration,
) -> anyhow::Result<()> {
    loop {
        let mut conn = pool.get()?;
        match outbox::run_batch(&mut conn, delivery.as_ref(), &opts).await {
            Ok(summary) => {
                if summary.processed > 0 {
                    tracing::info!(
                        processed = summary.processed,
                        sent = summary.sent,
                        failed = summary.failed,
                        "outbox batch finished"
                    );
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "outbox batch failed");
            }
        }
        drop(conn);

        tokio::time::sleep(poll_interval).await;
    }
}
