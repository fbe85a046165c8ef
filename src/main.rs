use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use opscore::{
    auth::jwt::JwtService,
    config::AppConfig,
    db,
    delivery::{EmailDelivery, NoopDelivery, ResendDelivery},
    routes::create_router,
    state::AppState,
    storage::S3Storage,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "api",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        attachments_bucket = %config.attachments_bucket,
        outbox_dry_run = config.outbox_dry_run,
        "loaded configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let storage = Arc::new(S3Storage::from_config(&config).await?);
    let delivery = build_delivery(&config)?;
    let jwt = JwtService::from_config(&config)?;

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let state = AppState::new(pool, config, storage, delivery, jwt);
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, router).await?;

    Ok(())
}

fn build_delivery(config: &AppConfig) -> anyhow::Result<Arc<dyn EmailDelivery>> {
    if config.outbox_dry_run {
        tracing::warn!("outbox dry-run enabled, emails will not be sent");
        return Ok(Arc::new(NoopDelivery));
    }
    match &config.resend_api_key {
        Some(api_key) => Ok(Arc::new(ResendDelivery::new(
            api_key.clone(),
            config.outbox_from_email.clone(),
        )?)),
        None => {
            tracing::warn!("RESEND_API_KEY not set, falling back to dry-run delivery");
            Ok(Arc::new(NoopDelivery))
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
