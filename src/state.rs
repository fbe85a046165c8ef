use std::sync::Arc;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    auth::jwt::JwtService,
    config::AppConfig,
    db::PgPool,
    delivery::EmailDelivery,
    error::{AppError, AppResult},
    storage::ObjectStorage,
};

pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn ObjectStorage>,
    pub delivery: Arc<dyn EmailDelivery>,
    pub jwt: JwtService,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        storage: Arc<dyn ObjectStorage>,
        delivery: Arc<dyn EmailDelivery>,
        jwt: JwtService,
    ) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            storage,
            delivery,
            jwt,
        }
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }
}
