use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use opscore::auth::jwt::JwtService;
use opscore::config::AppConfig;
use opscore::db::{self, PgPool};
use opscore::delivery::EmailDelivery;
use opscore::error::{AppError, AppResult};
use opscore::models::{
    NewCompany, NewDepartment, NewMembership, NewProfile, NewRequestType, OutboxMessage,
};
use opscore::routes;
use opscore::state::AppState;
use opscore::storage::ObjectStorage;
use serde::Serialize;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[allow(dead_code)]
#[derive(Clone)]
pub struct StoredObject {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
    ) -> Result<()> {
        let stored = StoredObject {
            key: key.to_string(),
            bytes,
            content_type,
        };
        let mut guard = self.objects.lock().await;
        guard.insert(stored.key.clone(), stored);
        Ok(())
    }

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> Result<String> {
        let guard = self.objects.lock().await;
        ensure!(guard.contains_key(key), "object {key} missing");
        Ok(format!(
            "https://fake-storage/{key}?expires_in={}",
            expires_in.as_secs()
        ))
    }
}

impl FakeStorage {
    #[allow(dead_code)]
    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        let guard = self.objects.lock().await;
        guard.get(key).cloned()
    }

    #[allow(dead_code)]
    pub async fn object_count(&self) -> usize {
        let guard = self.objects.lock().await;
        guard.len()
    }
}

#[allow(dead_code)]
#[derive(Clone)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Transport double for the outbox. Calls fail while `fail_next` is
/// positive, then succeed, so retry paths can be driven deterministically.
#[derive(Default)]
pub struct FakeDelivery {
    sent: Mutex<Vec<SentEmail>>,
    fail_next: Mutex<u32>,
}

#[async_trait]
impl EmailDelivery for FakeDelivery {
    async fn send(&self, to: &str, subject: &str, body: &str) -> AppResult<()> {
        {
            let mut remaining = self.fail_next.lock().await;
            if *remaining > 0 {
                *remaining -= 1;
                return Err(AppError::Delivery("simulated provider outage".to_string()));
            }
        }
        let mut guard = self.sent.lock().await;
        guard.push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

impl FakeDelivery {
    #[allow(dead_code)]
    pub async fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().await.clone()
    }

    #[allow(dead_code)]
    pub async fn fail_next(&self, count: u32) {
        *self.fail_next.lock().await = count;
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    storage: Arc<FakeStorage>,
    delivery: Arc<FakeDelivery>,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            cors_allowed_origin: None,
            aws_endpoint_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: "us-east-1".to_string(),
            attachments_bucket: "test-bucket".to_string(),
            attachment_url_expiry_minutes: 30,
            resend_api_key: None,
            outbox_from_email: "ops@test.local".to_string(),
            outbox_dry_run: false,
            outbox_max_batch: 25,
            outbox_max_attempts: 5,
            outbox_lease_minutes: 15,
            outbox_poll_seconds: 60,
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeStorage::default());
        let storage_for_state: Arc<dyn ObjectStorage> = storage.clone();
        let delivery = Arc::new(FakeDelivery::default());
        let delivery_for_state: Arc<dyn EmailDelivery> = delivery.clone();
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(
            pool.clone(),
            config,
            storage_for_state,
            delivery_for_state,
            jwt,
        );
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            storage,
            delivery,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    #[allow(dead_code)]
    pub fn delivery(&self) -> Arc<FakeDelivery> {
        self.delivery.clone()
    }

    pub fn token_for(&self, user_id: Uuid) -> Result<String> {
        self.state.jwt.generate_token(user_id)
    }

    pub async fn seed_company(&self, name: &str) -> Result<Uuid> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let company = NewCompany {
                id: Uuid::new_v4(),
                name,
            };
            diesel::insert_into(opscore::schema::companies::table)
                .values(&company)
                .execute(conn)
                .context("failed to insert company")?;
            Ok(company.id)
        })
        .await
    }

    pub async fn seed_department(&self, company_id: Uuid, name: &str) -> Result<Uuid> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let department = NewDepartment {
                id: Uuid::new_v4(),
                company_id,
                name,
                code: None,
            };
            diesel::insert_into(opscore::schema::departments::table)
                .values(&department)
                .execute(conn)
                .context("failed to insert department")?;
            Ok(department.id)
        })
        .await
    }

    pub async fn seed_user(
        &self,
        company_id: Uuid,
        department_id: Option<Uuid>,
        role: &str,
        full_name: &str,
    ) -> Result<Uuid> {
        let role = role.to_string();
        let full_name = full_name.to_string();
        self.with_conn(move |conn| {
            let user_id = Uuid::new_v4();
            let profile = NewProfile {
                user_id,
                company_id,
                full_name: full_name.clone(),
                email: format!("{}@test.local", user_id.simple()),
                department_id,
                job_title: None,
                is_active: true,
                is_system_admin: false,
            };
            diesel::insert_into(opscore::schema::profiles::table)
                .values(&profile)
                .execute(conn)
                .context("failed to insert profile")?;

            let membership = NewMembership {
                id: Uuid::new_v4(),
                company_id,
                user_id,
                role,
                department_id,
            };
            diesel::insert_into(opscore::schema::memberships::table)
                .values(&membership)
                .execute(conn)
                .context("failed to insert membership")?;
            Ok(user_id)
        })
        .await
    }

    pub async fn seed_system_admin(&self, company_id: Uuid) -> Result<Uuid> {
        self.with_conn(move |conn| {
            let user_id = Uuid::new_v4();
            let profile = NewProfile {
                user_id,
                company_id,
                full_name: "Platform Operator".to_string(),
                email: format!("{}@test.local", user_id.simple()),
                department_id: None,
                job_title: None,
                is_active: true,
                is_system_admin: true,
            };
            diesel::insert_into(opscore::schema::profiles::table)
                .values(&profile)
                .execute(conn)
                .context("failed to insert system admin profile")?;
            Ok(user_id)
        })
        .await
    }

    pub async fn seed_request_type(&self, company_id: Uuid, name: &str) -> Result<Uuid> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let request_type = NewRequestType {
                id: Uuid::new_v4(),
                company_id,
                name,
                description: None,
                default_priority: 3,
                active: true,
            };
            diesel::insert_into(opscore::schema::request_types::table)
                .values(&request_type)
                .execute(conn)
                .context("failed to insert request type")?;
            Ok(request_type.id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn outbox_messages(&self) -> Result<Vec<OutboxMessage>> {
        self.with_conn(|conn| {
            use opscore::schema::notification_outbox::dsl::{id, notification_outbox};
            let rows = notification_outbox
                .order(id.asc())
                .load::<OutboxMessage>(conn)
                .context("failed to load outbox")?;
            Ok(rows)
        })
        .await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn post_empty(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::POST).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn post_bytes(
        &self,
        path: &str,
        content_type: &str,
        data: &[u8],
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", content_type)
            .header("authorization", format!("Bearer {token}"))
            .body(Body::from(data.to_vec()))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

#[allow(dead_code)]
pub async fn json_body(response: hyper::Response<Body>) -> Result<serde_json::Value> {
    let status = response.status();
    let bytes = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("response (status {status}) was not JSON"))
}

#[allow(dead_code)]
pub async fn expect_status(
    response: hyper::Response<Body>,
    expected: StatusCode,
) -> Result<serde_json::Value> {
    let status = response.status();
    let bytes = body_to_vec(response.into_body()).await?;
    ensure!(
        status == expected,
        "expected {expected}, got {status}: {}",
        String::from_utf8_lossy(&bytes)
    );
    if bytes.is_empty() {
        Ok(serde_json::Value::Null)
    } else {
        Ok(serde_json::from_slice(&bytes)?)
    }
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE notification_outbox, audit_log, request_events, request_attachments, \
         request_comments, request_steps, requests, department_request_type_settings, \
         request_types, memberships, profiles, departments, companies RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
