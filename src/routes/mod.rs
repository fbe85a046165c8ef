use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod admin;
pub mod health;
pub mod me;
pub mod requests;
pub mod steps;
pub mod sys;
pub mod views;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| {
                    trimmed
                        .parse::<HeaderValue>()
                        .expect("invalid CORS allowed origin")
                })
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(headers))
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let requests_routes = Router::new()
        .route(
            "/",
            get(requests::list_requests).post(requests::create_request),
        )
        .route("/:id", get(requests::get_request))
        .route("/:id/comments", post(requests::add_comment))
        .route("/:id/attachments", post(requests::upload_attachment))
        .route(
            "/:id/attachments/:attachment_id/download",
            get(requests::download_attachment),
        );

    let steps_routes = Router::new()
        .route("/:id/assign", post(steps::assign_step))
        .route("/:id/start", post(steps::start_step))
        .route("/:id/complete", post(steps::complete_step))
        .route("/:id/approve", post(steps::approve_step))
        .route("/:id/return", post(steps::return_step))
        .route("/:id/hold", post(steps::hold_step))
        .route("/:id/info-required", post(steps::request_info))
        .route("/:id/resume", post(steps::resume_step));

    let views_routes = Router::new()
        .route("/requests", get(views::requests_overview))
        .route("/sla", get(views::sla_open_steps))
        .route("/workload", get(views::department_workload))
        .route("/dashboard", get(views::dashboard))
        .route("/audit", get(views::audit_entries));

    let admin_routes = Router::new()
        .route("/users/:id/role", post(admin::set_user_role))
        .route("/request-types", post(admin::upsert_request_type))
        .route("/automation-settings", post(admin::set_automation_setting))
        .route("/audit/:id/rollback", post(admin::rollback_audit_entry))
        .route("/outbox/run", post(admin::run_outbox));

    let sys_routes = Router::new()
        .route("/companies", post(sys::create_company))
        .route("/companies/:id/departments", post(sys::create_department))
        .route("/users", get(sys::list_users))
        .route("/users/:id/move", post(sys::move_user_to_company))
        .route("/users/:id/role", post(sys::set_membership_role))
        .route("/users/:id/active", post(sys::set_profile_active));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/requests", requests_routes)
        .nest("/api/steps", steps_routes)
        .nest("/api/views", views_routes)
        .nest("/api/admin", admin_routes)
        .nest("/api/sys", sys_routes)
        .route("/api/me", get(me::whoami))
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024 * 32))
}
