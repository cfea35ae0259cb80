// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{admin, analytics, exam_session, user_answer},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

/// Assembles the main application router.
///
/// * Every route requires a bearer token; `/api/admin` additionally requires the admin role.
/// * Applies global middleware (Trace, CORS).
/// * Injects global state (pool, config, collaborators).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        HeaderValue::from_static("http://localhost:3000"),
        HeaderValue::from_static("http://127.0.0.1:3000"),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let session_routes = Router::new()
        .route(
            "/",
            get(exam_session::list_sessions).post(exam_session::create_session),
        )
        .route("/{id}", get(exam_session::get_session))
        .route("/{id}/submit_answer", post(exam_session::submit_answer))
        .route("/{id}/complete", post(exam_session::complete_session))
        .route("/{id}/abandon", post(exam_session::abandon_session))
        .route(
            "/{id}/learning_material_viewed",
            post(exam_session::learning_material_viewed),
        );

    let answer_routes = Router::new()
        .route("/", post(user_answer::create_user_answer))
        .route("/{id}/retry_evaluation", post(user_answer::retry_evaluation));

    let analytics_routes = Router::new().route("/performance", get(analytics::get_performance));

    let admin_routes = Router::new()
        .route("/exam-sessions/{id}/rescore", post(admin::rescore_session))
        .layer(middleware::from_fn(admin_middleware));

    let api = Router::new()
        .nest("/exam-sessions", session_routes)
        .nest("/user-answers", answer_routes)
        .nest("/analytics", analytics_routes)
        .nest("/admin", admin_routes)
        // Auth runs before the admin check above.
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api", api)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
