//! Router setup and shared application state.
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::{handlers, serverless};
use crate::service::Gateway;

pub struct AppState {
    pub gateway: Arc<Gateway>,
}

pub fn router(gateway: Arc<Gateway>) -> Router {
    let state = Arc::new(AppState { gateway });
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/templates", get(handlers::list_templates))
        .route("/templates/:name", get(handlers::template_info))
        .route("/generate", post(handlers::generate))
        .route("/status/:job_id", get(handlers::status))
        .route("/download/:job_id", get(handlers::download))
        .route("/jobs", get(handlers::list_jobs))
        .route("/run", post(serverless::run))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
