use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::ApiState;

pub fn create_router(state: Arc<ApiState>) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)));

    Router::new()
        .route("/api/ledger/orgs", post(handlers::create_org))
        .route("/api/ledger/orgs/:org_id/quota", post(handlers::set_quota_limit))
        .route("/api/ledger/students", post(handlers::create_student))
        .route("/api/ledger/allocate", post(handlers::allocate))
        .route("/api/ledger/consume", post(handlers::consume))
        .route("/api/ledger/:org_id/summary", get(handlers::get_summary))
        .route("/api/ledger/:org_id/history", get(handlers::get_history))
        .route("/health", get(handlers::health_check))
        .with_state(state)
        .layer(middleware)
}
