mod api;
pub mod error;
mod middleware;
mod render;
pub mod response;
mod status;

pub use error::ApiError;
pub use middleware::{REQUEST_ID_HEADER, RequestContext};
pub use response::Disposition;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
};

use crate::application::{export::ConversionDefaults, pool::ConversionPool};

use middleware::{log_responses, set_request_context};

/// Service context shared by every handler. Built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<ConversionPool>,
    pub defaults: Arc<ConversionDefaults>,
}

impl AppState {
    pub fn new(pool: Arc<ConversionPool>, defaults: ConversionDefaults) -> Self {
        Self {
            pool,
            defaults: Arc::new(defaults),
        }
    }
}

pub fn build_router(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/render", post(render::render))
        .route("/api/convert", post(api::convert))
        .route("/api/formats", get(status::formats))
        .route("/health", get(status::health))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
