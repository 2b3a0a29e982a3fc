//! Read-only endpoints: format listing and liveness.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use nbconvert_http_api_types::{FormatsResponse, HealthResponse, HealthStatus};

use crate::{application::error::ErrorReport, domain::ExportFormat};

use super::AppState;

pub(super) async fn formats() -> Json<FormatsResponse> {
    Json(FormatsResponse {
        formats: ExportFormat::listing()
            .into_iter()
            .map(str::to_string)
            .collect(),
    })
}

pub(super) async fn health(State(state): State<AppState>) -> Response {
    let closed = state.pool.is_closed();
    let body = HealthResponse {
        status: if closed {
            HealthStatus::Unavailable
        } else {
            HealthStatus::Ok
        },
        workers: state.pool.workers() as usize,
        in_flight: state.pool.in_flight(),
    };

    if !closed {
        return Json(body).into_response();
    }
    let mut response = (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
    ErrorReport::from_message(
        "infra::http::health",
        StatusCode::SERVICE_UNAVAILABLE,
        "conversion pool is closed",
    )
    .attach(&mut response);
    response
}
