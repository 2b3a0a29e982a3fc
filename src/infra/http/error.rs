use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use nbconvert_http_api_types::ProblemDetails;

use crate::{
    application::{convert::ConvertError, error::ErrorReport, export::ConfigError},
    domain::{DocumentError, notebook::CANONICAL_NBFORMAT},
};

pub const PROBLEM_JSON: &str = "application/problem+json";

pub mod titles {
    pub const MISSING_FIELD: &str = "Missing field";
    pub const INVALID_FIELD: &str = "Invalid field";
    pub const PAYLOAD_TOO_LARGE: &str = "Payload too large";
    pub const CONVERSION_FAILED: &str = "Conversion failed";
    pub const CONVERSION_TIMED_OUT: &str = "Conversion timed out";
    pub const SERVICE_UNAVAILABLE: &str = "Service unavailable";
}

/// Structured client-facing error; rendered as problem JSON.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    title: &'static str,
    detail: String,
    report: ErrorReport,
}

impl ApiError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        title: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        let detail = detail.into();
        Self {
            status,
            title,
            report: ErrorReport::from_message(source, status, detail.clone()),
            detail,
        }
    }

    pub fn missing_field(source: &'static str, detail: impl Into<String>) -> Self {
        Self::new(source, StatusCode::BAD_REQUEST, titles::MISSING_FIELD, detail)
    }

    pub fn invalid_field(source: &'static str, detail: impl Into<String>) -> Self {
        Self::new(source, StatusCode::BAD_REQUEST, titles::INVALID_FIELD, detail)
    }

    /// Map a body-reading failure (size limit, malformed framing).
    pub fn unreadable_body(source: &'static str, status: StatusCode, detail: String) -> Self {
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            Self::new(source, status, titles::PAYLOAD_TOO_LARGE, detail)
        } else {
            Self::new(source, StatusCode::BAD_REQUEST, titles::INVALID_FIELD, detail)
        }
    }

    pub fn from_config(source: &'static str, err: &ConfigError) -> Self {
        Self::invalid_field(source, err.to_string())
    }

    pub fn from_document(source: &'static str, err: &DocumentError) -> Self {
        Self::invalid_field(
            source,
            format!("Notebook JSON invalid for version {CANONICAL_NBFORMAT}: {err}"),
        )
    }

    pub fn from_convert(source: &'static str, err: ConvertError) -> Self {
        let (status, title, detail) = match &err {
            ConvertError::Config(config) => return Self::from_config(source, config),
            ConvertError::RenderFailed(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                titles::CONVERSION_FAILED,
                message.clone(),
            ),
            ConvertError::Timeout { limit } => (
                StatusCode::GATEWAY_TIMEOUT,
                titles::CONVERSION_TIMED_OUT,
                format!(
                    "Conversion did not finish within {} seconds",
                    limit.as_secs_f64()
                ),
            ),
            ConvertError::PoolUnavailable(message) => (
                StatusCode::SERVICE_UNAVAILABLE,
                titles::SERVICE_UNAVAILABLE,
                message.clone(),
            ),
            ConvertError::Template(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                titles::CONVERSION_FAILED,
                "Template asset could not be prepared".to_string(),
            ),
        };
        Self {
            status,
            title,
            detail,
            report: ErrorReport::from_error(source, status, &err),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn title(&self) -> &'static str {
        self.title
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ProblemDetails {
            status: self.status.as_u16(),
            title: self.title.to_string(),
            detail: self.detail,
        };
        let mut response = (self.status, Json(body)).into_response();
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(PROBLEM_JSON));
        self.report.attach(&mut response);
        response
    }
}
