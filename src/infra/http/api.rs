//! `POST /api/convert`: JSON in, JSON envelope out.

use axum::{
    Json,
    body::Bytes,
    extract::{State, rejection::BytesRejection},
};
use nbconvert_http_api_types::{ConvertEnvelope, ConvertRequest};
use serde_json::Value;

use crate::{
    application::export::{ConfigError, RenderConfig},
    domain::Notebook,
};

use super::{AppState, error::ApiError, response::envelope};

const SOURCE: &str = "infra::http::api::convert";

pub(super) async fn convert(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<ConvertEnvelope>, ApiError> {
    let body = body.map_err(|rejection| {
        ApiError::unreadable_body(SOURCE, rejection.status(), rejection.body_text())
    })?;
    let request: ConvertRequest = serde_json::from_slice(&body).map_err(|err| {
        ApiError::invalid_field(SOURCE, format!("Request body must be a JSON object: {err}"))
    })?;

    let notebook = request
        .notebook
        .ok_or_else(|| ApiError::missing_field(SOURCE, "Missing notebook field"))?;
    let exporter = match request.exporter {
        Some(Value::String(name)) => name,
        Some(other) => {
            return Err(ApiError::from_config(
                SOURCE,
                &ConfigError::invalid_format(other.to_string()),
            ));
        }
        None => return Err(ApiError::missing_field(SOURCE, "Missing exporter field")),
    };

    let config = RenderConfig::build(&exporter, request.config.as_ref(), &state.defaults)
        .map_err(|err| ApiError::from_config(SOURCE, &err))?;
    let notebook =
        Notebook::from_value(notebook).map_err(|err| ApiError::from_document(SOURCE, &err))?;

    let result = state
        .pool
        .dispatch(notebook, config)
        .await
        .map_err(|err| ApiError::from_convert(SOURCE, err))?;

    Ok(Json(envelope(result)))
}
