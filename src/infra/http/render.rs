//! `POST /render`: multipart form in, rendered artifact out.

use axum::{
    body::Bytes,
    extract::{
        Multipart, State,
        multipart::{MultipartError, MultipartRejection},
    },
    response::Response,
};
use tracing::warn;

use crate::{application::export::RenderConfig, domain::Notebook};

use super::{
    AppState,
    error::ApiError,
    response::{Disposition, download_response},
};

const SOURCE: &str = "infra::http::render";

#[derive(Debug, Default)]
struct RenderForm {
    notebook: Option<Bytes>,
    exporter: Option<String>,
    disposition: Option<String>,
}

pub(super) async fn render(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let mut multipart = multipart.map_err(|rejection| {
        ApiError::unreadable_body(SOURCE, rejection.status(), rejection.body_text())
    })?;
    let form = read_form(&mut multipart).await?;

    let notebook = form.notebook.ok_or_else(|| {
        ApiError::missing_field(SOURCE, "Missing notebook [multipart file] field")
    })?;
    if notebook.is_empty() {
        return Err(ApiError::invalid_field(
            SOURCE,
            "Notebook file multipart field empty",
        ));
    }

    let exporter = form
        .exporter
        .ok_or_else(|| ApiError::missing_field(SOURCE, "Missing exporter field"))?;
    let config = RenderConfig::build(&exporter, None, &state.defaults)
        .map_err(|err| ApiError::from_config(SOURCE, &err))?;

    let disposition = form
        .disposition
        .ok_or_else(|| ApiError::missing_field(SOURCE, "Missing disposition field"))?;
    let disposition = Disposition::parse(&disposition).ok_or_else(|| {
        ApiError::invalid_field(
            SOURCE,
            format!(
                "Invalid disposition {disposition:?}, must be one of {:?}",
                Disposition::ALLOWED
            ),
        )
    })?;

    let notebook =
        Notebook::from_slice(&notebook).map_err(|err| ApiError::from_document(SOURCE, &err))?;

    let result = state
        .pool
        .dispatch(notebook, config)
        .await
        .map_err(|err| ApiError::from_convert(SOURCE, err))?;

    Ok(download_response(result, disposition))
}

async fn read_form(multipart: &mut Multipart) -> Result<RenderForm, ApiError> {
    let mut form = RenderForm::default();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => return Err(multipart_error(err)),
        };
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("notebook") => form.notebook = Some(field.bytes().await.map_err(multipart_error)?),
            Some("exporter") => form.exporter = Some(field.text().await.map_err(multipart_error)?),
            Some("disposition") => {
                form.disposition = Some(field.text().await.map_err(multipart_error)?)
            }
            _ => continue,
        }
    }
    Ok(form)
}

fn multipart_error(err: MultipartError) -> ApiError {
    let status = err.status();
    warn!(
        target = "nbconvert_http::http::render",
        status = status.as_u16(),
        error = %err,
        "failed to read multipart payload"
    );
    ApiError::unreadable_body(SOURCE, status, err.body_text())
}
