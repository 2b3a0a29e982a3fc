//! Response shapes built from a [`ConversionResult`]: a direct download and a
//! JSON envelope.

use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use nbconvert_http_api_types::{BodyEncoding, ConvertEnvelope};

use crate::application::convert::{ConversionResult, RenderedBody};

const RESULT_STEM: &str = "result";
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Inline,
    Attachment,
}

impl Disposition {
    pub const ALLOWED: [&'static str; 2] = ["attachment", "inline"];

    /// Exact, case-sensitive match against the two allowed values.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "inline" => Some(Disposition::Inline),
            "attachment" => Some(Disposition::Attachment),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Disposition::Inline => "inline",
            Disposition::Attachment => "attachment",
        }
    }
}

pub fn result_filename(output_extension: &str) -> String {
    format!("{RESULT_STEM}{output_extension}")
}

/// `Content-Disposition` value for `filename`.
///
/// Plain ASCII names are quoted directly; anything else gets an ASCII
/// fallback plus an RFC 5987 `filename*` parameter.
pub fn content_disposition(disposition: Disposition, filename: &str) -> String {
    let plain = filename
        .chars()
        .all(|ch| (ch.is_ascii_graphic() || ch == ' ') && ch != '"' && ch != '\\');
    if plain {
        return format!("{}; filename=\"{filename}\"", disposition.as_str());
    }

    let fallback: String = filename
        .chars()
        .map(|ch| {
            if (ch.is_ascii_graphic() || ch == ' ') && ch != '"' && ch != '\\' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "{}; filename=\"{fallback}\"; filename*=UTF-8''{}",
        disposition.as_str(),
        urlencoding::encode(filename)
    )
}

/// Artifact as a direct download.
pub fn download_response(result: ConversionResult, disposition: Disposition) -> Response {
    let (body, mime_type, output_extension, _resources) = result.into_parts();
    let bytes = body.into_bytes();
    let length = bytes.len();

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();

    let content_type = HeaderValue::from_str(&mime_type)
        .unwrap_or_else(|_| HeaderValue::from_static(FALLBACK_CONTENT_TYPE));
    headers.insert(header::CONTENT_TYPE, content_type);

    if let Ok(value) = HeaderValue::from_str(&length.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }

    let filename = result_filename(&output_extension);
    if let Ok(value) = HeaderValue::from_str(&content_disposition(disposition, &filename)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    response
}

/// Artifact wrapped for programmatic clients; binary bodies are base64.
pub fn envelope(result: ConversionResult) -> ConvertEnvelope {
    let (body, mime_type, _output_extension, resources) = result.into_parts();
    let (body, body_encoding) = match body {
        RenderedBody::Text(text) => (text, BodyEncoding::Text),
        RenderedBody::Binary(bytes) => (STANDARD.encode(&bytes), BodyEncoding::Base64),
    };
    ConvertEnvelope {
        body,
        body_encoding,
        mime_type,
        resources,
    }
}
