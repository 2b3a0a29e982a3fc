//! Wire types for the nbconvert-http JSON API.
//!
//! Shared by the server and the command-line client so both sides agree on
//! field names and encodings.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body of `POST /api/convert`.
///
/// `notebook` and `exporter` are optional at the type level so that the
/// server can report which field is missing instead of failing to parse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConvertRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notebook: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exporter: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

impl ConvertRequest {
    pub fn new(notebook: Value, exporter: impl Into<String>) -> Self {
        Self {
            notebook: Some(notebook),
            exporter: Some(Value::String(exporter.into())),
            config: None,
        }
    }

    pub fn with_config(mut self, config: Map<String, Value>) -> Self {
        self.config = Some(Value::Object(config));
        self
    }
}

/// How the `body` field of a [`ConvertEnvelope`] is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyEncoding {
    /// UTF-8 text, returned as-is.
    Text,
    /// Binary payload, standard base64 alphabet with padding.
    Base64,
}

/// Successful response of `POST /api/convert`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertEnvelope {
    pub body: String,
    #[serde(rename = "body-encoding")]
    pub body_encoding: BodyEncoding,
    #[serde(rename = "mime-type")]
    pub mime_type: String,
    #[serde(default)]
    pub resources: Map<String, Value>,
}

/// Structured error body modelled on RFC 7807.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemDetails {
    pub status: u16,
    pub title: String,
    pub detail: String,
}

/// Response of `GET /api/formats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatsResponse {
    pub formats: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Unavailable,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub workers: usize,
    pub in_flight: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_uses_hyphenated_field_names() {
        let envelope = ConvertEnvelope {
            body: "aGk=".to_string(),
            body_encoding: BodyEncoding::Base64,
            mime_type: "application/pdf".to_string(),
            resources: Map::new(),
        };

        let value = serde_json::to_value(&envelope).expect("serialize envelope");
        assert_eq!(
            value,
            json!({
                "body": "aGk=",
                "body-encoding": "base64",
                "mime-type": "application/pdf",
                "resources": {}
            })
        );
    }

    #[test]
    fn convert_request_tolerates_missing_fields() {
        let request: ConvertRequest =
            serde_json::from_value(json!({"notebook": {"cells": []}})).expect("parse request");
        assert!(request.notebook.is_some());
        assert!(request.exporter.is_none());
        assert!(request.config.is_none());
    }
}
