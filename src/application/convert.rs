//! Conversion orchestrator.
//!
//! Runs synchronously on a pool worker. Preprocesses the notebook, calls the
//! engine and normalizes the outcome into a [`ConversionResult`]. Nothing here
//! retries.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::{ExportFormat, Notebook};

use super::{
    engine::{EngineError, EngineRequest, OUTPUT_EXTENSION_KEY, RenderEngine},
    export::{ConfigError, ConversionDefaults, Preprocessor, RenderConfig},
    extract::{EXTRACTED_BY_TAG_KEY, extract},
    templates::{TemplateHandle, TemplateStore},
};

const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("conversion failed: {0}")]
    RenderFailed(String),
    #[error("conversion exceeded the {limit:?} render limit")]
    Timeout { limit: Duration },
    #[error("conversion pool unavailable: {0}")]
    PoolUnavailable(String),
    #[error("template asset unavailable: {0}")]
    Template(#[source] std::io::Error),
}

impl ConvertError {
    /// Short label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ConvertError::Config(_) => "config",
            ConvertError::RenderFailed(_) => "render_failed",
            ConvertError::Timeout { .. } => "timeout",
            ConvertError::PoolUnavailable(_) => "pool_unavailable",
            ConvertError::Template(_) => "template",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderedBody {
    Text(String),
    Binary(Bytes),
}

impl RenderedBody {
    pub fn len(&self) -> usize {
        match self {
            RenderedBody::Text(text) => text.len(),
            RenderedBody::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            RenderedBody::Text(text) => Bytes::from(text),
            RenderedBody::Binary(bytes) => bytes,
        }
    }
}

/// Normalized outcome of one conversion. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionResult {
    body: RenderedBody,
    mime_type: String,
    output_extension: String,
    resources: Map<String, Value>,
}

impl ConversionResult {
    pub fn body(&self) -> &RenderedBody {
        &self.body
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn output_extension(&self) -> &str {
        &self.output_extension
    }

    pub fn resources(&self) -> &Map<String, Value> {
        &self.resources
    }

    pub fn into_parts(self) -> (RenderedBody, String, String, Map<String, Value>) {
        (
            self.body,
            self.mime_type,
            self.output_extension,
            self.resources,
        )
    }
}

pub struct Converter {
    engine: Arc<dyn RenderEngine>,
    templates: TemplateStore,
    render_timeout: Duration,
}

impl Converter {
    pub fn new(
        engine: Arc<dyn RenderEngine>,
        templates: TemplateStore,
        render_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            templates,
            render_timeout,
        }
    }

    pub fn render_timeout(&self) -> Duration {
        self.render_timeout
    }

    /// Build the configuration for `format_name` and convert.
    pub fn convert(
        &self,
        notebook: Notebook,
        format_name: &str,
        overrides: Option<&Value>,
        defaults: &ConversionDefaults,
    ) -> Result<ConversionResult, ConvertError> {
        let config = RenderConfig::build(format_name, overrides, defaults)?;
        self.convert_with(notebook, config)
    }

    /// Convert using an already-validated configuration.
    pub fn convert_with(
        &self,
        notebook: Notebook,
        config: RenderConfig,
    ) -> Result<ConversionResult, ConvertError> {
        let started_at = Instant::now();
        let deadline = started_at + self.render_timeout;
        let format = config.format;

        let (notebook, mut resources) = preprocess(notebook, &config.preprocessors);

        let template: Option<TemplateHandle> = config
            .template
            .map(|asset| self.templates.acquire(asset))
            .transpose()
            .map_err(ConvertError::Template)?;

        let output = self
            .engine
            .render(EngineRequest {
                notebook: &notebook,
                format,
                template: template.as_ref().map(TemplateHandle::path),
                options: &config.engine_options,
                resources: &resources,
                deadline,
            })
            .map_err(|err| {
                warn!(
                    target = "nbconvert_http::convert",
                    format = %format,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error = %err,
                    "engine render failed"
                );
                match err {
                    EngineError::Timeout { .. } => ConvertError::Timeout {
                        limit: self.render_timeout,
                    },
                    other => ConvertError::RenderFailed(other.to_string()),
                }
            })?;
        drop(template);

        let mime_type = derive_mime_type(format, output.mime_type.as_deref());
        let output_extension = derive_extension(format, &output.resources);
        resources.extend(output.resources);
        resources.insert(
            OUTPUT_EXTENSION_KEY.to_string(),
            Value::String(output_extension.clone()),
        );
        let body = shape_body(format, output.body);

        info!(
            target = "nbconvert_http::convert",
            format = %format,
            mime_type = %mime_type,
            output_extension = %output_extension,
            body_bytes = body.len(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "notebook converted"
        );

        Ok(ConversionResult {
            body,
            mime_type,
            output_extension,
            resources,
        })
    }
}

fn preprocess(notebook: Notebook, steps: &[Preprocessor]) -> (Notebook, Map<String, Value>) {
    let mut resources = Map::new();
    let mut notebook = notebook;
    for step in steps {
        match step {
            Preprocessor::TagExtract { tags } => {
                let result = extract(notebook, tags);
                resources.insert(
                    EXTRACTED_BY_TAG_KEY.to_string(),
                    result.extracted_as_resource(),
                );
                notebook = result.notebook;
            }
        }
    }
    (notebook, resources)
}

fn derive_mime_type(format: ExportFormat, reported: Option<&str>) -> String {
    format
        .mime_override()
        .or(reported.filter(|mime| !mime.trim().is_empty()))
        .or(format.declared_mime_type())
        .unwrap_or(FALLBACK_MIME_TYPE)
        .to_string()
}

fn derive_extension(format: ExportFormat, resources: &Map<String, Value>) -> String {
    match resources
        .get(OUTPUT_EXTENSION_KEY)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|ext| !ext.is_empty())
    {
        Some(ext) if ext.starts_with('.') => ext.to_string(),
        Some(ext) => format!(".{ext}"),
        None => format.default_extension().to_string(),
    }
}

fn shape_body(format: ExportFormat, bytes: Bytes) -> RenderedBody {
    if format.is_binary() {
        return RenderedBody::Binary(bytes);
    }
    match std::str::from_utf8(&bytes) {
        Ok(text) => RenderedBody::Text(text.to_owned()),
        Err(_) => RenderedBody::Binary(bytes),
    }
}
