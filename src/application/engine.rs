use std::{path::Path, time::Duration, time::Instant};

use bytes::Bytes;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::{ExportFormat, Notebook};

/// Resource key carrying the extension of the produced artifact, dot included.
pub const OUTPUT_EXTENSION_KEY: &str = "output_extension";

/// Everything the engine needs for one render.
#[derive(Debug)]
pub struct EngineRequest<'a> {
    pub notebook: &'a Notebook,
    pub format: ExportFormat,
    pub template: Option<&'a Path>,
    pub options: &'a Map<String, Value>,
    /// Side-channel data produced by preprocessing.
    pub resources: &'a Map<String, Value>,
    /// Instant after which the engine must give up.
    pub deadline: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineOutput {
    pub body: Bytes,
    /// MIME type as the engine sees it, if it reports one.
    pub mime_type: Option<String>,
    pub resources: Map<String, Value>,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine exceeded its deadline after {elapsed:?}")]
    Timeout { elapsed: Duration },
    #[error("engine could not be started: {0}")]
    Unavailable(String),
    #[error("engine failed (exit {exit_code:?}): {message}")]
    Failed {
        exit_code: Option<i32>,
        message: String,
    },
    #[error("engine io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            exit_code: None,
            message: message.into(),
        }
    }
}

/// External document-conversion capability.
///
/// Calls block for as long as the render takes; callers run them on the
/// conversion pool, never on the request-handling threads.
pub trait RenderEngine: Send + Sync {
    fn render(&self, request: EngineRequest<'_>) -> Result<EngineOutput, EngineError>;
}
