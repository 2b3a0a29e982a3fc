use thiserror::Error;

use super::notebook::CANONICAL_NBFORMAT;

/// Reasons a client-supplied notebook is rejected before any conversion work.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("document must be a JSON object")]
    NotAnObject,
    #[error("document does not declare an `nbformat` version")]
    MissingVersion,
    #[error("unsupported nbformat version {0}, expected 3 or {CANONICAL_NBFORMAT}")]
    UnsupportedVersion(u64),
    #[error("notebook JSON invalid for version {CANONICAL_NBFORMAT}: {message}")]
    Schema { message: String },
}

impl DocumentError {
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }
}
