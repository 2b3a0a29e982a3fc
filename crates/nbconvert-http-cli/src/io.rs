#![deny(clippy::all, clippy::pedantic)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use nbconvert_http_api_types::{BodyEncoding, ConvertEnvelope};
use serde_json::Value;

use crate::client::CliError;

const OUTPUT_EXTENSION_KEY: &str = "output_extension";

pub fn read_json_file(path: &Path) -> Result<Value, CliError> {
    let data = fs::read(path).map_err(|source| CliError::InputFile {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_slice(&data)
        .map_err(|e| CliError::InvalidInput(format!("{} is not valid JSON: {e}", path.display())))
}

pub fn decode_body(envelope: &ConvertEnvelope) -> Result<Vec<u8>, CliError> {
    match envelope.body_encoding {
        BodyEncoding::Text => Ok(envelope.body.clone().into_bytes()),
        BodyEncoding::Base64 => STANDARD
            .decode(envelope.body.as_bytes())
            .map_err(|e| CliError::Server(format!("invalid base64 body: {e}"))),
    }
}

/// `result<ext>` in the working directory, matching the download endpoint.
///
/// The extension comes from the server, so anything that could leave the
/// working directory is rejected.
pub fn default_output_path(envelope: &ConvertEnvelope) -> Result<PathBuf, CliError> {
    let extension = envelope
        .resources
        .get(OUTPUT_EXTENSION_KEY)
        .and_then(Value::as_str)
        .unwrap_or("");
    if extension.contains(['/', '\\']) || extension.contains("..") {
        return Err(CliError::Server(format!(
            "refusing output extension {extension:?}; pass --output instead"
        )));
    }
    Ok(PathBuf::from(format!("result{extension}")))
}

/// Write `bytes` to `path`, or to stdout when `path` is `-`. Returns where it went.
pub fn write_output(path: &Path, bytes: &[u8]) -> Result<String, CliError> {
    if path == Path::new("-") {
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(bytes)
            .and_then(|()| stdout.flush())
            .map_err(|source| CliError::OutputFile {
                path: "-".to_string(),
                source,
            })?;
        return Ok("stdout".to_string());
    }
    fs::write(path, bytes).map_err(|source| CliError::OutputFile {
        path: path.display().to_string(),
        source,
    })?;
    Ok(path.display().to_string())
}
