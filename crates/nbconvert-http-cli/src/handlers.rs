#![deny(clippy::all, clippy::pedantic)]

use nbconvert_http_api_types::{
    ConvertEnvelope, ConvertRequest, FormatsResponse, HealthResponse,
};
use serde_json::Value;

use crate::args::ConvertArgs;
use crate::client::{CliError, Ctx};
use crate::io::{decode_body, default_output_path, read_json_file, write_output};
use crate::print::print_json;

pub async fn convert(ctx: &Ctx, args: ConvertArgs) -> Result<(), CliError> {
    let notebook = read_json_file(&args.notebook)?;
    let mut request = ConvertRequest::new(notebook, args.exporter);
    if let Some(path) = args.config.as_deref() {
        match read_json_file(path)? {
            Value::Object(config) => request = request.with_config(config),
            _ => {
                return Err(CliError::InvalidInput(format!(
                    "{} must contain a JSON object",
                    path.display()
                )));
            }
        }
    }

    let envelope: ConvertEnvelope = ctx.post_json("/api/convert", &request).await?;
    if args.envelope {
        return print_json(&envelope);
    }

    let bytes = decode_body(&envelope)?;
    let path = match args.output {
        Some(path) => path,
        None => default_output_path(&envelope)?,
    };
    let destination = write_output(&path, &bytes)?;
    if destination != "stdout" {
        eprintln!(
            "wrote {} bytes ({}) to {destination}",
            bytes.len(),
            envelope.mime_type
        );
    }
    Ok(())
}

pub async fn formats(ctx: &Ctx) -> Result<(), CliError> {
    let response: FormatsResponse = ctx.get("/api/formats").await?;
    for format in response.formats {
        println!("{format}");
    }
    Ok(())
}

pub async fn health(ctx: &Ctx) -> Result<(), CliError> {
    let response: HealthResponse = ctx.get("/health").await?;
    print_json(&response)
}
