//! Rendering-engine adapter backed by the `jupyter nbconvert` executable.
//!
//! Every render gets its own scratch directory holding the input notebook,
//! the generated engine configuration and the output directory. The child
//! process is polled until it exits or the request deadline passes, in
//! which case it is killed.
//!
//! Preprocessing resources reach templates through the input notebook's
//! `metadata.nbconvert_http`. Notebook-to-notebook conversions skip this so
//! the returned document carries no service-internal metadata.

use std::{
    fs::{self, File},
    io::{self, ErrorKind, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use bytes::Bytes;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::{
    application::engine::{
        EngineError, EngineOutput, EngineRequest, OUTPUT_EXTENSION_KEY, RenderEngine,
    },
    domain::FormatFamily,
};

/// Notebook metadata key carrying preprocessing resources into templates.
pub const RESOURCES_METADATA_KEY: &str = "nbconvert_http";
/// Resource key listing auxiliary files written next to the main output.
pub const OUTPUTS_KEY: &str = "outputs";

const OUTPUT_STEM: &str = "result";
const POLL_INTERVAL: Duration = Duration::from_millis(25);
const STDERR_TAIL_BYTES: u64 = 4096;

#[derive(Debug, Clone)]
pub struct NbconvertEngine {
    command: PathBuf,
    args: Vec<String>,
}

impl NbconvertEngine {
    /// `command nbconvert <extra_args...> <notebook> --to <format> ...`
    pub fn new(command: impl Into<PathBuf>, extra_args: Vec<String>) -> Self {
        let mut args = vec!["nbconvert".to_string()];
        args.extend(extra_args);
        Self {
            command: command.into(),
            args,
        }
    }

    fn spawn(&self, workdir: &Path, request: &EngineRequest<'_>) -> Result<Child, EngineError> {
        let source = workdir.join("source.ipynb");
        fs::write(&source, notebook_payload(request)?)?;

        let output_dir = workdir.join("out");
        fs::create_dir_all(&output_dir)?;
        let stderr = File::create(workdir.join("stderr.log"))?;

        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .arg(&source)
            .arg("--to")
            .arg(request.format.name())
            .arg("--output-dir")
            .arg(&output_dir)
            .arg("--output")
            .arg(OUTPUT_STEM);

        if !request.options.is_empty() {
            let config_path = workdir.join("config.json");
            fs::write(
                &config_path,
                serde_json::to_vec(&Value::Object(request.options.clone()))
                    .map_err(|err| EngineError::failed(format!("engine config: {err}")))?,
            )?;
            command.arg(format!("--config={}", config_path.display()));
        }
        if let Some(template) = request.template {
            command.arg(format!(
                "--TemplateExporter.template_file={}",
                template.display()
            ));
        }

        command
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    EngineError::Unavailable(format!("{}: {err}", self.command.display()))
                } else {
                    EngineError::Io(err)
                }
            })
    }
}

impl RenderEngine for NbconvertEngine {
    fn render(&self, request: EngineRequest<'_>) -> Result<EngineOutput, EngineError> {
        let started_at = Instant::now();
        let workdir = tempfile::Builder::new()
            .prefix("nbconvert-http-")
            .tempdir()?;

        let mut child = self.spawn(workdir.path(), &request).inspect_err(|err| {
            warn!(
                target = "nbconvert_http::engine",
                op = "nbconvert::spawn",
                format = %request.format,
                error = %err,
                "failed to start conversion engine"
            );
        })?;

        let status = match wait_until(&mut child, request.deadline)? {
            Some(status) => status,
            None => {
                let elapsed = started_at.elapsed();
                warn!(
                    target = "nbconvert_http::engine",
                    op = "nbconvert::render",
                    result = "timeout",
                    format = %request.format,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "conversion engine killed at deadline"
                );
                return Err(EngineError::Timeout { elapsed });
            }
        };

        if !status.success() {
            let stderr = read_stderr_tail(&workdir.path().join("stderr.log"));
            let exit_code = status.code();
            warn!(
                target = "nbconvert_http::engine",
                op = "nbconvert::render",
                result = "error",
                format = %request.format,
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                stderr = %stderr,
                "conversion engine failed"
            );
            return Err(EngineError::Failed {
                exit_code,
                message: stderr,
            });
        }

        let output_dir = workdir.path().join("out");
        let (primary, auxiliary) = collect_outputs(&output_dir)?;
        let Some(primary) = primary else {
            return Err(EngineError::failed(format!(
                "engine exited successfully but wrote no `{OUTPUT_STEM}.*` file"
            )));
        };

        let body = Bytes::from(fs::read(&primary)?);
        let mime_type = request
            .format
            .declared_mime_type()
            .or_else(|| mime_guess::from_path(&primary).first_raw())
            .map(str::to_string);

        let mut resources = Map::new();
        if let Some(extension) = output_extension(&primary) {
            resources.insert(OUTPUT_EXTENSION_KEY.to_string(), Value::String(extension));
        }
        if !auxiliary.is_empty() {
            resources.insert(
                OUTPUTS_KEY.to_string(),
                Value::Array(auxiliary.into_iter().map(Value::String).collect()),
            );
        }

        info!(
            target = "nbconvert_http::engine",
            op = "nbconvert::render",
            result = "ok",
            format = %request.format,
            body_bytes = body.len(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "conversion engine finished"
        );

        Ok(EngineOutput {
            body,
            mime_type,
            resources,
        })
    }
}

/// Serialized notebook with preprocessing resources in its metadata.
fn notebook_payload(request: &EngineRequest<'_>) -> Result<Vec<u8>, EngineError> {
    let mut value = request
        .notebook
        .to_value()
        .map_err(|err| EngineError::failed(format!("notebook serialization: {err}")))?;
    if !request.resources.is_empty()
        && request.format.family() != FormatFamily::Notebook
        && let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut)
    {
        metadata.insert(
            RESOURCES_METADATA_KEY.to_string(),
            Value::Object(request.resources.clone()),
        );
    }
    serde_json::to_vec(&value)
        .map_err(|err| EngineError::failed(format!("notebook serialization: {err}")))
}

/// `Ok(None)` means the deadline passed and the child was killed.
fn wait_until(child: &mut Child, deadline: Instant) -> Result<Option<ExitStatus>, EngineError> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            if let Err(err) = child.kill()
                && err.kind() != ErrorKind::InvalidInput
            {
                return Err(EngineError::Io(err));
            }
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

fn read_stderr_tail(path: &Path) -> String {
    let read = || -> io::Result<String> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        file.seek(SeekFrom::Start(len.saturating_sub(STDERR_TAIL_BYTES)))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).trim().to_string())
    };
    match read() {
        Ok(text) if !text.is_empty() => text,
        Ok(_) => "engine exited without diagnostics".to_string(),
        Err(err) => format!("engine stderr unavailable: {err}"),
    }
}

/// Main output file plus auxiliary files (relative paths, sorted).
fn collect_outputs(dir: &Path) -> Result<(Option<PathBuf>, Vec<String>), EngineError> {
    let mut primary = None;
    let mut auxiliary = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        for entry in fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                pending.push(path);
                continue;
            }
            let is_primary = current == dir
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(&format!("{OUTPUT_STEM}.")));
            if is_primary && primary.is_none() {
                primary = Some(path);
            } else if let Ok(relative) = path.strip_prefix(dir) {
                auxiliary.push(relative.to_string_lossy().into_owned());
            }
        }
    }

    auxiliary.sort();
    Ok((primary, auxiliary))
}

/// Everything after the output stem, dot included (`.slides.html`).
fn output_extension(primary: &Path) -> Option<String> {
    primary
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_prefix(OUTPUT_STEM))
        .filter(|ext| !ext.is_empty())
        .map(str::to_string)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::domain::{Cell, ExportFormat, Notebook};
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn make_executable(path: &Path) {
        let mut perms = fs::metadata(path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).expect("set perms");
    }

    fn fake_engine(dir: &TempDir, body: &str) -> NbconvertEngine {
        let script_path = dir.path().join("fake-jupyter");
        fs::write(&script_path, body).expect("write script");
        make_executable(&script_path);
        NbconvertEngine::new(script_path, Vec::new())
    }

    fn request<'a>(
        notebook: &'a Notebook,
        format: ExportFormat,
        template: Option<&'a Path>,
        options: &'a Map<String, Value>,
        resources: &'a Map<String, Value>,
        budget: Duration,
    ) -> EngineRequest<'a> {
        EngineRequest {
            notebook,
            format,
            template,
            options,
            resources,
            deadline: Instant::now() + budget,
        }
    }

    #[test]
    fn renders_through_the_cli_and_reports_outputs() {
        let dir = TempDir::new().expect("temp dir");
        let args_path = dir.path().join("args.log");
        let seen_path = dir.path().join("seen.ipynb");
        let script = format!(
            r#"#!/bin/sh
set -eu
echo "$@" > "{args_file}"
outdir=""
stem=""
while [ "$#" -gt 0 ]; do
  case "$1" in
    --output-dir) shift; outdir="$1" ;;
    --output) shift; stem="$1" ;;
    *.ipynb) cp "$1" "{seen_file}" ;;
  esac
  shift
done
mkdir -p "$outdir/${{stem}}_files"
printf '<h1>ok</h1>' > "$outdir/$stem.html"
printf 'png' > "$outdir/${{stem}}_files/figure.png"
"#,
            args_file = args_path.display(),
            seen_file = seen_path.display()
        );
        let engine = fake_engine(&dir, &script);

        let notebook = Notebook::new(vec![Cell::new("markdown", "hello")]);
        let mut options = Map::new();
        options.insert("HTMLExporter".to_string(), serde_json::json!({"theme": "dark"}));
        let mut resources = Map::new();
        resources.insert(
            "extracted_by_tag".to_string(),
            serde_json::json!({"bibliography": ["@book{x}"]}),
        );

        let output = engine
            .render(request(
                &notebook,
                ExportFormat::Html,
                None,
                &options,
                &resources,
                Duration::from_secs(10),
            ))
            .expect("render");

        assert_eq!(output.body, Bytes::from_static(b"<h1>ok</h1>"));
        assert_eq!(output.mime_type.as_deref(), Some("text/html"));
        assert_eq!(output.resources[OUTPUT_EXTENSION_KEY], ".html");
        assert_eq!(
            output.resources[OUTPUTS_KEY],
            serde_json::json!(["result_files/figure.png"])
        );

        let args = fs::read_to_string(&args_path).expect("args");
        assert!(args.starts_with("nbconvert "), "args: {args}");
        assert!(args.contains("--to html"), "args: {args}");
        assert!(args.contains("--config="), "args: {args}");
        assert!(!args.contains("template_file"), "args: {args}");

        let seen: Value =
            serde_json::from_slice(&fs::read(&seen_path).expect("seen")).expect("json");
        assert_eq!(
            seen["metadata"][RESOURCES_METADATA_KEY]["extracted_by_tag"]["bibliography"][0],
            "@book{x}"
        );
    }

    #[test]
    fn notebook_output_carries_no_service_metadata() {
        let dir = TempDir::new().expect("temp dir");
        let script = r#"#!/bin/sh
set -eu
outdir=""
stem=""
source=""
while [ "$#" -gt 0 ]; do
  case "$1" in
    --output-dir) shift; outdir="$1" ;;
    --output) shift; stem="$1" ;;
    *.ipynb) source="$1" ;;
  esac
  shift
done
cp "$source" "$outdir/$stem.ipynb"
"#;
        let engine = fake_engine(&dir, script);

        let notebook = Notebook::new(vec![Cell::new("markdown", "hello")]);
        let options = Map::new();
        let mut resources = Map::new();
        resources.insert(
            "extracted_by_tag".to_string(),
            serde_json::json!({"bibliography": ["@book{x}"]}),
        );

        let output = engine
            .render(request(
                &notebook,
                ExportFormat::Notebook,
                None,
                &options,
                &resources,
                Duration::from_secs(10),
            ))
            .expect("render");

        assert_eq!(output.mime_type.as_deref(), Some("application/json"));
        assert_eq!(output.resources[OUTPUT_EXTENSION_KEY], ".ipynb");
        let returned: Value = serde_json::from_slice(&output.body).expect("json");
        assert!(returned["metadata"].get(RESOURCES_METADATA_KEY).is_none());
        assert_eq!(returned["cells"][0]["source"], "hello");
    }

    #[test]
    fn passes_template_path() {
        let dir = TempDir::new().expect("temp dir");
        let args_path = dir.path().join("args.log");
        let script = format!(
            r#"#!/bin/sh
echo "$@" > "{args_file}"
while [ "$#" -gt 0 ]; do
  case "$1" in
    --output-dir) shift; outdir="$1" ;;
  esac
  shift
done
printf '%%PDF' > "$outdir/result.pdf"
"#,
            args_file = args_path.display()
        );
        let engine = fake_engine(&dir, &script);
        let template = dir.path().join("bib.tplx");
        fs::write(&template, "tplx").expect("template");

        let notebook = Notebook::new(Vec::new());
        let empty = Map::new();
        let output = engine
            .render(request(
                &notebook,
                ExportFormat::Pdf,
                Some(&template),
                &empty,
                &empty,
                Duration::from_secs(10),
            ))
            .expect("render");

        assert_eq!(output.mime_type.as_deref(), Some("application/pdf"));
        let args = fs::read_to_string(&args_path).expect("args");
        assert!(
            args.contains(&format!(
                "--TemplateExporter.template_file={}",
                template.display()
            )),
            "args: {args}"
        );
        assert!(!args.contains("--config="), "args: {args}");
    }

    #[test]
    fn surfaces_cli_errors() {
        let dir = TempDir::new().expect("temp dir");
        let engine = fake_engine(
            &dir,
            r#"#!/bin/sh
echo "xelatex not found" >&2
exit 42
"#,
        );
        let notebook = Notebook::new(Vec::new());
        let empty = Map::new();
        let err = engine
            .render(request(
                &notebook,
                ExportFormat::Pdf,
                None,
                &empty,
                &empty,
                Duration::from_secs(10),
            ))
            .expect_err("cli failure");
        match err {
            EngineError::Failed { exit_code, message } => {
                assert_eq!(exit_code, Some(42));
                assert!(message.contains("xelatex not found"), "message: {message}");
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[test]
    fn kills_the_engine_at_the_deadline() {
        let dir = TempDir::new().expect("temp dir");
        let engine = fake_engine(&dir, "#!/bin/sh\nsleep 10\n");
        let notebook = Notebook::new(Vec::new());
        let empty = Map::new();

        let started = Instant::now();
        let err = engine
            .render(request(
                &notebook,
                ExportFormat::Html,
                None,
                &empty,
                &empty,
                Duration::from_millis(200),
            ))
            .expect_err("timeout");
        assert!(matches!(err, EngineError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn missing_executable_is_unavailable() {
        let engine = NbconvertEngine::new("/nonexistent/jupyter", Vec::new());
        let notebook = Notebook::new(Vec::new());
        let empty = Map::new();
        let err = engine
            .render(request(
                &notebook,
                ExportFormat::Html,
                None,
                &empty,
                &empty,
                Duration::from_secs(1),
            ))
            .expect_err("missing binary");
        assert!(matches!(err, EngineError::Unavailable(_)));
    }

    #[test]
    fn silent_success_without_output_is_a_failure() {
        let dir = TempDir::new().expect("temp dir");
        let engine = fake_engine(&dir, "#!/bin/sh\nexit 0\n");
        let notebook = Notebook::new(Vec::new());
        let empty = Map::new();
        let err = engine
            .render(request(
                &notebook,
                ExportFormat::Markdown,
                None,
                &empty,
                &empty,
                Duration::from_secs(10),
            ))
            .expect_err("no output");
        assert!(matches!(err, EngineError::Failed { .. }));
    }

    #[test]
    fn output_extension_keeps_compound_suffixes() {
        assert_eq!(
            output_extension(Path::new("/tmp/out/result.slides.html")).as_deref(),
            Some(".slides.html")
        );
        assert_eq!(output_extension(Path::new("/tmp/out/result")), None);
    }
}
