//! In-memory notebook model.
//!
//! Only the parts the conversion pipeline inspects are typed: cell kind,
//! source text and metadata. Everything else (outputs, execution counts,
//! attachments, cell ids) rides along untouched in `extra` so the engine
//! sees the document the client sent.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::error::DocumentError;

/// The only schema version the pipeline operates on.
pub const CANONICAL_NBFORMAT: u64 = 4;
const UPGRADED_NBFORMAT_MINOR: u64 = 0;
const CELL_KINDS: [&str; 3] = ["code", "markdown", "raw"];

/// Top-level mime bundle keys used by nbformat 3 outputs.
const V3_MIME_KEYS: [(&str, &str); 8] = [
    ("text", "text/plain"),
    ("html", "text/html"),
    ("svg", "image/svg+xml"),
    ("png", "image/png"),
    ("jpeg", "image/jpeg"),
    ("latex", "text/latex"),
    ("json", "application/json"),
    ("javascript", "application/javascript"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    pub nbformat: u64,
    #[serde(default)]
    pub nbformat_minor: u64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub cells: Vec<Cell>,
}

impl Notebook {
    pub fn new(cells: Vec<Cell>) -> Self {
        Self {
            nbformat: CANONICAL_NBFORMAT,
            nbformat_minor: UPGRADED_NBFORMAT_MINOR,
            metadata: Map::new(),
            cells,
        }
    }

    /// Parse raw bytes (an uploaded `.ipynb` file) into a validated notebook.
    pub fn from_slice(raw: &[u8]) -> Result<Self, DocumentError> {
        let value: Value = serde_json::from_slice(raw)?;
        Self::from_value(value)
    }

    /// Normalize a JSON document to nbformat 4 and validate it.
    pub fn from_value(value: Value) -> Result<Self, DocumentError> {
        let Value::Object(mut root) = value else {
            return Err(DocumentError::NotAnObject);
        };

        let version = root
            .get("nbformat")
            .and_then(Value::as_u64)
            .ok_or(DocumentError::MissingVersion)?;
        match version {
            CANONICAL_NBFORMAT => {}
            3 => upgrade_v3(&mut root)?,
            other => return Err(DocumentError::UnsupportedVersion(other)),
        }

        let notebook: Notebook = serde_json::from_value(Value::Object(root))
            .map_err(|err| DocumentError::schema(err.to_string()))?;
        notebook.validate()?;
        Ok(notebook)
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    fn validate(&self) -> Result<(), DocumentError> {
        for (index, cell) in self.cells.iter().enumerate() {
            if !CELL_KINDS.contains(&cell.cell_type.as_str()) {
                return Err(DocumentError::schema(format!(
                    "cell {index} has unknown cell_type `{}`",
                    cell.cell_type.as_str()
                )));
            }
            if let Some(tags) = cell.metadata.get("tags") {
                let well_formed = tags
                    .as_array()
                    .is_some_and(|tags| tags.iter().all(Value::is_string));
                if !well_formed {
                    return Err(DocumentError::schema(format!(
                        "cell {index} metadata.tags must be a list of strings"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Cell kind as declared by the document schema. Treated as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellKind(String);

impl CellKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub cell_type: CellKind,
    #[serde(deserialize_with = "deserialize_multiline")]
    pub source: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Cell {
    pub fn new(kind: &str, source: impl Into<String>) -> Self {
        Self {
            cell_type: CellKind::new(kind),
            source: source.into(),
            metadata: Map::new(),
            extra: Map::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags = tags
            .into_iter()
            .map(|tag| Value::String(tag.into()))
            .collect();
        self.metadata.insert("tags".to_string(), Value::Array(tags));
        self
    }

    /// Tags from `metadata.tags`. Case-sensitive, in declaration order.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.metadata
            .get("tags")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Multiline {
    Text(String),
    Lines(Vec<String>),
}

fn deserialize_multiline<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Multiline::deserialize(deserializer)? {
        Multiline::Text(text) => text,
        Multiline::Lines(lines) => lines.concat(),
    })
}

fn join_source(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Array(lines) => lines
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .concat(),
        _ => String::new(),
    }
}

fn upgrade_v3(root: &mut Map<String, Value>) -> Result<(), DocumentError> {
    let worksheets = match root.remove("worksheets") {
        Some(Value::Array(worksheets)) => worksheets,
        None => Vec::new(),
        Some(_) => return Err(DocumentError::schema("`worksheets` must be a list")),
    };

    let mut cells = Vec::new();
    for worksheet in worksheets {
        let Value::Object(mut worksheet) = worksheet else {
            return Err(DocumentError::schema("worksheet must be an object"));
        };
        match worksheet.remove("cells") {
            Some(Value::Array(worksheet_cells)) => {
                for cell in worksheet_cells {
                    cells.push(upgrade_v3_cell(cell)?);
                }
            }
            None => {}
            Some(_) => return Err(DocumentError::schema("worksheet cells must be a list")),
        }
    }

    root.insert("cells".to_string(), Value::Array(cells));
    root.insert("nbformat".to_string(), CANONICAL_NBFORMAT.into());
    root.insert("nbformat_minor".to_string(), UPGRADED_NBFORMAT_MINOR.into());
    if let Some(Value::Object(metadata)) = root.get_mut("metadata") {
        metadata.remove("name");
    }
    Ok(())
}

fn upgrade_v3_cell(cell: Value) -> Result<Value, DocumentError> {
    let Value::Object(mut cell) = cell else {
        return Err(DocumentError::schema("cell must be an object"));
    };

    let kind = cell
        .get("cell_type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match kind.as_str() {
        "code" => {
            let input = cell
                .remove("input")
                .map(join_source)
                .unwrap_or_default();
            cell.insert("source".to_string(), Value::String(input));
            let count = cell.remove("prompt_number").unwrap_or(Value::Null);
            cell.insert("execution_count".to_string(), count);
            cell.remove("language");
            if let Some(collapsed) = cell.remove("collapsed") {
                let metadata = cell
                    .entry("metadata")
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(metadata) = metadata {
                    metadata.insert("collapsed".to_string(), collapsed);
                }
            }
            let outputs = match cell.remove("outputs") {
                Some(Value::Array(outputs)) => outputs.into_iter().map(upgrade_v3_output).collect(),
                _ => Vec::new(),
            };
            cell.insert("outputs".to_string(), Value::Array(outputs));
        }
        "heading" => {
            let level = cell
                .remove("level")
                .and_then(|level| level.as_u64())
                .unwrap_or(1)
                .clamp(1, 6) as usize;
            let text = cell.remove("source").map(join_source).unwrap_or_default();
            let heading = format!("{} {}", "#".repeat(level), text.replace('\n', " "));
            cell.insert("cell_type".to_string(), Value::from("markdown"));
            cell.insert("source".to_string(), Value::String(heading));
        }
        "html" => {
            cell.insert("cell_type".to_string(), Value::from("markdown"));
        }
        _ => {}
    }

    Ok(Value::Object(cell))
}

fn upgrade_v3_output(output: Value) -> Value {
    let Value::Object(mut output) = output else {
        return output;
    };

    let kind = output
        .get("output_type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match kind.as_str() {
        "pyout" | "display_data" => {
            if kind == "pyout" {
                output.insert("output_type".to_string(), Value::from("execute_result"));
                let count = output.remove("prompt_number").unwrap_or(Value::Null);
                output.insert("execution_count".to_string(), count);
            }
            let mut data = Map::new();
            for (key, mime) in V3_MIME_KEYS {
                if let Some(value) = output.remove(key) {
                    data.insert(mime.to_string(), value);
                }
            }
            output.insert("data".to_string(), Value::Object(data));
            output
                .entry("metadata")
                .or_insert_with(|| Value::Object(Map::new()));
        }
        "pyerr" => {
            output.insert("output_type".to_string(), Value::from("error"));
        }
        "stream" => {
            if let Some(name) = output.remove("stream") {
                output.insert("name".to_string(), name);
            }
        }
        _ => {}
    }

    Value::Object(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_v4_and_joins_multiline_sources() {
        let raw = json!({
            "nbformat": 4,
            "nbformat_minor": 5,
            "metadata": {},
            "cells": [
                {
                    "cell_type": "markdown",
                    "id": "a1",
                    "source": ["# Title\n", "body"],
                    "metadata": {"tags": ["intro"]}
                },
                {
                    "cell_type": "code",
                    "source": "x = 1",
                    "metadata": {},
                    "outputs": [],
                    "execution_count": null
                }
            ]
        });

        let notebook = Notebook::from_value(raw).expect("valid notebook");
        assert_eq!(notebook.cells.len(), 2);
        assert_eq!(notebook.cells[0].source, "# Title\nbody");
        assert_eq!(notebook.cells[0].tags().collect::<Vec<_>>(), vec!["intro"]);
        assert_eq!(notebook.cells[0].extra.get("id"), Some(&json!("a1")));
        assert!(notebook.cells[1].extra.contains_key("outputs"));
    }

    #[test]
    fn upgrades_v3_worksheets() {
        let raw = json!({
            "nbformat": 3,
            "nbformat_minor": 0,
            "metadata": {"name": "legacy"},
            "worksheets": [{
                "cells": [
                    {"cell_type": "heading", "level": 2, "source": "Results", "metadata": {}},
                    {
                        "cell_type": "code",
                        "language": "python",
                        "input": ["print(1)\n", "2"],
                        "prompt_number": 3,
                        "collapsed": false,
                        "metadata": {},
                        "outputs": [
                            {"output_type": "stream", "stream": "stdout", "text": "1\n"},
                            {"output_type": "pyout", "prompt_number": 3, "text": "2", "metadata": {}}
                        ]
                    }
                ]
            }]
        });

        let notebook = Notebook::from_value(raw).expect("upgraded notebook");
        assert_eq!(notebook.nbformat, CANONICAL_NBFORMAT);
        assert!(!notebook.metadata.contains_key("name"));

        let heading = &notebook.cells[0];
        assert_eq!(heading.cell_type.as_str(), "markdown");
        assert_eq!(heading.source, "## Results");

        let code = &notebook.cells[1];
        assert_eq!(code.source, "print(1)\n2");
        assert_eq!(code.extra.get("execution_count"), Some(&json!(3)));
        assert_eq!(code.metadata.get("collapsed"), Some(&json!(false)));
        let outputs = code.extra["outputs"].as_array().expect("outputs");
        assert_eq!(outputs[0]["name"], json!("stdout"));
        assert_eq!(outputs[1]["output_type"], json!("execute_result"));
        assert_eq!(outputs[1]["data"]["text/plain"], json!("2"));
    }

    #[test]
    fn rejects_unknown_versions() {
        let err = Notebook::from_value(json!({"nbformat": 5, "cells": []}))
            .expect_err("version 5 is unsupported");
        assert!(matches!(err, DocumentError::UnsupportedVersion(5)));

        let err = Notebook::from_value(json!({"cells": []})).expect_err("missing version");
        assert!(matches!(err, DocumentError::MissingVersion));

        let err = Notebook::from_value(json!([1, 2])).expect_err("not an object");
        assert!(matches!(err, DocumentError::NotAnObject));
    }

    #[test]
    fn rejects_schema_violations() {
        let err = Notebook::from_value(json!({
            "nbformat": 4,
            "cells": [{"cell_type": "widget", "source": "", "metadata": {}}]
        }))
        .expect_err("unknown cell kind");
        assert!(matches!(err, DocumentError::Schema { .. }));

        let err = Notebook::from_value(json!({
            "nbformat": 4,
            "cells": [{"cell_type": "raw", "metadata": {}}]
        }))
        .expect_err("missing source");
        assert!(matches!(err, DocumentError::Schema { .. }));

        let err = Notebook::from_value(json!({
            "nbformat": 4,
            "cells": [{"cell_type": "raw", "source": "", "metadata": {"tags": "bibliography"}}]
        }))
        .expect_err("tags must be a list");
        assert!(matches!(err, DocumentError::Schema { .. }));
    }

    #[test]
    fn from_slice_reports_invalid_json() {
        let err = Notebook::from_slice(b"{not json").expect_err("invalid json");
        assert!(matches!(err, DocumentError::Json(_)));
    }
}
