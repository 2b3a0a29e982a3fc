//! Tag-driven cell extraction.
//!
//! Cells carrying any configured tag are lifted out of the notebook and their
//! source text is grouped by tag, so templates can render them elsewhere
//! (a bibliography, for instance) instead of inline.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use crate::domain::Notebook;

/// Resource key under which extracted sources are published to the engine.
pub const EXTRACTED_BY_TAG_KEY: &str = "extracted_by_tag";

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    pub notebook: Notebook,
    pub extracted: BTreeMap<String, Vec<String>>,
}

impl ExtractionResult {
    /// Extraction map as a JSON object for the resource bag.
    pub fn extracted_as_resource(&self) -> Value {
        let map: Map<String, Value> = self
            .extracted
            .iter()
            .map(|(tag, sources)| {
                let sources = sources.iter().cloned().map(Value::String).collect();
                (tag.clone(), Value::Array(sources))
            })
            .collect();
        Value::Object(map)
    }
}

/// Remove every cell tagged with one of `tags`, grouping sources by tag.
///
/// A cell carrying several matching tags lands in each of their buckets.
/// Kept cells and bucket contents retain document order.
pub fn extract(notebook: Notebook, tags: &BTreeSet<String>) -> ExtractionResult {
    if tags.is_empty() {
        return ExtractionResult {
            notebook,
            extracted: BTreeMap::new(),
        };
    }

    let Notebook {
        nbformat,
        nbformat_minor,
        metadata,
        cells,
    } = notebook;

    let mut kept = Vec::with_capacity(cells.len());
    let mut extracted: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for cell in cells {
        let matching: BTreeSet<String> = cell
            .tags()
            .filter(|tag| tags.contains(*tag))
            .map(str::to_string)
            .collect();

        if matching.is_empty() {
            kept.push(cell);
            continue;
        }

        for tag in matching {
            extracted
                .entry(tag)
                .or_default()
                .push(cell.source.clone());
        }
    }

    ExtractionResult {
        notebook: Notebook {
            nbformat,
            nbformat_minor,
            metadata,
            cells: kept,
        },
        extracted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Cell;

    fn tags(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|tag| tag.to_string()).collect()
    }

    fn sample() -> Notebook {
        Notebook::new(vec![
            Cell::new("markdown", "intro"),
            Cell::new("raw", "@book{knuth}").with_tags(["bibliography"]),
            Cell::new("code", "x = 1").with_tags(["hidden"]),
            Cell::new("raw", "@article{both}").with_tags(["bibliography", "appendix"]),
            Cell::new("markdown", "outro").with_tags(["Bibliography"]),
        ])
    }

    #[test]
    fn empty_tag_set_is_identity() {
        let notebook = sample();
        let result = extract(notebook.clone(), &BTreeSet::new());
        assert_eq!(result.notebook, notebook);
        assert!(result.extracted.is_empty());
    }

    #[test]
    fn removes_tagged_cell_and_buckets_its_source() {
        let notebook = Notebook::new(vec![
            Cell::new("markdown", "cell one"),
            Cell::new("raw", "cell two").with_tags(["bibliography"]),
        ]);

        let result = extract(notebook, &tags(&["bibliography"]));

        assert_eq!(result.notebook.cells.len(), 1);
        assert_eq!(result.notebook.cells[0].source, "cell one");
        assert_eq!(
            result.extracted.get("bibliography"),
            Some(&vec!["cell two".to_string()])
        );
    }

    #[test]
    fn preserves_order_and_matches_case_sensitively() {
        let result = extract(sample(), &tags(&["bibliography", "hidden"]));

        let kept: Vec<&str> = result
            .notebook
            .cells
            .iter()
            .map(|cell| cell.source.as_str())
            .collect();
        assert_eq!(kept, vec!["intro", "outro"]);
        assert_eq!(
            result.extracted["bibliography"],
            vec!["@book{knuth}".to_string(), "@article{both}".to_string()]
        );
        assert_eq!(result.extracted["hidden"], vec!["x = 1".to_string()]);
    }

    // Multiply-tagged cells are duplicated across buckets rather than
    // deduplicated; this pins that behavior.
    #[test]
    fn multiply_tagged_cells_land_in_every_bucket() {
        let original = sample();
        let wanted = tags(&["bibliography", "appendix"]);
        let result = extract(original.clone(), &wanted);

        assert_eq!(
            result.extracted["appendix"],
            vec!["@article{both}".to_string()]
        );

        let bucketed: usize = result.extracted.values().map(Vec::len).sum();
        assert!(result.notebook.cells.len() + bucketed > original.cells.len());
    }

    #[test]
    fn counts_are_conserved_without_multiple_matches() {
        let original = sample();
        let result = extract(original.clone(), &tags(&["hidden"]));
        let bucketed: usize = result.extracted.values().map(Vec::len).sum();
        assert_eq!(result.notebook.cells.len() + bucketed, original.cells.len());
    }

    #[test]
    fn duplicate_tags_on_one_cell_count_once() {
        let notebook =
            Notebook::new(vec![Cell::new("raw", "ref").with_tags(["bibliography", "bibliography"])]);
        let result = extract(notebook, &tags(&["bibliography"]));
        assert_eq!(result.extracted["bibliography"], vec!["ref".to_string()]);
    }

    #[test]
    fn resource_view_mirrors_buckets() {
        let result = extract(sample(), &tags(&["hidden"]));
        assert_eq!(
            result.extracted_as_resource(),
            serde_json::json!({"hidden": ["x = 1"]})
        );
    }
}
