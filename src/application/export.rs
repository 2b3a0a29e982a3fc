//! Exporter configuration: turns a requested format name plus optional caller
//! overrides into a typed [`RenderConfig`].
//!
//! Override bags follow the engine's own configuration shape, one object per
//! configurable class (`{"Exporter": {...}, "TagExtractPreprocessor": {...}}`).
//! Sections this service understands are lifted into typed fields; the rest
//! is forwarded to the engine without validation.

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::{ExportFormat, FormatFamily};

use super::templates::TemplateAsset;

pub const BIBLIOGRAPHY_TAG: &str = "bibliography";
pub const TAG_EXTRACT_SECTION: &str = "TagExtractPreprocessor";
const EXTRACT_TAGS_KEY: &str = "extract_cell_tags";
const TEMPLATE_FILE_KEY: &str = "template_file";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid exporter {name:?}, must be one of {allowed:?}")]
    InvalidFormat {
        name: String,
        allowed: Vec<&'static str>,
    },
    #[error("Invalid {field} value {value}, must be {expected}")]
    InvalidType {
        field: String,
        value: String,
        expected: &'static str,
    },
}

impl ConfigError {
    pub fn invalid_format(name: impl Into<String>) -> Self {
        Self::InvalidFormat {
            name: name.into(),
            allowed: ExportFormat::listing(),
        }
    }

    fn invalid_type(field: impl Into<String>, value: &Value, expected: &'static str) -> Self {
        Self::InvalidType {
            field: field.into(),
            value: value.to_string(),
            expected,
        }
    }
}

/// Preprocessing step run locally before the engine sees the notebook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preprocessor {
    TagExtract { tags: BTreeSet<String> },
}

impl Preprocessor {
    pub fn id(&self) -> &'static str {
        match self {
            Preprocessor::TagExtract { .. } => TAG_EXTRACT_SECTION,
        }
    }
}

/// Preprocessing applied when the caller does not say otherwise.
///
/// Each HTTP surface owns one of these, so the defaults for the upload form
/// and the JSON API are set explicitly rather than implied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionDefaults {
    pub extract_tags: BTreeSet<String>,
}

impl ConversionDefaults {
    pub fn none() -> Self {
        Self {
            extract_tags: BTreeSet::new(),
        }
    }
}

impl Default for ConversionDefaults {
    fn default() -> Self {
        Self {
            extract_tags: BTreeSet::from([BIBLIOGRAPHY_TAG.to_string()]),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    pub format: ExportFormat,
    pub template: Option<TemplateAsset>,
    pub preprocessors: Vec<Preprocessor>,
    /// Engine configuration forwarded verbatim.
    pub engine_options: Map<String, Value>,
}

impl RenderConfig {
    /// Build a configuration for `format_name`.
    ///
    /// Fails before any rendering work when the name is not a published
    /// format or the override bag is not an object.
    pub fn build(
        format_name: &str,
        overrides: Option<&Value>,
        defaults: &ConversionDefaults,
    ) -> Result<Self, ConfigError> {
        let format = ExportFormat::selectable(format_name)
            .ok_or_else(|| ConfigError::invalid_format(format_name))?;

        let overrides = match overrides {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(other) => return Err(ConfigError::invalid_type("config", other, "an object")),
        };

        let mut extract_tags = defaults.extract_tags.clone();
        let mut engine_options = Map::new();

        for (section, value) in overrides {
            if section == TAG_EXTRACT_SECTION {
                let Value::Object(mut options) = value else {
                    return Err(ConfigError::invalid_type(
                        format!("config.{TAG_EXTRACT_SECTION}"),
                        &value,
                        "an object",
                    ));
                };
                if let Some(tags) = options.remove(EXTRACT_TAGS_KEY) {
                    extract_tags = parse_tags(&tags)?;
                }
                if !options.is_empty() {
                    engine_options.insert(section, Value::Object(options));
                }
                continue;
            }
            engine_options.insert(section, value);
        }

        let template = match format.family() {
            FormatFamily::Latex => {
                strip_template_overrides(&mut engine_options);
                Some(TemplateAsset::LatexBibliography)
            }
            FormatFamily::Html | FormatFamily::Text | FormatFamily::Notebook => None,
        };

        let mut preprocessors = Vec::new();
        if !extract_tags.is_empty() {
            preprocessors.push(Preprocessor::TagExtract { tags: extract_tags });
        }

        Ok(Self {
            format,
            template,
            preprocessors,
            engine_options,
        })
    }

    pub fn extract_tags(&self) -> Option<&BTreeSet<String>> {
        self.preprocessors.iter().find_map(|step| match step {
            Preprocessor::TagExtract { tags } => Some(tags),
        })
    }
}

fn parse_tags(value: &Value) -> Result<BTreeSet<String>, ConfigError> {
    let field = format!("config.{TAG_EXTRACT_SECTION}.{EXTRACT_TAGS_KEY}");
    let Value::Array(items) = value else {
        return Err(ConfigError::invalid_type(field, value, "a list of strings"));
    };
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| ConfigError::invalid_type(field.clone(), value, "a list of strings"))
        })
        .collect()
}

/// The bibliography template always wins for LaTeX-family formats; drop any
/// caller-supplied template so the engine cannot pick it up from config.
fn strip_template_overrides(options: &mut Map<String, Value>) {
    for section in options.values_mut() {
        if let Value::Object(section) = section {
            section.remove(TEMPLATE_FILE_KEY);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn defaults() -> ConversionDefaults {
        ConversionDefaults::default()
    }

    #[test]
    fn custom_format_is_rejected() {
        let err = RenderConfig::build("custom", None, &defaults()).expect_err("custom");
        assert!(matches!(err, ConfigError::InvalidFormat { ref name, .. } if name == "custom"));
    }

    #[test]
    fn every_published_format_builds() {
        for name in ExportFormat::listing() {
            let config = RenderConfig::build(name, Some(&json!({"Exporter": {}})), &defaults())
                .unwrap_or_else(|err| panic!("{name} should build: {err}"));
            assert_eq!(config.format.name(), name);
        }
    }

    #[test]
    fn latex_family_always_gets_bibliography_template() {
        let overrides = json!({
            "Exporter": {"template_file": "/tmp/mine.tplx", "exclude_input": true},
            "LatexExporter": {"template_file": "other.tplx"}
        });
        for name in ["latex", "pdf"] {
            let config = RenderConfig::build(name, Some(&overrides), &defaults()).expect("config");
            assert_eq!(config.template, Some(TemplateAsset::LatexBibliography));
            assert_eq!(
                config.engine_options["Exporter"],
                json!({"exclude_input": true})
            );
            assert_eq!(config.engine_options["LatexExporter"], json!({}));
        }

        let html = RenderConfig::build("html", Some(&overrides), &defaults()).expect("html");
        assert_eq!(html.template, None);
        assert_eq!(
            html.engine_options["Exporter"]["template_file"],
            json!("/tmp/mine.tplx")
        );
    }

    #[test]
    fn non_object_config_is_invalid_type() {
        let err = RenderConfig::build("html", Some(&json!([1, 2])), &defaults()).expect_err("list");
        assert!(matches!(err, ConfigError::InvalidType { ref field, .. } if field == "config"));
    }

    #[test]
    fn default_extraction_uses_bibliography_tag() {
        let config = RenderConfig::build("html", None, &defaults()).expect("config");
        assert_eq!(
            config.extract_tags(),
            Some(&BTreeSet::from([BIBLIOGRAPHY_TAG.to_string()]))
        );
        assert_eq!(config.preprocessors[0].id(), TAG_EXTRACT_SECTION);
    }

    #[test]
    fn overrides_replace_extraction_tags_and_pass_the_rest_through() {
        let overrides = json!({
            "TagExtractPreprocessor": {"extract_cell_tags": ["refs", "notes"], "enabled": true},
            "HTMLExporter": {"theme": "dark"}
        });
        let config = RenderConfig::build("html", Some(&overrides), &defaults()).expect("config");

        assert_eq!(
            config.extract_tags(),
            Some(&BTreeSet::from(["notes".to_string(), "refs".to_string()]))
        );
        assert_eq!(
            config.engine_options[TAG_EXTRACT_SECTION],
            json!({"enabled": true})
        );
        assert_eq!(config.engine_options["HTMLExporter"], json!({"theme": "dark"}));
    }

    #[test]
    fn empty_tag_list_disables_extraction() {
        let overrides = json!({"TagExtractPreprocessor": {"extract_cell_tags": []}});
        let config = RenderConfig::build("markdown", Some(&overrides), &defaults()).expect("config");
        assert!(config.preprocessors.is_empty());
        assert!(!config.engine_options.contains_key(TAG_EXTRACT_SECTION));
    }

    #[test]
    fn malformed_tag_list_is_rejected() {
        let overrides = json!({"TagExtractPreprocessor": {"extract_cell_tags": "refs"}});
        let err = RenderConfig::build("html", Some(&overrides), &defaults()).expect_err("tags");
        assert!(matches!(err, ConfigError::InvalidType { .. }));
    }

    #[test]
    fn no_defaults_means_no_preprocessing() {
        let config = RenderConfig::build("rst", None, &ConversionDefaults::none()).expect("config");
        assert!(config.preprocessors.is_empty());
    }
}
