//! Registry of output formats understood by the conversion engine.

use std::fmt;

/// Output format identifier.
///
/// The set is closed. [`ExportFormat::Custom`] exists because the engine
/// registers it, but it is never selectable from outside the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExportFormat {
    Asciidoc,
    Custom,
    Html,
    Latex,
    Markdown,
    Notebook,
    Pdf,
    Python,
    Qtpdf,
    Qtpng,
    Rst,
    Script,
    Slides,
    Webpdf,
}

/// Exporter family, resolved once while building a render configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatFamily {
    /// Formats produced through LaTeX; these get the bibliography template.
    Latex,
    Html,
    Text,
    Notebook,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 14] = [
        ExportFormat::Asciidoc,
        ExportFormat::Custom,
        ExportFormat::Html,
        ExportFormat::Latex,
        ExportFormat::Markdown,
        ExportFormat::Notebook,
        ExportFormat::Pdf,
        ExportFormat::Python,
        ExportFormat::Qtpdf,
        ExportFormat::Qtpng,
        ExportFormat::Rst,
        ExportFormat::Script,
        ExportFormat::Slides,
        ExportFormat::Webpdf,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ExportFormat::Asciidoc => "asciidoc",
            ExportFormat::Custom => "custom",
            ExportFormat::Html => "html",
            ExportFormat::Latex => "latex",
            ExportFormat::Markdown => "markdown",
            ExportFormat::Notebook => "notebook",
            ExportFormat::Pdf => "pdf",
            ExportFormat::Python => "python",
            ExportFormat::Qtpdf => "qtpdf",
            ExportFormat::Qtpng => "qtpng",
            ExportFormat::Rst => "rst",
            ExportFormat::Script => "script",
            ExportFormat::Slides => "slides",
            ExportFormat::Webpdf => "webpdf",
        }
    }

    /// Resolve a client-supplied name. Internal-only formats resolve to `None`.
    pub fn selectable(name: &str) -> Option<Self> {
        Self::published().find(|format| format.name() == name)
    }

    /// Formats clients may request, in registry order.
    pub fn published() -> impl Iterator<Item = ExportFormat> {
        Self::ALL.into_iter().filter(|format| !format.is_internal())
    }

    /// Published format names with `pdf` first, the rest alphabetical.
    pub fn listing() -> Vec<&'static str> {
        let mut names: Vec<&'static str> = Self::published()
            .filter(|format| *format != ExportFormat::Pdf)
            .map(ExportFormat::name)
            .collect();
        names.sort_unstable();
        names.insert(0, ExportFormat::Pdf.name());
        names
    }

    pub fn is_internal(self) -> bool {
        matches!(self, ExportFormat::Custom)
    }

    pub fn family(self) -> FormatFamily {
        match self {
            ExportFormat::Latex | ExportFormat::Pdf => FormatFamily::Latex,
            ExportFormat::Html
            | ExportFormat::Slides
            | ExportFormat::Webpdf
            | ExportFormat::Qtpdf
            | ExportFormat::Qtpng => FormatFamily::Html,
            ExportFormat::Notebook => FormatFamily::Notebook,
            ExportFormat::Asciidoc
            | ExportFormat::Custom
            | ExportFormat::Markdown
            | ExportFormat::Python
            | ExportFormat::Rst
            | ExportFormat::Script => FormatFamily::Text,
        }
    }

    /// MIME types that take precedence over whatever the engine reports.
    pub fn mime_override(self) -> Option<&'static str> {
        match self {
            ExportFormat::Pdf => Some("application/pdf"),
            _ => None,
        }
    }

    /// MIME type each exporter declares for its output. `script` depends on
    /// the kernel language, so it has none.
    pub fn declared_mime_type(self) -> Option<&'static str> {
        match self {
            ExportFormat::Asciidoc => Some("text/asciidoc"),
            ExportFormat::Html | ExportFormat::Slides => Some("text/html"),
            ExportFormat::Latex => Some("text/latex"),
            ExportFormat::Markdown => Some("text/markdown"),
            ExportFormat::Notebook => Some("application/json"),
            ExportFormat::Pdf | ExportFormat::Webpdf | ExportFormat::Qtpdf => {
                Some("application/pdf")
            }
            ExportFormat::Python => Some("text/x-python"),
            ExportFormat::Qtpng => Some("image/png"),
            ExportFormat::Rst => Some("text/restructuredtext"),
            ExportFormat::Custom | ExportFormat::Script => None,
        }
    }

    /// Whether the engine produces bytes rather than text for this format.
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            ExportFormat::Pdf | ExportFormat::Webpdf | ExportFormat::Qtpdf | ExportFormat::Qtpng
        )
    }

    /// Extension used when the engine does not report one.
    pub fn default_extension(self) -> &'static str {
        match self {
            ExportFormat::Asciidoc => ".asciidoc",
            ExportFormat::Custom => ".txt",
            ExportFormat::Html | ExportFormat::Slides => ".html",
            ExportFormat::Latex => ".tex",
            ExportFormat::Markdown => ".md",
            ExportFormat::Notebook => ".ipynb",
            ExportFormat::Pdf | ExportFormat::Webpdf | ExportFormat::Qtpdf => ".pdf",
            ExportFormat::Python => ".py",
            ExportFormat::Qtpng => ".png",
            ExportFormat::Rst => ".rst",
            ExportFormat::Script => ".txt",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
