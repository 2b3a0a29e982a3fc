//! Named template assets handed to the engine by path.
//!
//! The bundled templates live inside the binary. A conversion that needs one
//! acquires a [`TemplateHandle`], which materializes the asset as a temporary
//! file and removes it again when dropped, whether or not rendering succeeded.

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;

const LATEX_BIBLIOGRAPHY_TEMPLATE: &str =
    include_str!("../../assets/templates/latex_bib_template.tplx");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateAsset {
    /// LaTeX article template that renders extracted `bibliography` cells.
    LatexBibliography,
}

impl TemplateAsset {
    pub fn file_name(self) -> &'static str {
        match self {
            TemplateAsset::LatexBibliography => "latex_bib_template.tplx",
        }
    }

    fn bundled_contents(self) -> &'static str {
        match self {
            TemplateAsset::LatexBibliography => LATEX_BIBLIOGRAPHY_TEMPLATE,
        }
    }
}

/// Resolves template assets, preferring operator-supplied files on disk.
#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    latex_bibliography: Option<PathBuf>,
}

impl TemplateStore {
    pub fn new(latex_bibliography: Option<PathBuf>) -> Self {
        Self { latex_bibliography }
    }

    pub fn acquire(&self, asset: TemplateAsset) -> io::Result<TemplateHandle> {
        let configured = match asset {
            TemplateAsset::LatexBibliography => self.latex_bibliography.as_ref(),
        };
        if let Some(path) = configured {
            return Ok(TemplateHandle::OnDisk(path.clone()));
        }

        let mut file = tempfile::Builder::new()
            .prefix("nbconvert-http-template-")
            .suffix(asset.file_name())
            .tempfile()?;
        file.write_all(asset.bundled_contents().as_bytes())?;
        file.flush()?;
        Ok(TemplateHandle::Scoped(file))
    }
}

/// A template path valid for as long as the handle lives.
#[derive(Debug)]
pub enum TemplateHandle {
    OnDisk(PathBuf),
    Scoped(NamedTempFile),
}

impl TemplateHandle {
    pub fn path(&self) -> &Path {
        match self {
            TemplateHandle::OnDisk(path) => path,
            TemplateHandle::Scoped(file) => file.path(),
        }
    }
}
