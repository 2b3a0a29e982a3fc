//! Document model and format registry. No I/O happens here.

pub mod error;
pub mod formats;
pub mod notebook;

pub use error::DocumentError;
pub use formats::{ExportFormat, FormatFamily};
pub use notebook::{Cell, CellKind, Notebook};
