//! Command-line surface for `nbconvert-http-cli`.

#![deny(clippy::all, clippy::pedantic)]

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

pub const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";

#[derive(Parser, Debug)]
#[command(
    name = "nbconvert-http-cli",
    version,
    about = "Client for the nbconvert-http conversion API",
    long_about = None
)]
pub struct Cli {
    /// Server base URL, e.g. <http://127.0.0.1:8000>
    #[arg(long, env = "NBCONVERT_HTTP_URL", default_value = DEFAULT_SERVER)]
    pub server: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Convert a notebook file
    Convert(ConvertArgs),
    /// List the export formats the server accepts
    Formats,
    /// Show server liveness and pool usage
    Health,
}

#[derive(Args, Debug, Clone)]
pub struct ConvertArgs {
    /// Notebook file (.ipynb)
    #[arg(value_name = "NOTEBOOK")]
    pub notebook: PathBuf,

    /// Export format, e.g. pdf or html
    #[arg(long, short = 'e')]
    pub exporter: String,

    /// JSON file with engine configuration overrides
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Where to write the result; defaults to `result<ext>`, `-` for stdout
    #[arg(long, short = 'o', value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Print the JSON envelope instead of writing the decoded body
    #[arg(long)]
    pub envelope: bool,
}
