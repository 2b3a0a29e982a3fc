//! nbconvert-http-cli: command-line client for the conversion API.
#![deny(clippy::all, clippy::pedantic)]

mod args;
mod client;
mod handlers;
mod io;
mod print;


use clap::Parser;

use args::{Cli, Commands};
use client::{CliError, build_ctx_from_cli};

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let ctx = build_ctx_from_cli(&cli)?;

    match cli.command {
        Commands::Convert(args) => handlers::convert(&ctx, args).await?,
        Commands::Formats => handlers::formats(&ctx).await?,
        Commands::Health => handlers::health(&ctx).await?,
    }

    Ok(())
}
