// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 avaflow contributors

//! avaflow - Avatar Pipeline Orchestrator
//!
//! Runs multi-stage avatar pipelines with fail-fast control flow.

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use avaflow::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Interpreter paths and other variables may live in .env
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "avaflow=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    avaflow::utils::configure_colors();

    let cli = Cli::parse();

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    // Dispatch to command handlers
    match cli.command {
        Commands::Run {
            pipeline,
            vars,
            events,
            quiet,
        } => avaflow::cli::run::run(pipeline, vars, events, quiet, cli.verbose).await,
        Commands::Validate { pipeline, vars } => {
            avaflow::cli::validate::run(pipeline, vars, cli.verbose).await
        }
        Commands::Plan {
            pipeline,
            vars,
            format,
        } => avaflow::cli::plan::run(pipeline, vars, format, cli.verbose).await,
    }
}
