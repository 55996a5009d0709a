// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 avaflow contributors

//! Run command - execute the pipeline

use colored::Colorize;
use miette::{IntoDiagnostic, Result};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use super::{base_dir, load_pipeline, overrides};
use crate::errors::RecoverySuggestion;
use crate::pipeline::{PipelineDriver, PipelineRun, PipelineValidator, RunReport};
use crate::progress::{
    ConsoleObserver, JsonLinesObserver, LogObserver, Observer, ProgressReporter,
};

/// Run the pipeline
pub async fn run(
    pipeline_path: PathBuf,
    vars: Vec<(String, String)>,
    events: Option<String>,
    quiet: bool,
    verbose: bool,
) -> Result<()> {
    let pipeline = load_pipeline(&pipeline_path)?;

    // Validate pipeline
    let validation = PipelineValidator::validate(&pipeline);

    if !validation.is_valid() {
        eprintln!("{}", "Pipeline validation failed:".red().bold());
        for error in &validation.errors {
            eprintln!("  {} {}", "✗".red(), error);
        }
        return Err(miette::miette!("Pipeline configuration is invalid"));
    }

    if validation.has_warnings() && verbose {
        eprintln!("{}", "Pipeline warnings:".yellow().bold());
        for warning in &validation.warnings {
            eprintln!("  {} {}", "⚠".yellow(), warning);
        }
        eprintln!();
    }

    let steps = pipeline.build_steps(&base_dir(&pipeline_path)?, &overrides(vars))?;
    let settings = &pipeline.settings;

    let observer: Option<Arc<dyn Observer>> = match events.as_deref() {
        Some("-") => Some(Arc::new(JsonLinesObserver::stdout())),
        Some(path) => {
            let file = tokio::fs::File::create(path).await.into_diagnostic()?;
            Some(Arc::new(JsonLinesObserver::new(file)))
        }
        None if quiet => None,
        None if std::io::stdout().is_terminal() => {
            Some(Arc::new(ConsoleObserver::new(steps.len(), verbose)))
        }
        None => Some(Arc::new(LogObserver)),
    };

    let reporter = match observer {
        Some(observer) => ProgressReporter::new(
            observer,
            settings.progress_queue_capacity,
            settings.backpressure,
        ),
        None => ProgressReporter::detached(),
    };

    if !quiet && events.as_deref() != Some("-") {
        println!(
            "{} {} ({} steps)",
            "Running".bold(),
            pipeline.name.cyan(),
            steps.len()
        );
        println!();
    }

    let driver = Arc::new(PipelineDriver::new(settings));
    let handle = driver.spawn(PipelineRun::new(steps), reporter);

    // Ctrl-C aborts the run; an in-flight tool is killed
    let token = handle.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            token.cancel();
        }
    });

    let report = handle.join().await?;
    interrupt.abort();

    if report.succeeded() {
        if !quiet && events.as_deref() != Some("-") {
            print_artifacts(&report);
        }
        return Ok(());
    }

    print_failure(&report, verbose);
    Err(miette::miette!(
        "Pipeline {} after {}/{} steps",
        report.status,
        report.completed_steps,
        report.total_steps
    ))
}

fn print_artifacts(report: &RunReport) {
    if report.artifacts.is_empty() {
        return;
    }

    println!();
    println!("{}:", "Artifacts".bold());
    for artifact in &report.artifacts {
        println!("  - {}", artifact.mesh_path.display());
        println!("  - {}", artifact.texture_path.display());
    }
}

fn print_failure(report: &RunReport, verbose: bool) {
    let Some(diagnostic) = &report.diagnostic else {
        return;
    };

    eprintln!();
    eprintln!(
        "{}",
        format!("Step {} '{}' failed:", diagnostic.step_index, diagnostic.title)
            .red()
            .bold()
    );
    eprintln!("  {}", diagnostic.message);

    if let Some(stderr) = diagnostic.stderr_tail.as_deref().filter(|s| !s.is_empty()) {
        eprintln!();
        eprintln!("{}", stderr.dimmed());
    }
    if verbose {
        if let Some(stdout) = diagnostic.stdout_tail.as_deref().filter(|s| !s.is_empty()) {
            eprintln!();
            eprintln!("{}", stdout.dimmed());
        }
    }

    if let Some(error) = &report.error {
        eprintln!();
        eprint!("{}", RecoverySuggestion::for_failure(error, &diagnostic.title));
    }
}
