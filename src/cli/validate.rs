// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 avaflow contributors

//! Validate command - check pipeline configuration

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use super::{base_dir, overrides};
use crate::pipeline::{PipelineDefinition, PipelineValidator};

/// Run the validate command
pub async fn run(pipeline_path: PathBuf, vars: Vec<(String, String)>, verbose: bool) -> Result<()> {
    println!("{}", "Validating pipeline...".bold());
    println!();

    // Load pipeline
    let pipeline = match PipelineDefinition::from_file(&pipeline_path) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("  {} Failed to parse pipeline", "✗".red());
            eprintln!();
            return Err(e.into());
        }
    };

    println!("  {} Pipeline file parsed", "✓".green());

    // Validate pipeline structure
    let validation = PipelineValidator::validate(&pipeline);

    // Resolve variables and check tools only when the structure is sound
    let mut missing_tools = Vec::new();
    let mut resolve_error = None;
    if validation.is_valid() {
        match pipeline.build_steps(&base_dir(&pipeline_path)?, &overrides(vars)) {
            Ok(steps) => missing_tools = PipelineValidator::check_executables(&steps),
            Err(e) => resolve_error = Some(e),
        }
    }

    // Report results
    let mut has_issues = false;

    if !validation.errors.is_empty() || resolve_error.is_some() {
        has_issues = true;
        println!();
        println!("{}:", "Errors".red().bold());
        for error in &validation.errors {
            println!("  {} {}", "✗".red(), error);
        }
        if let Some(e) = &resolve_error {
            println!("  {} {}", "✗".red(), e);
        }
    }

    if !missing_tools.is_empty() {
        has_issues = true;
        println!();
        println!("{}:", "Missing tools".yellow().bold());
        for missing in &missing_tools {
            println!("  {} {}", "⚠".yellow(), missing);
        }
    }

    if !validation.warnings.is_empty() {
        println!();
        println!("{}:", "Warnings".yellow().bold());
        for warning in &validation.warnings {
            println!("  {} {}", "⚠".yellow(), warning);
        }
    }

    if verbose {
        println!();
        println!("{}:", "Pipeline summary".bold());
        println!("  Name: {}", pipeline.name);
        println!("  Steps: {}", pipeline.steps.len());
        for step in &pipeline.steps {
            println!("    - {} ({})", step.title, step.action_label().dimmed());
        }
    }

    println!();

    if has_issues {
        if validation.is_valid() && resolve_error.is_none() {
            println!("{}", "Pipeline is valid but some tools are missing.".yellow().bold());
            Err(miette::miette!("Required tools are not installed"))
        } else {
            Err(miette::miette!("Pipeline validation failed"))
        }
    } else {
        println!("{}", "Pipeline is valid!".green().bold());
        Ok(())
    }
}
