// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 avaflow contributors

//! Plan command - show the resolved step list

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use super::{base_dir, load_pipeline, overrides, PlanFormat};
use crate::pipeline::{PipelineStep, StepAction, Transform};
use crate::utils::step_label;

/// Run the plan command
pub async fn run(
    pipeline_path: PathBuf,
    vars: Vec<(String, String)>,
    format: PlanFormat,
    _verbose: bool,
) -> Result<()> {
    let pipeline = load_pipeline(&pipeline_path)?;

    if format == PlanFormat::Yaml {
        print!("{}", pipeline.to_yaml()?);
        return Ok(());
    }

    let steps = pipeline.build_steps(&base_dir(&pipeline_path)?, &overrides(vars))?;

    println!("{}", "Execution plan:".bold());
    println!();
    for (index, step) in steps.iter().enumerate() {
        println!("  {}", step_label(index, steps.len(), &step.title).bold());
        println!("      {}", describe(step).dimmed());
    }
    println!();
    println!("Stops at the first failing step.");

    Ok(())
}

fn describe(step: &PipelineStep) -> String {
    match &step.action {
        StepAction::ExternalCommand(command) => {
            let mut line = format!(
                "$ {} {}  (in {}, deadline {}s)",
                command.executable,
                command.args.join(" "),
                step.working_directory.display(),
                command.deadline.as_secs()
            );
            if !command.env.is_empty() {
                let mut keys: Vec<_> = command.env.keys().map(String::as_str).collect();
                keys.sort_unstable();
                line.push_str(&format!(" env: {}", keys.join(", ")));
            }
            line
        }
        StepAction::InProcessTransform(transform) => match transform {
            Transform::MoveAll { from, to } => {
                format!("move all files {} -> {}", from.display(), to.display())
            }
            Transform::MoveFile { from, to } => {
                format!("move {} -> {}", from.display(), to.display())
            }
            Transform::DeleteMatching { dir, pattern } => {
                format!("delete {} in {}", pattern.as_str(), dir.display())
            }
            Transform::RecursiveClear { dir, subdirs } => {
                format!("clear {} in {}", subdirs.join(", "), dir.display())
            }
            Transform::ResolveArtifact {
                results_root,
                mesh_dest,
                texture_dest,
                ..
            } => format!(
                "resolve newest result in {} -> mesh {}, texture {}",
                results_root.display(),
                mesh_dest.display(),
                texture_dest.display()
            ),
        },
    }
}
