// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 avaflow contributors

//! Pipeline validation
//!
//! Validates pipeline configuration before execution.

use std::collections::HashSet;

use crate::executors::{check_executable, is_plain_name};
use crate::pipeline::{OperationSpec, PipelineDefinition, PipelineStep, StepAction, StepSpec};

/// Pipeline validator
pub struct PipelineValidator;

impl PipelineValidator {
    /// Validate a pipeline definition
    pub fn validate(pipeline: &PipelineDefinition) -> ValidationResult {
        let mut result = ValidationResult::new();

        if pipeline.steps.is_empty() {
            result.add_error("Pipeline has no steps defined");
        }

        if pipeline.settings.command_deadline_secs == 0 {
            result.add_error("settings.command_deadline_secs must be greater than zero");
        }

        // Titles identify steps in diagnostics; duplicates are legal but confusing
        let mut seen_titles = HashSet::new();
        for step in &pipeline.steps {
            if !seen_titles.insert(step.title.as_str()) {
                result.add_warning(&format!("Duplicate step title: '{}'", step.title));
            }
        }

        for (index, step) in pipeline.steps.iter().enumerate() {
            Self::validate_step(index, step, &mut result);
        }

        result
    }

    /// Validate a single step
    fn validate_step(index: usize, step: &StepSpec, result: &mut ValidationResult) {
        let label = format!("Step {} '{}'", index, step.title);

        match (&step.command, &step.operation) {
            (Some(_), Some(_)) => {
                result.add_error(&format!("{}: has both 'command' and 'operation'", label));
            }
            (None, None) => {
                result.add_error(&format!("{}: needs a 'command' or an 'operation'", label));
            }
            (Some(command), None) => {
                if command.executable.trim().is_empty() {
                    result.add_error(&format!("{}: executable is empty", label));
                }
                if command.deadline_secs == Some(0) {
                    result.add_error(&format!("{}: deadline_secs must be greater than zero", label));
                }
            }
            (None, Some(operation)) => Self::validate_operation(&label, operation, result),
        }
    }

    fn validate_operation(label: &str, operation: &OperationSpec, result: &mut ValidationResult) {
        match operation {
            OperationSpec::DeleteMatching { pattern, .. } => {
                if pattern.is_empty() {
                    result.add_error(&format!("{}: pattern is empty", label));
                } else if !pattern.contains("${") {
                    if let Err(e) = glob::Pattern::new(pattern) {
                        result.add_error(&format!("{}: invalid pattern '{}': {}", label, pattern, e));
                    }
                }
            }
            OperationSpec::Clear { subdirs, .. } => {
                if subdirs.is_empty() {
                    result.add_error(&format!("{}: 'clear' lists no subdirs", label));
                }
                for name in subdirs.iter().filter(|n| !n.contains("${")) {
                    if !is_plain_name(name) {
                        result.add_error(&format!(
                            "{}: subdir '{}' must be a single directory name",
                            label, name
                        ));
                    }
                }
            }
            OperationSpec::ResolveArtifact {
                results_root,
                mesh_dest,
                texture_dest,
                ..
            } => {
                if results_root == mesh_dest || results_root == texture_dest {
                    result.add_warning(&format!(
                        "{}: results_root '{}' is also a destination; it is deleted after each resolve",
                        label, results_root
                    ));
                }
            }
            OperationSpec::MoveAll { .. } | OperationSpec::MoveFile { .. } => {}
        }
    }

    /// List external commands whose executable cannot be found
    pub fn check_executables(steps: &[PipelineStep]) -> Vec<String> {
        let mut missing = Vec::new();

        for (index, step) in steps.iter().enumerate() {
            if let StepAction::ExternalCommand(command) = &step.action {
                if !check_executable(&command.executable, &step.working_directory) {
                    missing.push(format!(
                        "Step {} '{}': executable not found: {}",
                        index, step.title, command.executable
                    ));
                }
            }
        }

        missing
    }
}

/// Result of pipeline validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    pub fn add_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}
