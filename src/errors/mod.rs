// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 avaflow contributors

//! Error types
//!
//! Two families live here. [`AvaflowError`] covers everything that happens
//! outside a run: loading and validating pipeline files, substituting
//! variables, wiring up the CLI. [`StepError`] is the failure taxonomy of a
//! single step; the driver captures it as a diagnostic and never lets it
//! escape a run.

mod recovery;

pub use recovery::RecoverySuggestion;

use miette::Diagnostic;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for avaflow operations
pub type AvaflowResult<T> = Result<T, AvaflowError>;

/// Main error type for avaflow
#[derive(Error, Debug, Diagnostic)]
pub enum AvaflowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Pipeline Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Pipeline file not found: {path}")]
    #[diagnostic(
        code(avaflow::pipeline_not_found),
        help("Create avaflow.yaml or point --pipeline at an existing file")
    )]
    PipelineNotFound { path: PathBuf },

    #[error("Invalid pipeline configuration: {reason}")]
    #[diagnostic(code(avaflow::invalid_pipeline))]
    InvalidPipeline {
        reason: String,
        #[help]
        help: Option<String>,
    },

    #[error("Step '{step}' is invalid: {reason}")]
    #[diagnostic(code(avaflow::invalid_step))]
    InvalidStep { step: String, reason: String },

    #[error("Undefined variable '${{{name}}}' in step '{step}'")]
    #[diagnostic(
        code(avaflow::undefined_variable),
        help("Define '{name}' under 'vars', in the environment, in .env, or with --var {name}=VALUE")
    )]
    UndefinedVariable { name: String, step: String },

    #[error("Run did not finish: {message}")]
    #[diagnostic(code(avaflow::execution_failed))]
    ExecutionFailed {
        message: String,
        #[help]
        help: Option<String>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // File Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(avaflow::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("IO error: {message}")]
    #[diagnostic(code(avaflow::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(avaflow::yaml_error))]
    Yaml { message: String },

    #[error("TOML parsing error: {message}")]
    #[diagnostic(code(avaflow::toml_error))]
    Toml { message: String },

    #[error("Glob pattern error: {message}")]
    #[diagnostic(code(avaflow::glob_error))]
    GlobPattern { message: String },
}

impl From<std::io::Error> for AvaflowError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for AvaflowError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<toml::de::Error> for AvaflowError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml { message: e.to_string() }
    }
}

impl From<glob::PatternError> for AvaflowError {
    fn from(e: glob::PatternError) -> Self {
        Self::GlobPattern { message: e.to_string() }
    }
}

/// Why a single step failed.
///
/// Every variant is fatal to the run that produced it. None of them is a
/// programming error: a nonzero exit code is an expected outcome that the
/// driver records and reports.
#[derive(Error, Debug, Clone, Diagnostic)]
pub enum StepError {
    #[error("Failed to launch '{executable}': {reason}")]
    #[diagnostic(code(avaflow::launch_failure))]
    Launch { executable: String, reason: String },

    #[error("External command exited with code {exit_code}")]
    #[diagnostic(code(avaflow::external_step_failure))]
    ExternalStep {
        exit_code: i32,
        stdout_tail: String,
        stderr_tail: String,
    },

    #[error("Step timed out after {:.1}s", .elapsed.as_secs_f64())]
    #[diagnostic(code(avaflow::timeout_failure))]
    Timeout {
        elapsed: Duration,
        stdout_tail: String,
        stderr_tail: String,
    },

    #[error("Staging failed: {reason}")]
    #[diagnostic(code(avaflow::staging_failure))]
    Staging { reason: String },

    #[error("No result folders in {}", .root.display())]
    #[diagnostic(code(avaflow::no_artifact))]
    NoArtifact { root: PathBuf },

    #[error("Mesh (.obj) not found in {}", .folder.display())]
    #[diagnostic(code(avaflow::mesh_not_found))]
    MeshNotFound { folder: PathBuf },

    #[error("Texture image (.png/.jpg/.jpeg) not found in {}", .folder.display())]
    #[diagnostic(code(avaflow::texture_not_found))]
    TextureNotFound { folder: PathBuf },

    #[error("Unexpected error: {message}")]
    #[diagnostic(code(avaflow::unexpected))]
    Unexpected { message: String },

    #[error("Step cancelled after {:.1}s", .elapsed.as_secs_f64())]
    #[diagnostic(code(avaflow::cancelled))]
    Cancelled { elapsed: Duration },
}

impl StepError {
    /// Stable identifier for the failure kind, used in progress events
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Launch { .. } => "launch_failure",
            Self::ExternalStep { .. } => "external_step_failure",
            Self::Timeout { .. } => "timeout_failure",
            Self::Staging { .. } => "staging_failure",
            Self::NoArtifact { .. } => "no_artifact_failure",
            Self::MeshNotFound { .. } => "mesh_not_found_failure",
            Self::TextureNotFound { .. } => "texture_not_found_failure",
            Self::Unexpected { .. } => "unexpected_exception",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    /// Exit code of the external process, when one ran to completion
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::ExternalStep { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }

    /// Captured output tails, when the failure came from a process
    pub fn output_tails(&self) -> Option<(&str, &str)> {
        match self {
            Self::ExternalStep {
                stdout_tail,
                stderr_tail,
                ..
            }
            | Self::Timeout {
                stdout_tail,
                stderr_tail,
                ..
            } => Some((stdout_tail, stderr_tail)),
            _ => None,
        }
    }

    /// Wall-clock time spent before the step was stopped
    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            Self::Timeout { elapsed, .. } | Self::Cancelled { elapsed } => Some(*elapsed),
            _ => None,
        }
    }

    /// Wrap an IO error raised while staging files
    pub fn staging(context: impl std::fmt::Display, error: std::io::Error) -> Self {
        Self::Staging {
            reason: format!("{}: {}", context, error),
        }
    }
}
