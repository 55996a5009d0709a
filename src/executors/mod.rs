// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 avaflow contributors

//! Step executors
//!
//! This module provides the executor trait and the two built-in
//! implementations: external commands and in-process transforms.

mod process;
mod resolver;
mod stager;

pub use process::{CommandOutput, ProcessRunner, TailBuffer, DEFAULT_TAIL_BYTES};
pub use resolver::{
    select_latest_folder, ArtifactResolver, CandidateTemplates, ResolvedArtifact,
    FOLDER_PLACEHOLDER,
};
pub use stager::{is_plain_name, FilesystemStager};

use async_trait::async_trait;
use std::any::Any;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::errors::StepError;
use crate::pipeline::{PipelineStep, StepAction, Transform};

/// Executor key for external commands
pub const COMMAND_EXECUTOR: &str = "command";

/// Executor key for in-process transforms
pub const TRANSFORM_EXECUTOR: &str = "transform";

/// Result of a successful step
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    /// Tail of standard output, for external commands
    pub stdout: String,

    /// Files created or moved by the step
    pub outputs: Vec<PathBuf>,

    /// Artifact relocated by a resolve step
    pub artifact: Option<ResolvedArtifact>,

    /// Execution duration
    pub duration: Duration,
}

impl ExecutionResult {
    /// Result of a command that exited with code zero
    pub fn from_command(output: CommandOutput) -> Self {
        Self {
            stdout: output.stdout,
            duration: output.duration,
            ..Self::default()
        }
    }

    /// Result of a transform that touched `outputs`
    pub fn from_outputs(outputs: Vec<PathBuf>, duration: Duration) -> Self {
        Self {
            outputs,
            duration,
            ..Self::default()
        }
    }
}

/// Trait for step executors
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute a step
    ///
    /// # Arguments
    /// * `step` - The step to run; its action kind matches this executor
    /// * `cancel` - Fires when the run is cancelled; long-running work
    ///   should stop and return [`StepError::Cancelled`]
    async fn execute(
        &self,
        step: &PipelineStep,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, StepError>;
}

/// Runs [`StepAction::ExternalCommand`] steps through a [`ProcessRunner`]
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor {
    runner: ProcessRunner,
}

impl CommandExecutor {
    pub fn new(runner: ProcessRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Executor for CommandExecutor {
    async fn execute(
        &self,
        step: &PipelineStep,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, StepError> {
        let StepAction::ExternalCommand(command) = &step.action else {
            return Err(StepError::Unexpected {
                message: format!("step '{}' is not an external command", step.title),
            });
        };

        let output = self
            .runner
            .run(
                &command.executable,
                &command.args,
                &command.env,
                &step.working_directory,
                command.deadline,
                cancel,
            )
            .await?;

        if !output.success() {
            return Err(StepError::ExternalStep {
                exit_code: output.exit_code,
                stdout_tail: output.stdout,
                stderr_tail: output.stderr,
            });
        }

        Ok(ExecutionResult::from_command(output))
    }
}

/// Runs [`StepAction::InProcessTransform`] steps on the blocking pool
#[derive(Debug, Clone)]
pub struct TransformExecutor {
    stager: FilesystemStager,
    verify_copies: bool,
}

impl TransformExecutor {
    pub fn new(verify_copies: bool) -> Self {
        Self {
            stager: FilesystemStager::new(),
            verify_copies,
        }
    }

    /// Apply a transform synchronously
    pub fn apply(&self, transform: &Transform) -> Result<ExecutionResult, StepError> {
        let start = Instant::now();

        match transform {
            Transform::MoveAll { from, to } => {
                let moved = self.stager.move_all_files(from, to)?;
                Ok(ExecutionResult::from_outputs(moved, start.elapsed()))
            }
            Transform::MoveFile { from, to } => {
                self.stager.move_file(from, to)?;
                Ok(ExecutionResult::from_outputs(vec![to.clone()], start.elapsed()))
            }
            Transform::DeleteMatching { dir, pattern } => {
                self.stager.delete_matching_pattern(dir, pattern)?;
                Ok(ExecutionResult::from_outputs(vec![], start.elapsed()))
            }
            Transform::RecursiveClear { dir, subdirs } => {
                self.stager.recursive_clear(dir, subdirs)?;
                Ok(ExecutionResult::from_outputs(vec![], start.elapsed()))
            }
            Transform::ResolveArtifact {
                results_root,
                mesh_dest,
                texture_dest,
                templates,
            } => {
                let artifact = ArtifactResolver::new(templates.clone())
                    .with_verification(self.verify_copies)
                    .resolve(results_root, mesh_dest, texture_dest)?;
                Ok(ExecutionResult {
                    outputs: vec![artifact.mesh_path.clone(), artifact.texture_path.clone()],
                    artifact: Some(artifact),
                    duration: start.elapsed(),
                    ..ExecutionResult::default()
                })
            }
        }
    }
}

impl Default for TransformExecutor {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl Executor for TransformExecutor {
    async fn execute(
        &self,
        step: &PipelineStep,
        _cancel: &CancellationToken,
    ) -> Result<ExecutionResult, StepError> {
        let StepAction::InProcessTransform(transform) = &step.action else {
            return Err(StepError::Unexpected {
                message: format!("step '{}' is not an in-process transform", step.title),
            });
        };

        let this = self.clone();
        let transform = transform.clone();

        // A panic inside the transform surfaces here as a join error.
        tokio::task::spawn_blocking(move || this.apply(&transform))
            .await
            .map_err(|e| StepError::Unexpected {
                message: if e.is_panic() {
                    panic_message(e.into_panic())
                } else {
                    e.to_string()
                },
            })?
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "transform panicked".to_string()
    }
}

/// Check whether an executable can be launched from `working_dir`
pub fn check_executable(executable: &str, working_dir: &Path) -> bool {
    let path = Path::new(executable);
    if path.components().count() > 1 {
        let candidate = if path.is_absolute() {
            path.to_path_buf()
        } else {
            working_dir.join(path)
        };
        return candidate.is_file();
    }

    which::which(executable).is_ok()
}
