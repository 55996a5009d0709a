// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 avaflow contributors

//! Run state
//!
//! A [`PipelineRun`] is owned and mutated by the driver alone. Everyone
//! else sees snapshots: progress events and the final [`RunReport`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::definition::PipelineStep;
use crate::errors::StepError;
use crate::executors::ResolvedArtifact;

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl RunStatus {
    /// Whether the run can no longer change
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Where and why a run stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDiagnostic {
    /// Index of the failing (or next, when cancelled between steps) step
    pub step_index: usize,
    pub title: String,
    /// Failure kind, see [`StepError::kind`]
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout_tail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr_tail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
}

impl FailureDiagnostic {
    pub fn from_error(step_index: usize, title: &str, error: &StepError) -> Self {
        let (stdout_tail, stderr_tail) = match error.output_tails() {
            Some((out, err)) => (Some(out.to_string()), Some(err.to_string())),
            None => (None, None),
        };

        Self {
            step_index,
            title: title.to_string(),
            kind: error.kind().to_string(),
            message: error.to_string(),
            exit_code: error.exit_code(),
            stdout_tail,
            stderr_tail,
            elapsed_ms: error.elapsed().map(|d| d.as_millis() as u64),
        }
    }
}

impl std::fmt::Display for FailureDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "step {} '{}' [{}]: {}",
            self.step_index, self.title, self.kind, self.message
        )
    }
}

/// The mutable state of one execution
#[derive(Debug)]
pub struct PipelineRun {
    steps: Arc<[PipelineStep]>,
    cursor: usize,
    status: RunStatus,
    last_diagnostic: Option<FailureDiagnostic>,
}

impl PipelineRun {
    /// A fresh, pending run over `steps`
    pub fn new(steps: Vec<PipelineStep>) -> Self {
        Self {
            steps: steps.into(),
            cursor: 0,
            status: RunStatus::Pending,
            last_diagnostic: None,
        }
    }

    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    pub(crate) fn shared_steps(&self) -> Arc<[PipelineStep]> {
        Arc::clone(&self.steps)
    }

    /// Index of the step executing or about to execute
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn last_diagnostic(&self) -> Option<&FailureDiagnostic> {
        self.last_diagnostic.as_ref()
    }

    /// Move a pending run to `Running`. Returns false, leaving the run
    /// untouched, when it has already started.
    pub(crate) fn start(&mut self) -> bool {
        if self.status != RunStatus::Pending {
            return false;
        }
        self.status = RunStatus::Running;
        self.cursor = 0;
        true
    }

    pub(crate) fn advance(&mut self) {
        debug_assert_eq!(self.status, RunStatus::Running);
        self.cursor += 1;
    }

    pub(crate) fn succeed(&mut self) {
        if self.status == RunStatus::Running {
            self.status = RunStatus::Succeeded;
        }
    }

    pub(crate) fn fail(&mut self, diagnostic: FailureDiagnostic) {
        if self.status == RunStatus::Running {
            self.status = RunStatus::Failed;
            self.last_diagnostic = Some(diagnostic);
        }
    }

    pub(crate) fn abort(&mut self, diagnostic: FailureDiagnostic) {
        if !self.status.is_terminal() {
            self.status = RunStatus::Aborted;
            self.last_diagnostic = Some(diagnostic);
        }
    }
}

/// Summary of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    /// Number of steps that completed successfully
    pub completed_steps: usize,
    pub total_steps: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<FailureDiagnostic>,
    /// Artifacts relocated by resolve steps, in order
    pub artifacts: Vec<ResolvedArtifact>,
    /// The error behind `diagnostic`
    #[serde(skip)]
    pub error: Option<StepError>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}
