// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 avaflow contributors

//! Pipeline driver
//!
//! Executes the steps of a run strictly in order, stopping at the first
//! failure. The driver is the only place a [`PipelineRun`] is mutated and
//! the only source of progress events.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::definition::{PipelineStep, Settings};
use super::run::{FailureDiagnostic, PipelineRun, RunReport};
use crate::errors::{AvaflowError, StepError};
use crate::executors::{
    CommandExecutor, ExecutionResult, Executor, ProcessRunner, TransformExecutor,
    COMMAND_EXECUTOR, TRANSFORM_EXECUTOR,
};
use crate::progress::{ProgressEvent, ProgressReporter};

/// Runs pipeline steps through registered executors
pub struct PipelineDriver {
    /// Registered executors by action kind
    executors: HashMap<String, Arc<dyn Executor>>,
}

impl PipelineDriver {
    /// A driver with the built-in command and transform executors
    pub fn new(settings: &Settings) -> Self {
        let mut driver = Self::empty();
        driver.register_executor(
            COMMAND_EXECUTOR,
            Arc::new(CommandExecutor::new(ProcessRunner::new(
                settings.output_tail_bytes,
            ))),
        );
        driver.register_executor(
            TRANSFORM_EXECUTOR,
            Arc::new(TransformExecutor::new(settings.verify_artifact_copies)),
        );
        driver
    }

    /// A driver with no executors registered
    pub fn empty() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register an executor for an action kind, replacing any previous one
    pub fn register_executor(&mut self, kind: &str, executor: Arc<dyn Executor>) {
        self.executors.insert(kind.to_string(), executor);
    }

    /// Execute a run to completion.
    ///
    /// Every failure is captured in the returned report; this never
    /// returns an error. `PipelineCompleted` is always the last event
    /// emitted, exactly once. A run that has already started is left as it
    /// is: no step runs and no event is emitted.
    pub async fn execute(
        &self,
        run: &mut PipelineRun,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> RunReport {
        let start = Instant::now();
        let steps = run.shared_steps();
        let mut artifacts = Vec::new();
        let mut failure = None;

        if !run.start() {
            warn!("run is already {}; not executing it again", run.status());
            return RunReport {
                status: run.status(),
                completed_steps: run.cursor(),
                total_steps: steps.len(),
                diagnostic: run.last_diagnostic().cloned(),
                artifacts,
                error: None,
                duration: start.elapsed(),
            };
        }
        info!("Running pipeline with {} steps", steps.len());

        for (index, step) in steps.iter().enumerate() {
            debug_assert_eq!(index, run.cursor());

            if cancel.is_cancelled() {
                let err = StepError::Cancelled {
                    elapsed: start.elapsed(),
                };
                warn!("run cancelled before step {} '{}'", index, step.title);
                run.abort(FailureDiagnostic::from_error(index, &step.title, &err));
                failure = Some(err);
                break;
            }

            reporter.emit(ProgressEvent::StageStarted {
                index,
                title: step.title.clone(),
            });
            let step_start = Instant::now();

            match self.execute_step(step, cancel).await {
                Ok(result) => {
                    debug!(
                        "step {} '{}' finished in {:.2}s",
                        index,
                        step.title,
                        result.duration.as_secs_f64()
                    );
                    artifacts.extend(result.artifact);
                    reporter.emit(ProgressEvent::StageSucceeded {
                        index,
                        title: step.title.clone(),
                        elapsed_ms: step_start.elapsed().as_millis() as u64,
                    });
                    run.advance();
                }
                Err(err @ StepError::Cancelled { .. }) => {
                    warn!("step {} '{}' interrupted by cancellation", index, step.title);
                    run.abort(FailureDiagnostic::from_error(index, &step.title, &err));
                    failure = Some(err);
                    break;
                }
                Err(err) => {
                    let diagnostic = FailureDiagnostic::from_error(index, &step.title, &err);
                    error!("{}", diagnostic);
                    run.fail(diagnostic.clone());
                    reporter.emit(ProgressEvent::StageFailed {
                        index,
                        title: step.title.clone(),
                        diagnostic,
                    });
                    failure = Some(err);
                    break;
                }
            }
        }

        run.succeed();

        let status = run.status();
        let diagnostic = run.last_diagnostic().cloned();
        info!("Pipeline {} after {:.2}s", status, start.elapsed().as_secs_f64());

        reporter.emit(ProgressEvent::PipelineCompleted {
            final_status: status,
            diagnostic: diagnostic.clone(),
        });

        RunReport {
            status,
            completed_steps: run.cursor(),
            total_steps: steps.len(),
            diagnostic,
            artifacts,
            error: failure,
            duration: start.elapsed(),
        }
    }

    /// Execute `run` on its own task.
    ///
    /// The reporter is closed once the terminal event has been delivered.
    pub fn spawn(self: &Arc<Self>, mut run: PipelineRun, reporter: ProgressReporter) -> RunHandle {
        let cancel = CancellationToken::new();
        let driver = Arc::clone(self);
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let report = driver.execute(&mut run, &reporter, &token).await;
            reporter.close().await;
            report
        });

        RunHandle { cancel, task }
    }

    /// Execute a single step
    async fn execute_step(
        &self,
        step: &PipelineStep,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, StepError> {
        let kind = step.action.kind();
        let executor = self
            .executors
            .get(kind)
            .ok_or_else(|| StepError::Unexpected {
                message: format!("no executor registered for '{}' steps", kind),
            })?;

        executor.execute(step, cancel).await
    }
}

/// Handle to a run executing on its own task
#[derive(Debug)]
pub struct RunHandle {
    cancel: CancellationToken,
    task: JoinHandle<RunReport>,
}

impl RunHandle {
    /// Ask the run to stop; an in-flight external command is terminated
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this run when triggered
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the run to finish
    pub async fn join(self) -> Result<RunReport, AvaflowError> {
        self.task.await.map_err(|e| AvaflowError::ExecutionFailed {
            message: format!("Pipeline task ended abnormally: {}", e),
            help: None,
        })
    }
}
