// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 avaflow contributors

//! # avaflow - Avatar Pipeline Orchestrator
//!
//! `avaflow` runs an ordered list of pipeline steps (external tools and
//! in-process file transforms) one at a time, stopping at the first failure.
//!
//! ## Features
//!
//! - **Fail-fast driver** - Steps never run after a failed one
//! - **Bounded process runner** - Deadlines, group kill, output tails
//! - **Artifact resolver** - Finds the newest mesh/texture pair and relocates it
//! - **Non-blocking progress** - Events go through a bounded queue to one observer
//!
//! ## Quick Start
//!
//! ```bash
//! # Check the step file and its tools
//! avaflow validate
//!
//! # Show the resolved steps
//! avaflow plan --var INPUT=face.jpg
//!
//! # Run, streaming events as JSON lines
//! avaflow run --events -
//! ```

pub mod cli;
pub mod errors;
pub mod executors;
pub mod pipeline;
pub mod progress;
pub mod utils;

// Re-export commonly used types
pub use errors::{AvaflowError, AvaflowResult, StepError};
pub use pipeline::{PipelineDefinition, PipelineDriver, PipelineRun, PipelineStep, RunReport};
pub use progress::{ProgressEvent, ProgressReporter};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
