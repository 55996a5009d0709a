// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 avaflow contributors

//! Pipeline definitions and execution
//!
//! This module defines the step file schema, the resolved step types,
//! the run state machine and the driver that executes it.

mod definition;
mod driver;
mod run;
mod validation;
mod vars;

pub use definition::*;
pub use driver::{PipelineDriver, RunHandle};
pub use run::{FailureDiagnostic, PipelineRun, RunReport, RunStatus};
pub use validation::{PipelineValidator, ValidationResult};
pub use vars::Variables;
