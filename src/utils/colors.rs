// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 avaflow contributors

//! Terminal color utilities
//!
//! Consistent markers for step and run outcomes.

use colored::{ColoredString, Colorize};

use crate::pipeline::RunStatus;

/// Marker for a finished step
pub fn step_marker(succeeded: bool) -> ColoredString {
    if succeeded {
        "✓".green()
    } else {
        "✗".red()
    }
}

/// Colored, bold run status
pub fn status_label(status: RunStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        RunStatus::Succeeded => text.green().bold(),
        RunStatus::Failed => text.red().bold(),
        RunStatus::Aborted => text.yellow().bold(),
        RunStatus::Pending | RunStatus::Running => text.blue().bold(),
    }
}

/// Disable colors when NO_COLOR is set or there is no terminal
pub fn configure_colors() {
    if !should_use_colors() {
        colored::control::set_override(false);
    }
}

/// Check if colors should be used
pub fn should_use_colors() -> bool {
    // Respect NO_COLOR environment variable
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }

    std::env::var_os("TERM").map(|t| t != "dumb").unwrap_or(false)
}
