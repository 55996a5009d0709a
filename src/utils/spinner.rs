// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 avaflow contributors

//! Progress spinner utilities

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner shown while a step runs, labelled `[n/total] title`
pub fn step_spinner(index: usize, total: usize, title: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
        .template("{spinner:.blue} {msg} {elapsed:.dim}")
    {
        pb.set_style(style);
    }
    pb.set_message(step_label(index, total, title));
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// `[n/total] title`, one-based
pub fn step_label(index: usize, total: usize, title: &str) -> String {
    format!("[{}/{}] {}", index + 1, total, title)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_label_is_one_based() {
        assert_eq!(step_label(0, 19, "Moving Input Image"), "[1/19] Moving Input Image");
    }
}
