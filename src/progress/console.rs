// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 avaflow contributors

//! Terminal observer

use async_trait::async_trait;
use colored::Colorize;
use indicatif::ProgressBar;
use std::sync::Mutex;

use super::{DeliveryError, Observer, ProgressEvent};
use crate::utils::{status_label, step_label, step_marker, step_spinner};

/// Shows a spinner for the running step and a line per finished step
pub struct ConsoleObserver {
    total: usize,
    verbose: bool,
    active: Mutex<Option<ProgressBar>>,
}

impl ConsoleObserver {
    pub fn new(total: usize, verbose: bool) -> Self {
        Self {
            total,
            verbose,
            active: Mutex::new(None),
        }
    }

    fn finish_active(&self) {
        if let Ok(mut active) = self.active.lock() {
            if let Some(pb) = active.take() {
                pb.finish_and_clear();
            }
        }
    }
}

#[async_trait]
impl Observer for ConsoleObserver {
    async fn deliver(&self, event: &ProgressEvent) -> Result<(), DeliveryError> {
        match event {
            ProgressEvent::StageStarted { index, title } => {
                self.finish_active();
                if let Ok(mut active) = self.active.lock() {
                    *active = Some(step_spinner(*index, self.total, title));
                }
            }
            ProgressEvent::StageSucceeded {
                index,
                title,
                elapsed_ms,
            } => {
                self.finish_active();
                println!(
                    "  {} {} {}",
                    step_marker(true),
                    step_label(*index, self.total, title).bold(),
                    format!("({:.2}s)", *elapsed_ms as f64 / 1000.0).dimmed()
                );
            }
            ProgressEvent::StageFailed {
                index,
                title,
                diagnostic,
            } => {
                self.finish_active();
                println!(
                    "  {} {} - {}",
                    step_marker(false),
                    step_label(*index, self.total, title).bold(),
                    diagnostic.message.dimmed()
                );
                if self.verbose {
                    if let Some(stderr) = diagnostic.stderr_tail.as_deref().filter(|s| !s.is_empty()) {
                        eprintln!("{}", stderr.dimmed());
                    }
                }
            }
            ProgressEvent::PipelineCompleted { final_status, .. } => {
                self.finish_active();
                println!();
                println!("Pipeline {}", status_label(*final_status));
            }
        }
        Ok(())
    }
}
