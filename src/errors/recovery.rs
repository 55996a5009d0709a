// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 avaflow contributors

//! Error recovery suggestions
//!
//! Turns a step failure into concrete next steps for the operator.

use super::StepError;

/// A recovery suggestion with concrete steps
#[derive(Debug, Clone)]
pub struct RecoverySuggestion {
    /// Brief description of what to do
    pub action: String,
    /// Detailed steps
    pub steps: Vec<String>,
    /// Commands to run
    pub commands: Vec<String>,
}

impl RecoverySuggestion {
    /// Suggest how to recover from a failed step
    pub fn for_failure(error: &StepError, step_title: &str) -> Self {
        match error {
            StepError::Launch { executable, .. } => Self {
                action: format!("Make '{}' launchable", executable),
                steps: vec![
                    format!("Step '{}' could not start its process", step_title),
                    "Check that the executable path is correct for this stage's toolchain".into(),
                    "Check that the step's working directory exists".into(),
                ],
                commands: vec![
                    "# Interpreter paths usually come from .env:".into(),
                    "cat .env".into(),
                    "".into(),
                    "# Check resolution:".into(),
                    format!("which {}", executable),
                ],
            },
            StepError::ExternalStep { exit_code, .. } => Self {
                action: format!("Inspect the output of '{}'", step_title),
                steps: vec![
                    format!("The tool exited with code {}", exit_code),
                    "The stderr tail above usually names the failing input".into(),
                    "Fix the input or the tool, then submit a fresh run".into(),
                ],
                commands: vec![],
            },
            StepError::Timeout { elapsed, .. } => Self {
                action: "Raise the step deadline or shrink the input".into(),
                steps: vec![
                    format!(
                        "'{}' was stopped after {:.0}s",
                        step_title,
                        elapsed.as_secs_f64()
                    ),
                    "Set 'deadline_secs' on the step, or 'command_deadline_secs' under settings".into(),
                ],
                commands: vec![],
            },
            StepError::Staging { reason } => Self {
                action: "Fix the staging directories".into(),
                steps: vec![
                    reason.clone(),
                    "Check that the previous stage wrote where this step reads".into(),
                ],
                commands: vec![],
            },
            StepError::NoArtifact { root } => Self {
                action: "Check the reconstruction stage output".into(),
                steps: vec![
                    format!("No result folder was found under {}", root.display()),
                    "The producing tool must create a fresh subdirectory per run".into(),
                ],
                commands: vec![format!("ls -la {}", root.display())],
            },
            StepError::MeshNotFound { folder } | StepError::TextureNotFound { folder } => Self {
                action: "Check the files the reconstruction stage wrote".into(),
                steps: vec![
                    format!("The newest result folder is {}", folder.display()),
                    "Override 'mesh_candidates' or 'texture_candidates' if the tool names files differently".into(),
                ],
                commands: vec![format!("ls -la {}", folder.display())],
            },
            StepError::Unexpected { message } => Self {
                action: format!("Investigate '{}'", step_title),
                steps: vec![message.clone(), "Re-run with RUST_LOG=avaflow=debug for detail".into()],
                commands: vec![],
            },
            StepError::Cancelled { .. } => Self {
                action: "Submit a fresh run".into(),
                steps: vec!["The run was cancelled; no later steps executed".into()],
                commands: vec![],
            },
        }
    }
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "→ {}", self.action)?;

        for step in &self.steps {
            writeln!(f, "  {}", step)?;
        }

        if !self.commands.is_empty() {
            writeln!(f)?;
            for cmd in &self.commands {
                writeln!(f, "  {}", cmd)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_launch_suggestion_names_executable() {
        let err = StepError::Launch {
            executable: "/usr/bin/python3.7".into(),
            reason: "No such file or directory".into(),
        };
        let suggestion = RecoverySuggestion::for_failure(&err, "Analyzing Image");
        let rendered = suggestion.to_string();
        assert!(rendered.contains("which /usr/bin/python3.7"));
        assert!(rendered.contains("Analyzing Image"));
    }

    #[test]
    fn test_no_artifact_suggestion_lists_root() {
        let err = StepError::NoArtifact {
            root: PathBuf::from("DECA/results"),
        };
        let suggestion = RecoverySuggestion::for_failure(&err, "Moving");
        assert_eq!(suggestion.commands, vec!["ls -la DECA/results".to_string()]);
    }
}
