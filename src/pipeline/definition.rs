// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 avaflow contributors

//! Pipeline definition structures
//!
//! Defines the schema for avaflow.yaml files and the resolved step types
//! the driver executes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::vars::Variables;
use crate::errors::AvaflowError;
use crate::executors::{CandidateTemplates, COMMAND_EXECUTOR, DEFAULT_TAIL_BYTES, TRANSFORM_EXECUTOR};
use crate::progress::BackpressurePolicy;

/// Pipeline definition from avaflow.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Pipeline version (for future compatibility)
    #[serde(default = "default_version")]
    pub version: String,

    /// Pipeline name
    pub name: String,

    /// Pipeline description
    #[serde(default)]
    pub description: Option<String>,

    /// Substitution variables, referenced as `${NAME}`
    #[serde(default)]
    pub vars: HashMap<String, String>,

    /// Runtime settings
    #[serde(default)]
    pub settings: Settings,

    /// Steps in execution order
    pub steps: Vec<StepSpec>,
}

fn default_version() -> String {
    "1".to_string()
}

impl PipelineDefinition {
    /// Load a pipeline from a YAML or TOML file (by extension)
    pub fn from_file(path: &Path) -> Result<Self, AvaflowError> {
        if !path.exists() {
            return Err(AvaflowError::PipelineNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| AvaflowError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Parse pipeline from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, AvaflowError> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Parse pipeline from TOML string
    pub fn from_toml(source: &str) -> Result<Self, AvaflowError> {
        toml::from_str(source).map_err(Into::into)
    }

    /// Serialize pipeline to YAML
    pub fn to_yaml(&self) -> Result<String, AvaflowError> {
        serde_yaml::to_string(self).map_err(Into::into)
    }

    /// Get all step titles
    pub fn step_titles(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.title.as_str()).collect()
    }

    /// Resolve every step descriptor into an executable step.
    ///
    /// `overrides` take precedence over the file's `vars`, which take
    /// precedence over the process environment. Relative directories are
    /// resolved against `base_dir`; relative operation paths against the
    /// step's own directory.
    pub fn build_steps(
        &self,
        base_dir: &Path,
        overrides: &HashMap<String, String>,
    ) -> Result<Vec<PipelineStep>, AvaflowError> {
        let mut vars = Variables::new();
        for (k, v) in overrides {
            vars.set(k.clone(), v.clone());
        }
        let vars = vars.with_defaults(&self.vars);

        self.build_steps_with(base_dir, &vars)
    }

    /// Like [`build_steps`](Self::build_steps) with an explicit variable scope
    pub fn build_steps_with(
        &self,
        base_dir: &Path,
        vars: &Variables,
    ) -> Result<Vec<PipelineStep>, AvaflowError> {
        self.steps
            .iter()
            .map(|spec| spec.build(base_dir, vars, &self.settings))
            .collect()
    }
}

/// Runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Default deadline for external commands, in seconds
    #[serde(default = "default_command_deadline")]
    pub command_deadline_secs: u64,

    /// Bytes kept from the end of each output stream
    #[serde(default = "default_tail_bytes")]
    pub output_tail_bytes: usize,

    /// Capacity of the outbound progress queue
    #[serde(default = "default_queue_capacity")]
    pub progress_queue_capacity: usize,

    /// What to drop when the progress queue is full
    #[serde(default)]
    pub backpressure: BackpressurePolicy,

    /// Verify copied artifacts before deleting their result folder
    #[serde(default = "default_true")]
    pub verify_artifact_copies: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            command_deadline_secs: default_command_deadline(),
            output_tail_bytes: default_tail_bytes(),
            progress_queue_capacity: default_queue_capacity(),
            backpressure: BackpressurePolicy::default(),
            verify_artifact_copies: true,
        }
    }
}

impl Settings {
    pub fn command_deadline(&self) -> Duration {
        Duration::from_secs(self.command_deadline_secs)
    }
}

fn default_command_deadline() -> u64 {
    30 * 60
}

fn default_tail_bytes() -> usize {
    DEFAULT_TAIL_BYTES
}

fn default_queue_capacity() -> usize {
    64
}

fn default_true() -> bool {
    true
}

fn default_dir() -> String {
    ".".to_string()
}

/// A step descriptor as written in the pipeline file
///
/// Exactly one of `command` and `operation` must be present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    /// Human-readable title, used in diagnostics
    pub title: String,

    /// Step description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Working directory, relative to the pipeline base directory
    #[serde(default = "default_dir")]
    pub dir: String,

    /// External tool invocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandSpec>,

    /// In-process operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<OperationSpec>,
}

impl StepSpec {
    /// Short label for the step's action
    pub fn action_label(&self) -> &'static str {
        match (&self.command, &self.operation) {
            (Some(_), None) => COMMAND_EXECUTOR,
            (None, Some(op)) => op.kind(),
            _ => "invalid",
        }
    }

    fn build(
        &self,
        base_dir: &Path,
        vars: &Variables,
        settings: &Settings,
    ) -> Result<PipelineStep, AvaflowError> {
        let expand = |value: &str| {
            vars.expand(value).map_err(|name| AvaflowError::UndefinedVariable {
                name,
                step: self.title.clone(),
            })
        };

        let working_directory = base_dir.join(expand(&self.dir)?);
        let path = |value: &str| -> Result<PathBuf, AvaflowError> {
            Ok(working_directory.join(expand(value)?))
        };

        let action = match (&self.command, &self.operation) {
            (Some(command), None) => {
                let mut env = HashMap::new();
                for (k, v) in &command.env {
                    env.insert(k.clone(), expand(v)?);
                }

                StepAction::ExternalCommand(ExternalCommand {
                    executable: expand(&command.executable)?,
                    args: command
                        .args
                        .iter()
                        .map(|a| expand(a))
                        .collect::<Result<_, _>>()?,
                    env,
                    deadline: command
                        .deadline_secs
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| settings.command_deadline()),
                })
            }
            (None, Some(operation)) => StepAction::InProcessTransform(match operation {
                OperationSpec::MoveAll { from, to } => Transform::MoveAll {
                    from: path(from)?,
                    to: path(to)?,
                },
                OperationSpec::MoveFile { from, to } => Transform::MoveFile {
                    from: path(from)?,
                    to: path(to)?,
                },
                OperationSpec::DeleteMatching { dir, pattern } => Transform::DeleteMatching {
                    dir: path(dir)?,
                    pattern: glob::Pattern::new(&expand(pattern)?)?,
                },
                OperationSpec::Clear { dir, subdirs } => Transform::RecursiveClear {
                    dir: path(dir)?,
                    subdirs: subdirs.iter().map(|s| expand(s)).collect::<Result<_, _>>()?,
                },
                OperationSpec::ResolveArtifact {
                    results_root,
                    mesh_dest,
                    texture_dest,
                    mesh_candidates,
                    texture_candidates,
                } => {
                    let mut templates = CandidateTemplates::default();
                    if let Some(mesh) = mesh_candidates {
                        templates.mesh = mesh.clone();
                    }
                    if let Some(texture) = texture_candidates {
                        templates.texture = texture.clone();
                    }
                    Transform::ResolveArtifact {
                        results_root: path(results_root)?,
                        mesh_dest: path(mesh_dest)?,
                        texture_dest: path(texture_dest)?,
                        templates,
                    }
                }
            }),
            (Some(_), Some(_)) => {
                return Err(AvaflowError::InvalidStep {
                    step: self.title.clone(),
                    reason: "a step takes either 'command' or 'operation', not both".into(),
                })
            }
            (None, None) => {
                return Err(AvaflowError::InvalidStep {
                    step: self.title.clone(),
                    reason: "a step needs a 'command' or an 'operation'".into(),
                })
            }
        };

        Ok(PipelineStep {
            title: self.title.clone(),
            working_directory,
            action,
        })
    }
}

/// External tool invocation as written in the pipeline file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Program to run; per-stage interpreters usually come from `${VARS}`
    pub executable: String,

    /// Arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment for this command only
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Deadline override in seconds
    #[serde(default)]
    pub deadline_secs: Option<u64>,
}

/// In-process operation as written in the pipeline file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationSpec {
    /// Move every file from one directory to another
    MoveAll { from: String, to: String },

    /// Move a single file
    MoveFile { from: String, to: String },

    /// Delete files whose name matches a glob
    DeleteMatching { dir: String, pattern: String },

    /// Empty named subdirectories, keeping them in place
    Clear { dir: String, subdirs: Vec<String> },

    /// Relocate the newest mesh/texture pair from a results root
    ResolveArtifact {
        results_root: String,
        mesh_dest: String,
        texture_dest: String,
        #[serde(default)]
        mesh_candidates: Option<Vec<String>>,
        #[serde(default)]
        texture_candidates: Option<Vec<String>>,
    },
}

impl OperationSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MoveAll { .. } => "move_all",
            Self::MoveFile { .. } => "move_file",
            Self::DeleteMatching { .. } => "delete_matching",
            Self::Clear { .. } => "clear",
            Self::ResolveArtifact { .. } => "resolve_artifact",
        }
    }
}

/// One unit of pipeline work, ready to execute
#[derive(Debug, Clone)]
pub struct PipelineStep {
    /// Human-readable title
    pub title: String,
    /// Directory the step executes relative to
    pub working_directory: PathBuf,
    /// What the step does
    pub action: StepAction,
}

impl PipelineStep {
    /// Build an external-command step
    pub fn command(
        title: impl Into<String>,
        working_directory: impl Into<PathBuf>,
        command: ExternalCommand,
    ) -> Self {
        Self {
            title: title.into(),
            working_directory: working_directory.into(),
            action: StepAction::ExternalCommand(command),
        }
    }

    /// Build an in-process transform step
    pub fn transform(
        title: impl Into<String>,
        working_directory: impl Into<PathBuf>,
        transform: Transform,
    ) -> Self {
        Self {
            title: title.into(),
            working_directory: working_directory.into(),
            action: StepAction::InProcessTransform(transform),
        }
    }
}

/// The two kinds of step action
#[derive(Debug, Clone)]
pub enum StepAction {
    /// Out-of-process tool
    ExternalCommand(ExternalCommand),
    /// Staging, cleanup or resolution done by the driver's process
    InProcessTransform(Transform),
}

impl StepAction {
    /// Key of the executor that handles this action
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ExternalCommand(_) => COMMAND_EXECUTOR,
            Self::InProcessTransform(_) => TRANSFORM_EXECUTOR,
        }
    }
}

/// A fully resolved external command
#[derive(Debug, Clone)]
pub struct ExternalCommand {
    pub executable: String,
    pub args: Vec<String>,
    /// Per-command environment (toolchain selection lives here)
    pub env: HashMap<String, String>,
    pub deadline: Duration,
}

/// A fully resolved in-process operation
#[derive(Debug, Clone)]
pub enum Transform {
    MoveAll {
        from: PathBuf,
        to: PathBuf,
    },
    MoveFile {
        from: PathBuf,
        to: PathBuf,
    },
    DeleteMatching {
        dir: PathBuf,
        pattern: glob::Pattern,
    },
    RecursiveClear {
        dir: PathBuf,
        subdirs: Vec<String>,
    },
    ResolveArtifact {
        results_root: PathBuf,
        mesh_dest: PathBuf,
        texture_dest: PathBuf,
        templates: CandidateTemplates,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    const AVATAR: &str = r#"
version: "1"
name: "avatar"
vars:
  GENDER: male
  PY37: /usr/bin/python3.7
settings:
  command_deadline_secs: 600
steps:
  - title: "Moving Input Image"
    operation:
      kind: move_all
      from: input
      to: hair_mapper/stylegan-encoder/raw_images
  - title: "Analyzing Image"
    dir: hair_mapper/stylegan-encoder
    command:
      executable: ${PY37}
      args: [align_images.py, raw_images, aligned_images]
  - title: "Final Rendering"
    dir: Blender
    command:
      executable: ${PY37}
      args: [blender_merging.py, --g, "${GENDER}"]
      deadline_secs: 1800
  - title: "Moving"
    operation:
      kind: resolve_artifact
      results_root: DECA/TestSamples/examples/results
      mesh_dest: Blender/head
      texture_dest: Texture/input
"#;

    #[test]
    fn test_parse_avatar_pipeline() {
        let pipeline = PipelineDefinition::from_yaml(AVATAR).unwrap();
        assert_eq!(pipeline.name, "avatar");
        assert_eq!(pipeline.steps.len(), 4);
        assert_eq!(pipeline.settings.command_deadline_secs, 600);
        assert_eq!(pipeline.settings.output_tail_bytes, DEFAULT_TAIL_BYTES);
        assert_eq!(pipeline.steps[0].action_label(), "move_all");
        assert_eq!(pipeline.steps[1].action_label(), "command");
    }

    #[test]
    fn test_build_steps_substitutes_and_resolves_paths() {
        let pipeline = PipelineDefinition::from_yaml(AVATAR).unwrap();
        let mut overrides = HashMap::new();
        overrides.insert("GENDER".to_string(), "female".to_string());

        let steps = pipeline.build_steps(Path::new("/work"), &overrides).unwrap();

        match &steps[0].action {
            StepAction::InProcessTransform(Transform::MoveAll { from, to }) => {
                assert_eq!(from, &PathBuf::from("/work/./input"));
                assert_eq!(to, &PathBuf::from("/work/./hair_mapper/stylegan-encoder/raw_images"));
            }
            other => panic!("expected move_all, got {:?}", other),
        }

        match &steps[1].action {
            StepAction::ExternalCommand(cmd) => {
                assert_eq!(cmd.executable, "/usr/bin/python3.7");
                assert_eq!(cmd.deadline, Duration::from_secs(600));
            }
            other => panic!("expected command, got {:?}", other),
        }
        assert_eq!(
            steps[1].working_directory,
            PathBuf::from("/work/hair_mapper/stylegan-encoder")
        );

        match &steps[2].action {
            StepAction::ExternalCommand(cmd) => {
                assert_eq!(cmd.args, vec!["blender_merging.py", "--g", "female"]);
                assert_eq!(cmd.deadline, Duration::from_secs(1800));
            }
            other => panic!("expected command, got {:?}", other),
        }

        assert_eq!(steps[3].action.kind(), TRANSFORM_EXECUTOR);
    }

    #[test]
    fn test_step_needs_exactly_one_action() {
        let yaml = r#"
name: "broken"
steps:
  - title: "nothing"
"#;
        let pipeline = PipelineDefinition::from_yaml(yaml).unwrap();
        let err = pipeline
            .build_steps(Path::new("."), &HashMap::new())
            .unwrap_err();
        assert!(matches!(err, AvaflowError::InvalidStep { .. }));

        let yaml = r#"
name: "broken"
steps:
  - title: "both"
    command: { executable: "true" }
    operation: { kind: clear, dir: ".", subdirs: [a] }
"#;
        let pipeline = PipelineDefinition::from_yaml(yaml).unwrap();
        assert_eq!(pipeline.steps[0].action_label(), "invalid");
        assert!(pipeline.build_steps(Path::new("."), &HashMap::new()).is_err());
    }

    #[test]
    fn test_undefined_variable_names_step() {
        let yaml = r#"
name: "vars"
steps:
  - title: "Encoding image"
    command:
      executable: ${AVAFLOW_SURELY_UNDEFINED_VAR}
"#;
        let pipeline = PipelineDefinition::from_yaml(yaml).unwrap();
        match pipeline.build_steps(Path::new("."), &HashMap::new()) {
            Err(AvaflowError::UndefinedVariable { name, step }) => {
                assert_eq!(name, "AVAFLOW_SURELY_UNDEFINED_VAR");
                assert_eq!(step, "Encoding image");
            }
            other => panic!("expected undefined variable, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_toml_pipeline() {
        let source = r#"
name = "cleanup"

[[steps]]
title = "Cleaning Up"
dir = "Blender"

[steps.operation]
kind = "delete_matching"
dir = "output"
pattern = "*.glb"
"#;
        let pipeline = PipelineDefinition::from_toml(source).unwrap();
        let steps = pipeline
            .build_steps(Path::new("/srv"), &HashMap::new())
            .unwrap();
        match &steps[0].action {
            StepAction::InProcessTransform(Transform::DeleteMatching { dir, pattern }) => {
                assert_eq!(dir, &PathBuf::from("/srv/Blender/output"));
                assert!(pattern.matches("avatar.glb"));
            }
            other => panic!("expected delete_matching, got {:?}", other),
        }
    }

    #[test]
    fn test_round_trip_yaml() {
        let pipeline = PipelineDefinition::from_yaml(AVATAR).unwrap();
        let yaml = pipeline.to_yaml().unwrap();
        let parsed = PipelineDefinition::from_yaml(&yaml).unwrap();

        assert_eq!(parsed.name, pipeline.name);
        assert_eq!(parsed.step_titles(), pipeline.step_titles());
    }
}
