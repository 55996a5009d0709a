// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 avaflow contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for avaflow.

pub mod plan;
pub mod run;
pub mod validate;

use clap::{Parser, Subcommand};
use miette::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::pipeline::PipelineDefinition;

/// Avatar pipeline orchestrator
///
/// Runs an ordered list of external tools and file transforms, stopping at
/// the first failure.
#[derive(Parser, Debug)]
#[clap(
    name = "avaflow",
    version,
    about = "Fail-fast orchestrator for multi-stage avatar pipelines",
    long_about = None,
    after_help = "Examples:\n\
        avaflow validate                       Check avaflow.yaml and its tools\n\
        avaflow plan --var INPUT=face.jpg      Show the resolved steps\n\
        avaflow run --events events.jsonl      Run and record progress events\n\n\
        See 'avaflow <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline
    Run {
        /// Pipeline file
        #[clap(short, long, env = "AVAFLOW_PIPELINE", default_value = "avaflow.yaml")]
        pipeline: PathBuf,

        /// Set a variable (repeatable)
        #[clap(long = "var", value_name = "NAME=VALUE", value_parser = parse_var)]
        vars: Vec<(String, String)>,

        /// Write progress events as JSON lines to a file, or '-' for stdout
        #[clap(long, value_name = "PATH")]
        events: Option<String>,

        /// Suppress stage progress output
        #[clap(short, long)]
        quiet: bool,
    },

    /// Validate pipeline configuration
    Validate {
        /// Pipeline file to validate
        #[clap(env = "AVAFLOW_PIPELINE", default_value = "avaflow.yaml")]
        pipeline: PathBuf,

        /// Set a variable (repeatable)
        #[clap(long = "var", value_name = "NAME=VALUE", value_parser = parse_var)]
        vars: Vec<(String, String)>,
    },

    /// Show the steps a run would execute
    Plan {
        /// Pipeline file
        #[clap(env = "AVAFLOW_PIPELINE", default_value = "avaflow.yaml")]
        pipeline: PathBuf,

        /// Set a variable (repeatable)
        #[clap(long = "var", value_name = "NAME=VALUE", value_parser = parse_var)]
        vars: Vec<(String, String)>,

        /// Output format
        #[clap(short, long, default_value = "text")]
        format: PlanFormat,
    },
}

/// Output format for the plan command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanFormat {
    Text,
    Yaml,
}

impl std::str::FromStr for PlanFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "yaml" => Ok(Self::Yaml),
            _ => Err(format!("Unknown plan format: {}", s)),
        }
    }
}

/// Parse `NAME=VALUE`
pub fn parse_var(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", s))?;
    if name.is_empty() {
        return Err(format!("empty variable name in '{}'", s));
    }
    Ok((name.to_string(), value.to_string()))
}

/// Load a pipeline file
pub(crate) fn load_pipeline(path: &Path) -> Result<PipelineDefinition> {
    PipelineDefinition::from_file(path).map_err(Into::into)
}

/// Directory step paths are resolved against
pub(crate) fn base_dir(pipeline_path: &Path) -> Result<PathBuf> {
    let cwd = std::env::current_dir()
        .map_err(|e| miette::miette!("Failed to get current directory: {}", e))?;

    Ok(match pipeline_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => cwd.join(parent),
        _ => cwd,
    })
}

pub(crate) fn overrides(vars: Vec<(String, String)>) -> HashMap<String, String> {
    vars.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var() {
        assert_eq!(
            parse_var("PY_DECA=/opt/deca/bin/python").unwrap(),
            ("PY_DECA".to_string(), "/opt/deca/bin/python".to_string())
        );
        assert_eq!(parse_var("EMPTY=").unwrap().1, "");
        assert_eq!(parse_var("A=b=c").unwrap().1, "b=c");
        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=x").is_err());
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "avaflow", "-v", "run", "--var", "A=1", "--var", "B=2", "--events", "-", "--quiet",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Run {
                vars, events, quiet, ..
            } => {
                assert_eq!(vars.len(), 2);
                assert_eq!(events.as_deref(), Some("-"));
                assert!(quiet);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_base_dir_is_pipeline_parent() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(base_dir(Path::new("avaflow.yaml")).unwrap(), cwd);
        assert_eq!(base_dir(Path::new("conf/avaflow.yaml")).unwrap(), cwd.join("conf"));
    }
}
