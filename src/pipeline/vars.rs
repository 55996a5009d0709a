// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 avaflow contributors

//! `${NAME}` substitution in step descriptors

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::OnceLock;

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("variable pattern is valid")
    })
}

/// Variable scope used when building steps
///
/// Lookup order: overrides, then pipeline `vars`, then the process
/// environment.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    values: HashMap<String, String>,
    use_env: bool,
}

impl Variables {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
            use_env: true,
        }
    }

    /// A scope that ignores the process environment
    pub fn isolated() -> Self {
        Self::default()
    }

    /// Layer `values` under anything already defined
    pub fn with_defaults(mut self, values: &HashMap<String, String>) -> Self {
        for (k, v) in values {
            self.values.entry(k.clone()).or_insert_with(|| v.clone());
        }
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned().or_else(|| {
            if self.use_env {
                std::env::var(name).ok()
            } else {
                None
            }
        })
    }

    /// Expand every `${NAME}` in `input`; the error carries the first
    /// undefined name.
    pub fn expand(&self, input: &str) -> Result<String, String> {
        let mut missing = None;
        let expanded = pattern().replace_all(input, |caps: &Captures| {
            let name = &caps[1];
            match self.get(name) {
                Some(value) => value,
                None => {
                    missing.get_or_insert_with(|| name.to_string());
                    String::new()
                }
            }
        });

        match missing {
            Some(name) => Err(name),
            None => Ok(expanded.into_owned()),
        }
    }
}
