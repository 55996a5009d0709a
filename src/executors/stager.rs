// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 avaflow contributors

//! Filesystem staging
//!
//! Moves and clears files between stage working directories so each stage
//! sees exactly the inputs the previous one left for it.

use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::errors::StepError;

/// Staging transforms executed in-process by the driver
#[derive(Debug, Clone, Copy, Default)]
pub struct FilesystemStager;

impl FilesystemStager {
    pub fn new() -> Self {
        Self
    }

    /// Move every regular file directly inside `src` into `dst`.
    ///
    /// `dst` is created if missing and colliding names are overwritten.
    /// Subdirectories of `src` are left alone. Returns the moved files at
    /// their new location.
    pub fn move_all_files(&self, src: &Path, dst: &Path) -> Result<Vec<PathBuf>, StepError> {
        if !src.is_dir() {
            return Err(StepError::Staging {
                reason: format!("source directory '{}' does not exist", src.display()),
            });
        }

        fs::create_dir_all(dst)
            .map_err(|e| StepError::staging(format!("creating '{}'", dst.display()), e))?;

        let mut moved = Vec::new();
        for entry in read_dir(src)? {
            let entry =
                entry.map_err(|e| StepError::staging(format!("reading '{}'", src.display()), e))?;
            let file_type = entry
                .file_type()
                .map_err(|e| StepError::staging(format!("inspecting '{}'", entry.path().display()), e))?;
            if !file_type.is_file() {
                continue;
            }

            let target = dst.join(entry.file_name());
            self.move_file(&entry.path(), &target)?;
            moved.push(target);
        }

        debug!(
            "moved {} file(s) from {} to {}",
            moved.len(),
            src.display(),
            dst.display()
        );
        Ok(moved)
    }

    /// Move one file, creating the destination's parent and replacing any
    /// existing file there.
    pub fn move_file(&self, from: &Path, to: &Path) -> Result<(), StepError> {
        if !from.is_file() {
            return Err(StepError::Staging {
                reason: format!("file '{}' does not exist", from.display()),
            });
        }

        if let Some(parent) = to.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| StepError::staging(format!("creating '{}'", parent.display()), e))?;
        }

        if is_same_file(from, to) {
            debug!("{} is already in place", from.display());
            return Ok(());
        }

        // rename replaces `to` atomically but fails across filesystems;
        // fall back to a sibling copy renamed over the target.
        if fs::rename(from, to).is_err() {
            let partial = partial_sibling(to);
            if let Err(e) = fs::copy(from, &partial).and_then(|_| fs::rename(&partial, to)) {
                let _ = fs::remove_file(&partial);
                return Err(StepError::staging(
                    format!("moving '{}' to '{}'", from.display(), to.display()),
                    e,
                ));
            }
            fs::remove_file(from)
                .map_err(|e| StepError::staging(format!("removing '{}'", from.display()), e))?;
        }

        Ok(())
    }

    /// Delete regular files directly inside `dir` that satisfy `predicate`.
    ///
    /// A missing `dir` means there is nothing to clean. Returns the number of
    /// files removed.
    pub fn delete_matching<F>(&self, dir: &Path, predicate: F) -> Result<usize, StepError>
    where
        F: Fn(&Path) -> bool,
    {
        if !dir.is_dir() {
            debug!("{} does not exist; nothing to delete", dir.display());
            return Ok(0);
        }

        let mut removed = 0;
        for entry in read_dir(dir)? {
            let entry =
                entry.map_err(|e| StepError::staging(format!("reading '{}'", dir.display()), e))?;
            let path = entry.path();
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file || !predicate(&path) {
                continue;
            }

            fs::remove_file(&path)
                .map_err(|e| StepError::staging(format!("deleting '{}'", path.display()), e))?;
            removed += 1;
        }

        debug!("deleted {} file(s) in {}", removed, dir.display());
        Ok(removed)
    }

    /// Delete files in `dir` whose name matches a glob such as `*.png`
    pub fn delete_matching_pattern(
        &self,
        dir: &Path,
        pattern: &glob::Pattern,
    ) -> Result<usize, StepError> {
        self.delete_matching(dir, |path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| pattern.matches(n))
                .unwrap_or(false)
        })
    }

    /// Empty each named subdirectory of `dir` while keeping the subdirectory
    /// itself, so the next run can write into it again.
    ///
    /// Missing subdirectories are created empty. Returns the number of
    /// entries removed.
    pub fn recursive_clear(&self, dir: &Path, subdirs: &[String]) -> Result<usize, StepError> {
        if let Some(name) = subdirs.iter().find(|name| !is_plain_name(name)) {
            return Err(StepError::Staging {
                reason: format!(
                    "subdirectory '{}' of '{}' must be a single directory name",
                    name,
                    dir.display()
                ),
            });
        }

        let mut removed = 0;

        for name in subdirs {
            let target = dir.join(name);
            if !target.is_dir() {
                fs::create_dir_all(&target)
                    .map_err(|e| StepError::staging(format!("creating '{}'", target.display()), e))?;
                continue;
            }

            for entry in read_dir(&target)? {
                let entry = entry
                    .map_err(|e| StepError::staging(format!("reading '{}'", target.display()), e))?;
                let path = entry.path();
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);

                let result = if is_dir {
                    fs::remove_dir_all(&path)
                } else {
                    fs::remove_file(&path)
                };
                result.map_err(|e| StepError::staging(format!("removing '{}'", path.display()), e))?;
                removed += 1;
            }
        }

        debug!(
            "cleared {} entr{} under {}",
            removed,
            if removed == 1 { "y" } else { "ies" },
            dir.display()
        );
        Ok(removed)
    }
}

/// True when `name` is exactly one normal path component: no separators,
/// no `..`, no root or prefix.
pub fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn partial_sibling(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.avaflow-partial", name))
}

fn read_dir(dir: &Path) -> Result<fs::ReadDir, StepError> {
    fs::read_dir(dir).map_err(|e| StepError::staging(format!("listing '{}'", dir.display()), e))
}
