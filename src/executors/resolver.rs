// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 avaflow contributors

//! Artifact resolution
//!
//! Reconstruction tools write each result into a freshly created folder
//! under a results root. The resolver picks the newest folder, finds the
//! mesh and texture inside it, copies them to their destinations and
//! consumes the folder.

use std::cmp::Ordering;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::StepError;

/// Placeholder replaced by the chosen folder's name in candidate templates
pub const FOLDER_PLACEHOLDER: &str = "{folder}";

/// Ordered file-name candidates per artifact kind
///
/// Templates may contain `{folder}`, which expands to the basename of the
/// chosen result folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTemplates {
    pub mesh: Vec<String>,
    pub texture: Vec<String>,
    /// Extensions (without dot) accepted by the newest-image fallback
    pub texture_extensions: Vec<String>,
}

impl Default for CandidateTemplates {
    fn default() -> Self {
        Self {
            mesh: vec!["{folder}.obj".into(), "mesh.obj".into()],
            texture: vec![
                "{folder}.png".into(),
                "{folder}.jpg".into(),
                "{folder}.jpeg".into(),
                "texture.png".into(),
                "texture.jpg".into(),
                "texture.jpeg".into(),
            ],
            texture_extensions: vec!["png".into(), "jpg".into(), "jpeg".into()],
        }
    }
}

impl CandidateTemplates {
    fn expand<'a>(templates: &'a [String], folder_name: &'a str) -> impl Iterator<Item = String> + 'a {
        templates
            .iter()
            .map(move |t| t.replace(FOLDER_PLACEHOLDER, folder_name))
    }
}

/// The mesh/texture pair extracted from a result folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedArtifact {
    /// The result folder that was chosen (deleted once consumed)
    pub source_directory: PathBuf,
    /// Mesh at its destination
    pub mesh_path: PathBuf,
    /// Texture at its destination
    pub texture_path: PathBuf,
}

/// Picks the newest result folder and relocates its mesh and texture
#[derive(Debug, Clone)]
pub struct ArtifactResolver {
    templates: CandidateTemplates,
    verify_copies: bool,
}

impl ArtifactResolver {
    pub fn new(templates: CandidateTemplates) -> Self {
        Self {
            templates,
            verify_copies: true,
        }
    }

    /// Compare size and digest of each copy before deleting the source folder
    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify_copies = verify;
        self
    }

    /// Resolve the newest artifact under `results_root`.
    ///
    /// Nothing at the destinations is touched unless both the mesh and the
    /// texture were found and, when enabled, both copies verified. The chosen
    /// folder is removed only after both copies are in place. A retry always
    /// re-enumerates `results_root`.
    pub fn resolve(
        &self,
        results_root: &Path,
        mesh_dest: &Path,
        texture_dest: &Path,
    ) -> Result<ResolvedArtifact, StepError> {
        let folder = select_latest_folder(results_root)?;
        let folder_name = folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        debug!("resolving artifact from {}", folder.display());

        let mesh = first_existing(&folder, CandidateTemplates::expand(&self.templates.mesh, &folder_name))
            .ok_or_else(|| StepError::MeshNotFound {
                folder: folder.clone(),
            })?;

        let texture = first_existing(
            &folder,
            CandidateTemplates::expand(&self.templates.texture, &folder_name),
        )
        .or_else(|| newest_image(&folder, &self.templates.texture_extensions))
        .ok_or_else(|| StepError::TextureNotFound {
            folder: folder.clone(),
        })?;

        ensure_non_empty(&mesh)?;
        ensure_non_empty(&texture)?;

        let mesh_copy = StagedCopy::create(&mesh, mesh_dest)?;
        let texture_copy = StagedCopy::create(&texture, texture_dest)?;

        if self.verify_copies {
            verify_copy(&mesh, &mesh_copy.partial)?;
            verify_copy(&texture, &texture_copy.partial)?;
        }

        let mesh_path = mesh_copy.commit()?;
        let texture_path = texture_copy.commit()?;

        fs::remove_dir_all(&folder).map_err(|e| {
            StepError::staging(format!("deleting consumed folder '{}'", folder.display()), e)
        })?;

        info!(
            "resolved {} -> {}, {}",
            folder.display(),
            mesh_path.display(),
            texture_path.display()
        );

        Ok(ResolvedArtifact {
            source_directory: folder,
            mesh_path,
            texture_path,
        })
    }
}

impl Default for ArtifactResolver {
    fn default() -> Self {
        Self::new(CandidateTemplates::default())
    }
}

/// The subdirectory of `root` with the newest mtime; ties go to the
/// lexicographically greatest name.
pub fn select_latest_folder(root: &Path) -> Result<PathBuf, StepError> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(StepError::NoArtifact {
                root: root.to_path_buf(),
            })
        }
        Err(e) => return Err(StepError::staging(format!("listing '{}'", root.display()), e)),
    };

    let mut best: Option<(SystemTime, String, PathBuf)> = None;
    for entry in entries {
        let entry = entry.map_err(|e| StepError::staging(format!("listing '{}'", root.display()), e))?;
        // Follows symlinks, so a linked result folder counts.
        let meta = match fs::metadata(entry.path()) {
            Ok(meta) if meta.is_dir() => meta,
            _ => continue,
        };
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let name = entry.file_name().to_string_lossy().into_owned();

        let newer = match &best {
            None => true,
            Some((best_time, best_name, _)) => {
                compare_newest((modified, name.as_str()), (*best_time, best_name.as_str()))
                    == Ordering::Greater
            }
        };
        if newer {
            best = Some((modified, name, entry.path()));
        }
    }

    best.map(|(_, _, path)| path).ok_or_else(|| StepError::NoArtifact {
        root: root.to_path_buf(),
    })
}

fn compare_newest(a: (SystemTime, &str), b: (SystemTime, &str)) -> Ordering {
    a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1))
}

fn first_existing(folder: &Path, candidates: impl Iterator<Item = String>) -> Option<PathBuf> {
    candidates.map(|name| folder.join(name)).find(|p| p.is_file())
}

fn newest_image(folder: &Path, extensions: &[String]) -> Option<PathBuf> {
    let entries = fs::read_dir(folder).ok()?;

    let mut best: Option<(SystemTime, String, PathBuf)> = None;
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        let accepted = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false);
        let meta = match fs::metadata(&path) {
            Ok(meta) if meta.is_file() && accepted => meta,
            _ => continue,
        };
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let name = entry.file_name().to_string_lossy().into_owned();

        let newer = match &best {
            None => true,
            Some((t, n, _)) => {
                compare_newest((modified, name.as_str()), (*t, n.as_str())) == Ordering::Greater
            }
        };
        if newer {
            best = Some((modified, name, path));
        }
    }

    best.map(|(_, _, path)| path)
}

fn ensure_non_empty(path: &Path) -> Result<(), StepError> {
    let len = fs::metadata(path)
        .map_err(|e| StepError::staging(format!("inspecting '{}'", path.display()), e))?
        .len();
    if len == 0 {
        return Err(StepError::Staging {
            reason: format!("artifact file '{}' is empty", path.display()),
        });
    }
    Ok(())
}

/// A copy written next to its destination as `.<name>.avaflow-partial`.
///
/// [`commit`](Self::commit) renames it over the target so the destination
/// never disappears; dropping it uncommitted removes the partial file.
struct StagedCopy {
    partial: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedCopy {
    fn create(src: &Path, dest_dir: &Path) -> Result<Self, StepError> {
        let name = src.file_name().ok_or_else(|| StepError::Staging {
            reason: format!("'{}' has no file name", src.display()),
        })?;

        fs::create_dir_all(dest_dir)
            .map_err(|e| StepError::staging(format!("creating '{}'", dest_dir.display()), e))?;

        let copy = Self {
            partial: dest_dir.join(format!(".{}.avaflow-partial", name.to_string_lossy())),
            target: dest_dir.join(name),
            committed: false,
        };
        fs::copy(src, &copy.partial).map_err(|e| {
            StepError::staging(format!("copying '{}' to '{}'", src.display(), dest_dir.display()), e)
        })?;
        Ok(copy)
    }

    fn commit(mut self) -> Result<PathBuf, StepError> {
        fs::rename(&self.partial, &self.target)
            .map_err(|e| StepError::staging(format!("placing '{}'", self.target.display()), e))?;
        self.committed = true;
        Ok(fs::canonicalize(&self.target).unwrap_or_else(|_| self.target.clone()))
    }
}

impl Drop for StagedCopy {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.partial);
        }
    }
}

fn verify_copy(original: &Path, copy: &Path) -> Result<(), StepError> {
    let (original_len, original_hash) = digest(original)?;
    let (copy_len, copy_hash) = digest(copy)?;

    if original_len != copy_len || original_hash != copy_hash {
        return Err(StepError::Staging {
            reason: format!(
                "copy of '{}' does not match its source ({} vs {} bytes); source folder kept",
                original.display(),
                copy_len,
                original_len
            ),
        });
    }
    Ok(())
}

fn digest(path: &Path) -> Result<(u64, blake3::Hash), StepError> {
    let mut file = fs::File::open(path)
        .map_err(|e| StepError::staging(format!("opening '{}'", path.display()), e))?;
    let mut hasher = blake3::Hasher::new();
    let len = io::copy(&mut file, &mut hasher)
        .map_err(|e| StepError::staging(format!("hashing '{}'", path.display()), e))?;
    Ok((len, hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn touch(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn set_mtime(path: &Path, secs: u64) {
        let time = SystemTime::UNIX_EPOCH + Duration::from_secs(secs);
        fs::File::open(path).unwrap().set_modified(time).unwrap();
    }

    struct Layout {
        _tmp: TempDir,
        root: PathBuf,
        mesh_dest: PathBuf,
        texture_dest: PathBuf,
    }

    fn layout() -> Layout {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("results");
        fs::create_dir_all(&root).unwrap();
        Layout {
            root,
            mesh_dest: tmp.path().join("head"),
            texture_dest: tmp.path().join("texture_input"),
            _tmp: tmp,
        }
    }

    #[test]
    fn test_selects_newest_folder_regardless_of_order() {
        let l = layout();
        for (name, mtime) in [("a", 10), ("b", 30), ("c", 20)] {
            let dir = l.root.join(name);
            fs::create_dir_all(&dir).unwrap();
            set_mtime(&dir, mtime);
        }

        let chosen = select_latest_folder(&l.root).unwrap();
        assert_eq!(chosen.file_name().unwrap(), "b");
    }

    #[test]
    fn test_mtime_tie_breaks_on_greatest_name() {
        let l = layout();
        for name in ["run_a", "run_c", "run_b"] {
            let dir = l.root.join(name);
            fs::create_dir_all(&dir).unwrap();
            set_mtime(&dir, 100);
        }

        let chosen = select_latest_folder(&l.root).unwrap();
        assert_eq!(chosen.file_name().unwrap(), "run_c");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_folder_is_selected() {
        let l = layout();
        let old = l.root.join("session1");
        fs::create_dir_all(&old).unwrap();
        set_mtime(&old, 100);

        let elsewhere = l._tmp.path().join("scratch/session2");
        touch(&elsewhere.join("session2.obj"), "v");
        set_mtime(&elsewhere, 200);
        std::os::unix::fs::symlink(&elsewhere, l.root.join("session2")).unwrap();

        let chosen = select_latest_folder(&l.root).unwrap();
        assert_eq!(chosen, l.root.join("session2"));
    }

    #[test]
    fn test_empty_root_is_no_artifact() {
        let l = layout();
        touch(&l.root.join("stray.png"), "x");
        let err = select_latest_folder(&l.root).unwrap_err();
        assert!(matches!(err, StepError::NoArtifact { .. }));

        let err = select_latest_folder(&l.root.join("missing")).unwrap_err();
        assert!(matches!(err, StepError::NoArtifact { .. }));
    }

    #[test]
    fn test_resolve_copies_and_consumes_folder() {
        let l = layout();
        let folder = l.root.join("session1");
        touch(&folder.join("session1.obj"), "v 0 0 0");
        touch(&folder.join("session1.png"), "png-bytes");
        touch(&folder.join("session1_detail.obj"), "ignored");

        let artifact = ArtifactResolver::default()
            .resolve(&l.root, &l.mesh_dest, &l.texture_dest)
            .unwrap();

        assert_eq!(artifact.source_directory, folder);
        assert!(!folder.exists());
        assert_eq!(artifact.mesh_path.file_name().unwrap(), "session1.obj");
        assert_eq!(artifact.texture_path.file_name().unwrap(), "session1.png");
        assert_eq!(fs::read_to_string(l.mesh_dest.join("session1.obj")).unwrap(), "v 0 0 0");
        assert_eq!(
            fs::read_to_string(l.texture_dest.join("session1.png")).unwrap(),
            "png-bytes"
        );
        // No partial files left behind.
        assert_eq!(fs::read_dir(&l.mesh_dest).unwrap().count(), 1);
    }

    #[test]
    fn test_resolve_overwrites_existing_destination() {
        let l = layout();
        touch(&l.mesh_dest.join("mesh.obj"), "stale");
        let folder = l.root.join("20240101_120000");
        touch(&folder.join("mesh.obj"), "fresh");
        touch(&folder.join("texture.jpg"), "jpg");

        ArtifactResolver::default()
            .resolve(&l.root, &l.mesh_dest, &l.texture_dest)
            .unwrap();

        assert_eq!(fs::read_to_string(l.mesh_dest.join("mesh.obj")).unwrap(), "fresh");
        assert!(l.texture_dest.join("texture.jpg").is_file());
    }

    #[test]
    fn test_missing_mesh_leaves_destinations_untouched() {
        let l = layout();
        let folder = l.root.join("session1");
        touch(&folder.join("session1.png"), "png");

        let err = ArtifactResolver::default()
            .resolve(&l.root, &l.mesh_dest, &l.texture_dest)
            .unwrap_err();

        assert!(matches!(err, StepError::MeshNotFound { .. }));
        assert!(!l.mesh_dest.exists());
        assert!(!l.texture_dest.exists());
        assert!(folder.join("session1.png").is_file());
    }

    #[test]
    fn test_missing_texture_fails() {
        let l = layout();
        touch(&l.root.join("session1/session1.obj"), "v");
        touch(&l.root.join("session1/notes.txt"), "txt");

        let err = ArtifactResolver::default()
            .resolve(&l.root, &l.mesh_dest, &l.texture_dest)
            .unwrap_err();

        assert!(matches!(err, StepError::TextureNotFound { .. }));
        assert!(!l.mesh_dest.exists());
    }

    #[test]
    fn test_texture_falls_back_to_newest_image() {
        let l = layout();
        let folder = l.root.join("session1");
        touch(&folder.join("session1.obj"), "v");
        touch(&folder.join("albedo.PNG"), "older");
        touch(&folder.join("shading.jpeg"), "newer");
        set_mtime(&folder.join("albedo.PNG"), 100);
        set_mtime(&folder.join("shading.jpeg"), 200);

        let artifact = ArtifactResolver::default()
            .resolve(&l.root, &l.mesh_dest, &l.texture_dest)
            .unwrap();

        assert_eq!(artifact.texture_path.file_name().unwrap(), "shading.jpeg");
    }

    #[test]
    fn test_folder_named_texture_wins_over_generic_name() {
        let l = layout();
        let folder = l.root.join("face");
        touch(&folder.join("face.obj"), "v");
        touch(&folder.join("texture.png"), "generic");
        touch(&folder.join("face.jpg"), "named");

        let artifact = ArtifactResolver::default()
            .resolve(&l.root, &l.mesh_dest, &l.texture_dest)
            .unwrap();

        assert_eq!(artifact.texture_path.file_name().unwrap(), "face.jpg");
    }

    #[test]
    fn test_custom_templates() {
        let l = layout();
        let folder = l.root.join("run7");
        touch(&folder.join("run7_detail.obj"), "v");
        touch(&folder.join("run7_albedo.png"), "png");

        let templates = CandidateTemplates {
            mesh: vec!["{folder}_detail.obj".into()],
            texture: vec!["{folder}_albedo.png".into()],
            texture_extensions: vec![],
        };
        let artifact = ArtifactResolver::new(templates)
            .resolve(&l.root, &l.mesh_dest, &l.texture_dest)
            .unwrap();

        assert_eq!(artifact.mesh_path.file_name().unwrap(), "run7_detail.obj");
    }

    #[test]
    fn test_empty_mesh_is_rejected() {
        let l = layout();
        touch(&l.root.join("s/s.obj"), "");
        touch(&l.root.join("s/s.png"), "png");

        let err = ArtifactResolver::default()
            .resolve(&l.root, &l.mesh_dest, &l.texture_dest)
            .unwrap_err();

        assert_eq!(err.kind(), "staging_failure");
        assert!(l.root.join("s").is_dir());
    }

    #[test]
    fn test_failed_verification_leaves_destination_untouched() {
        let l = layout();
        let src = l.root.join("session1/session1.obj");
        touch(&src, "fresh");
        touch(&l.mesh_dest.join("session1.obj"), "stale");

        let copy = StagedCopy::create(&src, &l.mesh_dest).unwrap();
        verify_copy(&src, &copy.partial).unwrap();
        fs::write(&copy.partial, "corrupted").unwrap();

        let err = verify_copy(&src, &copy.partial).unwrap_err();
        assert_eq!(err.kind(), "staging_failure");
        drop(copy);

        assert_eq!(
            fs::read_to_string(l.mesh_dest.join("session1.obj")).unwrap(),
            "stale"
        );
        assert_eq!(fs::read_dir(&l.mesh_dest).unwrap().count(), 1);
    }

    #[test]
    fn test_committed_copy_replaces_destination() {
        let l = layout();
        let src = l.root.join("session1/session1.png");
        touch(&src, "fresh");
        touch(&l.texture_dest.join("session1.png"), "stale");

        let copy = StagedCopy::create(&src, &l.texture_dest).unwrap();
        assert_eq!(
            fs::read_to_string(l.texture_dest.join("session1.png")).unwrap(),
            "stale"
        );
        let placed = copy.commit().unwrap();

        assert_eq!(fs::read_to_string(&placed).unwrap(), "fresh");
        assert_eq!(fs::read_dir(&l.texture_dest).unwrap().count(), 1);
        assert!(src.is_file());
    }
}
