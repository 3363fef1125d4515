//! Per-attempt fixture workspaces.
//!
//! Every attempt gets a fresh temporary directory holding a writable copy of
//! the task's declared fixtures. The source fixture tree is only ever read,
//! and the directory is removed when the [`TrialWorkspace`] drops.

use std::fs;
use std::path::{Component, Path, PathBuf};

use tempfile::TempDir;
use walkdir::WalkDir;

use crate::domain::{BenchmarkSpec, FixtureRef, Result, SkillGaugeError, TaskDefinition};

/// Default fixture directory name, relative to the spec file.
pub const DEFAULT_FIXTURES_DIR: &str = "fixtures";

/// Join `rel` onto `root`, refusing absolute paths and `..` escapes.
pub fn confine(root: &Path, rel: &str) -> std::result::Result<PathBuf, String> {
    let mut clean = PathBuf::new();
    for component in Path::new(rel).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !clean.pop() {
                    return Err(format!("path {rel:?} escapes {}", root.display()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!("path {rel:?} must be relative"));
            }
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(format!("path {rel:?} does not name a file"));
    }
    Ok(root.join(clean))
}

/// Fixture directory for `task`: its own `context_root`, else the spec's
/// `fixtures_dir`, both relative to `spec_dir`.
pub fn fixture_root(spec: &BenchmarkSpec, task: &TaskDefinition, spec_dir: &Path) -> PathBuf {
    let rel = task
        .context_root
        .as_deref()
        .or(spec.config.fixtures_dir.as_deref())
        .unwrap_or(DEFAULT_FIXTURES_DIR);
    spec_dir.join(rel)
}

/// Check that every on-disk fixture of `task` exists under `root`.
pub fn check_fixtures(task: &TaskDefinition, root: &Path) -> Result<()> {
    for file in task.inputs.files.iter().filter(|f| f.is_on_disk()) {
        let path = confine(root, &file.path).map_err(|reason| SkillGaugeError::UnresolvedPath {
            path: PathBuf::from(&file.path),
            reason,
        })?;
        if !path.exists() {
            return Err(SkillGaugeError::UnresolvedPath {
                path,
                reason: format!("fixture for task {} not found", task.id),
            });
        }
    }
    Ok(())
}

/// A disposable, writable copy of a task's fixtures.
#[derive(Debug)]
pub struct TrialWorkspace {
    dir: TempDir,
}

impl TrialWorkspace {
    /// Create a fresh workspace and copy `files` into it.
    ///
    /// Inline fixtures are written from their `content`; the rest are
    /// copied from `fixture_root`, recursively for directories.
    pub fn materialize(fixture_root: &Path, files: &[FixtureRef]) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("skillgauge-").tempdir()?;

        for file in files {
            let dest = confine(dir.path(), &file.path).map_err(|reason| {
                SkillGaugeError::UnresolvedPath {
                    path: PathBuf::from(&file.path),
                    reason,
                }
            })?;
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }

            match &file.content {
                Some(content) => fs::write(&dest, content)?,
                None => {
                    let src = confine(fixture_root, &file.path).map_err(|reason| {
                        SkillGaugeError::UnresolvedPath {
                            path: PathBuf::from(&file.path),
                            reason,
                        }
                    })?;
                    copy_path(&src, &dest)?;
                }
            }
        }

        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

fn copy_path(src: &Path, dest: &Path) -> Result<()> {
    let meta = fs::metadata(src).map_err(|e| SkillGaugeError::UnresolvedPath {
        path: src.to_path_buf(),
        reason: e.to_string(),
    })?;
    if meta.is_file() {
        fs::copy(src, dest)?;
        return Ok(());
    }

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| SkillGaugeError::UnresolvedPath {
            path: src.to_path_buf(),
            reason: e.to_string(),
        })?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| SkillGaugeError::UnresolvedPath {
                path: entry.path().to_path_buf(),
                reason: e.to_string(),
            })?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(path: &str, content: Option<&str>) -> FixtureRef {
        FixtureRef {
            path: path.to_string(),
            content: content.map(str::to_string),
        }
    }

    #[test]
    fn test_confine_rejects_escapes() {
        let root = Path::new("/ws");
        assert_eq!(confine(root, "a/b.txt").unwrap(), PathBuf::from("/ws/a/b.txt"));
        assert_eq!(confine(root, "a/../b.txt").unwrap(), PathBuf::from("/ws/b.txt"));
        assert!(confine(root, "../etc/passwd").is_err());
        assert!(confine(root, "a/../../x").is_err());
        assert!(confine(root, "/etc/passwd").is_err());
        assert!(confine(root, ".").is_err());
    }

    #[test]
    fn test_materialize_copies_and_isolates() {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("main.py"), "print('hi')").unwrap();
        fs::create_dir_all(src.path().join("pkg/sub")).unwrap();
        fs::write(src.path().join("pkg/sub/mod.py"), "x = 1").unwrap();

        let files = vec![
            fixture("main.py", None),
            fixture("pkg", None),
            fixture("notes/readme.md", Some("inline")),
        ];
        let ws = TrialWorkspace::materialize(src.path(), &files).unwrap();

        assert_eq!(
            fs::read_to_string(ws.path().join("main.py")).unwrap(),
            "print('hi')"
        );
        assert_eq!(
            fs::read_to_string(ws.path().join("pkg/sub/mod.py")).unwrap(),
            "x = 1"
        );
        assert_eq!(
            fs::read_to_string(ws.path().join("notes/readme.md")).unwrap(),
            "inline"
        );

        // Writes in the workspace never reach the source tree.
        fs::write(ws.path().join("main.py"), "mutated").unwrap();
        assert_eq!(
            fs::read_to_string(src.path().join("main.py")).unwrap(),
            "print('hi')"
        );
    }

    #[test]
    fn test_workspace_removed_on_drop() {
        let src = tempfile::tempdir().unwrap();
        let ws = TrialWorkspace::materialize(src.path(), &[]).unwrap();
        let path = ws.path().to_path_buf();
        assert!(path.exists());
        drop(ws);
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_fixture_is_unresolved() {
        let src = tempfile::tempdir().unwrap();
        let err = TrialWorkspace::materialize(src.path(), &[fixture("nope.txt", None)]).unwrap_err();
        assert!(matches!(err, SkillGaugeError::UnresolvedPath { .. }));
    }

    #[test]
    fn test_check_fixtures() {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("a.txt"), "a").unwrap();
        let task = TaskDefinition::from_yaml_str(
            "id: t\ninputs:\n  files:\n    - path: a.txt\n    - path: inline.txt\n      content: x\n",
        )
        .unwrap();
        check_fixtures(&task, src.path()).unwrap();

        let task =
            TaskDefinition::from_yaml_str("id: t\ninputs:\n  files:\n    - path: b.txt\n").unwrap();
        assert!(check_fixtures(&task, src.path()).is_err());
    }
}
