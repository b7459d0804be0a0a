use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};

/// Name of the directory inside a workspace that mirrors the container layout.
const TREE_DIR: &str = "tree";

/// Best-effort recursive chmod for extracted trees that carried read-only modes.
#[cfg(unix)]
pub(crate) fn make_writable_recursive(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let Ok(meta) = fs::symlink_metadata(path) else {
        return;
    };
    if meta.file_type().is_symlink() {
        return;
    }
    let mode = if meta.is_dir() { 0o755 } else { 0o644 };
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(mode));
    if meta.is_dir() {
        if let Ok(entries) = fs::read_dir(path) {
            for entry in entries.flatten() {
                make_writable_recursive(&entry.path());
            }
        }
    }
}

#[cfg(not(unix))]
pub(crate) fn make_writable_recursive(path: &Path) {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return;
    };
    if meta.file_type().is_symlink() {
        return;
    }
    let mut perms = meta.permissions();
    if perms.readonly() {
        perms.set_readonly(false);
        let _ = fs::set_permissions(path, perms);
    }
    if meta.is_dir() {
        if let Ok(entries) = fs::read_dir(path) {
            for entry in entries.flatten() {
                make_writable_recursive(&entry.path());
            }
        }
    }
}

pub(crate) fn remove_dir_all_writable(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err).with_context(|| format!("failed to stat {}", path.display())),
    };
    if meta.file_type().is_symlink() {
        fs::remove_file(path)
            .with_context(|| format!("failed to remove symlink {}", path.display()))?;
        return Ok(());
    }
    make_writable_recursive(path);
    fs::remove_dir_all(path).with_context(|| format!("failed to remove {}", path.display()))?;
    Ok(())
}

/// Uniquely named scratch directory owned by one pipeline run.
///
/// The directory is removed when the value is dropped, whichever way the
/// run ended. Creating one also sweeps sibling workspaces with the same
/// prefix that are older than `stale_after`, which is how directories left
/// behind by a killed process eventually disappear.
pub struct ScratchWorkspace {
    inner: Option<tempfile::TempDir>,
    path: PathBuf,
    tree: PathBuf,
}

impl ScratchWorkspace {
    /// Creates a fresh workspace under `root`.
    ///
    /// # Errors
    /// Returns an error if `root` or the workspace directories cannot be created.
    pub fn new_in(root: &Path, prefix: &str, stale_after: Duration) -> Result<Self> {
        fs::create_dir_all(root).with_context(|| format!("failed to create {}", root.display()))?;
        prune_stale_workspaces(root, prefix, stale_after);
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(root)
            .with_context(|| format!("failed to create scratch workspace under {}", root.display()))?;
        let path = dir.path().to_path_buf();
        let tree = path.join(TREE_DIR);
        fs::create_dir(&tree).with_context(|| format!("failed to create {}", tree.display()))?;
        Ok(Self {
            inner: Some(dir),
            path,
            tree,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Root of the extracted container tree.
    pub fn tree(&self) -> &Path {
        &self.tree
    }

    /// Location for an intermediate file that must not end up in the tree.
    pub fn scratch_file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Removes the workspace now and reports whether that worked.
    ///
    /// # Errors
    /// Returns an error if the directory could not be fully deleted.
    pub fn close(mut self) -> Result<()> {
        match self.inner.take() {
            Some(dir) => remove_dir_all_writable(&dir.into_path()),
            None => Ok(()),
        }
    }
}

impl Drop for ScratchWorkspace {
    fn drop(&mut self) {
        let Some(dir) = self.inner.take() else {
            return;
        };
        let path = dir.into_path();
        if let Err(err) = remove_dir_all_writable(&path) {
            tracing::warn!(path = %path.display(), %err, "failed to remove scratch workspace");
        }
    }
}

fn prune_stale_workspaces(root: &Path, prefix: &str, max_age: Duration) {
    let Ok(entries) = fs::read_dir(root) else {
        return;
    };
    let now = SystemTime::now();
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.starts_with(prefix) {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let Some(modified) = meta.modified().ok() else {
            continue;
        };
        let age = now.duration_since(modified).unwrap_or_default();
        if age < max_age {
            continue;
        }
        tracing::debug!(path = %entry.path().display(), "sweeping stale scratch workspace");
        let _ = remove_dir_all_writable(&entry.path());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    #[test]
    fn workspace_is_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let path = {
            let ws = ScratchWorkspace::new_in(root.path(), "replica-", DAY).unwrap();
            fs::write(ws.tree().join("file.txt"), b"x").unwrap();
            ws.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn close_reports_success() {
        let root = tempfile::tempdir().unwrap();
        let ws = ScratchWorkspace::new_in(root.path(), "replica-", DAY).unwrap();
        let path = ws.path().to_path_buf();
        ws.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn concurrent_workspaces_do_not_collide() {
        let root = tempfile::tempdir().unwrap();
        let a = ScratchWorkspace::new_in(root.path(), "replica-", DAY).unwrap();
        let b = ScratchWorkspace::new_in(root.path(), "replica-", DAY).unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.tree().is_dir() && b.tree().is_dir());
    }

    #[test]
    fn stale_workspaces_with_matching_prefix_are_swept() {
        let root = tempfile::tempdir().unwrap();
        let stale = root.path().join("replica-abandoned");
        let unrelated = root.path().join("other-dir");
        fs::create_dir_all(stale.join("tree")).unwrap();
        fs::create_dir_all(&unrelated).unwrap();

        let _ws = ScratchWorkspace::new_in(root.path(), "replica-", Duration::ZERO).unwrap();
        assert!(!stale.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn fresh_workspaces_survive_the_sweep() {
        let root = tempfile::tempdir().unwrap();
        let first = ScratchWorkspace::new_in(root.path(), "replica-", DAY).unwrap();
        let _second = ScratchWorkspace::new_in(root.path(), "replica-", DAY).unwrap();
        assert!(first.path().exists());
    }
}
