use std::path::{Component, Path, PathBuf};

use anyhow::Context;

use replica_domain::{validate_entry_name, EntryNameError};

use crate::core::pipeline::PipelineError;

/// Maps a container entry name onto a path inside `root`.
///
/// The name is validated, joined lexically, and then the deepest existing
/// ancestor of the result is canonicalized so a symlink planted earlier in
/// the tree cannot redirect the write. The final path must sit under the
/// canonical root.
pub fn resolve(root: &Path, name: &str) -> Result<PathBuf, PipelineError> {
    let traversal = || PipelineError::PathTraversal {
        entry: name.to_string(),
    };
    match validate_entry_name(name) {
        Ok(()) => {}
        Err(EntryNameError::Absolute { .. } | EntryNameError::ParentSegment { .. }) => {
            return Err(traversal());
        }
        Err(source) => {
            return Err(PipelineError::InvalidEntryName {
                entry: name.to_string(),
                source,
            });
        }
    }

    let canonical_root = root
        .canonicalize()
        .with_context(|| format!("failed to canonicalize {}", root.display()))
        .map_err(|source| PipelineError::WorkspaceFailed { source })?;

    let mut candidate = canonical_root.clone();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => candidate.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(traversal());
            }
        }
    }

    let (existing, remainder) = split_existing(&candidate);
    let mut resolved = existing.canonicalize().map_err(|_| traversal())?;
    resolved.extend(remainder);
    if resolved.starts_with(&canonical_root) {
        Ok(resolved)
    } else {
        Err(traversal())
    }
}

/// Splits `path` into its deepest existing ancestor and the missing tail.
fn split_existing(path: &Path) -> (&Path, Vec<&std::ffi::OsStr>) {
    let mut tail = Vec::new();
    let mut current = path;
    while current.symlink_metadata().is_err() {
        let (Some(parent), Some(name)) = (current.parent(), current.file_name()) else {
            break;
        };
        tail.push(name);
        current = parent;
    }
    tail.reverse();
    (current, tail)
}
