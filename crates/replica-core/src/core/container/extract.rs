use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use zip::ZipArchive;

use replica_domain::{is_signature_artifact, ANDROID_MANIFEST, CONFIG_DOCUMENT_PATH};

use super::paths::resolve;
use crate::core::pipeline::PipelineError;

/// What happened to the entries of a source container.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ExtractReport {
    pub manifest_found: bool,
    /// Files written to the scratch tree.
    pub written: usize,
    pub directories: usize,
    /// Signature artifacts and replaced payload documents that were dropped.
    pub skipped: Vec<String>,
    /// Entries whose names were empty or otherwise unusable.
    pub rejected: Vec<String>,
}

/// Unpacks `source` into `dest_root`, dropping signature artifacts and the
/// configuration document that is about to be replaced.
pub fn extract(source: &Path, dest_root: &Path) -> Result<ExtractReport, PipelineError> {
    extract_replacing(source, dest_root, &[CONFIG_DOCUMENT_PATH])
}

/// Like [`extract`], with an explicit list of entry names to drop.
pub fn extract_replacing(
    source: &Path,
    dest_root: &Path,
    replaced: &[&str],
) -> Result<ExtractReport, PipelineError> {
    let read_failed = |source_err: anyhow::Error| PipelineError::ContainerReadFailed {
        container: source.to_path_buf(),
        source: source_err,
    };

    let file = File::open(source)
        .with_context(|| format!("failed to open {}", source.display()))
        .map_err(read_failed)?;
    let mut archive = ZipArchive::new(BufReader::new(file))
        .context("not a valid ZIP container")
        .map_err(read_failed)?;

    let manifest_found = archive.file_names().any(|name| name == ANDROID_MANIFEST);
    if !manifest_found {
        return Err(PipelineError::MissingManifest {
            container: source.to_path_buf(),
        });
    }

    let mut report = ExtractReport {
        manifest_found,
        ..ExtractReport::default()
    };
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .with_context(|| format!("failed to read entry #{index}"))
            .map_err(read_failed)?;
        let name = entry.name().to_string();

        if is_signature_artifact(&name) || replaced.contains(&name.as_str()) {
            tracing::debug!(entry = %name, "skipping entry");
            report.skipped.push(name);
            continue;
        }

        let target = match resolve(dest_root, &name) {
            Ok(target) => target,
            Err(PipelineError::InvalidEntryName { source, .. }) => {
                tracing::warn!(entry = ?name, %source, "rejecting malformed entry name");
                report.rejected.push(name);
                continue;
            }
            Err(err) => return Err(err),
        };

        let write_failed = |source: anyhow::Error| PipelineError::ExtractWriteFailed {
            entry: name.clone(),
            source,
        };
        if entry.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("failed to create {}", target.display()))
                .map_err(write_failed)?;
            report.directories += 1;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))
                .map_err(write_failed)?;
        }
        let out = File::create(&target)
            .with_context(|| format!("failed to create {}", target.display()))
            .map_err(write_failed)?;
        let mut out = BufWriter::new(out);
        io::copy(&mut entry, &mut out)
            .and_then(|_| io::Write::flush(&mut out))
            .with_context(|| format!("failed to extract {name}"))
            .map_err(read_failed)?;
        report.written += 1;
    }

    tracing::debug!(
        written = report.written,
        skipped = report.skipped.len(),
        rejected = report.rejected.len(),
        "extracted container"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::write_container;

    #[test]
    fn drops_signature_artifacts_and_the_replaced_config() {
        let dir = tempfile::tempdir().unwrap();
        let apk = dir.path().join("app.apk");
        write_container(
            &apk,
            &[
                ("AndroidManifest.xml", b"<manifest/>".as_slice()),
                ("classes.dex", b"dex\n035"),
                ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0"),
                ("META-INF/CERT.SF", b"sf"),
                ("META-INF/CERT.RSA", b"rsa"),
                ("META-INF/services/a.b.C", b"impl"),
                ("assets/cloner.json", b"{\"old\":true}"),
            ],
        );
        let tree = dir.path().join("tree");
        fs::create_dir(&tree).unwrap();

        let report = extract(&apk, &tree).unwrap();
        assert!(report.manifest_found);
        assert_eq!(report.written, 4);
        assert_eq!(report.skipped.len(), 4);
        assert!(tree.join("META-INF/services/a.b.C").is_file());
        assert!(!tree.join("META-INF/CERT.SF").exists());
        assert!(!tree.join("assets/cloner.json").exists());
        assert_eq!(fs::read(tree.join("classes.dex")).unwrap(), b"dex\n035");
    }

    #[test]
    fn missing_manifest_fails_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let apk = dir.path().join("app.apk");
        write_container(&apk, &[("classes.dex", b"dex".as_slice())]);
        let tree = dir.path().join("tree");
        fs::create_dir(&tree).unwrap();

        let err = extract(&apk, &tree).unwrap_err();
        assert!(matches!(err, PipelineError::MissingManifest { .. }));
        assert_eq!(fs::read_dir(&tree).unwrap().count(), 0);
    }

    #[test]
    fn traversal_entries_abort_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let apk = dir.path().join("app.apk");
        write_container(
            &apk,
            &[
                ("AndroidManifest.xml", b"<manifest/>".as_slice()),
                ("../../evil.sh", b"#!/bin/sh"),
            ],
        );
        let tree = dir.path().join("tree");
        fs::create_dir(&tree).unwrap();

        let err = extract(&apk, &tree).unwrap_err();
        assert!(matches!(err, PipelineError::PathTraversal { .. }));
        assert!(!dir.path().join("evil.sh").exists());
    }

    #[test]
    fn directory_entries_become_directories() {
        let dir = tempfile::tempdir().unwrap();
        let apk = dir.path().join("app.apk");
        write_container(
            &apk,
            &[
                ("AndroidManifest.xml", b"<manifest/>".as_slice()),
                ("assets/empty/", b""),
            ],
        );
        let tree = dir.path().join("tree");
        fs::create_dir(&tree).unwrap();

        let report = extract(&apk, &tree).unwrap();
        assert_eq!(report.directories, 1);
        assert!(tree.join("assets/empty").is_dir());
    }

    #[test]
    fn write_failures_are_reported_in_the_extracting_stage() {
        let dir = tempfile::tempdir().unwrap();
        let apk = dir.path().join("app.apk");
        write_container(
            &apk,
            &[
                ("AndroidManifest.xml", b"<manifest/>".as_slice()),
                ("assets", b"a file where a directory belongs"),
                ("assets/data.bin", b"payload"),
            ],
        );
        let tree = dir.path().join("tree");
        fs::create_dir(&tree).unwrap();

        let err = extract(&apk, &tree).unwrap_err();
        assert!(matches!(err, PipelineError::ExtractWriteFailed { ref entry, .. } if entry == "assets/data.bin"));
        assert_eq!(err.stage(), crate::core::pipeline::Stage::Extracting);
        assert_eq!(err.code(), "RPL105");
    }

    #[test]
    fn unreadable_source_is_a_read_failure() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("bogus.apk");
        fs::write(&bogus, b"not a zip").unwrap();
        let err = extract(&bogus, dir.path()).unwrap_err();
        assert!(matches!(err, PipelineError::ContainerReadFailed { .. }));
    }
}
