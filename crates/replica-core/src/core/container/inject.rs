use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use replica_domain::{next_module_slot, PayloadBundle, BUNDLED_DATA_PATH, CONFIG_DOCUMENT_PATH};

use super::paths::resolve;
use crate::core::pipeline::PipelineError;

/// Internal names written by one injection.
#[derive(Debug, Default, Clone, Serialize)]
pub struct InjectReport {
    pub config: String,
    pub module: Option<String>,
    pub native_libs: Vec<String>,
    pub bundled_data: Option<String>,
}

/// Merges `bundle` into the scratch tree rooted at `dest_root`.
///
/// The configuration document always overwrites whatever is in the tree.
/// For a first clone the module goes into the first free `classesN.dex`
/// slot and native libraries into `lib/<abi>/`. Any failure aborts the
/// injection; the caller discards the tree.
pub fn inject(dest_root: &Path, bundle: &PayloadBundle) -> Result<InjectReport, PipelineError> {
    let mut report = InjectReport {
        config: place(dest_root, CONFIG_DOCUMENT_PATH, &bundle.config)?,
        ..InjectReport::default()
    };

    if let Some(clone) = &bundle.clone {
        let slot = next_module_slot(|name| dest_root.join(name).exists());
        report.module = Some(place(dest_root, &slot, &clone.module)?);

        let lib_dir = clone.native_lib_dir();
        for lib in &clone.native_libs {
            let file_name = lib
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| PipelineError::PayloadWriteFailed {
                    target: lib.display().to_string(),
                    source: anyhow!("native library path has no usable file name"),
                })?;
            let name = format!("{lib_dir}/{file_name}");
            report.native_libs.push(place(dest_root, &name, lib)?);
        }
    }

    if let Some(archive) = &bundle.bundled_data {
        report.bundled_data = Some(place(dest_root, BUNDLED_DATA_PATH, archive)?);
    }

    tracing::debug!(
        config = %report.config,
        module = report.module.as_deref().unwrap_or("-"),
        native_libs = report.native_libs.len(),
        "injected payload"
    );
    Ok(report)
}

/// Copies `source` to the internal path `name`, replacing any existing file.
fn place(root: &Path, name: &str, source: &Path) -> Result<String, PipelineError> {
    let target = resolve(root, name)?;
    copy_into(source, &target).map_err(|source| PipelineError::PayloadWriteFailed {
        target: name.to_string(),
        source,
    })?;
    Ok(name.to_string())
}

fn copy_into(source: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut input =
        File::open(source).with_context(|| format!("failed to open {}", source.display()))?;
    let output =
        File::create(target).with_context(|| format!("failed to create {}", target.display()))?;
    let mut output = BufWriter::new(output);
    io::copy(&mut input, &mut output)
        .with_context(|| format!("failed to copy {}", source.display()))?;
    output
        .flush()
        .with_context(|| format!("failed to flush {}", target.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use replica_domain::ClonePayload;

    use super::*;

    #[test]
    fn config_document_overwrites_existing_copy() {
        let dir = tempfile::tempdir().unwrap();
        let tree = dir.path().join("tree");
        fs::create_dir_all(tree.join("assets")).unwrap();
        fs::write(tree.join("assets/cloner.json"), b"{\"old\":true}").unwrap();
        let config = dir.path().join("cloner.json");
        fs::write(&config, b"{\"new\":true}").unwrap();

        let report = inject(&tree, &PayloadBundle::config_only(&config)).unwrap();
        assert_eq!(report.config, CONFIG_DOCUMENT_PATH);
        assert_eq!(fs::read(tree.join("assets/cloner.json")).unwrap(), b"{\"new\":true}");
        assert!(report.module.is_none());
    }

    #[test]
    fn first_clone_places_module_and_libraries() {
        let dir = tempfile::tempdir().unwrap();
        let tree = dir.path().join("tree");
        fs::create_dir_all(&tree).unwrap();
        fs::write(tree.join("classes.dex"), b"app").unwrap();
        fs::write(tree.join("classes2.dex"), b"app2").unwrap();

        let config = dir.path().join("cloner.json");
        let module = dir.path().join("hook.dex");
        let pine = dir.path().join("libpine.so");
        let data = dir.path().join("data.zip");
        fs::write(&config, b"{}").unwrap();
        fs::write(&module, b"hook").unwrap();
        fs::write(&pine, b"ELF").unwrap();
        fs::write(&data, b"PK").unwrap();

        let bundle = PayloadBundle::first_clone(&config, ClonePayload::new(&module, vec![pine]))
            .with_bundled_data(&data);
        let report = inject(&tree, &bundle).unwrap();

        assert_eq!(report.module.as_deref(), Some("classes3.dex"));
        assert_eq!(report.native_libs, vec!["lib/arm64-v8a/libpine.so".to_string()]);
        assert_eq!(report.bundled_data.as_deref(), Some(BUNDLED_DATA_PATH));
        assert_eq!(fs::read(tree.join("classes3.dex")).unwrap(), b"hook");
        assert_eq!(fs::read(tree.join("classes2.dex")).unwrap(), b"app2");
        assert!(tree.join("lib/arm64-v8a/libpine.so").is_file());
        assert!(tree.join("assets/bundled_app_data.zip").is_file());
    }

    #[test]
    fn missing_payload_file_aborts_injection() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = PayloadBundle::config_only(PathBuf::from("/nonexistent/cloner.json"));
        let err = inject(dir.path(), &bundle).unwrap_err();
        match err {
            PipelineError::PayloadWriteFailed { target, .. } => {
                assert_eq!(target, CONFIG_DOCUMENT_PATH);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn unwritable_tree_is_a_payload_write_failure() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let tree = dir.path().join("tree");
        fs::create_dir_all(tree.join("assets")).unwrap();
        fs::write(tree.join("assets/cloner.json"), b"old").unwrap();
        fs::set_permissions(tree.join("assets/cloner.json"), fs::Permissions::from_mode(0o444))
            .unwrap();
        fs::set_permissions(tree.join("assets"), fs::Permissions::from_mode(0o555)).unwrap();
        let config = dir.path().join("cloner.json");
        fs::write(&config, b"{}").unwrap();

        let result = inject(&tree, &PayloadBundle::config_only(&config));
        fs::set_permissions(tree.join("assets"), fs::Permissions::from_mode(0o755)).unwrap();
        // Root bypasses permission bits, so only assert when the write was refused.
        if let Err(err) = result {
            assert!(matches!(err, PipelineError::PayloadWriteFailed { .. }));
        }
    }
}
