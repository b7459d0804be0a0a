use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::Context;
use zip::result::ZipError;
use zip::ZipArchive;

use replica_domain::CONFIG_DOCUMENT_PATH;

use crate::core::pipeline::PipelineError;

/// Returns the configuration document stored in `container`, if any.
pub fn read_config(container: &Path) -> Result<Option<Vec<u8>>, PipelineError> {
    let read_failed = |source: anyhow::Error| PipelineError::ContainerReadFailed {
        container: container.to_path_buf(),
        source,
    };
    let file = File::open(container)
        .with_context(|| format!("failed to open {}", container.display()))
        .map_err(read_failed)?;
    let mut archive = ZipArchive::new(BufReader::new(file))
        .context("not a valid ZIP container")
        .map_err(read_failed)?;
    let mut entry = match archive.by_name(CONFIG_DOCUMENT_PATH) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(err) => {
            return Err(read_failed(
                anyhow::Error::new(err).context(format!("failed to read {CONFIG_DOCUMENT_PATH}")),
            ))
        }
    };
    let mut bytes = Vec::new();
    entry
        .read_to_end(&mut bytes)
        .with_context(|| format!("failed to read {CONFIG_DOCUMENT_PATH}"))
        .map_err(read_failed)?;
    Ok(Some(bytes))
}
