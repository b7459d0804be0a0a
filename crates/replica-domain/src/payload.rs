use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::container::DEFAULT_NATIVE_ABI;

/// Files the caller wants merged into a container during a rebuild.
///
/// The source files are only read; the pipeline copies them into its own
/// scratch tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadBundle {
    pub config: PathBuf,
    #[serde(default)]
    pub clone: Option<ClonePayload>,
    #[serde(default)]
    pub bundled_data: Option<PathBuf>,
}

impl PayloadBundle {
    /// Bundle for refreshing the configuration of an existing clone.
    pub fn config_only(config: impl Into<PathBuf>) -> Self {
        Self {
            config: config.into(),
            clone: None,
            bundled_data: None,
        }
    }

    /// Bundle for turning an ordinary package into a clone.
    pub fn first_clone(config: impl Into<PathBuf>, payload: ClonePayload) -> Self {
        Self {
            config: config.into(),
            clone: Some(payload),
            bundled_data: None,
        }
    }

    #[must_use]
    pub fn with_bundled_data(mut self, archive: impl Into<PathBuf>) -> Self {
        self.bundled_data = Some(archive.into());
        self
    }

    pub fn is_first_clone(&self) -> bool {
        self.clone.is_some()
    }
}

/// Executable module and native libraries injected on first clone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClonePayload {
    pub module: PathBuf,
    #[serde(default)]
    pub native_libs: Vec<PathBuf>,
    #[serde(default = "default_abi")]
    pub abi: String,
}

impl ClonePayload {
    pub fn new(module: impl Into<PathBuf>, native_libs: Vec<PathBuf>) -> Self {
        Self {
            module: module.into(),
            native_libs,
            abi: default_abi(),
        }
    }

    /// Directory inside the container that receives the native libraries.
    pub fn native_lib_dir(&self) -> String {
        format!("lib/{}", self.abi)
    }
}

fn default_abi() -> String {
    DEFAULT_NATIVE_ABI.to_string()
}
