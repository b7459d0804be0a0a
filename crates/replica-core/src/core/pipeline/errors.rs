use std::any::Any;
use std::path::PathBuf;

use serde_json::{json, Value};

use replica_domain::EntryNameError;

use super::Stage;
use crate::core::signing::{CredentialError, SigningError};

/// Typed failure of one pipeline run, tagged with the stage that raised it.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("entry '{entry}' would be written outside the workspace")]
    PathTraversal { entry: String },
    #[error("container entry name is invalid")]
    InvalidEntryName {
        entry: String,
        #[source]
        source: EntryNameError,
    },
    #[error("AndroidManifest.xml not found in {}", container.display())]
    MissingManifest { container: PathBuf },
    #[error("failed to read container {}", container.display())]
    ContainerReadFailed {
        container: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to unpack entry '{entry}' into the workspace")]
    ExtractWriteFailed {
        entry: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to write payload file {target}")]
    PayloadWriteFailed {
        target: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to write the rebuilt container")]
    ContainerWriteFailed {
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to load signing credential from {}", keystore.display())]
    CredentialLoadFailed {
        keystore: PathBuf,
        #[source]
        source: CredentialError,
    },
    #[error("failed to sign the container")]
    SigningFailed {
        #[source]
        source: SigningError,
    },
    #[error("signed container failed verification: {}", problems.join("; "))]
    VerificationFailed { problems: Vec<String> },
    #[error("scratch workspace could not be prepared")]
    WorkspaceFailed {
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to publish the signed container to {}", destination.display())]
    PublishFailed {
        destination: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("a pipeline for '{identity}' is already running")]
    Busy { identity: String },
    #[error("pipeline panicked while {stage}: {message}")]
    Panicked { stage: Stage, message: String },
}

impl PipelineError {
    /// Stage in which the failure happened.
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::PathTraversal { .. }
            | Self::InvalidEntryName { .. }
            | Self::MissingManifest { .. }
            | Self::ContainerReadFailed { .. }
            | Self::ExtractWriteFailed { .. } => Stage::Extracting,
            Self::PayloadWriteFailed { .. } => Stage::Injecting,
            Self::ContainerWriteFailed { .. } => Stage::Building,
            Self::CredentialLoadFailed { .. }
            | Self::SigningFailed { .. }
            | Self::VerificationFailed { .. }
            | Self::PublishFailed { .. } => Stage::Signing,
            Self::WorkspaceFailed { .. } | Self::Busy { .. } => Stage::Idle,
            Self::Panicked { stage, .. } => *stage,
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::PathTraversal { .. } => "RPL101",
            Self::InvalidEntryName { .. } => "RPL102",
            Self::MissingManifest { .. } => "RPL103",
            Self::ContainerReadFailed { .. } => "RPL104",
            Self::ExtractWriteFailed { .. } => "RPL105",
            Self::PayloadWriteFailed { .. } => "RPL201",
            Self::ContainerWriteFailed { .. } => "RPL301",
            Self::CredentialLoadFailed { .. } => "RPL401",
            Self::SigningFailed { .. } => "RPL402",
            Self::VerificationFailed { .. } => "RPL403",
            Self::PublishFailed { .. } => "RPL404",
            Self::WorkspaceFailed { .. } => "RPL501",
            Self::Busy { .. } => "RPL502",
            Self::Panicked { .. } => "RPL503",
        }
    }

    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::PathTraversal { .. } => "path_traversal",
            Self::InvalidEntryName { .. } => "invalid_entry_name",
            Self::MissingManifest { .. } => "missing_manifest",
            Self::ContainerReadFailed { .. } => "container_read_failed",
            Self::ExtractWriteFailed { .. } => "extract_write_failed",
            Self::PayloadWriteFailed { .. } => "payload_write_failed",
            Self::ContainerWriteFailed { .. } => "container_write_failed",
            Self::CredentialLoadFailed { .. } => "credential_load_failed",
            Self::SigningFailed { .. } => "signing_failed",
            Self::VerificationFailed { .. } => "verification_failed",
            Self::PublishFailed { .. } => "publish_failed",
            Self::WorkspaceFailed { .. } => "workspace_failed",
            Self::Busy { .. } => "package_busy",
            Self::Panicked { .. } => "internal_panic",
        }
    }

    #[must_use]
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::PathTraversal { .. } | Self::InvalidEntryName { .. } => {
                Some("The source package is malformed or hostile; obtain a clean copy.")
            }
            Self::MissingManifest { .. } => Some("Check that the source is an application package."),
            Self::ContainerReadFailed { .. } => {
                Some("Check that the source file exists and is a readable ZIP archive.")
            }
            Self::ExtractWriteFailed { .. }
            | Self::PayloadWriteFailed { .. }
            | Self::WorkspaceFailed { .. } => {
                Some("Check free disk space and permissions of the scratch directory (REPLICA_SCRATCH_DIR).")
            }
            Self::ContainerWriteFailed { .. } => Some("Check free disk space in the scratch directory."),
            Self::CredentialLoadFailed { .. } => Some(
                "Check REPLICA_KEYSTORE, REPLICA_STORE_PASSWORD, REPLICA_KEY_PASSWORD and REPLICA_KEY_ALIAS.",
            ),
            Self::SigningFailed { .. } => None,
            Self::VerificationFailed { .. } => {
                Some("Unset REPLICA_STRICT_VERIFY to publish the package with a warning instead.")
            }
            Self::PublishFailed { .. } => Some("Check that the destination directory is writable."),
            Self::Busy { .. } => Some("Wait for the running pipeline for this package to finish."),
            Self::Panicked { .. } => Some("Rerun with --trace and report the log; nothing was published."),
        }
    }

    /// Failures caused by the inputs rather than by the environment.
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::PathTraversal { .. }
                | Self::InvalidEntryName { .. }
                | Self::MissingManifest { .. }
                | Self::CredentialLoadFailed { .. }
                | Self::Busy { .. }
        )
    }

    #[must_use]
    pub fn details(&self) -> Value {
        let mut details = json!({
            "code": self.code(),
            "reason": self.reason(),
            "stage": self.stage(),
        });
        if let Value::Object(map) = &mut details {
            if let Some(hint) = self.hint() {
                map.insert("hint".into(), json!(hint));
            }
            match self {
                Self::PathTraversal { entry }
                | Self::InvalidEntryName { entry, .. }
                | Self::ExtractWriteFailed { entry, .. } => {
                    map.insert("entry".into(), json!(entry));
                }
                Self::MissingManifest { container } | Self::ContainerReadFailed { container, .. } => {
                    map.insert("container".into(), json!(container.display().to_string()));
                }
                Self::PayloadWriteFailed { target, .. } => {
                    map.insert("target".into(), json!(target));
                }
                Self::CredentialLoadFailed { keystore, source } => {
                    map.insert("keystore".into(), json!(keystore.display().to_string()));
                    map.insert("credential_error".into(), json!(source.reason()));
                }
                Self::VerificationFailed { problems } => {
                    map.insert("problems".into(), json!(problems));
                }
                Self::PublishFailed { destination, .. } => {
                    map.insert("destination".into(), json!(destination.display().to_string()));
                }
                Self::Busy { identity } => {
                    map.insert("identity".into(), json!(identity));
                }
                Self::Panicked { message, .. } => {
                    map.insert("panic".into(), json!(message));
                }
                Self::ContainerWriteFailed { .. }
                | Self::SigningFailed { .. }
                | Self::WorkspaceFailed { .. } => {}
            }
            let chain = cause_chain(self);
            if !chain.is_empty() {
                map.insert("causes".into(), json!(chain));
            }
        }
        details
    }
}

/// Text of a panic payload, for the two payload types `panic!` produces.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn cause_chain(err: &dyn std::error::Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut current = err.source();
    while let Some(cause) = current {
        causes.push(cause.to_string());
        current = cause.source();
    }
    causes
}
