//! Orchestrates extract, inject, build and sign for one package, owning the
//! scratch workspace and publishing only a fully signed result.

mod errors;
mod locks;
mod state;
mod worker;

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;

use replica_domain::{PayloadBundle, SchemeFlags, ANDROID_MANIFEST, CONFIG_DOCUMENT_PATH};

pub use errors::PipelineError;
pub use locks::{PackageGuard, PackageLocks};
pub use state::Stage;
pub(crate) use state::StageTracker;
pub use worker::{spawn_pipeline, PipelineHandle};

use crate::core::config::Config;
use crate::core::container::{
    build, extract_replacing, inject, BuildReport, ExtractReport, InjectReport,
};
use crate::core::fs::ScratchWorkspace;
use crate::core::signing::{CredentialStore, SigningEngine, VerificationOutcome};

const WORKSPACE_PREFIX: &str = "replica-work-";
const UNSIGNED_FILE: &str = "unsigned.apk";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// Replace the configuration document of an existing clone.
    Update,
    /// First-time clone: configuration plus module and native libraries.
    Clone,
    /// Re-sign the package without changing its contents.
    Resign,
}

/// One unit of work: a source package, where to publish, and what to inject.
#[derive(Clone, Debug)]
pub struct PipelineRequest {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub bundle: Option<PayloadBundle>,
    /// Package identity used for locking; defaults to the source path.
    pub identity: Option<String>,
}

impl PipelineRequest {
    pub fn new(
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        bundle: Option<PayloadBundle>,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            bundle,
            identity: None,
        }
    }

    #[must_use]
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn mode(&self) -> PipelineMode {
        match &self.bundle {
            None => PipelineMode::Resign,
            Some(bundle) if bundle.is_first_clone() => PipelineMode::Clone,
            Some(_) => PipelineMode::Update,
        }
    }

    pub fn identity(&self) -> String {
        self.identity
            .clone()
            .unwrap_or_else(|| self.source.display().to_string())
    }
}

/// Everything a caller may want to show about a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub destination: PathBuf,
    pub mode: PipelineMode,
    pub stages: Vec<Stage>,
    pub extract: ExtractReport,
    pub inject: Option<InjectReport>,
    pub build: BuildReport,
    pub schemes: SchemeFlags,
    pub certificate_sha256: String,
    pub verification: Option<VerificationOutcome>,
    /// Non-fatal problems, such as a failed self-verification.
    pub warnings: Vec<String>,
}

#[derive(Clone)]
pub struct Pipeline {
    config: Config,
    engine: SigningEngine,
    locks: PackageLocks,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            engine: SigningEngine::new(),
            locks: PackageLocks::new(),
        }
    }

    #[must_use]
    pub fn with_engine(mut self, engine: SigningEngine) -> Self {
        self.engine = engine;
        self
    }

    #[must_use]
    pub fn with_locks(mut self, locks: PackageLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn locks(&self) -> &PackageLocks {
        &self.locks
    }

    /// Runs every stage for `request` and returns a single outcome.
    ///
    /// The scratch workspace is gone by the time this returns, and the
    /// destination is only written once signing has succeeded.
    pub fn run(&self, request: &PipelineRequest) -> Result<PipelineReport, PipelineError> {
        let guard = self.locks.acquire(&request.identity())?;
        self.run_guarded(request, &guard)
    }

    pub(crate) fn run_guarded(
        &self,
        request: &PipelineRequest,
        guard: &PackageGuard,
    ) -> Result<PipelineReport, PipelineError> {
        tracing::info!(
            identity = guard.identity(),
            mode = ?request.mode(),
            source = %request.source.display(),
            "starting pipeline"
        );
        let mut tracker = StageTracker::with_timings(self.config.timings());
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.run_stages(request, &mut tracker)))
            .unwrap_or_else(|payload| {
                Err(PipelineError::Panicked {
                    stage: tracker.current(),
                    message: errors::panic_message(payload.as_ref()),
                })
            });
        match &result {
            Ok(report) => {
                tracing::info!(destination = %report.destination.display(), "pipeline finished");
            }
            Err(err) => {
                let failed_in = tracker.current();
                tracker.fail();
                tracing::error!(stage = %failed_in, code = err.code(), %err, "pipeline failed");
            }
        }
        result
    }

    fn run_stages(
        &self,
        request: &PipelineRequest,
        tracker: &mut StageTracker,
    ) -> Result<PipelineReport, PipelineError> {
        let workspace_config = self.config.workspace();
        let workspace = ScratchWorkspace::new_in(
            &workspace_config.scratch_root,
            WORKSPACE_PREFIX,
            workspace_config.stale_after,
        )
        .map_err(|source| PipelineError::WorkspaceFailed { source })?;
        tracing::debug!(workspace = %workspace.path().display(), "created scratch workspace");

        tracker.advance(Stage::Extracting);
        let replaced: &[&str] = if request.bundle.is_some() {
            &[CONFIG_DOCUMENT_PATH]
        } else {
            &[]
        };
        let extract = extract_replacing(&request.source, workspace.tree(), replaced)?;

        tracker.advance(Stage::Injecting);
        let inject = match &request.bundle {
            Some(bundle) => Some(inject(workspace.tree(), bundle)?),
            None => None,
        };

        tracker.advance(Stage::Building);
        let unsigned_path = workspace.scratch_file(UNSIGNED_FILE);
        let build = build_unsigned(workspace.tree(), &unsigned_path)?;
        let unsigned = fs::read(&unsigned_path)
            .with_context(|| format!("failed to read {}", unsigned_path.display()))
            .map_err(|source| PipelineError::ContainerWriteFailed { source })?;

        tracker.advance(Stage::Signing);
        let signing = self.config.signing();
        let store = CredentialStore::from_config(signing);
        let credential = store
            .load()
            .map_err(|source| PipelineError::CredentialLoadFailed {
                keystore: store.path().to_path_buf(),
                source,
            })?;
        let signed = self
            .engine
            .sign(&unsigned, &credential, signing.schemes)
            .map_err(|source| PipelineError::SigningFailed { source })?;

        let mut warnings = Vec::new();
        let verification = if signing.verify {
            let outcome = self.engine.verify(&signed, signing.schemes);
            match &outcome {
                VerificationOutcome::Verified { .. } => {
                    tracing::debug!("signed container verified");
                }
                VerificationOutcome::NotVerified { problems } if signing.strict_verify => {
                    return Err(PipelineError::VerificationFailed {
                        problems: problems.clone(),
                    });
                }
                VerificationOutcome::NotVerified { problems } => {
                    for problem in problems {
                        tracing::warn!(%problem, "signed container failed verification");
                        warnings.push(format!("verification: {problem}"));
                    }
                }
                VerificationOutcome::Unsupported => {
                    tracing::debug!("verification unsupported; skipped");
                }
            }
            Some(outcome)
        } else {
            None
        };

        publish(&request.destination, &signed)?;
        tracker.advance(Stage::Done);

        if let Err(err) = workspace.close() {
            tracing::warn!(%err, "failed to remove scratch workspace");
        }
        Ok(PipelineReport {
            destination: request.destination.clone(),
            mode: request.mode(),
            stages: tracker.visited().to_vec(),
            extract,
            inject,
            build,
            schemes: signing.schemes,
            certificate_sha256: credential.certificate_fingerprint(),
            verification,
            warnings,
        })
    }
}

fn build_unsigned(tree: &Path, unsigned_path: &Path) -> Result<BuildReport, PipelineError> {
    let manifest_path = tree.join(ANDROID_MANIFEST);
    let manifest = fs::read(&manifest_path)
        .with_context(|| format!("failed to read {}", manifest_path.display()))
        .map_err(|source| PipelineError::ContainerWriteFailed { source })?;
    let file = File::create(unsigned_path)
        .with_context(|| format!("failed to create {}", unsigned_path.display()))
        .map_err(|source| PipelineError::ContainerWriteFailed { source })?;
    build(tree, &manifest, BufWriter::new(file))
}

/// Writes `bytes` next to `destination` and renames it into place.
fn publish(destination: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    let failed = |source: anyhow::Error| PipelineError::PublishFailed {
        destination: destination.to_path_buf(),
        source,
    };
    let parent = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .with_context(|| format!("failed to create {}", parent.display()))
        .map_err(failed)?;
    let mut staged = tempfile::NamedTempFile::new_in(&parent)
        .with_context(|| format!("failed to stage output in {}", parent.display()))
        .map_err(failed)?;
    staged
        .write_all(bytes)
        .and_then(|()| staged.as_file().sync_all())
        .context("failed to write staged output")
        .map_err(failed)?;
    staged
        .persist(destination)
        .map_err(|err| anyhow::Error::new(err.error).context("failed to move output into place"))
        .map_err(failed)?;
    Ok(())
}
