use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::Context;

use super::errors::panic_message;
use super::{Pipeline, PipelineError, PipelineReport, PipelineRequest, Stage};

const WORKER_NAME: &str = "replica-pipeline";

/// A pipeline running on its own thread.
///
/// The package lock is taken before the thread starts, so a second run for
/// the same package fails at spawn time with [`PipelineError::Busy`].
pub struct PipelineHandle {
    identity: String,
    thread: JoinHandle<Result<PipelineReport, PipelineError>>,
}

impl PipelineHandle {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Blocks until the run completes. A worker that died by panicking is
    /// reported as [`PipelineError::Panicked`].
    pub fn join(self) -> Result<PipelineReport, PipelineError> {
        self.thread.join().unwrap_or_else(|payload| {
            Err(PipelineError::Panicked {
                stage: Stage::Idle,
                message: panic_message(payload.as_ref()),
            })
        })
    }
}

/// Starts `request` on a background thread and returns immediately.
pub fn spawn_pipeline(
    pipeline: Arc<Pipeline>,
    request: PipelineRequest,
) -> Result<PipelineHandle, PipelineError> {
    let identity = request.identity();
    let guard = pipeline.locks().acquire(&identity)?;
    let thread = thread::Builder::new()
        .name(WORKER_NAME.to_string())
        .spawn(move || pipeline.run_guarded(&request, &guard))
        .context("failed to spawn pipeline worker")
        .map_err(|source| PipelineError::WorkspaceFailed { source })?;
    Ok(PipelineHandle { identity, thread })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::core::config::{Config, EnvSnapshot};
    use crate::core::pipeline::PipelineMode;
    use crate::core::test_support::{write_container, write_test_keystore};

    fn pipeline(dir: &std::path::Path) -> Arc<Pipeline> {
        let keystore = write_test_keystore(dir, "android", "key0");
        let scratch = dir.join("scratch");
        let snapshot = EnvSnapshot::testing(&[
            ("REPLICA_KEYSTORE", keystore.to_str().unwrap()),
            ("REPLICA_SCRATCH_DIR", scratch.to_str().unwrap()),
        ]);
        Arc::new(Pipeline::new(Config::from_snapshot(&snapshot)))
    }

    #[test]
    fn background_run_reports_through_the_handle() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.apk");
        write_container(
            &source,
            &[
                ("AndroidManifest.xml", b"<manifest/>".as_slice()),
                ("classes.dex", b"dex\n035\0"),
            ],
        );
        let destination = dir.path().join("out.apk");
        let pipeline = pipeline(dir.path());

        let handle = spawn_pipeline(
            Arc::clone(&pipeline),
            PipelineRequest::new(&source, &destination, None).with_identity("com.example"),
        )
        .unwrap();
        assert_eq!(handle.identity(), "com.example");
        let report = handle.join().unwrap();
        assert_eq!(report.mode, PipelineMode::Resign);
        assert!(fs::metadata(&destination).unwrap().len() > 0);
        assert!(!pipeline.locks().is_held("com.example"));
    }

    #[test]
    fn second_spawn_for_the_same_package_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let _held = pipeline.locks().acquire("com.example").unwrap();
        let request = PipelineRequest::new(dir.path().join("missing.apk"), dir.path().join("o.apk"), None)
            .with_identity("com.example");
        let err = spawn_pipeline(pipeline, request).err().unwrap();
        assert!(matches!(err, PipelineError::Busy { .. }));
    }

    #[test]
    fn panicking_verifier_becomes_a_typed_failure() {
        struct Exploding;
        impl crate::core::signing::ContainerVerifier for Exploding {
            fn verify(
                &self,
                _: &[u8],
                _: replica_domain::SchemeFlags,
            ) -> crate::core::signing::VerificationOutcome {
                panic!("verifier exploded");
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.apk");
        write_container(
            &source,
            &[
                ("AndroidManifest.xml", b"<manifest/>".as_slice()),
                ("classes.dex", b"dex\n035\0"),
            ],
        );
        let destination = dir.path().join("out.apk");
        let engine = crate::core::signing::SigningEngine::with_verifier(Arc::new(Exploding));
        let pipeline = Arc::new(Pipeline::clone(&pipeline(dir.path())).with_engine(engine));

        let request = PipelineRequest::new(&source, &destination, None).with_identity("com.example");
        let err = spawn_pipeline(Arc::clone(&pipeline), request).unwrap().join().unwrap_err();
        assert!(matches!(err, PipelineError::Panicked { ref message, .. } if message == "verifier exploded"));
        assert_eq!(err.stage(), Stage::Signing);
        assert!(!destination.exists());
        assert!(!pipeline.locks().is_held("com.example"));
        let scratch = dir.path().join("scratch");
        assert!(fs::read_dir(&scratch).map_or(true, |mut entries| entries.next().is_none()));
    }

    #[test]
    fn failures_come_back_through_join() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let request = PipelineRequest::new(dir.path().join("missing.apk"), dir.path().join("o.apk"), None);
        let err = spawn_pipeline(pipeline, request).unwrap().join().unwrap_err();
        assert!(matches!(err, PipelineError::ContainerReadFailed { .. }));
    }
}
