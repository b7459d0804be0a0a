#![deny(clippy::all)]

mod core;

pub use replica_domain::{ClonePayload, PayloadBundle, SchemeFlags};

pub use crate::core::config::{Config, EnvSnapshot, SigningConfig, WorkspaceConfig};
pub use crate::core::container::{
    build, extract, extract_replacing, inject, read_config, resolve, BuildReport, ExtractReport, InjectReport,
};
pub use crate::core::fs::ScratchWorkspace;
pub use crate::core::pipeline::{
    spawn_pipeline, PackageGuard, PackageLocks, Pipeline, PipelineError, PipelineHandle,
    PipelineMode, PipelineReport, PipelineRequest, Stage,
};
pub use crate::core::signing::{
    sign_container, verify_container, ContainerVerifier, Credential, CredentialError,
    CredentialStore, NoVerification, SchemeVerifier, SigningEngine, SigningError,
    VerificationOutcome,
};
pub use crate::core::tooling::outcome::{CommandStatus, ExecutionOutcome};
