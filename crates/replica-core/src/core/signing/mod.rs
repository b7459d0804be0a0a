//! Signing engine: credential loading, JAR (v1) signing and the v2/v3
//! signing block, plus a typed self-verifier.

mod block;
mod credential;
mod errors;
mod jar;
mod keys;
mod pkcs7;
mod verify;

use std::sync::Arc;

use replica_domain::SchemeFlags;

pub use credential::{Credential, CredentialStore};
pub use errors::{CredentialError, SigningError};
pub(crate) use keys::SigningKey;
pub use verify::{ContainerVerifier, NoVerification, SchemeVerifier, VerificationOutcome};

/// Applies signature schemes to unsigned containers and checks the result.
#[derive(Clone)]
pub struct SigningEngine {
    verifier: Arc<dyn ContainerVerifier>,
}

impl Default for SigningEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SigningEngine {
    pub fn new() -> Self {
        Self::with_verifier(Arc::new(SchemeVerifier))
    }

    pub fn with_verifier(verifier: Arc<dyn ContainerVerifier>) -> Self {
        Self { verifier }
    }

    /// Signs `unsigned` with every scheme enabled in `schemes`.
    ///
    /// v1 files are appended first so the signing block, inserted last,
    /// covers them.
    pub fn sign(
        &self,
        unsigned: &[u8],
        credential: &Credential,
        schemes: SchemeFlags,
    ) -> Result<Vec<u8>, SigningError> {
        if !schemes.any() {
            return Err(SigningError::NoSchemes);
        }
        let mut container = unsigned.to_vec();
        if schemes.v1 {
            container = jar::sign(container, credential, schemes)?;
        }
        if schemes.needs_signing_block() {
            container = block::insert_block(&container, credential, schemes.v2, schemes.v3)?;
        }
        tracing::debug!(%schemes, size = container.len(), "signed container");
        Ok(container)
    }

    pub fn verify(&self, signed: &[u8], expected: SchemeFlags) -> VerificationOutcome {
        self.verifier.verify(signed, expected)
    }
}

pub fn sign_container(
    unsigned: &[u8],
    credential: &Credential,
    schemes: SchemeFlags,
) -> Result<Vec<u8>, SigningError> {
    SigningEngine::new().sign(unsigned, credential, schemes)
}

pub fn verify_container(signed: &[u8], expected: SchemeFlags) -> VerificationOutcome {
    SchemeVerifier.verify(signed, expected)
}
