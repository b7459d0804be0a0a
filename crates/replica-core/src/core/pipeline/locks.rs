use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use super::PipelineError;

/// Registry of package identities with a pipeline in flight.
///
/// A second request for an identity that is already held is rejected with
/// [`PipelineError::Busy`] instead of queuing behind a global flag.
#[derive(Clone, Debug, Default)]
pub struct PackageLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl PackageLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `identity` until the returned guard is dropped.
    pub fn acquire(&self, identity: &str) -> Result<PackageGuard, PipelineError> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(identity.to_string()) {
            return Err(PipelineError::Busy {
                identity: identity.to_string(),
            });
        }
        Ok(PackageGuard {
            held: Arc::clone(&self.held),
            identity: identity.to_string(),
        })
    }

    pub fn is_held(&self, identity: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(identity)
    }
}

/// Releases its identity on drop.
#[derive(Debug)]
pub struct PackageGuard {
    held: Arc<Mutex<HashSet<String>>>,
    identity: String,
}

impl PackageGuard {
    pub fn identity(&self) -> &str {
        &self.identity
    }
}

impl Drop for PackageGuard {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.identity);
    }
}
