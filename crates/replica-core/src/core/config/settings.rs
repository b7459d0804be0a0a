use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use replica_domain::SchemeFlags;

pub(crate) const KEYSTORE_ENV: &str = "REPLICA_KEYSTORE";
pub(crate) const STORE_PASSWORD_ENV: &str = "REPLICA_STORE_PASSWORD";
pub(crate) const KEY_PASSWORD_ENV: &str = "REPLICA_KEY_PASSWORD";
pub(crate) const KEY_ALIAS_ENV: &str = "REPLICA_KEY_ALIAS";
pub(crate) const SCRATCH_DIR_ENV: &str = "REPLICA_SCRATCH_DIR";
pub(crate) const SIGN_V1_ENV: &str = "REPLICA_SIGN_V1";
pub(crate) const SIGN_V2_ENV: &str = "REPLICA_SIGN_V2";
pub(crate) const SIGN_V3_ENV: &str = "REPLICA_SIGN_V3";
pub(crate) const VERIFY_ENV: &str = "REPLICA_VERIFY";
pub(crate) const STRICT_VERIFY_ENV: &str = "REPLICA_STRICT_VERIFY";
pub(crate) const STALE_HOURS_ENV: &str = "REPLICA_STALE_HOURS";
pub(crate) const TIMINGS_ENV: &str = "REPLICA_TIMINGS";

const DEFAULT_KEYSTORE: &str = "debug.p12";
const DEFAULT_PASSWORD: &str = "android";
const DEFAULT_ALIAS: &str = "key0";
const DEFAULT_STALE_HOURS: u64 = 24;

#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Reads a boolean switch; unset keys fall back to `default`.
    pub fn switch(&self, key: &str, default: bool) -> bool {
        match self.var(key) {
            Some(value) => {
                let lowered = value.trim().to_ascii_lowercase();
                !matches!(lowered.as_str(), "0" | "false" | "no" | "off" | "")
            }
            None => default,
        }
    }

    pub fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub(crate) signing: SigningConfig,
    pub(crate) workspace: WorkspaceConfig,
    /// Log the wall time of every pipeline stage.
    pub(crate) timings: bool,
}

impl Config {
    /// Builds a configuration snapshot from the current process environment.
    pub fn from_env() -> Self {
        Self::from_snapshot(&EnvSnapshot::capture())
    }

    pub fn from_snapshot(snapshot: &EnvSnapshot) -> Self {
        let defaults = SchemeFlags::default();
        let stale_hours = match snapshot.var(STALE_HOURS_ENV).map(str::trim) {
            Some(raw) => raw.parse::<u64>().unwrap_or_else(|_| {
                tracing::warn!(value = raw, "ignoring unparsable {STALE_HOURS_ENV}");
                DEFAULT_STALE_HOURS
            }),
            None => DEFAULT_STALE_HOURS,
        };
        Self {
            signing: SigningConfig {
                keystore: PathBuf::from(snapshot.var(KEYSTORE_ENV).unwrap_or(DEFAULT_KEYSTORE)),
                store_password: snapshot
                    .var(STORE_PASSWORD_ENV)
                    .unwrap_or(DEFAULT_PASSWORD)
                    .to_string(),
                key_password: snapshot
                    .var(KEY_PASSWORD_ENV)
                    .unwrap_or(DEFAULT_PASSWORD)
                    .to_string(),
                alias: snapshot
                    .var(KEY_ALIAS_ENV)
                    .unwrap_or(DEFAULT_ALIAS)
                    .to_string(),
                schemes: SchemeFlags {
                    v1: snapshot.switch(SIGN_V1_ENV, defaults.v1),
                    v2: snapshot.switch(SIGN_V2_ENV, defaults.v2),
                    v3: snapshot.switch(SIGN_V3_ENV, defaults.v3),
                },
                verify: snapshot.switch(VERIFY_ENV, true),
                strict_verify: snapshot.switch(STRICT_VERIFY_ENV, false),
            },
            workspace: WorkspaceConfig {
                scratch_root: snapshot
                    .var(SCRATCH_DIR_ENV)
                    .filter(|value| !value.trim().is_empty())
                    .map_or_else(env::temp_dir, PathBuf::from),
                stale_after: Duration::from_secs(stale_hours.saturating_mul(60 * 60)),
            },
            timings: snapshot.switch(TIMINGS_ENV, false),
        }
    }

    #[must_use]
    pub fn timings(&self) -> bool {
        self.timings
    }

    pub fn set_timings(&mut self, enabled: bool) {
        self.timings = enabled;
    }

    #[must_use]
    pub fn signing(&self) -> &SigningConfig {
        &self.signing
    }

    #[must_use]
    pub fn signing_mut(&mut self) -> &mut SigningConfig {
        &mut self.signing
    }

    #[must_use]
    pub fn workspace(&self) -> &WorkspaceConfig {
        &self.workspace
    }

    #[must_use]
    pub fn workspace_mut(&mut self) -> &mut WorkspaceConfig {
        &mut self.workspace
    }
}

/// Where the signing credential lives and which schemes to apply.
#[derive(Clone, Serialize)]
pub struct SigningConfig {
    pub keystore: PathBuf,
    #[serde(skip)]
    pub store_password: String,
    #[serde(skip)]
    pub key_password: String,
    pub alias: String,
    pub schemes: SchemeFlags,
    /// Run the post-sign verifier at all.
    pub verify: bool,
    /// Treat a failed verification as a pipeline failure instead of a warning.
    pub strict_verify: bool,
}

impl std::fmt::Debug for SigningConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningConfig")
            .field("keystore", &self.keystore)
            .field("store_password", &"<redacted>")
            .field("key_password", &"<redacted>")
            .field("alias", &self.alias)
            .field("schemes", &self.schemes)
            .field("verify", &self.verify)
            .field("strict_verify", &self.strict_verify)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceConfig {
    pub scratch_root: PathBuf,
    #[serde(serialize_with = "serialize_hours")]
    pub stale_after: Duration,
}

fn serialize_hours<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_secs() / (60 * 60))
}
