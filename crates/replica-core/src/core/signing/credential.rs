use std::fmt;
use std::path::{Path, PathBuf};

use der::{Decode, Encode};
use p12::{SafeBagKind, PFX};
use sha2::{Digest, Sha256};
use x509_cert::Certificate;

use super::keys::{SignatureAlgorithm, SigningKey};
use super::CredentialError;
use crate::core::config::SigningConfig;

/// Location and secrets of a PKCS#12 credential store. Opened fresh for
/// every signing operation and never written.
#[derive(Clone)]
pub struct CredentialStore {
    path: PathBuf,
    store_password: String,
    key_password: String,
    alias: String,
}

impl CredentialStore {
    pub fn new(
        path: impl Into<PathBuf>,
        store_password: impl Into<String>,
        key_password: impl Into<String>,
        alias: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            store_password: store_password.into(),
            key_password: key_password.into(),
            alias: alias.into(),
        }
    }

    pub fn from_config(config: &SigningConfig) -> Self {
        Self::new(
            &config.keystore,
            &config.store_password,
            &config.key_password,
            &config.alias,
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Opens the store and returns the key and certificate for the alias.
    pub fn load(&self) -> Result<Credential, CredentialError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(CredentialError::NotFound {
                    path: self.path.clone(),
                });
            }
            Err(source) => {
                return Err(CredentialError::Unreadable {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let pfx = PFX::parse(&bytes).map_err(|err| CredentialError::Malformed {
            reason: format!("{err:?}"),
        })?;
        if !pfx.verify_mac(&self.store_password) {
            return Err(CredentialError::WrongPassword);
        }

        let bags = pfx
            .bags(&self.store_password)
            .map_err(|err| CredentialError::Malformed {
                reason: format!("{err:?}"),
            })?;
        let alias_known = bags.iter().any(|bag| {
            bag.friendly_name()
                .is_some_and(|name| name.eq_ignore_ascii_case(&self.alias))
        });
        if !alias_known {
            return Err(CredentialError::MissingAlias {
                alias: self.alias.clone(),
            });
        }
        let has_key_bag = bags
            .iter()
            .any(|bag| matches!(bag.bag, SafeBagKind::Pkcs8ShroudedKeyBag(_)));

        let keys = pfx
            .key_bags(&self.key_password)
            .map_err(|err| CredentialError::Malformed {
                reason: format!("{err:?}"),
            })?;
        let Some(key_der) = keys.first() else {
            return Err(if has_key_bag {
                CredentialError::WrongPassword
            } else {
                CredentialError::MissingKey
            });
        };
        let key = SigningKey::from_pkcs8_der(key_der)?;

        let certificates = pfx
            .cert_x509_bags(&self.store_password)
            .map_err(|err| CredentialError::Malformed {
                reason: format!("{err:?}"),
            })?;
        if certificates.is_empty() {
            return Err(CredentialError::MissingCertificate);
        }
        let certificate = certificates
            .into_iter()
            .find(|der| {
                public_key_of(der).is_ok_and(|spki| key.matches_public_key(&spki))
            })
            .ok_or(CredentialError::KeyMismatch)?;
        Credential::from_parts(&self.alias, key, certificate)
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("path", &self.path)
            .field("alias", &self.alias)
            .finish_non_exhaustive()
    }
}

/// A private key and the certificate that vouches for it.
pub struct Credential {
    alias: String,
    key: SigningKey,
    certificate: Vec<u8>,
    public_key: Vec<u8>,
}

impl Credential {
    pub(crate) fn from_parts(
        alias: &str,
        key: SigningKey,
        certificate: Vec<u8>,
    ) -> Result<Self, CredentialError> {
        let public_key = public_key_of(&certificate)?;
        if !key.matches_public_key(&public_key) {
            return Err(CredentialError::KeyMismatch);
        }
        Ok(Self {
            alias: alias.to_string(),
            key,
            certificate,
            public_key,
        })
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// DER-encoded X.509 certificate.
    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate
    }

    /// DER-encoded SubjectPublicKeyInfo of the certificate.
    pub fn public_key_der(&self) -> &[u8] {
        &self.public_key
    }

    /// Lowercase hex SHA-256 of the certificate, as shown by `apksigner`.
    pub fn certificate_fingerprint(&self) -> String {
        hex::encode(Sha256::digest(&self.certificate))
    }

    pub fn key_algorithm(&self) -> &'static str {
        match self.key.algorithm() {
            SignatureAlgorithm::RsaPkcs1v15Sha256 => "RSA",
            SignatureAlgorithm::EcdsaSha256 => "EC",
        }
    }

    pub(crate) fn key(&self) -> &SigningKey {
        &self.key
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("alias", &self.alias)
            .field("algorithm", &self.key_algorithm())
            .field("fingerprint", &self.certificate_fingerprint())
            .finish_non_exhaustive()
    }
}

fn public_key_of(certificate: &[u8]) -> Result<Vec<u8>, CredentialError> {
    let parsed = Certificate::from_der(certificate).map_err(|err| CredentialError::Malformed {
        reason: format!("invalid certificate: {err}"),
    })?;
    parsed
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|err| CredentialError::Malformed {
            reason: format!("invalid certificate key: {err}"),
        })
}
