use der::asn1::ObjectIdentifier;
use p256::ecdsa::signature::{Signer as _, Verifier as _};
use p256::pkcs8::DecodePublicKey as _;
use rsa::pkcs1v15;
use rsa::signature::SignatureEncoding as _;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use super::{CredentialError, SigningError};

pub(crate) const RSA_ENCRYPTION: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
pub(crate) const ECDSA_WITH_SHA256: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
pub(crate) const ID_SHA256: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");

/// Signature algorithms understood by both the block and JAR schemes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SignatureAlgorithm {
    RsaPkcs1v15Sha256,
    EcdsaSha256,
}

impl SignatureAlgorithm {
    /// Identifier used inside signing blocks.
    pub(crate) fn id(self) -> u32 {
        match self {
            Self::RsaPkcs1v15Sha256 => 0x0103,
            Self::EcdsaSha256 => 0x0201,
        }
    }

    pub(crate) fn from_id(id: u32) -> Option<Self> {
        match id {
            0x0103 => Some(Self::RsaPkcs1v15Sha256),
            0x0201 => Some(Self::EcdsaSha256),
            _ => None,
        }
    }

    /// Extension of the JAR signature block file.
    pub(crate) fn block_extension(self) -> &'static str {
        match self {
            Self::RsaPkcs1v15Sha256 => "RSA",
            Self::EcdsaSha256 => "EC",
        }
    }

    /// OID recorded as the PKCS#7 signer's signature algorithm.
    pub(crate) fn cms_oid(self) -> ObjectIdentifier {
        match self {
            Self::RsaPkcs1v15Sha256 => RSA_ENCRYPTION,
            Self::EcdsaSha256 => ECDSA_WITH_SHA256,
        }
    }

    pub(crate) fn from_cms_oid(oid: &ObjectIdentifier) -> Option<Self> {
        if *oid == RSA_ENCRYPTION {
            Some(Self::RsaPkcs1v15Sha256)
        } else if *oid == ECDSA_WITH_SHA256 {
            Some(Self::EcdsaSha256)
        } else {
            None
        }
    }

    /// Checks `signature` over `message` against a DER SubjectPublicKeyInfo.
    pub(crate) fn verify(self, public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<(), String> {
        match self {
            Self::RsaPkcs1v15Sha256 => {
                use rsa::pkcs8::DecodePublicKey as _;
                let key = RsaPublicKey::from_public_key_der(public_key)
                    .map_err(|err| format!("invalid RSA public key: {err}"))?;
                let signature = pkcs1v15::Signature::try_from(signature)
                    .map_err(|err| format!("malformed RSA signature: {err}"))?;
                pkcs1v15::VerifyingKey::<Sha256>::new(key)
                    .verify(message, &signature)
                    .map_err(|_| "RSA signature does not match".to_string())
            }
            Self::EcdsaSha256 => {
                let key = p256::ecdsa::VerifyingKey::from_public_key_der(public_key)
                    .map_err(|err| format!("invalid EC public key: {err}"))?;
                let signature = p256::ecdsa::Signature::from_der(signature)
                    .map_err(|err| format!("malformed ECDSA signature: {err}"))?;
                key.verify(message, &signature)
                    .map_err(|_| "ECDSA signature does not match".to_string())
            }
        }
    }
}

/// Private key held for the duration of one signing operation.
#[derive(Clone)]
pub(crate) enum SigningKey {
    Rsa(Box<RsaPrivateKey>),
    EcdsaP256(p256::ecdsa::SigningKey),
}

impl SigningKey {
    /// Parses an unencrypted PKCS#8 private key.
    pub(crate) fn from_pkcs8_der(der: &[u8]) -> Result<Self, CredentialError> {
        if let Ok(key) = <RsaPrivateKey as rsa::pkcs8::DecodePrivateKey>::from_pkcs8_der(der) {
            return Ok(Self::Rsa(Box::new(key)));
        }
        if let Ok(key) =
            <p256::ecdsa::SigningKey as p256::pkcs8::DecodePrivateKey>::from_pkcs8_der(der)
        {
            return Ok(Self::EcdsaP256(key));
        }
        Err(CredentialError::UnsupportedKey {
            reason: "only RSA and ECDSA P-256 private keys are supported".to_string(),
        })
    }

    pub(crate) fn algorithm(&self) -> SignatureAlgorithm {
        match self {
            Self::Rsa(_) => SignatureAlgorithm::RsaPkcs1v15Sha256,
            Self::EcdsaP256(_) => SignatureAlgorithm::EcdsaSha256,
        }
    }

    /// True when `public_key` (DER SubjectPublicKeyInfo) belongs to this key.
    pub(crate) fn matches_public_key(&self, public_key: &[u8]) -> bool {
        match self {
            Self::Rsa(key) => {
                use rsa::pkcs8::DecodePublicKey as _;
                RsaPublicKey::from_public_key_der(public_key)
                    .map(|candidate| candidate == key.to_public_key())
                    .unwrap_or(false)
            }
            Self::EcdsaP256(key) => p256::ecdsa::VerifyingKey::from_public_key_der(public_key)
                .map(|candidate| candidate == *key.verifying_key())
                .unwrap_or(false),
        }
    }

    /// Signs `message` with SHA-256; ECDSA signatures are DER encoded.
    pub(crate) fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SigningError> {
        match self {
            Self::Rsa(key) => {
                let signer = pkcs1v15::SigningKey::<Sha256>::new(key.as_ref().clone());
                let signature = rsa::signature::Signer::try_sign(&signer, message)
                    .map_err(|err| SigningError::Primitive(err.to_string()))?;
                Ok(signature.to_vec())
            }
            Self::EcdsaP256(key) => {
                let signature: p256::ecdsa::Signature = key
                    .try_sign(message)
                    .map_err(|err| SigningError::Primitive(err.to_string()))?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
        }
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SigningKey").field(&self.algorithm()).finish()
    }
}
