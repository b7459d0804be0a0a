use std::path::PathBuf;

/// Why a signing credential could not be produced from its store.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("credential store {} does not exist", path.display())]
    NotFound { path: PathBuf },
    #[error("credential store {} could not be read", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("credential store is not a valid PKCS#12 archive: {reason}")]
    Malformed { reason: String },
    #[error("credential store password is incorrect")]
    WrongPassword,
    #[error("no entry named '{alias}' in the credential store")]
    MissingAlias { alias: String },
    #[error("credential store holds no private key for the alias")]
    MissingKey,
    #[error("credential store holds no certificate for the private key")]
    MissingCertificate,
    #[error("unsupported private key: {reason}")]
    UnsupportedKey { reason: String },
    #[error("private key does not match the certificate")]
    KeyMismatch,
}

impl CredentialError {
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "store_not_found",
            Self::Unreadable { .. } => "store_unreadable",
            Self::Malformed { .. } => "store_malformed",
            Self::WrongPassword => "wrong_password",
            Self::MissingAlias { .. } => "missing_alias",
            Self::MissingKey => "missing_key",
            Self::MissingCertificate => "missing_certificate",
            Self::UnsupportedKey { .. } => "unsupported_key",
            Self::KeyMismatch => "key_mismatch",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("no signature scheme is enabled")]
    NoSchemes,
    #[error("container is malformed: {0}")]
    MalformedContainer(String),
    #[error("container exceeds the 4 GiB limit of the signing schemes")]
    TooLarge,
    #[error("signature primitive failed: {0}")]
    Primitive(String),
    #[error("failed to encode signature structure")]
    Encoding(#[from] der::Error),
    #[error("failed to rewrite container")]
    Archive(#[from] zip::result::ZipError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
