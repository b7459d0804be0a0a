use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EntryNameError {
    #[error("entry name is empty")]
    Empty,
    #[error("entry name contains a NUL byte (got {name:?})")]
    NulByte { name: String },
    #[error("entry name must be relative (got '{name}')")]
    Absolute { name: String },
    #[error("entry name contains a '..' segment (got '{name}')")]
    ParentSegment { name: String },
}

/// A validated, `/`-separated relative entry name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryName(String);

impl EntryName {
    pub fn parse(raw: &str) -> Result<Self, EntryNameError> {
        validate_entry_name(raw)?;
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_directory(&self) -> bool {
        self.0.ends_with('/')
    }
}

impl fmt::Display for EntryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EntryName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Rejects names that can never denote a file inside the container root.
///
/// This is a lexical check only; the filesystem-level containment check
/// happens again when a name is resolved against a real directory.
pub fn validate_entry_name(raw: &str) -> Result<(), EntryNameError> {
    if raw.is_empty() {
        return Err(EntryNameError::Empty);
    }
    if raw.contains('\0') {
        return Err(EntryNameError::NulByte {
            name: raw.to_string(),
        });
    }
    let bytes = raw.as_bytes();
    let drive_prefix = bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic();
    if raw.starts_with('/') || raw.starts_with('\\') || drive_prefix {
        return Err(EntryNameError::Absolute {
            name: raw.to_string(),
        });
    }
    if raw.split(|c| c == '/' || c == '\\').any(|segment| segment == "..") {
        return Err(EntryNameError::ParentSegment {
            name: raw.to_string(),
        });
    }
    Ok(())
}
