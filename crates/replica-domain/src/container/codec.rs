use serde::{Deserialize, Serialize};

/// Suffixes the platform memory-maps straight out of the container.
const STORED_SUFFIXES: [&str; 3] = [".so", ".arsc", ".dex"];

const NATIVE_LIBRARY_ALIGNMENT: u16 = 4096;
const STORED_ALIGNMENT: u16 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionPolicy {
    Stored,
    Deflated,
}

/// Chooses the storage method for an entry from its name alone.
pub fn classify(name: &str) -> CompressionPolicy {
    let lower = name.to_ascii_lowercase();
    if STORED_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix)) {
        CompressionPolicy::Stored
    } else {
        CompressionPolicy::Deflated
    }
}

/// Byte alignment of the entry's data offset; `None` for deflated entries.
pub fn alignment_for(name: &str) -> Option<u16> {
    match classify(name) {
        CompressionPolicy::Deflated => None,
        CompressionPolicy::Stored if name.to_ascii_lowercase().ends_with(".so") => {
            Some(NATIVE_LIBRARY_ALIGNMENT)
        }
        CompressionPolicy::Stored => Some(STORED_ALIGNMENT),
    }
}

/// Running CRC-32 and byte count over the exact bytes of an entry.
#[derive(Default)]
pub struct Checksum {
    hasher: crc32fast::Hasher,
    size: u64,
}

impl Checksum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
        self.size = self.size.saturating_add(bytes.len() as u64);
    }

    pub fn finish(self) -> (u32, u64) {
        (self.hasher.finalize(), self.size)
    }
}

/// Metadata decided for one output entry before any byte is written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySpec {
    pub name: String,
    pub policy: CompressionPolicy,
    /// Declared CRC-32; always present for stored entries.
    pub crc32: Option<u32>,
    /// Declared uncompressed size; always present for stored entries.
    pub size: Option<u64>,
    pub alignment: Option<u16>,
}

impl EntrySpec {
    /// Spec for an entry whose checksum is produced by the deflate stream.
    pub fn deflated(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy: CompressionPolicy::Deflated,
            crc32: None,
            size: None,
            alignment: None,
        }
    }

    /// Spec for an entry classified from `name`, checksummed up front when stored.
    pub fn for_bytes(name: impl Into<String>, bytes: &[u8]) -> Self {
        let name = name.into();
        match classify(&name) {
            CompressionPolicy::Deflated => Self::deflated(name),
            CompressionPolicy::Stored => {
                let mut checksum = Checksum::new();
                checksum.update(bytes);
                Self::stored(name, checksum)
            }
        }
    }

    pub fn stored(name: impl Into<String>, checksum: Checksum) -> Self {
        let name = name.into();
        let (crc32, size) = checksum.finish();
        let alignment = alignment_for(&name);
        Self {
            name,
            policy: CompressionPolicy::Stored,
            crc32: Some(crc32),
            size: Some(size),
            alignment,
        }
    }
}
