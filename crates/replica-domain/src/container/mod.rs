//! Container model: entry names, per-entry storage policy, and the fixed
//! layout every rebuilt package follows.

mod codec;
mod entry;
mod layout;

pub use codec::{alignment_for, classify, Checksum, CompressionPolicy, EntrySpec};
pub use entry::{validate_entry_name, EntryName, EntryNameError};
pub use layout::{
    is_signature_artifact, next_module_slot, ANDROID_MANIFEST, BUNDLED_DATA_PATH,
    CONFIG_DOCUMENT_PATH, DEFAULT_NATIVE_ABI, FIXED_DOS_TIMESTAMP, SIGNATURE_DIR,
};
