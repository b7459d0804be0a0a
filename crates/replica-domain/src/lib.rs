#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod container;
pub mod payload;
pub mod schemes;

pub use container::{
    alignment_for, classify, is_signature_artifact, next_module_slot, validate_entry_name,
    Checksum, CompressionPolicy, EntryName, EntryNameError, EntrySpec, ANDROID_MANIFEST,
    BUNDLED_DATA_PATH, CONFIG_DOCUMENT_PATH, DEFAULT_NATIVE_ABI, FIXED_DOS_TIMESTAMP,
    SIGNATURE_DIR,
};
pub use payload::{ClonePayload, PayloadBundle};
pub use schemes::SchemeFlags;
