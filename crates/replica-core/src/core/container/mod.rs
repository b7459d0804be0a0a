//! Unpacking a source package into a scratch tree, merging the payload into
//! it, and packing the tree back into a deterministic container.

mod build;
mod extract;
mod inject;
mod paths;
mod read;

pub use build::{build, BuildReport};
pub use extract::{extract, extract_replacing, ExtractReport};
pub use inject::{inject, InjectReport};
pub use paths::resolve;
pub use read::read_config;
