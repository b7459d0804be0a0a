mod settings;

pub use settings::{Config, EnvSnapshot, SigningConfig, WorkspaceConfig};
