use std::fmt;

use serde::{Deserialize, Serialize};

/// Which package-signature scheme generations to apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemeFlags {
    /// JAR signing (`META-INF` manifest, signature file and block).
    pub v1: bool,
    /// APK Signature Scheme v2 block.
    pub v2: bool,
    /// APK Signature Scheme v3 block; off unless asked for.
    pub v3: bool,
}

impl Default for SchemeFlags {
    fn default() -> Self {
        Self {
            v1: true,
            v2: true,
            v3: false,
        }
    }
}

impl SchemeFlags {
    pub fn none() -> Self {
        Self {
            v1: false,
            v2: false,
            v3: false,
        }
    }

    pub fn any(&self) -> bool {
        self.v1 || self.v2 || self.v3
    }

    /// Whether a signing block has to be inserted before the central directory.
    pub fn needs_signing_block(&self) -> bool {
        self.v2 || self.v3
    }
}

impl fmt::Display for SchemeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let enabled: Vec<&str> = [(self.v1, "v1"), (self.v2, "v2"), (self.v3, "v3")]
            .into_iter()
            .filter_map(|(on, label)| on.then_some(label))
            .collect();
        if enabled.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&enabled.join("+"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_enables_legacy_and_modern_only() {
        let flags = SchemeFlags::default();
        assert!(flags.v1 && flags.v2 && !flags.v3);
        assert_eq!(flags.to_string(), "v1+v2");
    }

    #[test]
    fn none_renders_as_none() {
        assert_eq!(SchemeFlags::none().to_string(), "none");
        assert!(!SchemeFlags::none().any());
    }
}
