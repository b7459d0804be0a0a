use once_cell::sync::Lazy;
use regex::Regex;

/// Entry that must lead every rebuilt container.
pub const ANDROID_MANIFEST: &str = "AndroidManifest.xml";
/// Configuration document consumed by the injected runtime.
pub const CONFIG_DOCUMENT_PATH: &str = "assets/cloner.json";
/// Optional application-data archive shipped with a clone.
pub const BUNDLED_DATA_PATH: &str = "assets/bundled_app_data.zip";
pub const SIGNATURE_DIR: &str = "META-INF";
pub const DEFAULT_NATIVE_ABI: &str = "arm64-v8a";

/// (year, month, day, hour, minute, second) written on every entry.
pub const FIXED_DOS_TIMESTAMP: (u16, u8, u8, u8, u8, u8) = (1980, 1, 1, 0, 0, 0);

static SIGNATURE_ARTIFACT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^META-INF/(.+\.(RSA|DSA|EC|SF)|MANIFEST\.MF)$")
        .unwrap_or_else(|err| unreachable!("signature artifact pattern is valid: {err}"))
});

/// True for entries that hold a previous signature and are always regenerated.
pub fn is_signature_artifact(name: &str) -> bool {
    SIGNATURE_ARTIFACT.is_match(name)
}

/// First `classesN.dex` name (N >= 2) for which `taken` reports false.
pub fn next_module_slot(taken: impl Fn(&str) -> bool) -> String {
    (2u32..)
        .map(|index| format!("classes{index}.dex"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| unreachable!("an unbounded range always yields a free slot"))
}
