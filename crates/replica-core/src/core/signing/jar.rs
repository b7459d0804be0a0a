//! v1 (JAR) signing: `MANIFEST.MF`, the signature file and its PKCS#7 block.

use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Seek};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use replica_domain::{is_signature_artifact, SchemeFlags, SIGNATURE_DIR};

use super::{pkcs7, Credential, SigningError};

const LINE_LIMIT: usize = 72;
const CREATED_BY: &str = "1.0 (Android)";
const DIGEST_ATTRIBUTE: &str = "SHA-256-Digest";
pub(crate) const APK_SIGNED_ATTRIBUTE: &str = "X-Android-APK-Signed";

/// Files that make up one JAR signature.
pub(crate) struct JarSignature {
    pub(crate) manifest: Vec<u8>,
    pub(crate) signature_file: Vec<u8>,
    pub(crate) block: Vec<u8>,
    pub(crate) base_name: String,
    pub(crate) block_extension: &'static str,
}

impl JarSignature {
    pub(crate) fn entries(&self) -> [(String, &[u8]); 3] {
        [
            (format!("{SIGNATURE_DIR}/MANIFEST.MF"), self.manifest.as_slice()),
            (
                format!("{SIGNATURE_DIR}/{}.SF", self.base_name),
                self.signature_file.as_slice(),
            ),
            (
                format!("{SIGNATURE_DIR}/{}.{}", self.base_name, self.block_extension),
                self.block.as_slice(),
            ),
        ]
    }
}

/// Adds a v1 signature to `container` and returns the rewritten archive.
pub(crate) fn sign(
    container: Vec<u8>,
    credential: &Credential,
    schemes: SchemeFlags,
) -> Result<Vec<u8>, SigningError> {
    let digests = entry_digests(&mut ZipArchive::new(Cursor::new(container.as_slice()))?)?;
    let signature = build_signature(&digests, credential, schemes)?;

    let mut writer = ZipWriter::new_append(Cursor::new(container))?;
    let timestamp = DateTime::default();
    for (name, bytes) in signature.entries() {
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(timestamp)
            .unix_permissions(0o644);
        writer.start_file(name, options)?;
        io::Write::write_all(&mut writer, bytes)?;
    }
    Ok(writer.finish()?.into_inner())
}

/// SHA-256 of every file entry, keyed and ordered by name.
pub(crate) fn entry_digests<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
) -> Result<BTreeMap<String, [u8; 32]>, SigningError> {
    let mut digests = BTreeMap::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() || is_signature_artifact(entry.name()) {
            continue;
        }
        let name = entry.name().to_string();
        let mut hasher = Sha256::new();
        io::copy(&mut entry, &mut hasher)?;
        digests.insert(name, hasher.finalize().into());
    }
    Ok(digests)
}

pub(crate) fn build_signature(
    digests: &BTreeMap<String, [u8; 32]>,
    credential: &Credential,
    schemes: SchemeFlags,
) -> Result<JarSignature, SigningError> {
    let mut manifest = Vec::new();
    write_attribute(&mut manifest, "Manifest-Version", "1.0");
    write_attribute(&mut manifest, "Created-By", CREATED_BY);
    manifest.extend_from_slice(b"\r\n");

    let mut sections = Vec::with_capacity(digests.len());
    for (name, digest) in digests {
        let mut section = Vec::new();
        write_attribute(&mut section, "Name", name);
        write_attribute(&mut section, DIGEST_ATTRIBUTE, &STANDARD.encode(digest));
        section.extend_from_slice(b"\r\n");
        manifest.extend_from_slice(&section);
        sections.push((name.as_str(), section));
    }

    let mut signature_file = Vec::new();
    write_attribute(&mut signature_file, "Signature-Version", "1.0");
    write_attribute(&mut signature_file, "Created-By", CREATED_BY);
    write_attribute(
        &mut signature_file,
        "SHA-256-Digest-Manifest",
        &STANDARD.encode(Sha256::digest(&manifest)),
    );
    if let Some(value) = apk_signed_value(schemes) {
        write_attribute(&mut signature_file, APK_SIGNED_ATTRIBUTE, &value);
    }
    signature_file.extend_from_slice(b"\r\n");
    for (name, section) in &sections {
        write_attribute(&mut signature_file, "Name", name);
        write_attribute(
            &mut signature_file,
            DIGEST_ATTRIBUTE,
            &STANDARD.encode(Sha256::digest(section)),
        );
        signature_file.extend_from_slice(b"\r\n");
    }

    let block = pkcs7::sign_detached(&signature_file, credential)?;
    Ok(JarSignature {
        manifest,
        signature_file,
        block,
        base_name: signer_base_name(credential.alias()),
        block_extension: credential.key().algorithm().block_extension(),
    })
}

/// Value announcing which block schemes also sign the package, so a v1-only
/// verifier can detect a stripped block.
fn apk_signed_value(schemes: SchemeFlags) -> Option<String> {
    let ids: Vec<&str> = [(schemes.v2, "2"), (schemes.v3, "3")]
        .into_iter()
        .filter_map(|(enabled, id)| enabled.then_some(id))
        .collect();
    (!ids.is_empty()).then(|| ids.join(", "))
}

/// Upper-cased alias restricted to `[A-Z0-9_-]`, at most eight characters.
pub(crate) fn signer_base_name(alias: &str) -> String {
    let name: String = alias
        .chars()
        .take(8)
        .map(|c| {
            let upper = c.to_ascii_uppercase();
            if upper.is_ascii_alphanumeric() || upper == '-' || upper == '_' {
                upper
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() {
        "CERT".to_string()
    } else {
        name
    }
}

/// Writes `key: value` wrapped at 72 bytes with space-led continuation lines.
fn write_attribute(out: &mut Vec<u8>, key: &str, value: &str) {
    let line = format!("{key}: {value}");
    let bytes = line.as_bytes();
    let mut start = 0;
    let mut limit = LINE_LIMIT;
    while start < bytes.len() {
        let end = floor_char_boundary(&line, (start + limit).min(bytes.len()));
        if start > 0 {
            out.push(b' ');
        }
        out.extend_from_slice(&bytes[start..end]);
        out.extend_from_slice(b"\r\n");
        start = end;
        limit = LINE_LIMIT - 1;
    }
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Parsed main attributes and per-entry sections of a manifest-style file.
#[derive(Debug, Default)]
pub(crate) struct ManifestFile {
    pub(crate) main: BTreeMap<String, String>,
    pub(crate) sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl ManifestFile {
    pub(crate) fn parse(bytes: &[u8]) -> Result<Self, String> {
        let text = std::str::from_utf8(bytes).map_err(|_| "manifest is not UTF-8".to_string())?;
        let mut logical: Vec<String> = Vec::new();
        for raw in text.split('\n') {
            let line = raw.strip_suffix('\r').unwrap_or(raw);
            match (line.strip_prefix(' '), logical.last_mut()) {
                (Some(rest), Some(previous)) if !previous.is_empty() => previous.push_str(rest),
                _ => logical.push(line.to_string()),
            }
        }

        let mut parsed = Self::default();
        let mut current: Option<BTreeMap<String, String>> = None;
        let mut in_main = true;
        for line in logical {
            if line.is_empty() {
                if let Some(section) = current.take() {
                    parsed.insert_section(section)?;
                }
                in_main = false;
                continue;
            }
            let (key, value) = line
                .split_once(": ")
                .ok_or_else(|| format!("malformed manifest line '{line}'"))?;
            if in_main {
                parsed.main.insert(key.to_string(), value.to_string());
            } else {
                current
                    .get_or_insert_with(BTreeMap::new)
                    .insert(key.to_string(), value.to_string());
            }
        }
        if let Some(section) = current {
            parsed.insert_section(section)?;
        }
        Ok(parsed)
    }

    fn insert_section(&mut self, mut section: BTreeMap<String, String>) -> Result<(), String> {
        let name = section
            .remove("Name")
            .ok_or_else(|| "manifest section without a Name".to_string())?;
        self.sections.insert(name, section);
        Ok(())
    }

    /// Decoded SHA-256 digest recorded for `name`.
    pub(crate) fn entry_digest(&self, name: &str) -> Option<Vec<u8>> {
        self.sections
            .get(name)
            .and_then(|section| section.get(DIGEST_ATTRIBUTE))
            .and_then(|value| STANDARD.decode(value).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::ec_test_credential;

    #[test]
    fn long_attributes_wrap_at_seventy_two_bytes() {
        let mut out = Vec::new();
        let name = format!("res/{}.png", "a".repeat(120));
        write_attribute(&mut out, "Name", &name);
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.split("\r\n").filter(|l| !l.is_empty()).collect();
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|l| l.len() <= LINE_LIMIT));
        assert!(lines[1..].iter().all(|l| l.starts_with(' ')));

        let parsed = ManifestFile::parse(format!("M: 1\r\n\r\n{text}\r\n").as_bytes()).unwrap();
        assert!(parsed.sections.contains_key(&name));
    }

    #[test]
    fn signer_names_are_sanitized() {
        assert_eq!(signer_base_name("key0"), "KEY0");
        assert_eq!(signer_base_name("my release key"), "MY_RELEA");
        assert_eq!(signer_base_name(""), "CERT");
    }

    #[test]
    fn apk_signed_attribute_lists_block_schemes() {
        assert_eq!(apk_signed_value(SchemeFlags::default()).as_deref(), Some("2"));
        let all = SchemeFlags { v1: true, v2: true, v3: true };
        assert_eq!(apk_signed_value(all).as_deref(), Some("2, 3"));
        let v1_only = SchemeFlags { v1: true, v2: false, v3: false };
        assert_eq!(apk_signed_value(v1_only), None);
    }

    #[test]
    fn signature_file_digests_the_manifest() {
        let credential = ec_test_credential();
        let mut digests = BTreeMap::new();
        digests.insert("classes.dex".to_string(), [1u8; 32]);
        digests.insert("AndroidManifest.xml".to_string(), [2u8; 32]);
        let signature = build_signature(&digests, &credential, SchemeFlags::default()).unwrap();

        let manifest = ManifestFile::parse(&signature.manifest).unwrap();
        assert_eq!(manifest.main["Manifest-Version"], "1.0");
        assert_eq!(manifest.entry_digest("classes.dex").unwrap(), vec![1u8; 32]);

        let sf = ManifestFile::parse(&signature.signature_file).unwrap();
        let expected = STANDARD.encode(Sha256::digest(&signature.manifest));
        assert_eq!(sf.main["SHA-256-Digest-Manifest"], expected);
        assert_eq!(sf.main[APK_SIGNED_ATTRIBUTE], "2");
        assert_eq!(sf.sections.len(), 2);
        pkcs7::verify_detached(&signature.block, &signature.signature_file).unwrap();

        let names: Vec<String> = signature.entries().iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(names, ["META-INF/MANIFEST.MF", "META-INF/KEY0.SF", "META-INF/KEY0.EC"]);
    }
}
