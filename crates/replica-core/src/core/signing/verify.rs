use std::collections::BTreeMap;
use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;
use sha2::{Digest, Sha256};
use zip::ZipArchive;

use replica_domain::{SchemeFlags, SIGNATURE_DIR};

use super::block::{
    block_pairs, check_signer, content_digest, parse_signers, ZipSections,
    V2_BLOCK_ID, V3_BLOCK_ID,
};
use super::jar::{entry_digests, ManifestFile, APK_SIGNED_ATTRIBUTE};
use super::pkcs7;

/// Result of checking a signed container.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum VerificationOutcome {
    /// Every expected scheme is present and valid.
    Verified { schemes: SchemeFlags },
    NotVerified { problems: Vec<String> },
    /// The verifier cannot judge this container.
    Unsupported,
}

impl VerificationOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified { .. })
    }
}

/// Capability to check a signed container after signing.
pub trait ContainerVerifier: Send + Sync {
    fn verify(&self, container: &[u8], expected: SchemeFlags) -> VerificationOutcome;
}

/// Stand-in for environments without a verifier.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoVerification;

impl ContainerVerifier for NoVerification {
    fn verify(&self, _container: &[u8], _expected: SchemeFlags) -> VerificationOutcome {
        VerificationOutcome::Unsupported
    }
}

/// Checks v1, v2 and v3 signatures produced with RSA or ECDSA P-256 keys.
#[derive(Clone, Copy, Debug, Default)]
pub struct SchemeVerifier;

impl ContainerVerifier for SchemeVerifier {
    fn verify(&self, container: &[u8], expected: SchemeFlags) -> VerificationOutcome {
        let mut problems = Vec::new();
        let mut found = SchemeFlags::none();

        match verify_blocks(container) {
            Ok(present) => {
                for (scheme, result) in present {
                    match result {
                        Ok(()) if scheme == V2_BLOCK_ID => found.v2 = true,
                        Ok(()) => found.v3 = true,
                        Err(problem) => problems.push(problem),
                    }
                }
            }
            Err(problem) => problems.push(problem),
        }

        let jar = verify_jar(container);
        match jar {
            Ok(Some(announced)) => {
                found.v1 = true;
                if announced.v2 && !found.v2 {
                    problems.push("v1 signature announces a v2 block that is missing".to_string());
                }
                if announced.v3 && !found.v3 {
                    problems.push("v1 signature announces a v3 block that is missing".to_string());
                }
            }
            Ok(None) => {}
            Err(problem) => problems.push(format!("v1: {problem}")),
        }

        for (wanted, present, label) in [
            (expected.v1, found.v1, "v1"),
            (expected.v2, found.v2, "v2"),
            (expected.v3, found.v3, "v3"),
        ] {
            if wanted && !present {
                problems.push(format!("expected {label} signature is missing"));
            }
        }

        if problems.is_empty() && found.any() {
            VerificationOutcome::Verified { schemes: found }
        } else {
            if !found.any() && problems.is_empty() {
                problems.push("container is not signed".to_string());
            }
            VerificationOutcome::NotVerified { problems }
        }
    }
}

/// Verifies every v2/v3 block value; returns one result per recognised block.
fn verify_blocks(container: &[u8]) -> Result<Vec<(u32, Result<(), String>)>, String> {
    let sections = ZipSections::locate(container).map_err(|err| err.to_string())?;
    let Some(block) = sections.signing_block(container) else {
        return Ok(Vec::new());
    };
    let digest = content_digest(container, &sections);
    let mut results = Vec::new();
    for (id, value) in block_pairs(block.pairs)? {
        let (v3, label) = match id {
            V2_BLOCK_ID => (false, "v2"),
            V3_BLOCK_ID => (true, "v3"),
            other => {
                tracing::debug!(id = format_args!("{other:#x}"), "ignoring signing block pair");
                continue;
            }
        };
        let result = parse_signers(value, v3).and_then(|signers| {
            if signers.is_empty() {
                return Err("block has no signers".to_string());
            }
            signers
                .iter()
                .try_for_each(|signer| check_signer(signer, v3, &digest))
        });
        results.push((id, result.map_err(|problem| format!("{label}: {problem}"))));
    }
    Ok(results)
}

/// Verifies the JAR signature if there is one and returns the block schemes
/// it announces.
fn verify_jar(container: &[u8]) -> Result<Option<SchemeFlags>, String> {
    let mut archive =
        ZipArchive::new(Cursor::new(container)).map_err(|err| format!("unreadable archive: {err}"))?;
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    let prefix = format!("{SIGNATURE_DIR}/");
    let signature_files: Vec<&String> = names
        .iter()
        .filter(|name| name.starts_with(&prefix) && name.to_ascii_uppercase().ends_with(".SF"))
        .collect();
    let Some(sf_name) = signature_files.first() else {
        return Ok(None);
    };
    let base = &sf_name[..sf_name.len() - 3];
    let block_name = names
        .iter()
        .find(|name| {
            let upper = name.to_ascii_uppercase();
            name.starts_with(base)
                && [".RSA", ".EC", ".DSA"]
                    .iter()
                    .any(|ext| upper == format!("{}{ext}", base.to_ascii_uppercase()))
        })
        .ok_or_else(|| format!("no signature block for {sf_name}"))?
        .clone();

    let manifest_bytes = read_entry(&mut archive, &format!("{SIGNATURE_DIR}/MANIFEST.MF"))?;
    let sf_bytes = read_entry(&mut archive, sf_name)?;
    let block_bytes = read_entry(&mut archive, &block_name)?;

    pkcs7::verify_detached(&block_bytes, &sf_bytes)?;

    let sf = ManifestFile::parse(&sf_bytes)?;
    let manifest_digest = STANDARD.encode(Sha256::digest(&manifest_bytes));
    match sf.main.get("SHA-256-Digest-Manifest") {
        Some(recorded) if *recorded == manifest_digest => {}
        Some(_) => return Err("signature file does not match MANIFEST.MF".to_string()),
        None => return Err("signature file lacks a SHA-256 manifest digest".to_string()),
    }

    let manifest = ManifestFile::parse(&manifest_bytes)?;
    let actual: BTreeMap<String, [u8; 32]> =
        entry_digests(&mut archive).map_err(|err| format!("unreadable entries: {err}"))?;
    for (name, digest) in &actual {
        match manifest.entry_digest(name) {
            Some(recorded) if recorded == digest.as_slice() => {}
            Some(_) => return Err(format!("digest mismatch for {name}")),
            None => return Err(format!("{name} is not covered by the manifest")),
        }
    }
    if let Some(extra) = manifest.sections.keys().find(|name| !actual.contains_key(*name)) {
        return Err(format!("manifest lists missing entry {extra}"));
    }

    let announced = sf.main.get(APK_SIGNED_ATTRIBUTE).map_or_else(SchemeFlags::none, |value| {
        let ids: Vec<&str> = value.split(',').map(str::trim).collect();
        SchemeFlags {
            v1: true,
            v2: ids.contains(&"2"),
            v3: ids.contains(&"3"),
        }
    });
    Ok(Some(announced))
}

fn read_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<Vec<u8>, String> {
    use std::io::Read;
    let mut entry = archive
        .by_name(name)
        .map_err(|err| format!("cannot read {name}: {err}"))?;
    let mut bytes = Vec::new();
    entry
        .read_to_end(&mut bytes)
        .map_err(|err| format!("cannot read {name}: {err}"))?;
    Ok(bytes)
}
