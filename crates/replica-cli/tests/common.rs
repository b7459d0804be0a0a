#![allow(dead_code)]

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use assert_cmd::assert::Assert;
use serde_json::Value;
use tempfile::TempDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Temp directory holding a source package, a keystore and a scratch root.
pub struct Fixture {
    pub temp: TempDir,
    pub keystore: PathBuf,
    pub scratch: PathBuf,
}

impl Fixture {
    pub fn new(prefix: &str) -> Self {
        let temp = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()
            .expect("tempdir");
        let keystore = write_keystore(temp.path(), "android", "key0");
        let scratch = temp.path().join("scratch");
        Self {
            temp,
            keystore,
            scratch,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.temp.path().join(name)
    }

    /// A small signed-looking package with an existing cloner.json.
    pub fn source(&self) -> PathBuf {
        let path = self.path("source.apk");
        write_container(
            &path,
            &[
                ("AndroidManifest.xml", b"<manifest package=\"com.example\"/>".as_slice()),
                ("classes.dex", b"dex\n035\0original"),
                ("assets/cloner.json", b"{\"version\":1}"),
                ("res/layout/main.xml", b"<LinearLayout/>"),
                ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\r\n"),
                ("META-INF/CERT.SF", b"stale"),
                ("META-INF/CERT.RSA", b"stale"),
            ],
        );
        path
    }

    pub fn file(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, bytes).expect("write fixture file");
        path
    }

    pub fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("replica");
        cmd.env_remove("REPLICA_STORE_PASSWORD")
            .env_remove("REPLICA_KEY_PASSWORD")
            .env_remove("REPLICA_KEY_ALIAS")
            .env_remove("REPLICA_SIGN_V1")
            .env_remove("REPLICA_SIGN_V2")
            .env_remove("REPLICA_SIGN_V3")
            .env_remove("REPLICA_VERIFY")
            .env_remove("REPLICA_STRICT_VERIFY")
            .env_remove("REPLICA_TIMINGS")
            .env("REPLICA_KEYSTORE", &self.keystore)
            .env("REPLICA_SCRATCH_DIR", &self.scratch)
            .env("NO_COLOR", "1");
        cmd
    }

    pub fn scratch_is_empty(&self) -> bool {
        fs::read_dir(&self.scratch)
            .map(|entries| entries.count() == 0)
            .unwrap_or(true)
    }
}

pub fn write_keystore(dir: &Path, password: &str, alias: &str) -> PathBuf {
    let key_pair = rcgen::KeyPair::generate().expect("key pair");
    let params =
        rcgen::CertificateParams::new(vec!["replica.test".to_string()]).expect("cert params");
    let certificate = params.self_signed(&key_pair).expect("self-signed cert");
    let pfx = p12::PFX::new(
        certificate.der(),
        &key_pair.serialize_der(),
        None,
        password,
        alias,
    )
    .expect("pkcs12");
    let path = dir.join("debug.p12");
    fs::write(&path, pfx.to_der()).expect("write keystore");
    path
}

pub fn write_container(path: &Path, entries: &[(&str, &[u8])]) {
    let mut zip = ZipWriter::new(fs::File::create(path).expect("create container"));
    for (name, bytes) in entries {
        let lower = name.to_ascii_lowercase();
        let method = if lower.ends_with(".dex") || lower.ends_with(".so") {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Deflated
        };
        zip.start_file(*name, FileOptions::default().compression_method(method))
            .expect("start entry");
        zip.write_all(bytes).expect("write entry");
    }
    zip.finish().expect("finish container");
}

pub fn read_entries(path: &Path) -> Vec<(String, Vec<u8>)> {
    let mut archive = ZipArchive::new(fs::File::open(path).expect("open")).expect("zip");
    let mut entries = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).expect("entry");
        if entry.is_dir() {
            continue;
        }
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).expect("read entry");
        entries.push((entry.name().to_string(), bytes));
    }
    entries
}

pub fn parse_json(assert: &Assert) -> Value {
    serde_json::from_slice(&assert.get_output().stdout).expect("valid json")
}
