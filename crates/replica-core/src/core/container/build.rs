use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use replica_domain::{
    classify, Checksum, CompressionPolicy, EntrySpec, ANDROID_MANIFEST, FIXED_DOS_TIMESTAMP,
};

use crate::core::pipeline::PipelineError;

const DEFLATE_LEVEL: i32 = 9;

#[derive(Debug, Default, Clone, Serialize)]
pub struct BuildReport {
    /// Entries in write order; the manifest is always first.
    pub entries: Vec<EntrySpec>,
    pub directories: usize,
}

impl BuildReport {
    pub fn stored(&self) -> usize {
        self.entries
            .iter()
            .filter(|spec| spec.policy == CompressionPolicy::Stored)
            .count()
    }
}

/// Packs `dest_root` into `writer`, writing `manifest` as the first entry.
///
/// Files are visited in lexical order per directory so identical trees give
/// byte-identical output. A manifest file present in the tree is ignored in
/// favour of the supplied bytes.
pub fn build<W: Write + Seek>(
    dest_root: &Path,
    manifest: &[u8],
    writer: W,
) -> Result<BuildReport, PipelineError> {
    build_inner(dest_root, manifest, writer)
        .map_err(|source| PipelineError::ContainerWriteFailed { source })
}

fn build_inner<W: Write + Seek>(root: &Path, manifest: &[u8], writer: W) -> Result<BuildReport> {
    let mut zip = ZipWriter::new(writer);
    let mut report = BuildReport::default();

    let spec = EntrySpec::for_bytes(ANDROID_MANIFEST, manifest);
    write_entry(&mut zip, &spec, &mut &manifest[..])?;
    report.entries.push(spec);

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        let name = entry_name(root, entry.path())?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            if is_empty_dir(entry.path())? {
                zip.add_directory(format!("{name}/"), base_options())
                    .with_context(|| format!("failed to add directory {name}"))?;
                report.directories += 1;
            }
            continue;
        }
        if !file_type.is_file() {
            tracing::debug!(entry = %name, "skipping non-regular file");
            continue;
        }
        if name == ANDROID_MANIFEST {
            continue;
        }
        let spec = match classify(&name) {
            CompressionPolicy::Deflated => EntrySpec::deflated(name),
            CompressionPolicy::Stored => EntrySpec::stored(name, checksum_file(entry.path())?),
        };
        let file = File::open(entry.path())
            .with_context(|| format!("failed to open {}", entry.path().display()))?;
        write_entry(&mut zip, &spec, &mut BufReader::new(file))?;
        report.entries.push(spec);
    }

    let mut inner = zip.finish().context("failed to finish container")?;
    inner.flush().context("failed to flush container")?;
    tracing::debug!(
        entries = report.entries.len(),
        stored = report.stored(),
        "built container"
    );
    Ok(report)
}

fn base_options() -> FileOptions {
    let (year, month, day, hour, minute, second) = FIXED_DOS_TIMESTAMP;
    let timestamp =
        DateTime::from_date_and_time(year, month, day, hour, minute, second).unwrap_or_default();
    FileOptions::default()
        .last_modified_time(timestamp)
        .unix_permissions(0o644)
}

fn write_entry<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    spec: &EntrySpec,
    reader: &mut dyn Read,
) -> Result<()> {
    match spec.policy {
        CompressionPolicy::Deflated => {
            let options = base_options()
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(DEFLATE_LEVEL));
            zip.start_file(spec.name.as_str(), options)
                .with_context(|| format!("failed to start {}", spec.name))?;
            io::copy(reader, zip).with_context(|| format!("failed to write {}", spec.name))?;
        }
        CompressionPolicy::Stored => {
            let options = base_options().compression_method(CompressionMethod::Stored);
            let align = spec.alignment.unwrap_or(1);
            zip.start_file_aligned(spec.name.as_str(), options, align)
                .with_context(|| format!("failed to start {}", spec.name))?;
            let mut written = Checksum::new();
            let mut buf = [0u8; 64 * 1024];
            loop {
                let read = reader
                    .read(&mut buf)
                    .with_context(|| format!("failed to read {}", spec.name))?;
                if read == 0 {
                    break;
                }
                written.update(&buf[..read]);
                zip.write_all(&buf[..read])
                    .with_context(|| format!("failed to write {}", spec.name))?;
            }
            let (crc32, size) = written.finish();
            if Some(crc32) != spec.crc32 || Some(size) != spec.size {
                return Err(anyhow!("{} changed while it was being packed", spec.name));
            }
        }
    }
    Ok(())
}

fn checksum_file(path: &Path) -> Result<Checksum> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut checksum = Checksum::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buf)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if read == 0 {
            return Ok(checksum);
        }
        checksum.update(&buf[..read]);
    }
}

fn entry_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .with_context(|| format!("{} is outside {}", path.display(), root.display()))?;
    let parts = relative
        .components()
        .map(|component| {
            component
                .as_os_str()
                .to_str()
                .ok_or_else(|| anyhow!("non UTF-8 file name {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join("/"))
}

fn is_empty_dir(path: &Path) -> Result<bool> {
    let mut entries =
        fs::read_dir(path).with_context(|| format!("failed to list {}", path.display()))?;
    Ok(entries.next().is_none())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::core::container::extract_replacing;
    use crate::core::test_support::{read_entries, write_container};

    fn populate(root: &Path) {
        fs::create_dir_all(root.join("res/layout")).unwrap();
        fs::create_dir_all(root.join("lib/arm64-v8a")).unwrap();
        fs::create_dir_all(root.join("assets/empty")).unwrap();
        fs::write(root.join("res/layout/main.xml"), b"<LinearLayout/>").unwrap();
        fs::write(root.join("classes.dex"), b"dex\n035\0payload").unwrap();
        fs::write(root.join("resources.arsc"), vec![7u8; 5000]).unwrap();
        fs::write(root.join("lib/arm64-v8a/libpine.so"), vec![0x7fu8; 3000]).unwrap();
        fs::write(root.join("AndroidManifest.xml"), b"stale copy on disk").unwrap();
    }

    fn build_bytes(root: &Path, manifest: &[u8]) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        build(root, manifest, &mut out).unwrap();
        out.into_inner()
    }

    /// Accepts writes but cannot flush them, like a full disk behind a buffer.
    struct UnflushableWriter(Cursor<Vec<u8>>);

    impl Write for UnflushableWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::other("no space left on device"))
        }
    }

    impl Seek for UnflushableWriter {
        fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
            self.0.seek(pos)
        }
    }

    #[test]
    fn failed_final_flush_is_a_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        populate(dir.path());
        let err = build(dir.path(), b"<m/>", UnflushableWriter(Cursor::new(Vec::new()))).unwrap_err();
        assert!(matches!(err, PipelineError::ContainerWriteFailed { .. }));
        assert_eq!(err.stage(), crate::core::pipeline::Stage::Building);
    }

    #[test]
    fn manifest_is_first_and_not_duplicated() {
        let dir = tempfile::tempdir().unwrap();
        populate(dir.path());
        let bytes = build_bytes(dir.path(), b"<manifest/>");
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.by_index(0).unwrap().name(), ANDROID_MANIFEST);
        let manifests = archive.file_names().filter(|n| *n == ANDROID_MANIFEST).count();
        assert_eq!(manifests, 1);
        let mut first = String::new();
        archive.by_index(0).unwrap().read_to_string(&mut first).unwrap();
        assert_eq!(first, "<manifest/>");
    }

    #[test]
    fn identical_trees_build_identical_bytes() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        populate(a.path());
        populate(b.path());
        assert_eq!(build_bytes(a.path(), b"<m/>"), build_bytes(b.path(), b"<m/>"));
    }

    #[test]
    fn stored_entries_declare_exact_crc_and_size() {
        let dir = tempfile::tempdir().unwrap();
        populate(dir.path());
        let mut out = Cursor::new(Vec::new());
        let report = build(dir.path(), b"<m/>", &mut out).unwrap();
        assert_eq!(report.stored(), 3);
        assert_eq!(report.directories, 1);

        let mut archive = zip::ZipArchive::new(Cursor::new(out.into_inner())).unwrap();
        for spec in report.entries.iter().filter(|s| s.policy == CompressionPolicy::Stored) {
            let file = archive.by_name(&spec.name).unwrap();
            assert_eq!(file.compression(), CompressionMethod::Stored, "{}", spec.name);
            assert_eq!(Some(file.crc32()), spec.crc32, "{}", spec.name);
            assert_eq!(Some(file.size()), spec.size, "{}", spec.name);
        }
        let xml = archive.by_name("res/layout/main.xml").unwrap();
        assert_eq!(xml.compression(), CompressionMethod::Deflated);
    }

    #[test]
    fn stored_entries_are_aligned() {
        let dir = tempfile::tempdir().unwrap();
        populate(dir.path());
        let bytes = build_bytes(dir.path(), b"<m/>");
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let lib = archive.by_name("lib/arm64-v8a/libpine.so").unwrap();
        assert_eq!(lib.data_start() % 4096, 0);
        drop(lib);
        let dex = archive.by_name("classes.dex").unwrap();
        assert_eq!(dex.data_start() % 4, 0);
    }

    #[test]
    fn extract_build_extract_preserves_entries() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("original.apk");
        let entries: &[(&str, &[u8])] = &[
            ("AndroidManifest.xml", b"<manifest package=\"a.b\"/>"),
            ("classes.dex", b"dex\n035"),
            ("res/raw/data.bin", &[1, 2, 3, 4, 5]),
            ("lib/x86_64/libnative.so", &[0xEE; 100]),
            ("META-INF/CERT.SF", b"old signature"),
        ];
        write_container(&original, entries);

        let tree = dir.path().join("tree");
        fs::create_dir(&tree).unwrap();
        extract_replacing(&original, &tree, &[]).unwrap();
        let manifest = fs::read(tree.join(ANDROID_MANIFEST)).unwrap();
        let rebuilt = dir.path().join("rebuilt.apk");
        build(&tree, &manifest, File::create(&rebuilt).unwrap()).unwrap();

        let mut expected: Vec<(String, Vec<u8>)> = entries
            .iter()
            .filter(|(name, _)| !name.starts_with("META-INF/"))
            .map(|(name, bytes)| ((*name).to_string(), bytes.to_vec()))
            .collect();
        expected.sort();
        let mut actual = read_entries(&rebuilt);
        actual.sort();
        assert_eq!(actual, expected);
    }
}
