//! Store-only (uncompressed) zip archives for batch frame payloads.
//!
//! Frames are already-compressed PNGs, so re-compressing them wastes CPU; every
//! entry is written with [`zip::CompressionMethod::Stored`].

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{MediaError, MediaResult};

/// Pack every regular file directly inside `source_dir` into a store-only zip at
/// `archive_path`, using each file's base name as its archive entry name.
pub fn pack(source_dir: impl AsRef<Path>, archive_path: impl AsRef<Path>) -> MediaResult<()> {
    let source_dir = source_dir.as_ref();
    let file = std::fs::File::create(archive_path.as_ref())?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    let mut entries: Vec<_> = std::fs::read_dir(source_dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .collect();
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        writer.start_file(name.as_ref(), options)?;
        let mut f = std::fs::File::open(entry.path())?;
        let mut buf = Vec::new();
        f.read_to_end(&mut buf)?;
        writer.write_all(&buf)?;
    }

    writer.finish()?;
    Ok(())
}

/// Extract `archive_path` into `dest_dir`, rejecting any entry whose name is absolute
/// or contains a `..` path component.
pub fn unpack(archive_path: impl AsRef<Path>, dest_dir: impl AsRef<Path>) -> MediaResult<Vec<PathBuf>> {
    let dest_dir = dest_dir.as_ref();
    std::fs::create_dir_all(dest_dir)?;

    let file = std::fs::File::open(archive_path.as_ref())?;
    let mut archive = ZipArchive::new(file)?;
    let mut written = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        reject_unsafe_entry(&name)?;

        let out_path = dest_dir.join(&name);
        let mut out = std::fs::File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out)?;
        written.push(out_path);
    }

    Ok(written)
}

fn reject_unsafe_entry(name: &str) -> MediaResult<()> {
    let path = Path::new(name);
    if path.is_absolute() || path.components().any(|c| c == std::path::Component::ParentDir) {
        return Err(MediaError::UnsafeArchiveEntry(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn pack_and_unpack_round_trips_files() {
        let src = tempdir().unwrap();
        std::fs::write(src.path().join("frame_000001.png"), b"fake-png-bytes").unwrap();
        std::fs::write(src.path().join("frame_000002.png"), b"more-fake-bytes").unwrap();

        let archive_path = src.path().join("../batch.zip");
        pack(src.path(), &archive_path).unwrap();

        let dest = tempdir().unwrap();
        let written = unpack(&archive_path, dest.path()).unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(
            std::fs::read(dest.path().join("frame_000001.png")).unwrap(),
            b"fake-png-bytes"
        );
    }

    #[test]
    fn rejects_parent_dir_traversal() {
        assert!(reject_unsafe_entry("../escape.png").is_err());
        assert!(reject_unsafe_entry("/etc/passwd").is_err());
        assert!(reject_unsafe_entry("frame_000001.png").is_ok());
    }
}
