//! Backup archives: one compressed tar holding one backup directory.
//!
//! ```text
//! redis-backup-local-20240101T000000Z-1a2b.tar.gz
//! └── redis-backup-local-20240101T000000Z-1a2b/
//!     ├── metadata.json
//!     └── keys/
//!         ├── keys-part-0000.jsonl
//!         └── keys-part-0001.jsonl
//! ```

use crate::{BackupError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::info;

/// Compression codec of an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Gzip,
    Zstd,
}

impl Compression {
    /// File extension, without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Gzip => "tar.gz",
            Self::Zstd => "tar.zst",
        }
    }

    /// Detect the codec from an archive file name.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::Gzip)
        } else if name.ends_with(".tar.zst") {
            Some(Self::Zstd)
        } else {
            None
        }
    }
}

impl std::str::FromStr for Compression {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gzip" | "gz" => Ok(Self::Gzip),
            "zstd" | "zst" => Ok(Self::Zstd),
            other => Err(BackupError::Config(format!(
                "unknown compression '{}', expected gzip or zstd",
                other
            ))),
        }
    }
}

/// zstd level used for archives.
const ZSTD_LEVEL: i32 = 3;

/// Package `src_dir` into `<dir name>.<ext>` next to it.
///
/// Returns the archive path.
pub fn build_archive(src_dir: &Path, compression: Compression) -> Result<PathBuf> {
    let root_name = src_dir
        .file_name()
        .ok_or_else(|| BackupError::Config(format!("cannot archive {}", src_dir.display())))?
        .to_owned();
    let parent = src_dir.parent().unwrap_or_else(|| Path::new("."));
    let archive_path = parent.join(format!(
        "{}.{}",
        root_name.to_string_lossy(),
        compression.extension()
    ));

    let file = BufWriter::new(File::create(&archive_path)?);
    match compression {
        Compression::Gzip => {
            let encoder = GzEncoder::new(file, flate2::Compression::default());
            let mut tar = tar::Builder::new(encoder);
            tar.append_dir_all(&root_name, src_dir)?;
            tar.into_inner()?.finish()?.flush()?;
        }
        Compression::Zstd => {
            let encoder = zstd::Encoder::new(file, ZSTD_LEVEL)?;
            let mut tar = tar::Builder::new(encoder);
            tar.append_dir_all(&root_name, src_dir)?;
            tar.into_inner()?.finish()?.flush()?;
        }
    }

    info!("Archive written: {}", archive_path.display());
    Ok(archive_path)
}

fn open_decoder(archive_path: &Path, compression: Compression) -> Result<Box<dyn Read>> {
    let file = BufReader::new(File::open(archive_path)?);
    Ok(match compression {
        Compression::Gzip => Box::new(GzDecoder::new(file)),
        Compression::Zstd => Box::new(zstd::Decoder::with_buffer(file)?),
    })
}

/// Name of the top-level directory, taken from the first member that has one.
fn find_root(archive_path: &Path, compression: Compression) -> Result<String> {
    let mut archive = tar::Archive::new(open_decoder(archive_path, compression)?);
    for entry in archive.entries()? {
        let entry = entry?;
        let path = entry.path()?;
        let first = path.components().find_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        });
        if let Some(root) = first {
            return Ok(root);
        }
    }
    Err(BackupError::ArchiveFormat(format!(
        "{} has no top-level directory",
        archive_path.display()
    )))
}

/// Unpack `archive_path` into `work_dir` and return the extracted backup
/// directory.
pub fn extract_archive(archive_path: &Path, work_dir: &Path) -> Result<PathBuf> {
    let compression = Compression::from_path(archive_path).ok_or_else(|| {
        BackupError::ArchiveFormat(format!(
            "unrecognised archive extension: {}",
            archive_path.display()
        ))
    })?;

    let root = find_root(archive_path, compression)?;

    std::fs::create_dir_all(work_dir)?;
    let mut archive = tar::Archive::new(open_decoder(archive_path, compression)?);
    archive.unpack(work_dir)?;

    let extracted = work_dir.join(&root);
    if !extracted.is_dir() {
        return Err(BackupError::ArchiveFormat(format!(
            "{}: top-level member '{}' is not a directory",
            archive_path.display(),
            root
        )));
    }

    info!("Extracted {} into {}", archive_path.display(), extracted.display());
    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn make_backup_dir(root: &Path, name: &str) -> PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(dir.join("keys")).unwrap();
        fs::write(dir.join("metadata.json"), b"{\"backup_id\":\"x\"}").unwrap();
        fs::write(dir.join("keys/keys-part-0000.jsonl"), b"{}\n").unwrap();
        dir
    }

    #[test]
    fn test_round_trip_gzip() -> Result<()> {
        let temp = TempDir::new()?;
        let dir = make_backup_dir(temp.path(), "backup-1");

        let archive = build_archive(&dir, Compression::Gzip)?;
        assert_eq!(archive, temp.path().join("backup-1.tar.gz"));

        let work = temp.path().join("work");
        let extracted = extract_archive(&archive, &work)?;
        assert_eq!(extracted, work.join("backup-1"));
        assert_eq!(fs::read(extracted.join("keys/keys-part-0000.jsonl"))?, b"{}\n");
        assert!(extracted.join("metadata.json").is_file());
        Ok(())
    }

    #[test]
    fn test_round_trip_zstd() -> Result<()> {
        let temp = TempDir::new()?;
        let dir = make_backup_dir(temp.path(), "backup-2");

        let archive = build_archive(&dir, Compression::Zstd)?;
        assert!(archive.to_string_lossy().ends_with("backup-2.tar.zst"));

        let extracted = extract_archive(&archive, &temp.path().join("work"))?;
        assert!(extracted.join("keys").is_dir());
        Ok(())
    }

    #[test]
    fn test_empty_archive_has_no_root() -> Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("empty.tar.gz");
        let encoder = GzEncoder::new(File::create(&path)?, flate2::Compression::default());
        let tar = tar::Builder::new(encoder);
        tar.into_inner()?.finish()?;

        let err = extract_archive(&path, &temp.path().join("work")).unwrap_err();
        assert!(matches!(err, BackupError::ArchiveFormat(_)));
        Ok(())
    }

    #[test]
    fn test_unknown_extension() {
        let err = extract_archive(Path::new("/tmp/backup.zip"), Path::new("/tmp")).unwrap_err();
        assert!(matches!(err, BackupError::ArchiveFormat(_)));
    }

    #[test]
    fn test_compression_from_path() {
        assert_eq!(Compression::from_path(Path::new("a.tar.gz")), Some(Compression::Gzip));
        assert_eq!(Compression::from_path(Path::new("a.tgz")), Some(Compression::Gzip));
        assert_eq!(Compression::from_path(Path::new("/x/a.tar.zst")), Some(Compression::Zstd));
        assert_eq!(Compression::from_path(Path::new("backup-dir")), None);
        assert_eq!("zstd".parse::<Compression>().unwrap(), Compression::Zstd);
        assert!("lz4".parse::<Compression>().is_err());
    }
}
