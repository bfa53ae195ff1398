//! Chunk files: records batched into ordered JSON-lines part files.
//!
//! Part files live under `keys/` and are named `keys-part-NNNN.jsonl`.
//! Reading them back in index order yields records in the order the scan
//! visited the keys.

use crate::record::KeyRecord;
use crate::{BackupError, Result};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Subdirectory of a backup directory holding the part files.
pub const KEYS_DIR: &str = "keys";

const PART_PREFIX: &str = "keys-part-";
const PART_SUFFIX: &str = ".jsonl";

/// File name of the part file with the given index.
pub fn part_file_name(index: usize) -> String {
    format!("{}{:04}{}", PART_PREFIX, index, PART_SUFFIX)
}

/// Index encoded in a part file name, if the name is one.
fn part_index(name: &str) -> Option<usize> {
    name.strip_prefix(PART_PREFIX)?
        .strip_suffix(PART_SUFFIX)?
        .parse()
        .ok()
}

/// Batches records into part files of `chunk_size` records.
#[derive(Debug)]
pub struct ChunkWriter {
    keys_dir: PathBuf,
    chunk_size: usize,
    pending: Vec<KeyRecord>,
    next_index: usize,
    records_written: u64,
}

/// A flushed part file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenChunk {
    pub path: PathBuf,
    pub records: usize,
}

impl ChunkWriter {
    /// Create a writer, creating `keys_dir` if needed.
    pub fn new(keys_dir: impl Into<PathBuf>, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(BackupError::Config("chunk size must be at least 1".into()));
        }
        let keys_dir = keys_dir.into();
        fs::create_dir_all(&keys_dir)?;
        Ok(Self {
            keys_dir,
            chunk_size,
            pending: Vec::with_capacity(chunk_size),
            next_index: 0,
            records_written: 0,
        })
    }

    /// Add a record, flushing a part file when the batch is full.
    pub fn push(&mut self, record: KeyRecord) -> Result<Option<WrittenChunk>> {
        self.pending.push(record);
        if self.pending.len() >= self.chunk_size {
            return self.flush();
        }
        Ok(None)
    }

    /// Write out any remaining records. Returns the total number written.
    pub fn finish(mut self) -> Result<(u64, Option<WrittenChunk>)> {
        let last = self.flush()?;
        Ok((self.records_written, last))
    }

    pub fn chunks_written(&self) -> usize {
        self.next_index
    }

    fn flush(&mut self) -> Result<Option<WrittenChunk>> {
        if self.pending.is_empty() {
            return Ok(None);
        }

        let mut buf = Vec::new();
        for record in &self.pending {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }

        // One write into a temp name, then rename, so a part file is either
        // complete or absent.
        let name = part_file_name(self.next_index);
        let path = self.keys_dir.join(&name);
        let tmp = self.keys_dir.join(format!(".{}.tmp", name));
        fs::write(&tmp, &buf)?;
        fs::rename(&tmp, &path)?;

        let records = self.pending.len();
        debug!("Wrote {} ({} records)", path.display(), records);

        self.records_written += records as u64;
        self.next_index += 1;
        self.pending.clear();
        Ok(Some(WrittenChunk { path, records }))
    }
}

/// Part files of a backup directory, ordered by index.
pub fn list_part_files(backup_dir: &Path) -> Result<Vec<PathBuf>> {
    let keys_dir = backup_dir.join(KEYS_DIR);
    if !keys_dir.is_dir() {
        return Err(BackupError::ArchiveFormat(format!(
            "{} has no {}/ directory",
            backup_dir.display(),
            KEYS_DIR
        )));
    }

    let mut parts = Vec::new();
    for entry in fs::read_dir(&keys_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(index) = name.to_str().and_then(part_index) {
            parts.push((index, entry.path()));
        }
    }
    parts.sort_by_key(|(index, _)| *index);
    Ok(parts.into_iter().map(|(_, path)| path).collect())
}

/// Lazily replays the records of a backup directory in file and line order.
pub struct ChunkReader {
    files: std::vec::IntoIter<PathBuf>,
    current: Option<(PathBuf, Lines<BufReader<File>>, usize)>,
}

impl ChunkReader {
    pub fn open(backup_dir: &Path) -> Result<Self> {
        Ok(Self {
            files: list_part_files(backup_dir)?.into_iter(),
            current: None,
        })
    }

    /// Read every record into memory.
    pub fn read_all(backup_dir: &Path) -> Result<Vec<KeyRecord>> {
        Self::open(backup_dir)?.collect()
    }

    fn next_record(&mut self) -> Result<Option<KeyRecord>> {
        loop {
            if let Some((path, lines, line_no)) = self.current.as_mut() {
                match lines.next() {
                    Some(line) => {
                        *line_no += 1;
                        let line = line?;
                        if line.trim().is_empty() {
                            continue;
                        }
                        let record = serde_json::from_str(&line).map_err(|e| {
                            BackupError::ArchiveFormat(format!(
                                "{} line {}: {}",
                                path.display(),
                                line_no,
                                e
                            ))
                        })?;
                        return Ok(Some(record));
                    }
                    None => self.current = None,
                }
            }

            match self.files.next() {
                Some(path) => {
                    let file = File::open(&path)?;
                    self.current = Some((path, BufReader::new(file).lines(), 0));
                }
                None => return Ok(None),
            }
        }
    }
}

impl Iterator for ChunkReader {
    type Item = Result<KeyRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
