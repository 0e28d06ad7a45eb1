//! Local CSV backend: one UTF-8 file with BOM, header row first.
//!
//! The BOM matters: without it, spreadsheet applications on Korean Windows
//! installs open the file as EUC-KR and every header turns to mojibake. The
//! file is the offline fallback of the ledger, so humans will open it.
//!
//! Appends are read-concatenate-rewrite through a temp file in the same
//! directory, renamed over the original, so a crash mid-write never leaves a
//! half-written ledger behind. Single-writer assumption: concurrent
//! processes appending to the same path can lose rows to each other.

use super::{decode_entries, Storage};
use crate::error::StorageError;
use crate::record::{LedgerEntry, COLUMNS};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// CSV-file ledger backend.
pub struct LocalLedger {
    path: PathBuf,
}

impl LocalLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }
}

impl Storage for LocalLedger {
    fn describe(&self) -> String {
        format!("local CSV '{}'", self.path.display())
    }

    fn append(&self, entries: &[LedgerEntry]) -> Result<(), StorageError> {
        let existing = self.load()?;

        let mut tmp = tempfile::NamedTempFile::new_in(self.parent_dir())?;
        tmp.write_all(UTF8_BOM)?;
        {
            let mut writer = csv::Writer::from_writer(&mut tmp);
            writer
                .write_record(COLUMNS)
                .map_err(|e| StorageError::Malformed {
                    message: e.to_string(),
                })?;
            for entry in existing.iter().chain(entries) {
                writer
                    .write_record(&entry.to_cells())
                    .map_err(|e| StorageError::Malformed {
                        message: e.to_string(),
                    })?;
            }
            writer.flush()?;
        }

        tmp.persist(&self.path).map_err(|e| StorageError::Io(e.error))?;
        debug!(
            "Wrote {} row(s) ({} new) to '{}'",
            existing.len() + entries.len(),
            entries.len(),
            self.path.display()
        );
        Ok(())
    }

    fn load(&self) -> Result<Vec<LedgerEntry>, StorageError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let raw = fs::read(&self.path)?;
        let content = raw.strip_prefix(UTF8_BOM).unwrap_or(&raw);

        // flexible: a hand-edited file with a short row should not kill the
        // whole ledger, missing cells read as empty.
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(content);

        let header: Vec<String> = reader
            .headers()
            .map_err(|e| StorageError::Malformed {
                message: e.to_string(),
            })?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut records = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| StorageError::Malformed {
                message: e.to_string(),
            })?;
            records.push(record.iter().map(|c| c.to_string()).collect::<Vec<_>>());
        }

        Ok(decode_entries(&header, &records))
    }

    fn clear(&self) -> Result<(), StorageError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}
