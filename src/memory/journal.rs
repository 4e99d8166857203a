//! JSON-Lines journal I/O for the episodic memory store.
//!
//! One JSON object per line, append-only in the common case. Consolidation
//! compacts the in-memory journal, after which the whole file is rewritten
//! atomically (temp file + rename).

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::CoreError;

use super::MemoryEntry;

pub struct JsonlJournal {
    path: PathBuf,
}

impl JsonlJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all entries. A missing file yields an empty journal; a corrupt or
    /// truncated line is skipped with a warning. An unreadable existing file
    /// is an error: the caller treats that as fatal at startup.
    pub fn load(&self) -> Result<Vec<MemoryEntry>, CoreError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CoreError::persistence(self.path.display().to_string(), e)),
        };

        let mut entries = Vec::new();
        let mut skipped = 0usize;
        for (lineno, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MemoryEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    skipped += 1;
                    warn!(
                        path = %self.path.display(),
                        line = lineno + 1,
                        error = %e,
                        "Skipping corrupt journal line"
                    );
                }
            }
        }
        info!(
            path = %self.path.display(),
            entries = entries.len(),
            skipped = skipped,
            "Memory journal loaded"
        );
        Ok(entries)
    }

    /// Append entries as JSONL lines.
    pub fn append(&self, entries: &[MemoryEntry]) -> Result<(), CoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        self.ensure_parent()?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| CoreError::persistence(self.path.display().to_string(), e))?;
        for entry in entries {
            let line = serde_json::to_string(entry)
                .map_err(|e| CoreError::persistence(self.path.display().to_string(), e.into()))?;
            writeln!(file, "{line}")
                .map_err(|e| CoreError::persistence(self.path.display().to_string(), e))?;
        }
        file.flush()
            .map_err(|e| CoreError::persistence(self.path.display().to_string(), e))
    }

    /// Atomically replace the journal with the given entries.
    pub fn rewrite(&self, entries: &[MemoryEntry]) -> Result<(), CoreError> {
        self.ensure_parent()?;
        let dir = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let tmp = dir.join(format!(".journal.tmp-{}", Uuid::new_v4()));

        let mut buf = String::new();
        for entry in entries {
            let line = serde_json::to_string(entry)
                .map_err(|e| CoreError::persistence(self.path.display().to_string(), e.into()))?;
            buf.push_str(&line);
            buf.push('\n');
        }
        std::fs::write(&tmp, buf)
            .map_err(|e| CoreError::persistence(tmp.display().to_string(), e))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| CoreError::persistence(self.path.display().to_string(), e))?;
        info!(path = %self.path.display(), entries = entries.len(), "Memory journal rewritten");
        Ok(())
    }

    fn ensure_parent(&self) -> Result<(), CoreError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| CoreError::persistence(dir.display().to_string(), e))?;
        }
        Ok(())
    }
}
