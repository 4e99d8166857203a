//! Emotion state snapshot file: resume-after-restart support.
//!
//! A small JSON document holding the current mood vector and the heartbeat
//! tick count, rewritten periodically. Absent on first start: the mood then
//! initializes to all-neutral.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::CoreError;

use super::MoodVector;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionSnapshot {
    pub mood: MoodVector,
    pub tick_count: u64,
}

/// Load a snapshot. Returns `None` when the file does not exist or cannot be
/// parsed (a corrupt snapshot degrades to a neutral start, not a crash).
pub fn load(path: &Path) -> Option<EmotionSnapshot> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read emotion snapshot, starting neutral");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Corrupt emotion snapshot, starting neutral");
            None
        }
    }
}

/// Atomically write the snapshot (temp file + rename).
pub fn store(path: &Path, snapshot: &EmotionSnapshot) -> Result<(), CoreError> {
    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&dir).map_err(|e| CoreError::persistence(dir.display().to_string(), e))?;

    let tmp = dir.join(format!(".emotion_state.tmp-{}", Uuid::new_v4()));
    let raw = serde_json::to_string_pretty(snapshot)
        .map_err(|e| CoreError::persistence(path.display().to_string(), e.into()))?;
    std::fs::write(&tmp, raw).map_err(|e| CoreError::persistence(tmp.display().to_string(), e))?;
    std::fs::rename(&tmp, path).map_err(|e| CoreError::persistence(path.display().to_string(), e))?;

    info!(path = %path.display(), tick_count = snapshot.tick_count, "Emotion snapshot written");
    Ok(())
}
