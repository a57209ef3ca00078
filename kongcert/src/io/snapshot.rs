//! Checkpoint storage for rollback.
//!
//! A checkpoint is the invoker state right after a successful save: the
//! executed stack is what `rollback` undoes. Only the latest checkpoint is
//! kept; a new save replaces it.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::invoker::InvokerState;

/// Persisted checkpoint (pretty JSON).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Temporary checkpoints (challenge state) are rolled back by `recover`.
    #[serde(default)]
    pub temporary: bool,
    pub state: InvokerState,
}

/// Load the checkpoint, or `None` if no checkpoint has been written.
pub fn load_checkpoint(path: &Path) -> Result<Option<Checkpoint>> {
    if !path.exists() {
        debug!(path = %path.display(), "no checkpoint");
        return Ok(None);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read checkpoint {}", path.display()))?;
    let checkpoint: Checkpoint = serde_json::from_str(&contents)
        .with_context(|| format!("parse checkpoint {}", path.display()))?;
    debug!(
        title = ?checkpoint.title,
        temporary = checkpoint.temporary,
        executed = checkpoint.state.executed.len(),
        "checkpoint loaded"
    );
    Ok(Some(checkpoint))
}

/// Atomically write the checkpoint (temp file + rename).
pub fn write_checkpoint(path: &Path, checkpoint: &Checkpoint) -> Result<()> {
    debug!(
        path = %path.display(),
        title = ?checkpoint.title,
        temporary = checkpoint.temporary,
        "writing checkpoint"
    );
    let mut buf = serde_json::to_string_pretty(checkpoint).context("serialize checkpoint")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

/// Remove the checkpoint file. Missing files are not an error.
pub fn remove_checkpoint(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove checkpoint {}", path.display())),
    }
}
