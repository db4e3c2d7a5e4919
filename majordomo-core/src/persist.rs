//! JSON persistence helpers for the data directory.
//!
//! Every store in the agent (memory, schedules, the story index) keeps its
//! state as a human-readable JSON file and rewrites the whole file on change.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Write a value to a JSON file, creating parent directories as needed.
pub async fn save_json<T: Serialize>(
    path: impl AsRef<Path>,
    value: &T,
) -> Result<(), PersistError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content).await?;
    Ok(())
}

/// Load a value from a JSON file.
pub async fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, PersistError> {
    let content = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

/// Load a value from a JSON file, falling back to the default when the file
/// is missing or unreadable.
///
/// A missing file is the normal first-run case; anything else is logged so a
/// corrupted store does not silently lose data without a trace.
pub async fn load_json_or_default<T>(path: impl AsRef<Path>) -> T
where
    T: DeserializeOwned + Default,
{
    let path = path.as_ref();
    match load_json(path).await {
        Ok(value) => value,
        Err(PersistError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No persisted state, starting fresh");
            T::default()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to load persisted state, starting fresh");
            T::default()
        }
    }
}
