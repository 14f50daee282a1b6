//! Registry persistence.
//!
//! A discovered registry can be saved as JSON and reloaded for a later
//! attribution run, so the expensive discovery pass happens once per book.

use crate::registry::{AliasBinding, AliasRecord, Character, CharacterRegistry, RegistryError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::fs;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Invalid registry: {0}")]
    Registry(#[from] RegistryError),
}

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serializable form of a [`CharacterRegistry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    /// Format version for compatibility checking.
    pub version: u32,
    /// Characters in id order.
    pub characters: Vec<Character>,
    /// Current alias bindings, sorted by descriptor.
    pub aliases: Vec<AliasBinding>,
    /// Full alias history.
    #[serde(default)]
    pub history: Vec<AliasRecord>,
}

impl RegistrySnapshot {
    pub fn new(
        characters: Vec<Character>,
        aliases: Vec<AliasBinding>,
        history: Vec<AliasRecord>,
    ) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            characters,
            aliases,
            history,
        }
    }

    /// Save to a JSON file.
    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        save_json(path, self).await
    }

    /// Load from a JSON file.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let content = fs::read_to_string(path).await?;
        let snapshot: Self = serde_json::from_str(&content)?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                found: snapshot.version,
            });
        }

        Ok(snapshot)
    }

    /// Rebuild the registry this snapshot describes.
    pub fn into_registry(self) -> Result<CharacterRegistry, PersistError> {
        Ok(CharacterRegistry::from_snapshot(self)?)
    }
}

/// Load a registry straight from a snapshot file.
pub async fn load_registry(path: impl AsRef<Path>) -> Result<CharacterRegistry, PersistError> {
    RegistrySnapshot::load_json(path).await?.into_registry()
}

/// Write any serializable value as pretty JSON.
pub async fn save_json<T: Serialize + ?Sized>(
    path: impl AsRef<Path>,
    value: &T,
) -> Result<(), PersistError> {
    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content).await?;
    Ok(())
}
