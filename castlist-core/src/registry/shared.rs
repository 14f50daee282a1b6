//! Concurrent access to the registry.
//!
//! Chapters attribute in parallel against one [`SharedRegistry`]. Lookups take
//! a read lock; every check-then-create sequence runs under a single write
//! lock so two chapters can never mint the same character twice. When a phase
//! ends, [`SharedRegistry::finalize`] hands out an immutable
//! [`FinalizedRegistry`] for the next phase to read.

use super::alias::{AliasChange, Provenance};
use super::character::{Character, CharacterId};
use super::store::{CharacterRegistry, RegistryError};
use crate::book::ParagraphPosition;
use crate::persist::RegistrySnapshot;
use crate::text::normalize_descriptor;
use serde::{Serialize, Serializer};
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A registry shared between concurrently running chapters.
#[derive(Debug, Clone, Default)]
pub struct SharedRegistry {
    inner: Arc<RwLock<CharacterRegistry>>,
}

impl SharedRegistry {
    pub fn new(registry: CharacterRegistry) -> Self {
        Self {
            inner: Arc::new(RwLock::new(registry)),
        }
    }

    /// Read access for compound queries.
    pub async fn read(&self) -> RwLockReadGuard<'_, CharacterRegistry> {
        self.inner.read().await
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, CharacterRegistry> {
        self.inner.write().await
    }

    pub async fn lookup_id(&self, descriptor: &str) -> Option<CharacterId> {
        self.inner.read().await.lookup_id(descriptor)
    }

    /// A copy of one character record.
    pub async fn character(&self, id: CharacterId) -> Option<Character> {
        self.inner.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn create_character(&self, canonical_name: &str) -> Result<CharacterId, RegistryError> {
        self.inner.write().await.create_character(canonical_name)
    }

    pub async fn register_alias(
        &self,
        descriptor: &str,
        id: CharacterId,
        provenance: Provenance,
    ) -> Result<AliasChange, RegistryError> {
        self.inner
            .write()
            .await
            .register_alias(descriptor, id, provenance)
    }

    /// Return the character `name` refers to, creating it if nobody owns the
    /// name yet. Atomic with respect to other writers.
    pub async fn ensure_character(
        &self,
        name: &str,
        provenance: Provenance,
    ) -> Result<CharacterId, RegistryError> {
        let mut registry = self.inner.write().await;
        ensure_in(&mut registry, name, provenance)
    }

    /// Bind `descriptor` to the character named `canonical_name`, creating
    /// that character if needed, in one atomic step.
    pub async fn bind_resolution(
        &self,
        descriptor: &str,
        canonical_name: &str,
        provenance: Provenance,
    ) -> Result<CharacterId, RegistryError> {
        let mut registry = self.inner.write().await;
        let id = ensure_in(&mut registry, canonical_name, provenance)?;
        if normalize_descriptor(descriptor) != normalize_descriptor(canonical_name) {
            registry.register_alias(descriptor, id, provenance)?;
        }
        Ok(id)
    }

    pub async fn record_sighting(&self, id: CharacterId, position: ParagraphPosition, confidence: f32) {
        self.inner
            .write()
            .await
            .record_sighting(id, position, confidence);
    }

    pub async fn snapshot(&self) -> RegistrySnapshot {
        self.inner.read().await.snapshot()
    }

    /// Freeze the current state for the next phase.
    ///
    /// Writers that are still running keep working on this shared registry;
    /// the finalized copy does not see their later changes.
    pub async fn finalize(&self) -> FinalizedRegistry {
        FinalizedRegistry::from(self.inner.read().await.clone())
    }
}

impl From<CharacterRegistry> for SharedRegistry {
    fn from(registry: CharacterRegistry) -> Self {
        Self::new(registry)
    }
}

fn ensure_in(
    registry: &mut CharacterRegistry,
    name: &str,
    provenance: Provenance,
) -> Result<CharacterId, RegistryError> {
    if let Some(id) = registry.lookup_id(name) {
        // Upgrade, never downgrade, the binding that found it.
        if registry
            .binding(name)
            .is_some_and(|b| b.character == id && b.provenance < provenance)
        {
            registry.register_alias(name, id, provenance)?;
        }
        return Ok(id);
    }
    let id = registry.create_character(name)?;
    if provenance > Provenance::HeuristicExact {
        registry.register_alias(name, id, provenance)?;
    }
    Ok(id)
}

/// An immutable registry handed from one phase to the next.
///
/// Cheap to clone; only the read half of [`CharacterRegistry`] is reachable.
#[derive(Debug, Clone, Default)]
pub struct FinalizedRegistry {
    inner: Arc<CharacterRegistry>,
}

impl FinalizedRegistry {
    /// Start a new writable registry from this state.
    pub fn thaw(&self) -> SharedRegistry {
        SharedRegistry::new(self.inner.as_ref().clone())
    }
}

impl From<CharacterRegistry> for FinalizedRegistry {
    fn from(registry: CharacterRegistry) -> Self {
        Self {
            inner: Arc::new(registry),
        }
    }
}

impl Deref for FinalizedRegistry {
    type Target = CharacterRegistry;

    fn deref(&self) -> &CharacterRegistry {
        &self.inner
    }
}

impl Serialize for FinalizedRegistry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.inner.snapshot().serialize(serializer)
    }
}
