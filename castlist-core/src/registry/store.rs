//! The character registry: characters, alias index and alias history.

use super::alias::{AliasBinding, AliasChange, AliasRecord, Provenance};
use super::character::{Character, CharacterId};
use crate::book::ParagraphPosition;
use crate::persist::RegistrySnapshot;
use crate::text::{contains_word, display_form, gender_hint, is_pronoun, normalize_descriptor, Gender};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from registry mutations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error(
        "alias '{descriptor}' is bound to {owner} ({}), refusing to bind it to {attempted} ({})",
        owner_provenance.name(),
        provenance.name()
    )]
    ConflictingAlias {
        descriptor: String,
        owner: CharacterId,
        owner_provenance: Provenance,
        attempted: CharacterId,
        provenance: Provenance,
    },

    #[error("'{name}' already refers to {existing}")]
    DuplicateCanonicalName { name: String, existing: CharacterId },

    #[error("unknown character {0}")]
    UnknownCharacter(CharacterId),

    #[error("descriptor is empty after normalization")]
    EmptyDescriptor,

    #[error("pronoun '{0}' cannot be bound to a character")]
    PronounAlias(String),

    #[error("invalid registry snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Authoritative store of characters and the descriptors that refer to them.
///
/// Every normalized descriptor maps to at most one character. Characters are
/// never removed, and the alias history only grows.
#[derive(Debug, Clone, Default)]
pub struct CharacterRegistry {
    /// Arena indexed by `CharacterId`.
    characters: Vec<Character>,
    /// Normalized canonical name -> id.
    canonical_index: HashMap<String, CharacterId>,
    /// Normalized descriptor -> current binding.
    aliases: HashMap<String, AliasBinding>,
    history: Vec<AliasRecord>,
}

impl CharacterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Find the character a descriptor refers to, if any.
    pub fn lookup(&self, descriptor: &str) -> Option<&Character> {
        self.lookup_id(descriptor).and_then(|id| self.get(id))
    }

    /// Find the id a descriptor refers to, if any.
    pub fn lookup_id(&self, descriptor: &str) -> Option<CharacterId> {
        let key = normalize_descriptor(descriptor);
        self.aliases
            .get(&key)
            .map(|b| b.character)
            .or_else(|| self.canonical_index.get(&key).copied())
    }

    /// The current binding of a descriptor.
    pub fn binding(&self, descriptor: &str) -> Option<&AliasBinding> {
        self.aliases.get(&normalize_descriptor(descriptor))
    }

    pub fn get(&self, id: CharacterId) -> Option<&Character> {
        self.characters.get(id.index())
    }

    /// All characters in creation order.
    pub fn all_characters(&self) -> &[Character] {
        &self.characters
    }

    /// The full alias history, oldest first.
    pub fn history(&self) -> &[AliasRecord] {
        &self.history
    }

    /// History entries that rebound or rejected an alias.
    pub fn conflicts(&self) -> impl Iterator<Item = &AliasRecord> {
        self.history.iter().filter(|r| r.change.is_conflict())
    }

    /// Characters whose names or aliases appear as whole words in `text`,
    /// ordered by id.
    pub fn mentioned_in(&self, text: &str) -> Vec<CharacterId> {
        let normalized = normalize_descriptor(text);
        let mut ids: Vec<CharacterId> = self
            .aliases
            .values()
            .filter(|b| contains_word(&normalized, &b.descriptor))
            .map(|b| b.character)
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Create a character. Its canonical name becomes its first alias.
    ///
    /// Fails with `DuplicateCanonicalName` when the name already refers to a
    /// character, either as a canonical name or as an alias.
    pub fn create_character(&mut self, canonical_name: &str) -> Result<CharacterId, RegistryError> {
        let display = display_form(canonical_name);
        let key = normalize_descriptor(&display);
        if key.is_empty() {
            return Err(RegistryError::EmptyDescriptor);
        }
        if is_pronoun(&display) {
            return Err(RegistryError::PronounAlias(display));
        }
        if let Some(existing) = self.lookup_id(&key) {
            return Err(RegistryError::DuplicateCanonicalName {
                name: display,
                existing,
            });
        }

        let id = CharacterId::from_index(self.characters.len());
        let mut character = Character::new(id, display.clone());
        character.note_gender(gender_hint(&display));
        self.characters.push(character);
        self.canonical_index.insert(key.clone(), id);
        self.bind(key, id, Provenance::HeuristicExact, AliasChange::Bound);

        let name = &display;
        debug!(%id, name = %name, "Created character");
        Ok(id)
    }

    /// Bind a descriptor to a character.
    ///
    /// A descriptor owned by another character moves only when the new
    /// provenance ranks at least as high as the current one; otherwise the
    /// attempt is logged in the history and `ConflictingAlias` is returned.
    pub fn register_alias(
        &mut self,
        descriptor: &str,
        id: CharacterId,
        provenance: Provenance,
    ) -> Result<AliasChange, RegistryError> {
        if self.get(id).is_none() {
            return Err(RegistryError::UnknownCharacter(id));
        }
        let display = display_form(descriptor);
        let key = normalize_descriptor(&display);
        if key.is_empty() {
            return Err(RegistryError::EmptyDescriptor);
        }
        if is_pronoun(&display) {
            return Err(RegistryError::PronounAlias(display));
        }

        let Some(current) = self.aliases.get(&key).cloned() else {
            self.attach_display(id, &display);
            self.bind(key, id, provenance, AliasChange::Bound);
            return Ok(AliasChange::Bound);
        };

        if current.character == id {
            if provenance > current.provenance {
                let change = AliasChange::Upgraded {
                    from: current.provenance,
                };
                self.bind(key, id, provenance, change);
                return Ok(change);
            }
            return Ok(AliasChange::Unchanged);
        }

        if provenance >= current.provenance {
            let change = AliasChange::Rebound {
                previous: current.character,
                previous_provenance: current.provenance,
            };
            warn!(
                descriptor = %key,
                from = %current.character,
                to = %id,
                provenance = provenance.name(),
                "Rebinding alias"
            );
            if let Some(previous) = self.characters.get_mut(current.character.index()) {
                previous.remove_alias(&key);
            }
            self.attach_display(id, &display);
            self.bind(key, id, provenance, change);
            return Ok(change);
        }

        warn!(
            descriptor = %key,
            owner = %current.character,
            attempted = %id,
            "Rejected conflicting alias"
        );
        self.record(
            key.clone(),
            id,
            provenance,
            AliasChange::Rejected {
                owner: current.character,
            },
        );
        Err(RegistryError::ConflictingAlias {
            descriptor: key,
            owner: current.character,
            owner_provenance: current.provenance,
            attempted: id,
            provenance,
        })
    }

    /// Note that a paragraph was credited to a character.
    pub fn record_sighting(&mut self, id: CharacterId, position: ParagraphPosition, confidence: f32) {
        if let Some(c) = self.characters.get_mut(id.index()) {
            c.note_sighting(position, confidence);
        }
    }

    /// Attach a short description to a character.
    pub fn set_context(&mut self, id: CharacterId, context: impl Into<String>) {
        if let Some(c) = self.characters.get_mut(id.index()) {
            c.context = Some(context.into());
        }
    }

    /// Record a gender hint. Only the first known gender is kept.
    pub fn note_gender(&mut self, id: CharacterId, gender: Gender) {
        if let Some(c) = self.characters.get_mut(id.index()) {
            c.note_gender(gender);
        }
    }

    fn attach_display(&mut self, id: CharacterId, display: &str) {
        if let Some(c) = self.characters.get_mut(id.index()) {
            c.add_alias(display);
            c.note_gender(gender_hint(display));
        }
    }

    fn bind(&mut self, key: String, id: CharacterId, provenance: Provenance, change: AliasChange) {
        self.aliases.insert(
            key.clone(),
            AliasBinding {
                descriptor: key.clone(),
                character: id,
                provenance,
            },
        );
        self.record(key, id, provenance, change);
    }

    fn record(&mut self, descriptor: String, id: CharacterId, provenance: Provenance, change: AliasChange) {
        self.history.push(AliasRecord {
            sequence: self.history.len() as u64,
            descriptor,
            character: id,
            provenance,
            change,
        });
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Capture the registry as a serializable snapshot.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let mut aliases: Vec<AliasBinding> = self.aliases.values().cloned().collect();
        aliases.sort_by(|a, b| a.descriptor.cmp(&b.descriptor));
        RegistrySnapshot::new(self.characters.clone(), aliases, self.history.clone())
    }

    /// Rebuild a registry from a snapshot, validating its ids.
    pub fn from_snapshot(snapshot: RegistrySnapshot) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for (index, character) in snapshot.characters.into_iter().enumerate() {
            if character.id.index() != index {
                return Err(RegistryError::InvalidSnapshot(format!(
                    "character '{}' has id {} at position {index}",
                    character.canonical_name, character.id
                )));
            }
            registry
                .canonical_index
                .insert(normalize_descriptor(&character.canonical_name), character.id);
            registry.characters.push(character);
        }
        for binding in snapshot.aliases {
            if registry.get(binding.character).is_none() {
                return Err(RegistryError::InvalidSnapshot(format!(
                    "alias '{}' points at missing character {}",
                    binding.descriptor, binding.character
                )));
            }
            registry.aliases.insert(binding.descriptor.clone(), binding);
        }
        registry.history = snapshot.history;
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_creation() {
        let registry = CharacterRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.lookup("Elizabeth").is_none());
    }

    #[test]
    fn test_create_and_lookup() {
        let mut registry = CharacterRegistry::new();
        let id = registry.create_character("Mrs. Bennet").unwrap();
        assert_eq!(registry.lookup_id("mrs bennet"), Some(id));
        assert_eq!(registry.lookup_id("  Mrs.   Bennet, "), Some(id));
        let c = registry.lookup("MRS BENNET").unwrap();
        assert_eq!(c.canonical_name, "Mrs. Bennet");
        assert_eq!(c.gender, Gender::Feminine);
        assert_eq!(registry.history().len(), 1);
    }

    #[test]
    fn test_ids_are_sequential() {
        let mut registry = CharacterRegistry::new();
        let a = registry.create_character("Jane").unwrap();
        let b = registry.create_character("Elizabeth").unwrap();
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
    }

    #[test]
    fn test_duplicate_canonical_name() {
        let mut registry = CharacterRegistry::new();
        let id = registry.create_character("Elizabeth").unwrap();
        let err = registry.create_character("elizabeth").unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateCanonicalName {
                name: "elizabeth".to_string(),
                existing: id
            }
        );

        registry
            .register_alias("Lizzy", id, Provenance::HeuristicExact)
            .unwrap();
        assert!(matches!(
            registry.create_character("Lizzy"),
            Err(RegistryError::DuplicateCanonicalName { existing, .. }) if existing == id
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_alias_outcomes() {
        let mut registry = CharacterRegistry::new();
        let id = registry.create_character("Mrs. Bennet").unwrap();

        let change = registry
            .register_alias("his lady", id, Provenance::HeuristicContextual)
            .unwrap();
        assert_eq!(change, AliasChange::Bound);
        assert_eq!(registry.lookup_id("His Lady"), Some(id));

        let change = registry
            .register_alias("his lady", id, Provenance::HeuristicExact)
            .unwrap();
        assert_eq!(change, AliasChange::Unchanged);

        let change = registry
            .register_alias("his lady", id, Provenance::OracleResolved)
            .unwrap();
        assert_eq!(
            change,
            AliasChange::Upgraded {
                from: Provenance::HeuristicContextual
            }
        );
        assert_eq!(
            registry.binding("his lady").unwrap().provenance,
            Provenance::OracleResolved
        );
        assert_eq!(registry.get(id).unwrap().aliases, vec!["his lady"]);
    }

    #[test]
    fn test_conflicting_alias_is_rejected() {
        let mut registry = CharacterRegistry::new();
        let bennet = registry.create_character("Mr. Bennet").unwrap();
        let lucas = registry.create_character("Sir William").unwrap();
        registry
            .register_alias("the gentleman", bennet, Provenance::OracleResolved)
            .unwrap();

        let err = registry
            .register_alias("the gentleman", lucas, Provenance::HeuristicContextual)
            .unwrap_err();
        assert!(matches!(err, RegistryError::ConflictingAlias { owner, .. } if owner == bennet));
        assert_eq!(registry.lookup_id("the gentleman"), Some(bennet));

        let conflicts: Vec<_> = registry.conflicts().collect();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].change, AliasChange::Rejected { owner: bennet });
    }

    #[test]
    fn test_stronger_source_rebinds() {
        let mut registry = CharacterRegistry::new();
        let jane = registry.create_character("Jane").unwrap();
        let lizzy = registry.create_character("Elizabeth").unwrap();
        registry
            .register_alias("the eldest", lizzy, Provenance::HeuristicContextual)
            .unwrap();

        let change = registry
            .register_alias("the eldest", jane, Provenance::OracleResolved)
            .unwrap();
        assert_eq!(
            change,
            AliasChange::Rebound {
                previous: lizzy,
                previous_provenance: Provenance::HeuristicContextual
            }
        );
        assert_eq!(registry.lookup_id("the eldest"), Some(jane));
        assert!(registry.get(lizzy).unwrap().aliases.is_empty());
        assert_eq!(registry.get(jane).unwrap().aliases, vec!["the eldest"]);

        // History keeps both bindings.
        let eldest: Vec<_> = registry
            .history()
            .iter()
            .filter(|r| r.descriptor == "the eldest")
            .collect();
        assert_eq!(eldest.len(), 2);
        assert!(eldest[0].sequence < eldest[1].sequence);
    }

    #[test]
    fn test_pronouns_and_empty_descriptors_are_refused() {
        let mut registry = CharacterRegistry::new();
        let id = registry.create_character("Jane").unwrap();
        assert!(matches!(
            registry.register_alias("she", id, Provenance::OracleResolved),
            Err(RegistryError::PronounAlias(_))
        ));
        assert_eq!(
            registry.register_alias(" ,. ", id, Provenance::OracleResolved),
            Err(RegistryError::EmptyDescriptor)
        );
        assert!(registry.create_character("He").is_err());
        assert_eq!(
            registry.register_alias("Jenny", CharacterId::from_index(9), Provenance::HeuristicExact),
            Err(RegistryError::UnknownCharacter(CharacterId::from_index(9)))
        );
    }

    #[test]
    fn test_mentioned_in_uses_word_boundaries() {
        let mut registry = CharacterRegistry::new();
        let jane = registry.create_character("Jane").unwrap();
        let bingley = registry.create_character("Mr. Bingley").unwrap();
        registry.create_character("Kitty").unwrap();

        let ids = registry.mentioned_in("Mr. Bingley danced with Jane twice.");
        assert_eq!(ids, vec![jane, bingley]);
        assert!(registry.mentioned_in("Janet arrived.").is_empty());
    }

    #[test]
    fn test_snapshot_round_trip_preserves_bindings() {
        let mut registry = CharacterRegistry::new();
        let id = registry.create_character("Mrs. Bennet").unwrap();
        registry
            .register_alias("his wife", id, Provenance::OracleResolved)
            .unwrap();
        registry.set_context(id, "Mother of five daughters");

        let restored = CharacterRegistry::from_snapshot(registry.snapshot()).unwrap();
        assert_eq!(restored.lookup_id("his wife"), Some(id));
        assert_eq!(restored.lookup_id("Mrs Bennet"), Some(id));
        assert_eq!(restored.history().len(), 2);
        assert_eq!(
            restored.get(id).unwrap().context.as_deref(),
            Some("Mother of five daughters")
        );
    }

    #[test]
    fn test_snapshot_with_dangling_alias_is_invalid() {
        let mut registry = CharacterRegistry::new();
        registry.create_character("Jane").unwrap();
        let mut snapshot = registry.snapshot();
        snapshot.aliases.push(AliasBinding {
            descriptor: "the stranger".to_string(),
            character: CharacterId::from_index(4),
            provenance: Provenance::OracleResolved,
        });
        assert!(matches!(
            CharacterRegistry::from_snapshot(snapshot),
            Err(RegistryError::InvalidSnapshot(_))
        ));
    }
}
