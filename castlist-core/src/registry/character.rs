//! Character records held by the registry.

use crate::book::ParagraphPosition;
use crate::text::{normalize_descriptor, Gender};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a character in the registry.
///
/// Ids are dense indexes handed out in creation order, so a run over the same
/// input always produces the same ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterId(u32);

impl CharacterId {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    /// Position of the character in the registry arena.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// A named individual who can be credited with dialogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub id: CharacterId,
    /// Display name, e.g. "Mrs. Bennet".
    pub canonical_name: String,
    /// Display forms of the descriptors currently bound to this character,
    /// in the order they were learned. Does not repeat the canonical name.
    pub aliases: Vec<String>,
    #[serde(default)]
    pub gender: Gender,
    /// Short description, usually supplied by the oracle during seeding.
    #[serde(default)]
    pub context: Option<String>,
    /// First paragraph this character was credited with.
    #[serde(default)]
    pub first_seen: Option<ParagraphPosition>,
    /// Confidence of the most recent attribution to this character.
    #[serde(default)]
    pub last_confidence: Option<f32>,
}

impl Character {
    pub(crate) fn new(id: CharacterId, canonical_name: impl Into<String>) -> Self {
        Self {
            id,
            canonical_name: canonical_name.into(),
            aliases: Vec::new(),
            gender: Gender::Unknown,
            context: None,
            first_seen: None,
            last_confidence: None,
        }
    }

    /// Check if a descriptor names this character (normalized comparison).
    pub fn matches_name(&self, query: &str) -> bool {
        let query = normalize_descriptor(query);
        if normalize_descriptor(&self.canonical_name) == query {
            return true;
        }
        self.aliases.iter().any(|a| normalize_descriptor(a) == query)
    }

    pub(crate) fn add_alias(&mut self, display: &str) {
        if !self.matches_name(display) {
            self.aliases.push(display.to_string());
        }
    }

    pub(crate) fn remove_alias(&mut self, normalized: &str) {
        self.aliases.retain(|a| normalize_descriptor(a) != normalized);
    }

    /// Record the first known gender. Later hints never overwrite it.
    pub(crate) fn note_gender(&mut self, gender: Gender) {
        if !self.gender.is_known() && gender.is_known() {
            self.gender = gender;
        }
    }

    pub(crate) fn note_sighting(&mut self, position: ParagraphPosition, confidence: f32) {
        if self.first_seen.map_or(true, |seen| position < seen) {
            self.first_seen = Some(position);
        }
        self.last_confidence = Some(confidence);
    }
}
