//! The external classification oracle.
//!
//! An [`Oracle`] is a stateless, possibly slow, possibly failing service with
//! three operations. The engine never talks to one directly: every call goes
//! through the [`OracleGateway`], which adds timeouts, a call budget, caching
//! and statistics.

mod anthropic;
mod gateway;

pub use anthropic::{ClaudeOracle, ClaudeOracleConfig};
pub use gateway::{OracleGateway, OracleStats};

use crate::registry::{Character, CharacterId};
use crate::text::Gender;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Why an oracle call produced no answer. Always recovered locally.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OracleError {
    #[error("oracle timed out after {0:?}")]
    Timeout(Duration),

    #[error("oracle network error: {0}")]
    Network(String),

    #[error("oracle API error: {0}")]
    Api(String),

    #[error("could not parse oracle reply: {0}")]
    Parse(String),

    #[error("no oracle configured")]
    Disabled,

    #[error("oracle call budget of {0} exhausted")]
    BudgetExhausted(usize),
}

impl From<claude::Error> for OracleError {
    fn from(e: claude::Error) -> Self {
        match e {
            claude::Error::Parse(msg) => OracleError::Parse(msg),
            e if e.is_transient() => OracleError::Network(e.to_string()),
            e => OracleError::Api(e.to_string()),
        }
    }
}

/// What the oracle is told about a character.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacterHint {
    pub id: CharacterId,
    pub name: String,
    pub aliases: Vec<String>,
    pub gender: Gender,
}

impl From<&Character> for CharacterHint {
    fn from(c: &Character) -> Self {
        Self {
            id: c.id,
            name: c.canonical_name.clone(),
            aliases: c.aliases.clone(),
            gender: c.gender,
        }
    }
}

/// Input to [`Oracle::classify`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifyRequest {
    pub paragraph: String,
    /// Preceding paragraphs, oldest first.
    pub context: Vec<String>,
    /// Most recent first.
    pub active_speakers: Vec<CharacterHint>,
}

/// Answer to [`Oracle::classify`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifyVerdict {
    pub is_dialogue: bool,
    /// Who speaks: an active speaker's name or any other descriptor.
    #[serde(default)]
    pub descriptor: Option<String>,
    pub confidence: f32,
}

impl ClassifyVerdict {
    pub fn narration(confidence: f32) -> Self {
        Self {
            is_dialogue: false,
            descriptor: None,
            confidence,
        }
    }

    pub fn dialogue(descriptor: impl Into<String>, confidence: f32) -> Self {
        Self {
            is_dialogue: true,
            descriptor: Some(descriptor.into()),
            confidence,
        }
    }
}

/// Input to [`Oracle::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveRequest {
    pub descriptor: String,
    pub paragraph: String,
    /// Active speakers and characters named nearby.
    pub known_characters: Vec<CharacterHint>,
}

/// Answer to [`Oracle::resolve`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveVerdict {
    pub canonical_name: String,
    #[serde(default)]
    pub is_new: bool,
    pub confidence: f32,
}

impl ResolveVerdict {
    pub fn new(canonical_name: impl Into<String>, is_new: bool, confidence: f32) -> Self {
        Self {
            canonical_name: canonical_name.into(),
            is_new,
            confidence,
        }
    }
}

/// One character found by [`Oracle::extract_characters`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedCharacter {
    pub canonical_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub context: Option<String>,
}

impl ExtractedCharacter {
    pub fn new<I, S>(canonical_name: impl Into<String>, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            canonical_name: canonical_name.into(),
            aliases: aliases.into_iter().map(Into::into).collect(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// The three operations an external classifier provides.
///
/// Implementations must be idempotent and side-effect free from the engine's
/// point of view; the engine owns caching and consistency.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Decide whether a paragraph is dialogue and, if so, who speaks it.
    async fn classify(&self, request: &ClassifyRequest) -> Result<ClassifyVerdict, OracleError>;

    /// Map a descriptor to a canonical character name.
    async fn resolve(&self, request: &ResolveRequest) -> Result<ResolveVerdict, OracleError>;

    /// List the characters in a text sample with their aliases.
    async fn extract_characters(&self, text: &str) -> Result<Vec<ExtractedCharacter>, OracleError>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "oracle"
    }
}
