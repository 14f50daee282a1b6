//! Attributed output segments.

use crate::book::{Paragraph, ParagraphPosition};
use crate::registry::CharacterId;
use serde::{Deserialize, Serialize};

/// Narration or spoken dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Narration,
    Dialogue,
}

/// Who speaks a dialogue segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Resolved(CharacterId),
    /// Dialogue whose speaker could not be determined. Downstream consumers
    /// fall back to a default voice.
    Unresolved,
}

/// How a segment's label and speaker were decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// No quotation marks.
    NoQuotes,
    /// Explicit attribution next to the quote.
    Explicit,
    /// Continuation of the single active speaker's turn.
    Continuation,
    /// Pronoun matched against the active speakers.
    Pronoun,
    /// Decided by the external oracle.
    Oracle,
    /// Best local guess after the oracle failed.
    Degraded,
}

/// Diagnostics attached to a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentFlag {
    /// Confidence is below what local rules normally produce.
    LowConfidence,
    /// The oracle was needed but failed or was unavailable.
    OracleUnavailable,
    /// The oracle answered below the ambiguity threshold.
    OracleAmbiguous,
    /// A registry alias conflict was hit and resolved in favour of the
    /// current owner.
    AliasConflict,
}

/// One attributed paragraph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub position: ParagraphPosition,
    pub text: String,
    pub kind: SegmentKind,
    /// Set for dialogue only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<Speaker>,
    pub confidence: f32,
    /// Raw descriptor the speaker was identified by, when there was one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<String>,
    pub method: Method,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<SegmentFlag>,
}

impl Segment {
    pub fn narration(paragraph: &Paragraph, confidence: f32, method: Method) -> Self {
        Self {
            position: paragraph.position,
            text: paragraph.text.clone(),
            kind: SegmentKind::Narration,
            speaker: None,
            confidence,
            descriptor: None,
            method,
            flags: Vec::new(),
        }
    }

    pub fn dialogue(paragraph: &Paragraph, speaker: Speaker, confidence: f32, method: Method) -> Self {
        Self {
            position: paragraph.position,
            text: paragraph.text.clone(),
            kind: SegmentKind::Dialogue,
            speaker: Some(speaker),
            confidence,
            descriptor: None,
            method,
            flags: Vec::new(),
        }
    }

    pub fn with_descriptor(mut self, descriptor: impl Into<String>) -> Self {
        self.descriptor = Some(descriptor.into());
        self
    }

    pub fn with_flag(mut self, flag: SegmentFlag) -> Self {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
        self
    }

    pub fn is_dialogue(&self) -> bool {
        self.kind == SegmentKind::Dialogue
    }

    /// The resolved speaker, if any.
    pub fn character(&self) -> Option<CharacterId> {
        match self.speaker {
            Some(Speaker::Resolved(id)) => Some(id),
            _ => None,
        }
    }

    pub fn is_unresolved(&self) -> bool {
        self.speaker == Some(Speaker::Unresolved)
    }

    pub fn has_flag(&self, flag: SegmentFlag) -> bool {
        self.flags.contains(&flag)
    }
}
