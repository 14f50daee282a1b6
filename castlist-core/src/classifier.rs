//! Narration/dialogue classification.
//!
//! Tier 1 ([`classify_local`]) is pure pattern work over the paragraph and
//! the conversation state. Whatever it cannot settle goes to Tier 2
//! ([`Classifier::label`]), which asks the oracle and, if the oracle is not
//! available, falls back to the best local guess with a low-confidence flag.

use crate::book::Paragraph;
use crate::config::AttributionConfig;
use crate::context::ConversationTracker;
use crate::oracle::{CharacterHint, ClassifyRequest, OracleGateway};
use crate::registry::{CharacterId, SharedRegistry};
use crate::segment::{Method, SegmentFlag, SegmentKind};
use crate::text::{find_attribution, normalize_descriptor, QuoteLayout};
use tracing::debug;

/// Tier-1 outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalLabel {
    /// No quotation marks.
    Narration,
    /// Quote with an explicit attribution.
    Attributed { descriptor: String },
    /// Unattributed quote continuing the single active speaker's turn.
    Continuation { speaker: CharacterId },
    /// Unattributed quote during an open exchange between several speakers.
    AmbiguousDialogue { candidates: Vec<CharacterId> },
    /// Anything else.
    Ambiguous,
}

/// Label a paragraph using local rules only.
pub fn classify_local(paragraph: &str, tracker: &ConversationTracker) -> LocalLabel {
    let layout = QuoteLayout::of(paragraph);

    if let Some(descriptor) = find_attribution(paragraph, &layout) {
        return LocalLabel::Attributed { descriptor };
    }
    if layout.entirely_quoted {
        if let Some(speaker) = tracker.continuing_speaker() {
            return LocalLabel::Continuation { speaker };
        }
        if tracker.active_speakers().len() >= 2 {
            return LocalLabel::AmbiguousDialogue {
                candidates: tracker.active_speakers().to_vec(),
            };
        }
    }
    if !layout.has_quote_marks {
        return LocalLabel::Narration;
    }
    LocalLabel::Ambiguous
}

/// Who a labelled paragraph points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Narration.
    None,
    /// A known character, already decided.
    Character(CharacterId),
    /// A descriptor the resolver still has to map.
    Descriptor(String),
    /// Dialogue with no identifiable speaker.
    Unknown,
}

/// A fully classified paragraph.
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub kind: SegmentKind,
    pub target: Target,
    pub confidence: f32,
    pub method: Method,
    pub flags: Vec<SegmentFlag>,
}

impl Label {
    fn new(kind: SegmentKind, target: Target, confidence: f32, method: Method) -> Self {
        Self {
            kind,
            target,
            confidence,
            method,
            flags: Vec::new(),
        }
    }

    fn degraded(mut self) -> Self {
        self.flags
            .extend([SegmentFlag::LowConfidence, SegmentFlag::OracleUnavailable]);
        self
    }
}

/// Two-tier classifier.
pub struct Classifier<'a> {
    gateway: &'a OracleGateway,
    registry: &'a SharedRegistry,
    config: &'a AttributionConfig,
}

impl<'a> Classifier<'a> {
    pub fn new(
        gateway: &'a OracleGateway,
        registry: &'a SharedRegistry,
        config: &'a AttributionConfig,
    ) -> Self {
        Self {
            gateway,
            registry,
            config,
        }
    }

    /// Classify one paragraph. Never fails: oracle problems degrade.
    pub async fn label(&self, paragraph: &Paragraph, tracker: &ConversationTracker) -> Label {
        let levels = &self.config.confidence;
        match classify_local(&paragraph.text, tracker) {
            LocalLabel::Narration => Label::new(
                SegmentKind::Narration,
                Target::None,
                levels.narration,
                Method::NoQuotes,
            ),
            LocalLabel::Attributed { descriptor } => Label::new(
                SegmentKind::Dialogue,
                Target::Descriptor(descriptor),
                levels.explicit,
                Method::Explicit,
            ),
            LocalLabel::Continuation { speaker } => Label::new(
                SegmentKind::Dialogue,
                Target::Character(speaker),
                levels.continuation,
                Method::Continuation,
            ),
            LocalLabel::AmbiguousDialogue { candidates } => {
                self.escalate(paragraph, tracker, Some(candidates.as_slice())).await
            }
            LocalLabel::Ambiguous => self.escalate(paragraph, tracker, None).await,
        }
    }

    async fn escalate(
        &self,
        paragraph: &Paragraph,
        tracker: &ConversationTracker,
        candidates: Option<&[CharacterId]>,
    ) -> Label {
        let active_speakers = hints(self.registry, tracker.active_speakers()).await;
        let request = ClassifyRequest {
            paragraph: paragraph.text.clone(),
            context: tracker.window().map(str::to_string).collect(),
            active_speakers,
        };

        let verdict = match self.gateway.classify(&request).await {
            Ok(verdict) => verdict,
            Err(e) => {
                debug!(position = %paragraph.position, error = %e, "Classification degraded");
                return self.fallback(candidates);
            }
        };

        if !verdict.is_dialogue {
            return Label::new(
                SegmentKind::Narration,
                Target::None,
                verdict.confidence,
                Method::Oracle,
            );
        }

        let Some(descriptor) = verdict.descriptor else {
            return Label::new(
                SegmentKind::Dialogue,
                Target::Unknown,
                verdict.confidence,
                Method::Oracle,
            );
        };

        // A direct pick among the active speakers.
        if let Some(hint) = request
            .active_speakers
            .iter()
            .find(|h| names_match(h, &descriptor))
        {
            if verdict.confidence < self.config.ambiguity_threshold {
                let mut label = Label::new(
                    SegmentKind::Dialogue,
                    Target::Unknown,
                    verdict.confidence,
                    Method::Oracle,
                );
                label.flags.push(SegmentFlag::OracleAmbiguous);
                return label;
            }
            return Label::new(
                SegmentKind::Dialogue,
                Target::Character(hint.id),
                verdict.confidence,
                Method::Oracle,
            );
        }

        Label::new(
            SegmentKind::Dialogue,
            Target::Descriptor(descriptor),
            verdict.confidence,
            Method::Oracle,
        )
    }

    /// Best Tier-1 guess when the oracle cannot help.
    fn fallback(&self, candidates: Option<&[CharacterId]>) -> Label {
        let degraded = self.config.confidence.degraded;
        match candidates.and_then(|c| c.first()) {
            Some(&most_recent) => Label::new(
                SegmentKind::Dialogue,
                Target::Character(most_recent),
                degraded,
                Method::Degraded,
            )
            .degraded(),
            None => Label::new(SegmentKind::Narration, Target::None, degraded, Method::Degraded)
                .degraded(),
        }
    }
}

fn names_match(hint: &CharacterHint, descriptor: &str) -> bool {
    let wanted = normalize_descriptor(descriptor);
    std::iter::once(&hint.name)
        .chain(hint.aliases.iter())
        .any(|n| normalize_descriptor(n) == wanted)
}

/// Oracle-facing descriptions of the given characters, in the given order.
pub(crate) async fn hints(registry: &SharedRegistry, ids: &[CharacterId]) -> Vec<CharacterHint> {
    let registry = registry.read().await;
    ids.iter()
        .filter_map(|&id| registry.get(id))
        .map(CharacterHint::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::ParagraphPosition;
    use crate::oracle::ClassifyVerdict;
    use crate::registry::CharacterRegistry;
    use crate::segment::{Segment, Speaker};
    use crate::testing::{FailingOracle, ScriptedOracle};
    use std::sync::Arc;
    use std::time::Duration;

    fn para(text: &str) -> Paragraph {
        Paragraph::new(ParagraphPosition::new(0, 0), text)
    }

    fn tracker_with(speakers: &[CharacterId]) -> ConversationTracker {
        let mut tracker = ConversationTracker::new(&AttributionConfig::default());
        for &id in speakers {
            let p = para("\"Hi.\"");
            tracker.advance(&p, &Segment::dialogue(&p, Speaker::Resolved(id), 0.9, Method::Explicit));
        }
        tracker
    }

    fn registry_with(names: &[&str]) -> (SharedRegistry, Vec<CharacterId>) {
        let mut registry = CharacterRegistry::new();
        let ids = names
            .iter()
            .map(|n| registry.create_character(n).unwrap())
            .collect();
        (SharedRegistry::new(registry), ids)
    }

    #[test]
    fn test_local_rules_in_priority_order() {
        let (_, ids) = registry_with(&["John", "Mary"]);
        let idle = tracker_with(&[]);
        let one = tracker_with(&[ids[0]]);
        let two = tracker_with(&[ids[0], ids[1]]);

        assert_eq!(
            classify_local("\"Hi,\" said John.", &two),
            LocalLabel::Attributed {
                descriptor: "John".to_string()
            }
        );
        assert_eq!(
            classify_local("\"How are you?\"", &one),
            LocalLabel::Continuation { speaker: ids[0] }
        );
        assert_eq!(
            classify_local("\"How are you?\"", &two),
            LocalLabel::AmbiguousDialogue {
                candidates: vec![ids[1], ids[0]]
            }
        );
        assert_eq!(classify_local("The sun set.", &two), LocalLabel::Narration);
        assert_eq!(classify_local("\"How are you?\"", &idle), LocalLabel::Ambiguous);
        assert_eq!(
            classify_local("The sign read \"closed\" in red letters.", &one),
            LocalLabel::Ambiguous
        );
    }

    #[tokio::test]
    async fn test_oracle_picks_active_speaker() {
        let (registry, ids) = registry_with(&["John", "Mary"]);
        let oracle = ScriptedOracle::new().on_classify("\"Well?\"", ClassifyVerdict::dialogue("mary", 0.8));
        let gateway = OracleGateway::new(Some(Arc::new(oracle)), Duration::from_secs(1), None);
        let config = AttributionConfig::default();
        let classifier = Classifier::new(&gateway, &registry, &config);

        let label = classifier
            .label(&para("\"Well?\""), &tracker_with(&[ids[0], ids[1]]))
            .await;
        assert_eq!(label.target, Target::Character(ids[1]));
        assert_eq!(label.method, Method::Oracle);
        assert!(label.flags.is_empty());
    }

    #[tokio::test]
    async fn test_low_confidence_pick_is_unresolved() {
        let (registry, ids) = registry_with(&["John", "Mary"]);
        let oracle = ScriptedOracle::new().on_classify("\"Well?\"", ClassifyVerdict::dialogue("John", 0.2));
        let gateway = OracleGateway::new(Some(Arc::new(oracle)), Duration::from_secs(1), None);
        let config = AttributionConfig::default();
        let classifier = Classifier::new(&gateway, &registry, &config);

        let label = classifier
            .label(&para("\"Well?\""), &tracker_with(&[ids[0], ids[1]]))
            .await;
        assert_eq!(label.kind, SegmentKind::Dialogue);
        assert_eq!(label.target, Target::Unknown);
        assert_eq!(label.flags, vec![SegmentFlag::OracleAmbiguous]);
    }

    #[tokio::test]
    async fn test_oracle_descriptor_goes_to_resolver() {
        let (registry, _) = registry_with(&[]);
        let oracle = ScriptedOracle::new().on_classify(
            "\"Silence!\"",
            ClassifyVerdict::dialogue("the old man", 0.7),
        );
        let gateway = OracleGateway::new(Some(Arc::new(oracle)), Duration::from_secs(1), None);
        let config = AttributionConfig::default();
        let classifier = Classifier::new(&gateway, &registry, &config);

        let label = classifier.label(&para("\"Silence!\""), &tracker_with(&[])).await;
        assert_eq!(label.target, Target::Descriptor("the old man".to_string()));
        assert_eq!(label.confidence, 0.7);
    }

    #[tokio::test]
    async fn test_failure_degrades() {
        let (registry, ids) = registry_with(&["John", "Mary"]);
        let gateway = OracleGateway::new(Some(Arc::new(FailingOracle)), Duration::from_secs(1), None);
        let config = AttributionConfig::default();
        let classifier = Classifier::new(&gateway, &registry, &config);

        let label = classifier.label(&para("\"Who?\""), &tracker_with(&[])).await;
        assert_eq!(label.kind, SegmentKind::Narration);
        assert_eq!(label.method, Method::Degraded);
        assert!(label.flags.contains(&SegmentFlag::OracleUnavailable));

        let label = classifier
            .label(&para("\"Who?\""), &tracker_with(&[ids[0], ids[1]]))
            .await;
        assert_eq!(label.target, Target::Character(ids[1]));
        assert_eq!(label.confidence, config.confidence.degraded);
        assert!(label.flags.contains(&SegmentFlag::LowConfidence));
    }
}
