//! Speaker resolution: descriptor -> canonical character.
//!
//! Known descriptors resolve straight from the registry. Unknown proper
//! names become new characters. Pronouns are matched by gender against the
//! active speakers. Everything else goes to the oracle, whose answer is
//! written back to the registry as an alias so the same descriptor resolves
//! the same way for the rest of the run.

use crate::book::Paragraph;
use crate::classifier::hints;
use crate::config::AttributionConfig;
use crate::context::ConversationTracker;
use crate::oracle::{CharacterHint, OracleGateway, ResolveRequest};
use crate::registry::{CharacterId, Provenance, RegistryError, SharedRegistry};
use crate::segment::{Method, SegmentFlag, Speaker};
use crate::text::{descriptor_kind, gender_hint, DescriptorKind, Gender};
use tracing::{debug, info, warn};

/// The speaker decided for a dialogue paragraph.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribution {
    pub speaker: Speaker,
    pub confidence: f32,
    pub method: Method,
    pub flags: Vec<SegmentFlag>,
}

impl Attribution {
    pub fn resolved(id: CharacterId, confidence: f32, method: Method) -> Self {
        Self {
            speaker: Speaker::Resolved(id),
            confidence,
            method,
            flags: Vec::new(),
        }
    }

    pub fn unresolved(confidence: f32, method: Method) -> Self {
        Self {
            speaker: Speaker::Unresolved,
            confidence,
            method,
            flags: Vec::new(),
        }
    }

    fn flagged(mut self, flags: &[SegmentFlag]) -> Self {
        self.flags.extend_from_slice(flags);
        self
    }
}

/// Whether an oracle answer should be remembered as an alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Memory {
    /// Bind the descriptor to the answer.
    Alias,
    /// Pronouns: use the answer for this paragraph only.
    Once,
}

pub struct Resolver<'a> {
    gateway: &'a OracleGateway,
    registry: &'a SharedRegistry,
    config: &'a AttributionConfig,
}

impl<'a> Resolver<'a> {
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

    /// Resolve `descriptor`, found in `paragraph` with the given label
    /// confidence and method. Never fails; the worst case is `Unresolved`.
    pub async fn resolve(
        &self,
        descriptor: &str,
        paragraph: &Paragraph,
        tracker: &ConversationTracker,
        confidence: f32,
        method: Method,
    ) -> Attribution {
        if let Some(id) = self.registry.lookup_id(descriptor).await {
            return Attribution::resolved(id, confidence, method);
        }

        match descriptor_kind(descriptor) {
            DescriptorKind::Pronoun(gender) => {
                self.resolve_pronoun(descriptor, gender, paragraph, tracker, confidence)
                    .await
            }
            DescriptorKind::ProperName if !self.config.verify_new_names => {
                self.create_named(descriptor, confidence, method).await
            }
            _ => {
                self.consult(descriptor, paragraph, tracker, Memory::Alias)
                    .await
            }
        }
    }

    async fn resolve_pronoun(
        &self,
        descriptor: &str,
        gender: Gender,
        paragraph: &Paragraph,
        tracker: &ConversationTracker,
        confidence: f32,
    ) -> Attribution {
        if gender.is_known() {
            let registry = self.registry.read().await;
            let candidate = tracker
                .active_speakers()
                .iter()
                .copied()
                .find(|&id| registry.get(id).is_some_and(|c| c.gender == gender));
            if let Some(id) = candidate {
                let confidence = confidence.min(self.config.confidence.pronoun);
                return Attribution::resolved(id, confidence, Method::Pronoun);
            }
        }
        let attribution = self
            .consult(descriptor, paragraph, tracker, Memory::Once)
            .await;
        // An oracle-confirmed pronoun tells us the speaker's gender.
        if let Speaker::Resolved(id) = attribution.speaker {
            if gender.is_known() && attribution.method == Method::Oracle {
                self.registry.write().await.note_gender(id, gender);
            }
        }
        attribution
    }

    async fn create_named(&self, descriptor: &str, confidence: f32, method: Method) -> Attribution {
        match self
            .registry
            .ensure_character(descriptor, Provenance::HeuristicExact)
            .await
        {
            Ok(id) => Attribution::resolved(id, confidence, method),
            Err(e) => {
                warn!(descriptor, error = %e, "Could not register speaker");
                Attribution::unresolved(self.config.confidence.degraded, method)
                    .flagged(&[SegmentFlag::LowConfidence])
            }
        }
    }

    /// Ask the oracle who `descriptor` is.
    async fn consult(
        &self,
        descriptor: &str,
        paragraph: &Paragraph,
        tracker: &ConversationTracker,
        memory: Memory,
    ) -> Attribution {
        let request = ResolveRequest {
            descriptor: descriptor.to_string(),
            paragraph: paragraph.text.clone(),
            known_characters: self.known_characters(paragraph, tracker).await,
        };

        let verdict = match self.gateway.resolve(&request).await {
            Ok(verdict) => verdict,
            Err(e) => {
                debug!(descriptor, error = %e, "Resolution degraded");
                return self.degrade(descriptor, tracker, memory).await;
            }
        };

        if verdict.confidence < self.config.ambiguity_threshold {
            info!(
                descriptor,
                candidate = %verdict.canonical_name,
                confidence = verdict.confidence,
                "Oracle answer too uncertain, leaving unresolved"
            );
            return Attribution::unresolved(verdict.confidence, Method::Oracle)
                .flagged(&[SegmentFlag::OracleAmbiguous]);
        }

        let bound = match memory {
            Memory::Alias => {
                self.registry
                    .bind_resolution(descriptor, &verdict.canonical_name, Provenance::OracleResolved)
                    .await
            }
            Memory::Once => {
                self.registry
                    .ensure_character(&verdict.canonical_name, Provenance::OracleResolved)
                    .await
            }
        };

        match bound {
            Ok(id) => {
                if verdict.is_new {
                    debug!(descriptor, %id, name = %verdict.canonical_name, "Oracle named a new character");
                }
                Attribution::resolved(id, verdict.confidence, Method::Oracle)
            }
            Err(e) => {
                warn!(descriptor, error = %e, "Oracle resolution conflicts with registry");
                match self.registry.lookup_id(&verdict.canonical_name).await {
                    Some(id) => Attribution::resolved(id, verdict.confidence, Method::Oracle)
                        .flagged(&[SegmentFlag::AliasConflict]),
                    None => Attribution::unresolved(verdict.confidence, Method::Oracle)
                        .flagged(&[SegmentFlag::AliasConflict]),
                }
            }
        }
    }

    /// Local guess after an oracle failure: the only gender-compatible active
    /// speaker, if there is exactly one.
    async fn degrade(
        &self,
        descriptor: &str,
        tracker: &ConversationTracker,
        memory: Memory,
    ) -> Attribution {
        let degraded = self.config.confidence.degraded;
        let unavailable = [SegmentFlag::LowConfidence, SegmentFlag::OracleUnavailable];
        let wanted = gender_hint(descriptor);

        // An unverified name is still a name.
        if matches!(descriptor_kind(descriptor), DescriptorKind::ProperName) {
            return self
                .create_named(descriptor, degraded, Method::Degraded)
                .await
                .flagged(&unavailable);
        }

        let compatible: Vec<CharacterId> = {
            let registry = self.registry.read().await;
            tracker
                .active_speakers()
                .iter()
                .copied()
                .filter(|&id| {
                    registry
                        .get(id)
                        .is_some_and(|c| !wanted.is_known() || !c.gender.is_known() || c.gender == wanted)
                })
                .collect()
        };

        let &[id] = compatible.as_slice() else {
            return Attribution::unresolved(degraded, Method::Degraded).flagged(&unavailable);
        };

        if memory == Memory::Once {
            return Attribution::resolved(id, degraded, Method::Degraded).flagged(&unavailable);
        }

        match self
            .registry
            .register_alias(descriptor, id, Provenance::HeuristicContextual)
            .await
        {
            Ok(_) => Attribution::resolved(id, degraded, Method::Degraded).flagged(&unavailable),
            Err(RegistryError::ConflictingAlias { owner, .. }) => {
                Attribution::resolved(owner, degraded, Method::Degraded)
                    .flagged(&unavailable)
                    .flagged(&[SegmentFlag::AliasConflict])
            }
            Err(e) => {
                warn!(descriptor, error = %e, "Could not remember contextual alias");
                Attribution::resolved(id, degraded, Method::Degraded).flagged(&unavailable)
            }
        }
    }

    /// Active speakers first, then characters named in the window or the
    /// paragraph.
    async fn known_characters(
        &self,
        paragraph: &Paragraph,
        tracker: &ConversationTracker,
    ) -> Vec<CharacterHint> {
        let mut ids = tracker.active_speakers().to_vec();
        let nearby = {
            let registry = self.registry.read().await;
            let mut text: String = tracker.window().collect::<Vec<_>>().join(" ");
            text.push(' ');
            text.push_str(&paragraph.text);
            registry.mentioned_in(&text)
        };
        for id in nearby {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        hints(self.registry, &ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::ParagraphPosition;
    use crate::oracle::ResolveVerdict;
    use crate::registry::CharacterRegistry;
    use crate::segment::Segment;
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

    fn bennets() -> (SharedRegistry, CharacterId, CharacterId) {
        let mut registry = CharacterRegistry::new();
        let mr = registry.create_character("Mr. Bennet").unwrap();
        let mrs = registry.create_character("Mrs. Bennet").unwrap();
        (SharedRegistry::new(registry), mr, mrs)
    }

    fn gateway(oracle: ScriptedOracle) -> OracleGateway {
        OracleGateway::new(Some(Arc::new(oracle)), Duration::from_secs(1), None)
    }

    #[tokio::test]
    async fn test_known_descriptor_resolves_from_registry() {
        let (registry, _, mrs) = bennets();
        let gateway = OracleGateway::disabled();
        let config = AttributionConfig::default();
        let resolver = Resolver::new(&gateway, &registry, &config);

        let a = resolver
            .resolve("Mrs Bennet", &para("x"), &tracker_with(&[]), 0.95, Method::Explicit)
            .await;
        assert_eq!(a, Attribution::resolved(mrs, 0.95, Method::Explicit));
    }

    #[tokio::test]
    async fn test_new_proper_name_creates_character() {
        let (registry, _, _) = bennets();
        let gateway = OracleGateway::disabled();
        let config = AttributionConfig::default();
        let resolver = Resolver::new(&gateway, &registry, &config);

        let a = resolver
            .resolve("Charlotte", &para("x"), &tracker_with(&[]), 0.95, Method::Explicit)
            .await;
        let id = registry.lookup_id("charlotte").await.unwrap();
        assert_eq!(a.speaker, Speaker::Resolved(id));
        assert_eq!(registry.len().await, 3);
    }

    #[tokio::test]
    async fn test_pronoun_matches_gender_of_active_speaker() {
        let (registry, mr, mrs) = bennets();
        let gateway = OracleGateway::disabled();
        let config = AttributionConfig::default();
        let resolver = Resolver::new(&gateway, &registry, &config);
        // Mr. Bennet spoke last, Mrs. Bennet before him.
        let tracker = tracker_with(&[mrs, mr]);

        let she = resolver
            .resolve("she", &para("x"), &tracker, 0.95, Method::Explicit)
            .await;
        assert_eq!(she, Attribution::resolved(mrs, config.confidence.pronoun, Method::Pronoun));

        let he = resolver
            .resolve("he", &para("x"), &tracker, 0.95, Method::Explicit)
            .await;
        assert_eq!(he.speaker, Speaker::Resolved(mr));

        // Pronouns are never remembered.
        assert!(registry.lookup_id("she").await.is_none());
    }

    #[tokio::test]
    async fn test_pronoun_keeps_weaker_label_confidence() {
        let (registry, mr, mrs) = bennets();
        let gateway = OracleGateway::disabled();
        let config = AttributionConfig::default();
        let resolver = Resolver::new(&gateway, &registry, &config);

        let she = resolver
            .resolve("she", &para("x"), &tracker_with(&[mrs, mr]), 0.55, Method::Oracle)
            .await;
        assert_eq!(she, Attribution::resolved(mrs, 0.55, Method::Pronoun));
    }

    #[tokio::test]
    async fn test_relational_descriptor_is_learned_from_oracle() {
        let (registry, _, mrs) = bennets();
        let oracle = ScriptedOracle::new().on_resolve("his wife", ResolveVerdict::new("Mrs. Bennet", false, 0.9));
        let gateway = gateway(oracle);
        let config = AttributionConfig::default();
        let resolver = Resolver::new(&gateway, &registry, &config);

        let a = resolver
            .resolve("his wife", &para("x"), &tracker_with(&[]), 0.95, Method::Explicit)
            .await;
        assert_eq!(a, Attribution::resolved(mrs, 0.9, Method::Oracle));

        let binding = registry.read().await.binding("his wife").cloned().unwrap();
        assert_eq!(binding.character, mrs);
        assert_eq!(binding.provenance, Provenance::OracleResolved);
    }

    #[tokio::test]
    async fn test_oracle_new_character() {
        let (registry, _, _) = bennets();
        let oracle = ScriptedOracle::new().on_resolve("the stranger", ResolveVerdict::new("Mr. Wickham", true, 0.8));
        let gateway = gateway(oracle);
        let config = AttributionConfig::default();
        let resolver = Resolver::new(&gateway, &registry, &config);

        let a = resolver
            .resolve("the stranger", &para("x"), &tracker_with(&[]), 0.95, Method::Explicit)
            .await;
        let wickham = registry.lookup_id("Mr. Wickham").await.unwrap();
        assert_eq!(a.speaker, Speaker::Resolved(wickham));
        assert_eq!(registry.lookup_id("the stranger").await, Some(wickham));
    }

    #[tokio::test]
    async fn test_uncertain_oracle_leaves_unresolved() {
        let (registry, _, _) = bennets();
        let oracle = ScriptedOracle::new().on_resolve("the lady", ResolveVerdict::new("Mrs. Bennet", false, 0.3));
        let gateway = gateway(oracle);
        let config = AttributionConfig::default();
        let resolver = Resolver::new(&gateway, &registry, &config);

        let a = resolver
            .resolve("the lady", &para("x"), &tracker_with(&[]), 0.95, Method::Explicit)
            .await;
        assert_eq!(a.speaker, Speaker::Unresolved);
        assert_eq!(a.flags, vec![SegmentFlag::OracleAmbiguous]);
        assert!(registry.lookup_id("the lady").await.is_none());
    }

    #[tokio::test]
    async fn test_oracle_failure_uses_only_compatible_speaker() {
        let (registry, mr, mrs) = bennets();
        let gateway = OracleGateway::new(Some(Arc::new(FailingOracle)), Duration::from_secs(1), None);
        let config = AttributionConfig::default();
        let resolver = Resolver::new(&gateway, &registry, &config);
        let tracker = tracker_with(&[mrs, mr]);

        let a = resolver
            .resolve("his wife", &para("x"), &tracker, 0.95, Method::Explicit)
            .await;
        assert_eq!(a.speaker, Speaker::Resolved(mrs));
        assert_eq!(a.method, Method::Degraded);
        assert!(a.flags.contains(&SegmentFlag::OracleUnavailable));
        let binding = registry.read().await.binding("his wife").cloned().unwrap();
        assert_eq!(binding.provenance, Provenance::HeuristicContextual);

        // Two speakers of unknown fit: no guess.
        let a = resolver
            .resolve("the visitor", &para("x"), &tracker, 0.95, Method::Explicit)
            .await;
        assert_eq!(a.speaker, Speaker::Unresolved);
    }

    #[tokio::test]
    async fn test_unmatched_pronoun_asks_oracle_without_binding() {
        let mut registry = CharacterRegistry::new();
        let jane = registry.create_character("Jane").unwrap();
        let registry = SharedRegistry::new(registry);
        let oracle = ScriptedOracle::new().on_resolve("she", ResolveVerdict::new("Jane", false, 0.8));
        let gateway = gateway(oracle);
        let config = AttributionConfig::default();
        let resolver = Resolver::new(&gateway, &registry, &config);

        let a = resolver
            .resolve("she", &para("x"), &tracker_with(&[jane]), 0.95, Method::Explicit)
            .await;
        assert_eq!(a, Attribution::resolved(jane, 0.8, Method::Oracle));
        assert!(registry.lookup_id("she").await.is_none());
        assert_eq!(registry.character(jane).await.unwrap().gender, Gender::Feminine);
    }

    #[tokio::test]
    async fn test_verify_new_names_asks_oracle() {
        let (registry, _, _) = bennets();
        let oracle = ScriptedOracle::new().on_resolve("Lizzy", ResolveVerdict::new("Elizabeth Bennet", true, 0.9));
        let gateway = gateway(oracle);
        let config = AttributionConfig::default().with_verify_new_names(true);
        let resolver = Resolver::new(&gateway, &registry, &config);

        resolver
            .resolve("Lizzy", &para("x"), &tracker_with(&[]), 0.95, Method::Explicit)
            .await;
        let registry = registry.read().await;
        assert_eq!(registry.lookup_id("Lizzy"), registry.lookup_id("Elizabeth Bennet"));
        assert_eq!(registry.len(), 3);
    }
}
