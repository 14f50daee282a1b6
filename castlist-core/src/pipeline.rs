//! The attribution pipeline.
//!
//! A run has two phases. The registry-build phase ([`Attributor::discover`])
//! seeds the registry from the oracle and a heuristic pre-scan, then hands
//! back a [`FinalizedRegistry`]. The attribution phase
//! ([`Attributor::attribute_book`]) walks every chapter paragraph by
//! paragraph, learning new aliases as it goes, and returns the segments
//! together with the finalized registry they refer to.
//!
//! Paragraphs within a chapter are strictly sequential. Chapters may run
//! concurrently against the shared registry; output order always follows the
//! book.

use crate::book::{Book, Chapter, Paragraph};
use crate::classifier::{Classifier, Target};
use crate::config::AttributionConfig;
use crate::context::ConversationTracker;
use crate::oracle::{Oracle, OracleGateway, OracleStats};
use crate::registry::{FinalizedRegistry, Provenance, SharedRegistry};
use crate::resolver::Resolver;
use crate::segment::{Segment, SegmentFlag, SegmentKind, Speaker};
use crate::text::{descriptor_kind, find_attribution, is_pronoun, DescriptorKind, QuoteLayout};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Fatal attribution errors. Everything else degrades per paragraph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AttributionError {
    #[error("Chapter {chapter} has no paragraphs")]
    EmptyChapter { chapter: usize },

    #[error("Book has no chapters")]
    EmptyBook,
}

/// Counters for one attribution run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub oracle_calls: usize,
    pub cache_hits: usize,
    pub oracle_failures: usize,
    pub degraded_segments: usize,
    pub unresolved_segments: usize,
    pub characters_created: usize,
}

impl RunStats {
    fn tally(&mut self, segments: &[Segment]) {
        for segment in segments {
            if segment.has_flag(SegmentFlag::OracleUnavailable) {
                self.degraded_segments += 1;
            }
            if segment.is_unresolved() {
                self.unresolved_segments += 1;
            }
        }
    }

    fn add_oracle(&mut self, before: OracleStats, after: OracleStats) {
        self.oracle_calls += after.calls - before.calls;
        self.cache_hits += after.cache_hits - before.cache_hits;
        self.oracle_failures += after.failures - before.failures;
    }
}

/// Segments for one chapter, in paragraph order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributedChapter {
    pub index: usize,
    pub number: u32,
    pub title: String,
    pub segments: Vec<Segment>,
}

/// The result of a full run.
#[derive(Debug, Clone, Serialize)]
pub struct AttributedBook {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub chapters: Vec<AttributedChapter>,
    /// The registry every `Speaker::Resolved` id refers to.
    pub registry: FinalizedRegistry,
    pub stats: RunStats,
}

impl AttributedBook {
    /// All segments in book order.
    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.chapters.iter().flat_map(|c| c.segments.iter())
    }

    pub fn segment_count(&self) -> usize {
        self.chapters.iter().map(|c| c.segments.len()).sum()
    }
}

/// Runs attribution over books and chapters.
///
/// # Example
///
/// ```ignore
/// use castlist_core::{AttributionConfig, Attributor, ClaudeOracle};
/// use std::sync::Arc;
///
/// let attributor = Attributor::new(AttributionConfig::from_env())
///     .with_oracle(Arc::new(ClaudeOracle::from_env()?));
/// let registry = attributor.discover(&book).await;
/// let attributed = attributor.attribute_book(&book).await?;
/// ```
pub struct Attributor {
    config: AttributionConfig,
    gateway: OracleGateway,
    registry: SharedRegistry,
}

impl Attributor {
    /// An attributor with an empty registry and no oracle.
    pub fn new(config: AttributionConfig) -> Self {
        Self {
            config,
            gateway: OracleGateway::disabled(),
            registry: SharedRegistry::default(),
        }
    }

    /// Use `oracle` for everything local rules cannot settle.
    pub fn with_oracle(mut self, oracle: Arc<dyn Oracle>) -> Self {
        self.gateway = OracleGateway::new(
            Some(oracle),
            self.config.oracle_timeout,
            self.config.max_oracle_calls,
        );
        self
    }

    /// Start from a registry built earlier (a discovery run or a saved snapshot).
    pub fn with_registry(mut self, registry: FinalizedRegistry) -> Self {
        self.registry = registry.thaw();
        self
    }

    pub fn config(&self) -> &AttributionConfig {
        &self.config
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn oracle_stats(&self) -> OracleStats {
        self.gateway.stats()
    }

    /// Registry-build phase: oracle seeding (if an oracle is configured) and
    /// heuristic pre-scan (if enabled).
    pub async fn discover(&self, book: &Book) -> FinalizedRegistry {
        if self.gateway.is_enabled() {
            self.seed_from_oracle(&book.text()).await;
        }
        if self.config.prescan {
            self.prescan(&book.chapters).await;
        }
        self.registry.finalize().await
    }

    /// Seed the registry with the cast the oracle finds in the opening of
    /// `text`. Returns how many characters were created. Oracle failure
    /// seeds nothing.
    pub async fn seed_from_oracle(&self, text: &str) -> usize {
        let before = self.registry.len().await;
        let sample: String = text.chars().take(self.config.seed_sample_chars).collect();
        let cast = match self.gateway.extract_characters(&sample).await {
            Ok(cast) => cast,
            Err(e) => {
                warn!(error = %e, "Character seeding skipped");
                return 0;
            }
        };

        for entry in cast {
            let id = match self
                .registry
                .ensure_character(&entry.canonical_name, Provenance::OracleResolved)
                .await
            {
                Ok(id) => id,
                Err(e) => {
                    warn!(name = %entry.canonical_name, error = %e, "Seeded character rejected");
                    continue;
                }
            };
            for alias in &entry.aliases {
                if alias.trim().is_empty() || is_pronoun(alias) {
                    continue;
                }
                if let Err(e) = self
                    .registry
                    .register_alias(alias, id, Provenance::OracleResolved)
                    .await
                {
                    warn!(alias = %alias, error = %e, "Seeded alias rejected");
                }
            }
            if let Some(context) = entry.context {
                self.registry.write().await.set_context(id, context);
            }
        }

        let seeded = self.registry.len().await - before;
        info!(seeded, "Seeded registry from oracle");
        seeded
    }

    /// Create characters for every explicitly attributed proper name.
    /// Returns how many characters were created.
    pub async fn prescan(&self, chapters: &[Chapter]) -> usize {
        let before = self.registry.len().await;
        for paragraph in chapters.iter().flat_map(|c| &c.paragraphs) {
            let layout = QuoteLayout::of(&paragraph.text);
            let Some(descriptor) = find_attribution(&paragraph.text, &layout) else {
                continue;
            };
            if !matches!(descriptor_kind(&descriptor), DescriptorKind::ProperName) {
                continue;
            }
            if let Err(e) = self
                .registry
                .ensure_character(&descriptor, Provenance::HeuristicExact)
                .await
            {
                debug!(position = %paragraph.position, descriptor = %descriptor, error = %e, "Pre-scan skipped name");
            }
        }
        let found = self.registry.len().await - before;
        info!(found, "Pre-scan complete");
        found
    }

    /// Attribution phase over a whole book.
    pub async fn attribute_book(&self, book: &Book) -> Result<AttributedBook, AttributionError> {
        if book.chapters.is_empty() {
            return Err(AttributionError::EmptyBook);
        }
        if let Some(empty) = book.chapters.iter().find(|c| c.paragraphs.is_empty()) {
            return Err(AttributionError::EmptyChapter {
                chapter: empty.index,
            });
        }

        let characters_before = self.registry.len().await;
        let oracle_before = self.gateway.stats();
        info!(
            title = %book.title,
            chapters = book.chapters.len(),
            paragraphs = book.paragraph_count(),
            concurrency = self.config.chapter_concurrency,
            "Attributing book"
        );

        let chapters: Vec<AttributedChapter> = stream::iter(&book.chapters)
            .map(|chapter| self.attribute_chapter(chapter))
            .buffered(self.config.chapter_concurrency.max(1))
            .try_collect()
            .await?;

        let mut stats = RunStats::default();
        for chapter in &chapters {
            stats.tally(&chapter.segments);
        }
        stats.add_oracle(oracle_before, self.gateway.stats());
        stats.characters_created = self.registry.len().await - characters_before;
        info!(?stats, "Book attributed");

        Ok(AttributedBook {
            title: book.title.clone(),
            author: book.author.clone(),
            chapters,
            registry: self.registry.finalize().await,
            stats,
        })
    }

    /// Attribute one chapter. Conversation state starts fresh.
    pub async fn attribute_chapter(&self, chapter: &Chapter) -> Result<AttributedChapter, AttributionError> {
        if chapter.paragraphs.is_empty() {
            return Err(AttributionError::EmptyChapter {
                chapter: chapter.index,
            });
        }

        let classifier = Classifier::new(&self.gateway, &self.registry, &self.config);
        let resolver = Resolver::new(&self.gateway, &self.registry, &self.config);
        let mut tracker = ConversationTracker::new(&self.config);
        tracker.begin_chapter();

        let mut segments = Vec::with_capacity(chapter.paragraphs.len());
        for paragraph in &chapter.paragraphs {
            let segment = self
                .attribute_paragraph(paragraph, &tracker, &classifier, &resolver)
                .await;
            tracker.advance(paragraph, &segment);
            segments.push(segment);
        }

        debug!(
            chapter = chapter.index,
            segments = segments.len(),
            dialogue = segments.iter().filter(|s| s.is_dialogue()).count(),
            "Chapter attributed"
        );
        Ok(AttributedChapter {
            index: chapter.index,
            number: chapter.number,
            title: chapter.title.clone(),
            segments,
        })
    }

    async fn attribute_paragraph(
        &self,
        paragraph: &Paragraph,
        tracker: &ConversationTracker,
        classifier: &Classifier<'_>,
        resolver: &Resolver<'_>,
    ) -> Segment {
        let label = classifier.label(paragraph, tracker).await;

        let segment = match (label.kind, label.target) {
            (SegmentKind::Narration, _) => {
                Segment::narration(paragraph, label.confidence, label.method)
            }
            (SegmentKind::Dialogue, Target::Character(id)) => Segment::dialogue(
                paragraph,
                Speaker::Resolved(id),
                label.confidence,
                label.method,
            ),
            (SegmentKind::Dialogue, Target::Descriptor(descriptor)) => {
                let attribution = resolver
                    .resolve(&descriptor, paragraph, tracker, label.confidence, label.method)
                    .await;
                attribution.flags.into_iter().fold(
                    Segment::dialogue(
                        paragraph,
                        attribution.speaker,
                        attribution.confidence,
                        attribution.method,
                    )
                    .with_descriptor(descriptor),
                    Segment::with_flag,
                )
            }
            (SegmentKind::Dialogue, Target::Unknown | Target::None) => Segment::dialogue(
                paragraph,
                Speaker::Unresolved,
                label.confidence,
                label.method,
            ),
        };
        let segment = label.flags.into_iter().fold(segment, Segment::with_flag);

        if let Some(id) = segment.character() {
            self.registry
                .record_sighting(id, paragraph.position, segment.confidence)
                .await;
        }
        segment
    }
}
