//! Attribution run configuration.

use std::time::Duration;

/// Confidence assigned to each kind of attribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceLevels {
    /// Explicit "said X" attribution.
    pub explicit: f32,
    /// Unattributed line continuing the single active speaker's turn.
    pub continuation: f32,
    /// Pronoun resolved against the active speakers.
    pub pronoun: f32,
    /// Best guess after an oracle failure.
    pub degraded: f32,
    /// Narration segments.
    pub narration: f32,
}

impl Default for ConfidenceLevels {
    fn default() -> Self {
        Self {
            explicit: 0.95,
            continuation: 0.6,
            pronoun: 0.75,
            degraded: 0.3,
            narration: 1.0,
        }
    }
}

/// Configuration for an attribution run.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributionConfig {
    /// Paragraphs kept in the trailing context window.
    pub context_window: usize,

    /// Size of the active-speaker set.
    pub max_active_speakers: usize,

    /// Consecutive narration paragraphs that end a conversation.
    pub narration_reset_run: usize,

    /// Per-call oracle timeout.
    pub oracle_timeout: Duration,

    /// Cap on external oracle calls per run (`None` = unlimited).
    pub max_oracle_calls: Option<usize>,

    /// Oracle answers below this confidence count as ambiguous.
    pub ambiguity_threshold: f32,

    /// Chapters attributed at the same time.
    pub chapter_concurrency: usize,

    /// Characters of book text sent to the oracle for seeding.
    pub seed_sample_chars: usize,

    /// Pre-scan the book for explicit attributions before attributing.
    pub prescan: bool,

    /// Ask the oracle before creating characters for unknown proper names.
    pub verify_new_names: bool,

    pub confidence: ConfidenceLevels,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            context_window: 4,
            max_active_speakers: 4,
            narration_reset_run: 2,
            oracle_timeout: Duration::from_secs(5),
            max_oracle_calls: None,
            ambiguity_threshold: 0.5,
            chapter_concurrency: 1,
            seed_sample_chars: 10_000,
            prescan: true,
            verify_new_names: false,
            confidence: ConfidenceLevels::default(),
        }
    }
}

impl AttributionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a config from `CASTLIST_*` environment variables.
    ///
    /// Unset or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parse<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            lookup(key).and_then(|v| v.trim().parse().ok())
        }

        let mut config = Self::default();
        if let Some(v) = parse(&lookup, "CASTLIST_CONTEXT_WINDOW") {
            config.context_window = v;
        }
        if let Some(v) = parse(&lookup, "CASTLIST_MAX_ACTIVE_SPEAKERS") {
            config.max_active_speakers = v;
        }
        if let Some(v) = parse(&lookup, "CASTLIST_NARRATION_RESET_RUN") {
            config.narration_reset_run = v;
        }
        if let Some(ms) = parse(&lookup, "CASTLIST_ORACLE_TIMEOUT_MS") {
            config.oracle_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = parse(&lookup, "CASTLIST_MAX_ORACLE_CALLS") {
            config.max_oracle_calls = Some(v);
        }
        if let Some(v) = parse(&lookup, "CASTLIST_AMBIGUITY_THRESHOLD") {
            config.ambiguity_threshold = v;
        }
        if let Some(v) = parse(&lookup, "CASTLIST_CHAPTER_CONCURRENCY") {
            config.chapter_concurrency = v;
        }
        if let Some(v) = parse(&lookup, "CASTLIST_SEED_SAMPLE_CHARS") {
            config.seed_sample_chars = v;
        }
        if let Some(v) = parse(&lookup, "CASTLIST_PRESCAN") {
            config.prescan = v;
        }
        if let Some(v) = parse(&lookup, "CASTLIST_VERIFY_NEW_NAMES") {
            config.verify_new_names = v;
        }
        config
    }

    pub fn with_context_window(mut self, paragraphs: usize) -> Self {
        self.context_window = paragraphs;
        self
    }

    pub fn with_max_active_speakers(mut self, speakers: usize) -> Self {
        self.max_active_speakers = speakers;
        self
    }

    pub fn with_narration_reset_run(mut self, run: usize) -> Self {
        self.narration_reset_run = run;
        self
    }

    pub fn with_oracle_timeout(mut self, timeout: Duration) -> Self {
        self.oracle_timeout = timeout;
        self
    }

    pub fn with_max_oracle_calls(mut self, calls: usize) -> Self {
        self.max_oracle_calls = Some(calls);
        self
    }

    pub fn with_ambiguity_threshold(mut self, threshold: f32) -> Self {
        self.ambiguity_threshold = threshold;
        self
    }

    /// Set how many chapters run at once (at least one).
    pub fn with_chapter_concurrency(mut self, chapters: usize) -> Self {
        self.chapter_concurrency = chapters.max(1);
        self
    }

    pub fn with_seed_sample_chars(mut self, chars: usize) -> Self {
        self.seed_sample_chars = chars;
        self
    }

    pub fn with_prescan(mut self, prescan: bool) -> Self {
        self.prescan = prescan;
        self
    }

    pub fn with_verify_new_names(mut self, verify: bool) -> Self {
        self.verify_new_names = verify;
        self
    }

    pub fn with_confidence(mut self, confidence: ConfidenceLevels) -> Self {
        self.confidence = confidence;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = AttributionConfig::default();
        assert_eq!(config.context_window, 4);
        assert_eq!(config.narration_reset_run, 2);
        assert_eq!(config.oracle_timeout, Duration::from_secs(5));
        assert_eq!(config.max_oracle_calls, None);
        assert!(config.prescan);
        assert!(config.confidence.continuation < config.confidence.explicit);
    }

    #[test]
    fn test_builder() {
        let config = AttributionConfig::new()
            .with_context_window(3)
            .with_max_oracle_calls(50)
            .with_chapter_concurrency(0)
            .with_oracle_timeout(Duration::from_millis(250));
        assert_eq!(config.context_window, 3);
        assert_eq!(config.max_oracle_calls, Some(50));
        assert_eq!(config.chapter_concurrency, 1);
        assert_eq!(config.oracle_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("CASTLIST_CONTEXT_WINDOW", "6"),
            ("CASTLIST_ORACLE_TIMEOUT_MS", "1500"),
            ("CASTLIST_MAX_ORACLE_CALLS", "200"),
            ("CASTLIST_AMBIGUITY_THRESHOLD", "0.7"),
            ("CASTLIST_PRESCAN", "false"),
            ("CASTLIST_CHAPTER_CONCURRENCY", "lots"),
        ]
        .into_iter()
        .collect();
        let config =
            AttributionConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.context_window, 6);
        assert_eq!(config.oracle_timeout, Duration::from_millis(1500));
        assert_eq!(config.max_oracle_calls, Some(200));
        assert_eq!(config.ambiguity_threshold, 0.7);
        assert!(!config.prescan);
        // Unparsable values keep the default.
        assert_eq!(config.chapter_concurrency, 1);
    }
}
