//! Testing utilities for attribution runs.
//!
//! This module provides tools for integration testing:
//! - `ScriptedOracle` for deterministic oracle answers without API calls
//! - `FailingOracle` and `StallingOracle` for degradation paths
//! - Builders for small books

use crate::book::{Book, Chapter};
use crate::oracle::{
    ClassifyRequest, ClassifyVerdict, ExtractedCharacter, Oracle, OracleError, ResolveRequest,
    ResolveVerdict,
};
use crate::text::normalize_descriptor;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// An oracle that answers from fixtures.
///
/// Classify answers are keyed by normalized paragraph text, resolve answers
/// by normalized descriptor. Unscripted questions fail like an unavailable
/// service would, unless a fallback answer is configured.
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    classify_answers: HashMap<String, ClassifyVerdict>,
    classify_default: Option<ClassifyVerdict>,
    resolve_answers: HashMap<String, ResolveVerdict>,
    resolve_first_known: Option<f32>,
    characters: Vec<ExtractedCharacter>,
    classify_calls: AtomicUsize,
    resolve_calls: AtomicUsize,
    extract_calls: AtomicUsize,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `classify` for this paragraph.
    pub fn on_classify(mut self, paragraph: &str, verdict: ClassifyVerdict) -> Self {
        self.classify_answers
            .insert(normalize_descriptor(paragraph), verdict);
        self
    }

    /// Answer every unscripted `classify` with this verdict.
    pub fn on_any_classify(mut self, verdict: ClassifyVerdict) -> Self {
        self.classify_default = Some(verdict);
        self
    }

    /// Answer `resolve` for this descriptor.
    pub fn on_resolve(mut self, descriptor: &str, verdict: ResolveVerdict) -> Self {
        self.resolve_answers
            .insert(normalize_descriptor(descriptor), verdict);
        self
    }

    /// Answer every unscripted `resolve` with the first known character.
    pub fn resolving_to_first_known(mut self, confidence: f32) -> Self {
        self.resolve_first_known = Some(confidence);
        self
    }

    /// Answer `extract_characters` with this cast.
    pub fn with_cast(mut self, characters: Vec<ExtractedCharacter>) -> Self {
        self.characters = characters;
        self
    }

    pub fn classify_calls(&self) -> usize {
        self.classify_calls.load(Ordering::SeqCst)
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn extract_calls(&self) -> usize {
        self.extract_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn classify(&self, request: &ClassifyRequest) -> Result<ClassifyVerdict, OracleError> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        self.classify_answers
            .get(&normalize_descriptor(&request.paragraph))
            .or(self.classify_default.as_ref())
            .cloned()
            .ok_or_else(|| OracleError::Api("no scripted classification".to_string()))
    }

    async fn resolve(&self, request: &ResolveRequest) -> Result<ResolveVerdict, OracleError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(verdict) = self
            .resolve_answers
            .get(&normalize_descriptor(&request.descriptor))
        {
            return Ok(verdict.clone());
        }
        self.resolve_first_known
            .zip(request.known_characters.first())
            .map(|(confidence, c)| ResolveVerdict::new(c.name.clone(), false, confidence))
            .ok_or_else(|| OracleError::Api(format!("no scripted resolution for '{}'", request.descriptor)))
    }

    async fn extract_characters(&self, _text: &str) -> Result<Vec<ExtractedCharacter>, OracleError> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.characters.clone())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// An oracle that is always unavailable.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingOracle;

#[async_trait]
impl Oracle for FailingOracle {
    async fn classify(&self, _request: &ClassifyRequest) -> Result<ClassifyVerdict, OracleError> {
        Err(OracleError::Network("connection refused".to_string()))
    }

    async fn resolve(&self, _request: &ResolveRequest) -> Result<ResolveVerdict, OracleError> {
        Err(OracleError::Network("connection refused".to_string()))
    }

    async fn extract_characters(&self, _text: &str) -> Result<Vec<ExtractedCharacter>, OracleError> {
        Err(OracleError::Network("connection refused".to_string()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// An oracle that takes longer than any sensible timeout.
#[derive(Debug, Clone, Copy)]
pub struct StallingOracle {
    delay: Duration,
}

impl StallingOracle {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Oracle for StallingOracle {
    async fn classify(&self, _request: &ClassifyRequest) -> Result<ClassifyVerdict, OracleError> {
        tokio::time::sleep(self.delay).await;
        Ok(ClassifyVerdict::narration(1.0))
    }

    async fn resolve(&self, request: &ResolveRequest) -> Result<ResolveVerdict, OracleError> {
        tokio::time::sleep(self.delay).await;
        Ok(ResolveVerdict::new(request.descriptor.clone(), true, 1.0))
    }

    async fn extract_characters(&self, _text: &str) -> Result<Vec<ExtractedCharacter>, OracleError> {
        tokio::time::sleep(self.delay).await;
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "stalling"
    }
}

/// Build a chapter at `index` from paragraph texts.
pub fn chapter(index: usize, paragraphs: &[&str]) -> Chapter {
    Chapter::from_texts(index, format!("Chapter {}", index + 1), paragraphs.iter().copied())
}

/// Build a book from per-chapter paragraph lists.
pub fn book(chapters: &[&[&str]]) -> Book {
    Book {
        title: "Test Book".to_string(),
        author: None,
        chapters: chapters
            .iter()
            .enumerate()
            .map(|(i, paragraphs)| chapter(i, paragraphs))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(paragraph: &str) -> ClassifyRequest {
        ClassifyRequest {
            paragraph: paragraph.to_string(),
            context: Vec::new(),
            active_speakers: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_scripted_oracle_answers_and_counts() {
        let oracle = ScriptedOracle::new()
            .on_classify("\"Indeed!\"", ClassifyVerdict::dialogue("Jane", 0.8))
            .on_resolve("the eldest", ResolveVerdict::new("Jane", false, 0.9));

        let verdict = oracle.classify(&request("\"indeed\"")).await.unwrap();
        assert_eq!(verdict.descriptor.as_deref(), Some("Jane"));
        assert!(oracle.classify(&request("\"Other.\"")).await.is_err());
        assert_eq!(oracle.classify_calls(), 2);

        let resolved = oracle
            .resolve(&ResolveRequest {
                descriptor: "The Eldest".to_string(),
                paragraph: String::new(),
                known_characters: Vec::new(),
            })
            .await
            .unwrap();
        assert_eq!(resolved.canonical_name, "Jane");
        assert_eq!(oracle.resolve_calls(), 1);
    }

    #[tokio::test]
    async fn test_failing_oracle() {
        assert!(FailingOracle.classify(&request("x")).await.is_err());
        assert!(FailingOracle.extract_characters("x").await.is_err());
    }

    #[test]
    fn test_book_builder() {
        let book = book(&[&["One.", "Two."], &["Three."]]);
        assert_eq!(book.chapters.len(), 2);
        assert_eq!(book.chapters[1].paragraphs[0].position.chapter, 1);
        assert_eq!(book.paragraph_count(), 3);
    }
}
