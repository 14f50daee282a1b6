//! Timeout, budget and cache wrapper around an [`Oracle`].

use super::{
    ClassifyRequest, ClassifyVerdict, ExtractedCharacter, Oracle, OracleError, ResolveRequest,
    ResolveVerdict,
};
use crate::registry::CharacterId;
use crate::text::normalize_descriptor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

type ClassifyKey = (String, Vec<CharacterId>);
type ResolveKey = (String, String, Vec<CharacterId>);

/// Counters for the oracle traffic of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleStats {
    /// External calls actually started.
    pub calls: usize,
    /// Answers served from the cache.
    pub cache_hits: usize,
    /// Calls that timed out or errored, plus calls refused by the budget.
    pub failures: usize,
}

/// Every oracle call the engine makes goes through here.
///
/// Successful answers are cached for the lifetime of the gateway; failures
/// are not. A gateway without an oracle answers every call with
/// [`OracleError::Disabled`].
pub struct OracleGateway {
    oracle: Option<Arc<dyn Oracle>>,
    timeout: Duration,
    max_calls: Option<usize>,
    calls: AtomicUsize,
    cache_hits: AtomicUsize,
    failures: AtomicUsize,
    classify_cache: Mutex<HashMap<ClassifyKey, ClassifyVerdict>>,
    resolve_cache: Mutex<HashMap<ResolveKey, ResolveVerdict>>,
}

impl OracleGateway {
    pub fn new(oracle: Option<Arc<dyn Oracle>>, timeout: Duration, max_calls: Option<usize>) -> Self {
        Self {
            oracle,
            timeout,
            max_calls,
            calls: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            classify_cache: Mutex::new(HashMap::new()),
            resolve_cache: Mutex::new(HashMap::new()),
        }
    }

    /// A gateway that never calls out.
    pub fn disabled() -> Self {
        Self::new(None, Duration::ZERO, None)
    }

    pub fn is_enabled(&self) -> bool {
        self.oracle.is_some()
    }

    pub fn stats(&self) -> OracleStats {
        OracleStats {
            calls: self.calls.load(Ordering::SeqCst),
            cache_hits: self.cache_hits.load(Ordering::SeqCst),
            failures: self.failures.load(Ordering::SeqCst),
        }
    }

    pub async fn classify(&self, request: &ClassifyRequest) -> Result<ClassifyVerdict, OracleError> {
        let key: ClassifyKey = (
            normalize_descriptor(&request.paragraph),
            request.active_speakers.iter().map(|s| s.id).collect(),
        );
        if let Some(hit) = self.classify_cache.lock().await.get(&key).cloned() {
            self.cache_hits.fetch_add(1, Ordering::SeqCst);
            debug!(paragraph = %preview(&request.paragraph), "Classify cache hit");
            return Ok(hit);
        }

        let oracle = self.oracle()?;
        let verdict = self.call("classify", oracle.classify(request)).await?;
        debug!(
            oracle = oracle.name(),
            is_dialogue = verdict.is_dialogue,
            descriptor = ?verdict.descriptor,
            confidence = verdict.confidence,
            "Oracle classified paragraph"
        );
        self.classify_cache.lock().await.insert(key, verdict.clone());
        Ok(verdict)
    }

    pub async fn resolve(&self, request: &ResolveRequest) -> Result<ResolveVerdict, OracleError> {
        let key: ResolveKey = (
            normalize_descriptor(&request.descriptor),
            normalize_descriptor(&request.paragraph),
            request.known_characters.iter().map(|c| c.id).collect(),
        );
        if let Some(hit) = self.resolve_cache.lock().await.get(&key).cloned() {
            self.cache_hits.fetch_add(1, Ordering::SeqCst);
            debug!(descriptor = %request.descriptor, "Resolve cache hit");
            return Ok(hit);
        }

        let oracle = self.oracle()?;
        let verdict = self.call("resolve", oracle.resolve(request)).await?;
        debug!(
            oracle = oracle.name(),
            descriptor = %request.descriptor,
            canonical = %verdict.canonical_name,
            confidence = verdict.confidence,
            "Oracle resolved descriptor"
        );
        self.resolve_cache.lock().await.insert(key, verdict.clone());
        Ok(verdict)
    }

    pub async fn extract_characters(&self, text: &str) -> Result<Vec<ExtractedCharacter>, OracleError> {
        let oracle = self.oracle()?;
        self.call("extract_characters", oracle.extract_characters(text))
            .await
    }

    fn oracle(&self) -> Result<&Arc<dyn Oracle>, OracleError> {
        self.oracle.as_ref().ok_or(OracleError::Disabled)
    }

    async fn call<T>(
        &self,
        operation: &'static str,
        future: impl Future<Output = Result<T, OracleError>>,
    ) -> Result<T, OracleError> {
        if let Some(max) = self.max_calls {
            let reserved = self
                .calls
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1));
            if reserved.is_err() {
                self.failures.fetch_add(1, Ordering::SeqCst);
                warn!(operation, max, "Oracle call budget exhausted");
                return Err(OracleError::BudgetExhausted(max));
            }
        } else {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }

        let result = match tokio::time::timeout(self.timeout, future).await {
            Ok(result) => result,
            Err(_) => Err(OracleError::Timeout(self.timeout)),
        };
        if let Err(e) = &result {
            self.failures.fetch_add(1, Ordering::SeqCst);
            warn!(operation, error = %e, "Oracle call failed");
        }
        result
    }
}

fn preview(text: &str) -> &str {
    match text.char_indices().nth(40) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::CharacterHint;
    use crate::registry::CharacterRegistry;
    use crate::testing::{FailingOracle, ScriptedOracle, StallingOracle};

    fn classify_request(paragraph: &str) -> ClassifyRequest {
        ClassifyRequest {
            paragraph: paragraph.to_string(),
            context: Vec::new(),
            active_speakers: Vec::new(),
        }
    }

    fn cast(names: &[&str]) -> Vec<CharacterHint> {
        let mut registry = CharacterRegistry::new();
        names
            .iter()
            .map(|name| {
                let id = registry.create_character(name).unwrap();
                CharacterHint::from(registry.get(id).unwrap())
            })
            .collect()
    }

    #[tokio::test]
    async fn test_disabled_gateway() {
        let gateway = OracleGateway::disabled();
        assert!(!gateway.is_enabled());
        let err = gateway.classify(&classify_request("\"Hm.\"")).await.unwrap_err();
        assert_eq!(err, OracleError::Disabled);
        assert_eq!(gateway.stats(), OracleStats::default());
    }

    #[tokio::test]
    async fn test_classify_is_cached_by_normalized_text() {
        let oracle = Arc::new(ScriptedOracle::new().on_any_classify(ClassifyVerdict::narration(0.9)));
        let gateway = OracleGateway::new(Some(oracle.clone()), Duration::from_secs(1), None);

        gateway.classify(&classify_request("\"Well!\"")).await.unwrap();
        gateway.classify(&classify_request("\"well\"")).await.unwrap();

        assert_eq!(oracle.classify_calls(), 1);
        let stats = gateway.stats();
        assert_eq!(stats.calls, 1);
        assert_eq!(stats.cache_hits, 1);
    }

    #[tokio::test]
    async fn test_classify_cache_separates_speaker_sets() {
        let oracle = Arc::new(ScriptedOracle::new().on_any_classify(ClassifyVerdict::narration(0.9)));
        let gateway = OracleGateway::new(Some(oracle.clone()), Duration::from_secs(1), None);
        let speakers = cast(&["Elizabeth", "Jane"]);

        let mut request = classify_request("\"Indeed.\"");
        request.active_speakers = speakers[..1].to_vec();
        gateway.classify(&request).await.unwrap();
        request.active_speakers = speakers[1..].to_vec();
        gateway.classify(&request).await.unwrap();
        assert_eq!(oracle.classify_calls(), 2);

        request.active_speakers = speakers[..1].to_vec();
        gateway.classify(&request).await.unwrap();
        assert_eq!(oracle.classify_calls(), 2);
        assert_eq!(gateway.stats().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_resolve_cache_separates_known_characters() {
        let oracle = Arc::new(ScriptedOracle::new().resolving_to_first_known(0.8));
        let gateway = OracleGateway::new(Some(oracle.clone()), Duration::from_secs(1), None);
        let characters = cast(&["Elizabeth", "Jane"]);

        let mut request = ResolveRequest {
            descriptor: "she".to_string(),
            paragraph: "\"Yes,\" she said.".to_string(),
            known_characters: characters[..1].to_vec(),
        };
        let first = gateway.resolve(&request).await.unwrap();
        request.known_characters = characters[1..].to_vec();
        let second = gateway.resolve(&request).await.unwrap();

        assert_eq!(first.canonical_name, "Elizabeth");
        assert_eq!(second.canonical_name, "Jane");
        assert_eq!(oracle.resolve_calls(), 2);
        assert_eq!(gateway.stats().cache_hits, 0);
    }

    #[tokio::test]
    async fn test_resolve_is_cached() {
        let oracle = Arc::new(
            ScriptedOracle::new().on_resolve("his wife", ResolveVerdict::new("Mrs. Bennet", false, 0.9)),
        );
        let gateway = OracleGateway::new(Some(oracle.clone()), Duration::from_secs(1), None);
        let request = ResolveRequest {
            descriptor: "his wife".to_string(),
            paragraph: "\"Nonsense,\" said his wife.".to_string(),
            known_characters: Vec::new(),
        };
        let first = gateway.resolve(&request).await.unwrap();
        let second = gateway.resolve(&request).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(oracle.resolve_calls(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let gateway = OracleGateway::new(Some(Arc::new(FailingOracle)), Duration::from_secs(1), None);
        for _ in 0..2 {
            assert!(gateway.classify(&classify_request("\"Hm.\"")).await.is_err());
        }
        let stats = gateway.stats();
        assert_eq!(stats.calls, 2);
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.cache_hits, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let gateway = OracleGateway::new(
            Some(Arc::new(StallingOracle::new(Duration::from_secs(60)))),
            Duration::from_millis(100),
            None,
        );
        let err = gateway.classify(&classify_request("\"Hm.\"")).await.unwrap_err();
        assert_eq!(err, OracleError::Timeout(Duration::from_millis(100)));
        assert_eq!(gateway.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_budget() {
        let oracle = Arc::new(ScriptedOracle::new().on_any_classify(ClassifyVerdict::narration(0.9)));
        let gateway = OracleGateway::new(Some(oracle.clone()), Duration::from_secs(1), Some(1));

        gateway.classify(&classify_request("\"One.\"")).await.unwrap();
        let err = gateway.classify(&classify_request("\"Two.\"")).await.unwrap_err();
        assert_eq!(err, OracleError::BudgetExhausted(1));
        // Cached answers stay free.
        gateway.classify(&classify_request("\"One.\"")).await.unwrap();
        assert_eq!(oracle.classify_calls(), 1);
        assert_eq!(gateway.stats().calls, 1);
    }
}
