//! Oracle backed by the Claude Messages API.
//!
//! Each operation is a single JSON-only prompt to a fast, cheap model at
//! temperature 0. Replies are parsed strictly; anything that is not the
//! expected JSON object is an [`OracleError::Parse`].

use super::{
    CharacterHint, ClassifyRequest, ClassifyVerdict, ExtractedCharacter, Oracle, OracleError,
    ResolveRequest, ResolveVerdict,
};
use async_trait::async_trait;
use claude::{Claude, Message, Request};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt::Write as _;
use std::time::Duration;

/// Default model for oracle calls (fast and cheap).
const ORACLE_MODEL: &str = "claude-3-5-haiku-20241022";

const SYSTEM_PROMPT: &str = "You help attribute dialogue in novels. \
Reply with a single JSON object and nothing else.";

/// Settings for [`ClaudeOracle`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClaudeOracleConfig {
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
    /// HTTP timeout for one request.
    pub request_timeout: Duration,
    /// API root override, e.g. for a proxy.
    pub base_url: Option<String>,
}

impl Default for ClaudeOracleConfig {
    fn default() -> Self {
        Self {
            model: ORACLE_MODEL.to_string(),
            max_tokens: 500,
            temperature: 0.0,
            request_timeout: Duration::from_secs(20),
            base_url: None,
        }
    }
}

impl ClaudeOracleConfig {
    /// Defaults, with the model overridable through `CASTLIST_ORACLE_MODEL`
    /// and the API root through `ANTHROPIC_BASE_URL`.
    pub fn from_env() -> Self {
        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();
        if let Some(model) = var("CASTLIST_ORACLE_MODEL") {
            config.model = model;
        }
        config.base_url = var("ANTHROPIC_BASE_URL");
        config
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct ExtractReply {
    #[serde(default)]
    characters: Vec<ExtractedCharacter>,
}

/// Classifies and resolves speakers by asking Claude.
pub struct ClaudeOracle {
    client: Claude,
    config: ClaudeOracleConfig,
}

impl ClaudeOracle {
    pub fn new(client: Claude, config: ClaudeOracleConfig) -> Self {
        Self { client, config }
    }

    /// Create from environment (ANTHROPIC_API_KEY, CASTLIST_ORACLE_MODEL,
    /// ANTHROPIC_BASE_URL).
    pub fn from_env() -> Result<Self, claude::Error> {
        let config = ClaudeOracleConfig::from_env();
        let mut client = Claude::from_env()?.with_timeout(config.request_timeout)?;
        if let Some(base_url) = &config.base_url {
            client = client.with_base_url(base_url);
        }
        Ok(Self::new(client, config))
    }

    fn request(&self, prompt: String) -> Request {
        Request::new(vec![Message::user(prompt)])
            .with_system(SYSTEM_PROMPT)
            .with_model(&self.config.model)
            .with_max_tokens(self.config.max_tokens)
            .with_temperature(self.config.temperature)
    }

    async fn ask<T: DeserializeOwned>(&self, prompt: String) -> Result<T, OracleError> {
        let response = self.client.complete(self.request(prompt)).await?;
        parse_reply(&response.text)
    }
}

#[async_trait]
impl Oracle for ClaudeOracle {
    async fn classify(&self, request: &ClassifyRequest) -> Result<ClassifyVerdict, OracleError> {
        let verdict: ClassifyVerdict = self.ask(classify_prompt(request)).await?;
        Ok(ClassifyVerdict {
            confidence: verdict.confidence.clamp(0.0, 1.0),
            descriptor: verdict.descriptor.filter(|d| !d.trim().is_empty()),
            ..verdict
        })
    }

    async fn resolve(&self, request: &ResolveRequest) -> Result<ResolveVerdict, OracleError> {
        let verdict: ResolveVerdict = self.ask(resolve_prompt(request)).await?;
        if verdict.canonical_name.trim().is_empty() {
            return Err(OracleError::Parse("empty canonical_name".to_string()));
        }
        Ok(ResolveVerdict {
            confidence: verdict.confidence.clamp(0.0, 1.0),
            ..verdict
        })
    }

    async fn extract_characters(&self, text: &str) -> Result<Vec<ExtractedCharacter>, OracleError> {
        let reply: ExtractReply = self.ask(extract_prompt(text)).await?;
        Ok(reply
            .characters
            .into_iter()
            .filter(|c| !c.canonical_name.trim().is_empty())
            .collect())
    }

    fn name(&self) -> &str {
        "claude"
    }
}

fn describe_characters(characters: &[CharacterHint]) -> String {
    if characters.is_empty() {
        return "(none)".to_string();
    }
    let mut out = String::new();
    for c in characters {
        let _ = write!(out, "- {}", c.name);
        if !c.aliases.is_empty() {
            let _ = write!(out, " (also: {})", c.aliases.join(", "));
        }
        if c.gender.is_known() {
            let _ = write!(out, " [{}]", c.gender.name());
        }
        out.push('\n');
    }
    out
}

fn classify_prompt(request: &ClassifyRequest) -> String {
    let context = if request.context.is_empty() {
        "(start of chapter)".to_string()
    } else {
        request.context.join("\n\n")
    };
    let speakers = describe_characters(&request.active_speakers);
    format!(
        r#"You are labelling paragraphs of a novel as narration or spoken dialogue.

## Preceding paragraphs
{context}

## Characters currently in the conversation (most recent first)
{speakers}
## Paragraph to label
{paragraph}

## Instructions
Decide whether the paragraph is spoken dialogue. If it is, name who speaks it:
prefer the exact name of one of the characters listed above, otherwise give
the words the text uses for the speaker. Use null when the speaker cannot be
told.

Respond with ONLY a JSON object (no markdown, no explanation outside the JSON):
{{"is_dialogue": true, "descriptor": "Elizabeth", "confidence": 0.8}}"#,
        paragraph = request.paragraph,
    )
}

fn resolve_prompt(request: &ResolveRequest) -> String {
    let known = describe_characters(&request.known_characters);
    format!(
        r#"You are identifying which character a phrase in a novel refers to.

## Known characters
{known}
## Paragraph
{paragraph}

## Phrase
"{descriptor}"

## Instructions
Give the full canonical name of the character the phrase refers to. Reuse a
known character's name exactly when it is the same person; set "is_new" to
true only for someone not listed.

Respond with ONLY a JSON object (no markdown, no explanation outside the JSON):
{{"canonical_name": "Mrs. Bennet", "is_new": false, "confidence": 0.9}}"#,
        paragraph = request.paragraph,
        descriptor = request.descriptor,
    )
}

fn extract_prompt(text: &str) -> String {
    format!(
        r#"You are building the cast list of a novel from its opening.

## Text
{text}

## Instructions
List every character who speaks or is likely to speak. For each, give the
fullest name used, every other name or title the text uses for them, and a
short description. Do not list pronouns as aliases.

Respond with ONLY a JSON object (no markdown, no explanation outside the JSON):
{{"characters": [{{"canonical_name": "Elizabeth Bennet", "aliases": ["Lizzy", "Eliza"], "context": "second Bennet daughter"}}]}}"#
    )
}

fn parse_reply<T: DeserializeOwned>(response: &str) -> Result<T, OracleError> {
    let json_str = extract_json(response);
    serde_json::from_str(json_str).map_err(|e| OracleError::Parse(format!("{e}: {json_str}")))
}

/// Extract JSON from a response that might have markdown code blocks.
fn extract_json(text: &str) -> &str {
    let text = text.trim();

    // Handle ```json ... ``` blocks
    if let Some(start) = text.find("```json") {
        let content_start = start + 7;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    // Handle ``` ... ``` blocks (without json specifier)
    if let Some(start) = text.find("```") {
        let content_start = start + 3;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    // Fall back to the outermost braces
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}
