//! Text helpers shared by the classifier, resolver and registry.
//!
//! Everything here is pure string work: descriptor normalization, descriptor
//! classification (pronoun / proper name / relational phrase), gender hints,
//! quote layout detection and explicit attribution extraction.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::LazyLock;

/// How far (in characters) around a quoted span we look for an attribution.
const ATTRIBUTION_WINDOW: usize = 100;

/// Verbs that introduce or close a line of dialogue.
const SPEECH_VERBS: &str = "said|says|replied|cried|asked|exclaimed|whispered|shouted|answered|returned|continued|added|called|muttered|murmured|remarked|observed|inquired|began|repeated|rejoined";

/// Honorifics that may precede a proper name.
const TITLE: &str = r"(?:Mr|Mrs|Ms|Miss|Dr|Sir|Lady|Lord|Madam|Captain|Colonel|Aunt|Uncle)\.?";

/// Sentence-initial words that the proper-name pattern may swallow.
const CONNECTIVES: &[&str] = &[
    "then", "and", "but", "so", "now", "here", "there", "when", "finally", "still", "yet",
    "again", "presently", "soon", "suddenly", "at", "last",
];

const DETERMINERS: &[&str] = &[
    "the", "a", "an", "his", "her", "their", "my", "our", "your", "its", "this", "that",
];

const FEMININE_WORDS: &[&str] = &[
    "mrs", "miss", "ms", "lady", "madam", "madame", "dame", "mistress", "wife", "mother",
    "sister", "daughter", "aunt", "niece", "woman", "girl", "queen", "grandmother", "mama",
    "mamma", "widow", "duchess", "countess", "princess", "she",
];

const MASCULINE_WORDS: &[&str] = &[
    "mr", "sir", "lord", "husband", "father", "brother", "son", "uncle", "nephew", "man",
    "boy", "gentleman", "king", "grandfather", "papa", "duke", "earl", "prince", "he",
];

static DESCRIPTOR: LazyLock<String> = LazyLock::new(|| {
    let proper = format!(r"(?:{TITLE}\s+)?[A-Z][\p{{L}}'’]*(?:\s+[A-Z][\p{{L}}'’]*)*");
    let relational = r"(?i:his|her|their|my|our|the)\s+(?:[a-z]+\s+)?[a-z]+";
    let pronoun = r"(?i:he|she|they)";
    format!("(?:{proper}|{relational}|{pronoun})")
});

/// `"...," said John` / `"...," said his wife`
static AFTER_VERB_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(
        r"^[\s,;:\-–—]*(?i:{SPEECH_VERBS})\s+(?P<desc>{})",
        *DESCRIPTOR
    );
    Regex::new(&pattern).expect("attribution regex")
});

/// `"...," John replied` / `"...," she said`
static AFTER_NAME_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(
        r"^[\s,;:\-–—]*(?P<desc>{})\s+(?i:{SPEECH_VERBS})\b",
        *DESCRIPTOR
    );
    Regex::new(&pattern).expect("attribution regex")
});

/// `John said, "..."` / `John said quietly: "..."`
static BEFORE_NAME_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(
        r"(?P<desc>{})\s+(?i:{SPEECH_VERBS})(?:\s+[a-z]+ly)?\s*[,:]?\s*$",
        *DESCRIPTOR
    );
    Regex::new(&pattern).expect("attribution regex")
});

/// `Then said Mr. Bennet, "..."`
static BEFORE_VERB_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(
        r"\b(?i:{SPEECH_VERBS})\s+(?P<desc>{})\s*[,:]?\s*$",
        *DESCRIPTOR
    );
    Regex::new(&pattern).expect("attribution regex")
});

static QUOTED_SPAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("[\"\u{201C}]([^\"\u{201C}\u{201D}]+)[\"\u{201D}]").expect("quote regex")
});

/// Grammatical gender hint attached to characters and descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Gender {
    Feminine,
    Masculine,
    #[default]
    Unknown,
}

impl Gender {
    pub fn is_known(&self) -> bool {
        !matches!(self, Gender::Unknown)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Gender::Feminine => "feminine",
            Gender::Masculine => "masculine",
            Gender::Unknown => "unknown",
        }
    }
}

/// What kind of reference a speaker descriptor is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    /// he, she, they...
    Pronoun(Gender),
    /// "Elizabeth", "Mrs. Bennet"
    ProperName,
    /// "his wife", "the old man", "lady"
    Relational,
}

/// Normalize a descriptor (or any text) for lookups and cache keys.
///
/// Lowercases, folds curly apostrophes, strips every other punctuation mark
/// and collapses whitespace, so "Mrs. Bennet" and "Mrs Bennet" are equal.
pub fn normalize_descriptor(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for word in text.split_whitespace() {
        let cleaned: String = word
            .chars()
            .map(|c| if matches!(c, '\u{2018}' | '\u{2019}') { '\'' } else { c })
            .filter(|c| c.is_alphanumeric() || *c == '\'')
            .flat_map(char::to_lowercase)
            .collect();
        let cleaned = cleaned.trim_matches('\'');
        if cleaned.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(cleaned);
    }
    out
}

/// Tidy a descriptor for display: trims surrounding punctuation and
/// collapses internal whitespace, keeping case and inner punctuation.
pub fn display_form(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_string()
}

/// Classify a descriptor as pronoun, proper name or relational phrase.
pub fn descriptor_kind(descriptor: &str) -> DescriptorKind {
    let normalized = normalize_descriptor(descriptor);
    match normalized.as_str() {
        "he" | "him" => return DescriptorKind::Pronoun(Gender::Masculine),
        "she" | "her" => return DescriptorKind::Pronoun(Gender::Feminine),
        "they" | "them" => return DescriptorKind::Pronoun(Gender::Unknown),
        _ => {}
    }

    let first_word = descriptor.split_whitespace().next().unwrap_or("");
    let starts_upper = first_word
        .chars()
        .find(|c| c.is_alphabetic())
        .is_some_and(char::is_uppercase);
    let first_normalized = normalize_descriptor(first_word);

    if starts_upper && !DETERMINERS.contains(&first_normalized.as_str()) {
        DescriptorKind::ProperName
    } else {
        DescriptorKind::Relational
    }
}

/// Whether the descriptor is a bare pronoun.
pub fn is_pronoun(descriptor: &str) -> bool {
    matches!(descriptor_kind(descriptor), DescriptorKind::Pronoun(_))
}

/// Infer a gender hint from honorifics, pronouns and gendered nouns.
pub fn gender_hint(descriptor: &str) -> Gender {
    for word in normalize_descriptor(descriptor).split(' ') {
        if FEMININE_WORDS.contains(&word) {
            return Gender::Feminine;
        }
        if MASCULINE_WORDS.contains(&word) {
            return Gender::Masculine;
        }
    }
    Gender::Unknown
}

/// Where the quotation marks sit in a paragraph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteLayout {
    /// Byte ranges of complete quoted spans, including the marks.
    pub spans: Vec<Range<usize>>,
    /// Any quotation mark at all, balanced or not.
    pub has_quote_marks: bool,
    /// Everything outside the quoted spans is punctuation or whitespace.
    pub entirely_quoted: bool,
}

impl QuoteLayout {
    pub fn of(paragraph: &str) -> Self {
        let has_quote_marks = paragraph.contains(['"', '\u{201C}', '\u{201D}']);
        let spans: Vec<Range<usize>> = QUOTED_SPAN
            .find_iter(paragraph)
            .map(|m| m.range())
            .collect();

        let has_words = |s: &str| s.chars().any(char::is_alphanumeric);
        let mut outside_has_words = false;
        let mut cursor = 0;
        for span in &spans {
            outside_has_words |= has_words(&paragraph[cursor..span.start]);
            cursor = span.end;
        }
        outside_has_words |= has_words(&paragraph[cursor..]);

        Self {
            entirely_quoted: !spans.is_empty() && !outside_has_words,
            spans,
            has_quote_marks,
        }
    }
}

/// Find an explicit speaker attribution adjacent to a quoted span.
///
/// Text after each span is checked before text preceding it; the first match
/// wins. Returns the raw descriptor in display form.
pub fn find_attribution(paragraph: &str, layout: &QuoteLayout) -> Option<String> {
    for span in &layout.spans {
        let after = head_chars(&paragraph[span.end..], ATTRIBUTION_WINDOW);
        for regex in [&*AFTER_VERB_FIRST, &*AFTER_NAME_FIRST] {
            if let Some(desc) = capture_descriptor(regex, after) {
                return Some(desc);
            }
        }

        let before = tail_chars(&paragraph[..span.start], ATTRIBUTION_WINDOW);
        for regex in [&*BEFORE_NAME_FIRST, &*BEFORE_VERB_FIRST] {
            if let Some(desc) = capture_descriptor(regex, before) {
                return Some(desc);
            }
        }
    }
    None
}

fn capture_descriptor(regex: &Regex, text: &str) -> Option<String> {
    let raw = regex.captures(text)?.name("desc")?.as_str();
    let stripped = strip_connectives(raw);
    if stripped.is_empty() {
        None
    } else {
        Some(display_form(stripped))
    }
}

/// Drop sentence-initial connectives ("Then John" -> "John").
fn strip_connectives(descriptor: &str) -> &str {
    let mut rest = descriptor.trim();
    loop {
        let Some((first, tail)) = rest.split_once(char::is_whitespace) else {
            return rest;
        };
        if CONNECTIVES.contains(&first.to_lowercase().as_str()) {
            rest = tail.trim_start();
        } else {
            return rest;
        }
    }
}

/// Check if `text` contains `word` at word boundaries (both already lowercase).
///
/// Multi-word names match as a phrase ("old tom" in "ask old tom").
pub fn contains_word(text: &str, word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    text.match_indices(word).any(|(start, _)| {
        let end = start + word.len();
        let left_ok = text[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let right_ok = text[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        left_ok && right_ok
    })
}

fn head_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

fn tail_chars(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match s.char_indices().rev().nth(n - 1) {
        Some((i, _)) => &s[i..],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_titles_and_punctuation() {
        assert_eq!(normalize_descriptor("Mrs. Bennet"), "mrs bennet");
        assert_eq!(normalize_descriptor("Mrs Bennet"), "mrs bennet");
        assert_eq!(normalize_descriptor("  MRS.   BENNET, "), "mrs bennet");
        assert_eq!(normalize_descriptor("O’Brien"), "o'brien");
        assert_eq!(normalize_descriptor("\"his wife\""), "his wife");
        assert_eq!(normalize_descriptor("..."), "");
    }

    #[test]
    fn test_descriptor_kinds() {
        assert_eq!(
            descriptor_kind("she"),
            DescriptorKind::Pronoun(Gender::Feminine)
        );
        assert_eq!(
            descriptor_kind("He"),
            DescriptorKind::Pronoun(Gender::Masculine)
        );
        assert_eq!(descriptor_kind("Mrs. Bennet"), DescriptorKind::ProperName);
        assert_eq!(descriptor_kind("Elizabeth"), DescriptorKind::ProperName);
        assert_eq!(descriptor_kind("his wife"), DescriptorKind::Relational);
        assert_eq!(descriptor_kind("His wife"), DescriptorKind::Relational);
        assert_eq!(descriptor_kind("The old man"), DescriptorKind::Relational);
        assert_eq!(descriptor_kind("lady"), DescriptorKind::Relational);
    }

    #[test]
    fn test_gender_hints() {
        assert_eq!(gender_hint("Mrs. Bennet"), Gender::Feminine);
        assert_eq!(gender_hint("his wife"), Gender::Feminine);
        assert_eq!(gender_hint("the old man"), Gender::Masculine);
        assert_eq!(gender_hint("Sir William"), Gender::Masculine);
        assert_eq!(gender_hint("Elizabeth"), Gender::Unknown);
    }

    #[test]
    fn test_display_form() {
        assert_eq!(display_form(" Mrs.  Bennet "), "Mrs. Bennet");
        assert_eq!(display_form("John."), "John");
        assert_eq!(display_form("his wife,"), "his wife");
    }

    #[test]
    fn test_quote_layout() {
        let layout = QuoteLayout::of("\"How are you?\"");
        assert!(layout.has_quote_marks);
        assert!(layout.entirely_quoted);
        assert_eq!(layout.spans.len(), 1);

        let layout = QuoteLayout::of("\u{201C}Yes.\u{201D} \u{201C}No.\u{201D}");
        assert!(layout.entirely_quoted);
        assert_eq!(layout.spans.len(), 2);

        let layout = QuoteLayout::of("John said, \"Hi.\"");
        assert!(!layout.entirely_quoted);

        let layout = QuoteLayout::of("It was a fine morning.");
        assert!(!layout.has_quote_marks);
        assert!(layout.spans.is_empty());
        assert!(!layout.entirely_quoted);
    }

    fn attribution(paragraph: &str) -> Option<String> {
        find_attribution(paragraph, &QuoteLayout::of(paragraph))
    }

    #[test]
    fn test_attribution_after_quote() {
        assert_eq!(attribution("\"Hi,\" said John."), Some("John".into()));
        assert_eq!(
            attribution("\"Fine,\" John replied."),
            Some("John".into())
        );
        assert_eq!(
            attribution("\"My dear,\" said Mrs. Bennet to her husband."),
            Some("Mrs. Bennet".into())
        );
        assert_eq!(
            attribution("\"Nonsense,\" said his wife."),
            Some("his wife".into())
        );
        assert_eq!(attribution("\"Oh!\" she cried."), Some("she".into()));
    }

    #[test]
    fn test_attribution_before_quote() {
        assert_eq!(attribution("John said, \"Hi.\""), Some("John".into()));
        assert_eq!(
            attribution("Then Elizabeth said quietly, \"No.\""),
            Some("Elizabeth".into())
        );
        assert_eq!(
            attribution("His wife answered: \"Indeed.\""),
            Some("His wife".into())
        );
    }

    #[test]
    fn test_no_attribution() {
        assert_eq!(attribution("\"How are you?\""), None);
        assert_eq!(
            attribution("He picked up \"The Times\" and read."),
            None
        );
    }

    #[test]
    fn test_contains_word() {
        assert!(contains_word("i ask thor about it", "thor"));
        assert!(!contains_word("i ask thorin about it", "thor"));
        assert!(contains_word("ask old tom now", "old tom"));
        assert!(!contains_word("anything", ""));
    }

    #[test]
    fn test_char_windows_respect_boundaries() {
        assert_eq!(head_chars("héllo", 2), "hé");
        assert_eq!(tail_chars("héllo", 4), "éllo");
        assert_eq!(tail_chars("ab", 5), "ab");
    }
}
