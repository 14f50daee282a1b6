//! Book input: paragraphs, chapters, and a plain-text reader.
//!
//! The attribution engine only needs an ordered paragraph sequence per
//! chapter. [`read_plain_text`] produces one from a Project Gutenberg style
//! text file; other formats only have to build the same [`Chapter`] values.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static TITLE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^Title:\s*(.+)$").expect("title regex"));

static AUTHOR_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^Author:\s*(.+)$").expect("author regex"));

static CONTENT_MARKERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\*\*\* START OF .*? \*\*\*",
        r"(?i)Chapter I\.?[\]\s]",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("content marker regex"))
    .collect()
});

static CHAPTER_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^Chapter\s+([IVXLCDM]+|\d+)\.?[\]\s]*$").expect("chapter regex")
});

/// Where a paragraph sits in the book (both zero-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParagraphPosition {
    pub chapter: usize,
    pub paragraph: usize,
}

impl ParagraphPosition {
    pub fn new(chapter: usize, paragraph: usize) -> Self {
        Self { chapter, paragraph }
    }
}

impl fmt::Display for ParagraphPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chapter, self.paragraph)
    }
}

/// An immutable unit of input text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paragraph {
    pub position: ParagraphPosition,
    pub text: String,
}

impl Paragraph {
    pub fn new(position: ParagraphPosition, text: impl Into<String>) -> Self {
        Self {
            position,
            text: text.into(),
        }
    }
}

/// A chapter: an ordered paragraph sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    /// Zero-based position of the chapter in the book.
    pub index: usize,
    /// Chapter number as printed (roman numerals converted).
    pub number: u32,
    pub title: String,
    pub paragraphs: Vec<Paragraph>,
}

impl Chapter {
    /// Build a chapter from raw paragraph texts, assigning positions in order.
    pub fn from_texts<I, S>(index: usize, title: impl Into<String>, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let paragraphs = texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| Paragraph::new(ParagraphPosition::new(index, i), text))
            .collect();
        Self {
            index,
            number: index as u32 + 1,
            title: title.into(),
            paragraphs,
        }
    }

    /// Full chapter text, paragraphs separated by blank lines.
    pub fn text(&self) -> String {
        self.paragraphs
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// A parsed book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub title: String,
    pub author: Option<String>,
    pub chapters: Vec<Chapter>,
}

impl Book {
    pub fn paragraph_count(&self) -> usize {
        self.chapters.iter().map(|c| c.paragraphs.len()).sum()
    }

    /// Full book text (used for oracle seeding).
    pub fn text(&self) -> String {
        self.chapters
            .iter()
            .map(Chapter::text)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Parse a plain-text book.
///
/// Reads `Title:`/`Author:` header lines, skips front matter up to the first
/// content marker, splits on `Chapter N.` headings and then on blank lines.
/// Chapters that end up with no paragraphs are dropped.
pub fn read_plain_text(content: &str) -> Book {
    let content = content.replace("\r\n", "\n");
    let title = TITLE_LINE
        .captures(&content)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_else(|| "Unknown".to_string());
    let author = AUTHOR_LINE.captures(&content).map(|c| c[1].trim().to_string());

    let start = CONTENT_MARKERS
        .iter()
        .find_map(|re| re.find(&content).map(|m| m.start()))
        .unwrap_or(0);
    let body = &content[start..];

    let headings: Vec<_> = CHAPTER_HEADING.captures_iter(body).collect();
    let mut raw_chapters: Vec<(u32, String, &str)> = Vec::new();
    if headings.is_empty() {
        raw_chapters.push((1, "Chapter I".to_string(), body));
    } else {
        for (i, caps) in headings.iter().enumerate() {
            let (Some(whole), Some(numeral)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let end = headings
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map_or(body.len(), |m| m.start());
            raw_chapters.push((
                roman_to_int(numeral.as_str()),
                format!("Chapter {}", numeral.as_str()),
                &body[whole.end()..end],
            ));
        }
    }

    let mut chapters = Vec::new();
    for (number, title, text) in raw_chapters {
        let index = chapters.len();
        let paragraphs: Vec<String> = split_paragraphs(text).collect();
        if paragraphs.is_empty() {
            continue;
        }
        let mut chapter = Chapter::from_texts(index, title, paragraphs);
        chapter.number = number;
        chapters.push(chapter);
    }

    Book {
        title,
        author,
        chapters,
    }
}

fn split_paragraphs(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split("\n\n")
        .map(|block| block.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty())
        .filter(|p| !p.starts_with("[Illustration") && !p.starts_with("_Copyright"))
}

/// Convert a roman numeral (or plain digits) to an integer.
fn roman_to_int(numeral: &str) -> u32 {
    if let Ok(n) = numeral.parse() {
        return n;
    }
    let mut total = 0u32;
    let mut previous = 0u32;
    for c in numeral.to_ascii_uppercase().chars().rev() {
        let value = match c {
            'I' => 1,
            'V' => 5,
            'X' => 10,
            'L' => 50,
            'C' => 100,
            'D' => 500,
            'M' => 1000,
            _ => 0,
        };
        if value < previous {
            total = total.saturating_sub(value);
        } else {
            total += value;
            previous = value;
        }
    }
    total
}
