//! Per-chapter conversation state.
//!
//! The tracker remembers the last few paragraphs, who has spoken recently
//! (most recent first) and whether an exchange is in progress. A run of
//! narration ends the exchange; a new chapter wipes everything.

use crate::book::Paragraph;
use crate::config::AttributionConfig;
use crate::registry::CharacterId;
use crate::segment::{Segment, SegmentKind, Speaker};
use std::collections::VecDeque;

/// Sliding window, active-speaker set and in-conversation flag.
#[derive(Debug, Clone)]
pub struct ConversationTracker {
    window: VecDeque<String>,
    window_size: usize,
    /// Most recent first.
    active: Vec<CharacterId>,
    max_active: usize,
    in_conversation: bool,
    narration_run: usize,
    reset_run: usize,
    /// Speaker of the latest dialogue paragraph, if it was resolved.
    previous_turn: Option<CharacterId>,
}

impl ConversationTracker {
    pub fn new(config: &AttributionConfig) -> Self {
        Self {
            window: VecDeque::with_capacity(config.context_window),
            window_size: config.context_window,
            active: Vec::with_capacity(config.max_active_speakers),
            max_active: config.max_active_speakers.max(1),
            in_conversation: false,
            narration_run: 0,
            reset_run: config.narration_reset_run.max(1),
            previous_turn: None,
        }
    }

    /// Forget everything; conversations do not cross chapters.
    pub fn begin_chapter(&mut self) {
        self.window.clear();
        self.end_conversation();
    }

    /// The trailing paragraphs, oldest first.
    pub fn window(&self) -> impl Iterator<Item = &str> {
        self.window.iter().map(String::as_str)
    }

    /// Recent speakers, most recent first.
    pub fn active_speakers(&self) -> &[CharacterId] {
        &self.active
    }

    pub fn in_conversation(&self) -> bool {
        self.in_conversation
    }

    pub fn previous_turn(&self) -> Option<CharacterId> {
        self.previous_turn
    }

    /// The single active speaker, if they also spoke the latest dialogue line.
    pub fn continuing_speaker(&self) -> Option<CharacterId> {
        match self.active.as_slice() {
            [only] if self.in_conversation && self.previous_turn == Some(*only) => Some(*only),
            _ => None,
        }
    }

    /// Record a finished paragraph and its segment.
    pub fn advance(&mut self, paragraph: &Paragraph, segment: &Segment) {
        if self.window_size > 0 {
            if self.window.len() == self.window_size {
                self.window.pop_front();
            }
            self.window.push_back(paragraph.text.clone());
        }

        match (segment.kind, segment.speaker) {
            (SegmentKind::Dialogue, Some(Speaker::Resolved(id))) => {
                self.promote(id);
                self.in_conversation = true;
                self.narration_run = 0;
                self.previous_turn = Some(id);
            }
            (SegmentKind::Dialogue, _) => {
                self.in_conversation = true;
                self.narration_run = 0;
                self.previous_turn = None;
            }
            (SegmentKind::Narration, _) => {
                self.narration_run += 1;
                if self.narration_run >= self.reset_run {
                    self.end_conversation();
                }
            }
        }
    }

    fn promote(&mut self, id: CharacterId) {
        self.active.retain(|a| *a != id);
        self.active.insert(0, id);
        self.active.truncate(self.max_active);
    }

    fn end_conversation(&mut self) {
        self.active.clear();
        self.in_conversation = false;
        self.narration_run = 0;
        self.previous_turn = None;
    }
}
