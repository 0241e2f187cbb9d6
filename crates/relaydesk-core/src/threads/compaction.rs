//! Context compaction: folding old history into one summary event.

use super::model::{ContextMessage, ContextRole, EventKind, ThreadEvent};
use crate::error::Result;
use async_trait::async_trait;

/// When to compact and how much recent history to keep verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionPolicy {
    /// Compact once a thread holds more events than this.
    pub threshold: usize,
    /// Events left untouched at the end of the thread.
    pub keep_recent: usize,
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self {
            threshold: 20,
            keep_recent: 5,
        }
    }
}

/// Result of [`CompactionPolicy::plan`].
#[derive(Debug, Clone, Copy)]
pub struct CompactionPlan<'a> {
    /// Older events to fold into the summary.
    pub condensed: &'a [ThreadEvent],
    /// Recent events kept as they are.
    pub retained: &'a [ThreadEvent],
}

impl CompactionPlan<'_> {
    /// Original events the summary will stand for, counting through
    /// earlier summaries.
    pub fn summarized_count(&self) -> u64 {
        self.condensed.iter().map(ThreadEvent::weight).sum()
    }
}

impl CompactionPolicy {
    pub fn needs_compaction(&self, event_count: usize) -> bool {
        event_count > self.threshold
    }

    /// Split `events` (oldest first) into the part to condense and the part
    /// to keep. `None` when nothing needs doing.
    pub fn plan<'a>(&self, events: &'a [ThreadEvent]) -> Option<CompactionPlan<'a>> {
        if !self.needs_compaction(events.len()) {
            return None;
        }
        let split = events.len().saturating_sub(self.keep_recent);
        if split == 0 {
            return None;
        }
        let (condensed, retained) = events.split_at(split);
        Some(CompactionPlan {
            condensed,
            retained,
        })
    }
}

/// Produces the text of a summary event. Usually backed by a model.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, events: &[ThreadEvent]) -> Result<String>;
}

/// Prompt asking a model to summarize `events`.
pub fn compaction_prompt(events: &[ThreadEvent]) -> String {
    let mut prompt = String::from(
        "Summarize the following conversation in 2-3 sentences, \
         capturing the key topics, decisions, and any pending items:\n\n",
    );
    for event in events {
        prompt.push_str(&format!("{}: {}\n", event.kind.speaker(), event.content));
    }
    prompt
}

/// Summarizer that needs no model: keeps one clipped line per event.
#[derive(Debug, Clone)]
pub struct TranscriptSummarizer {
    /// Longest line kept per event, in characters.
    pub max_line_chars: usize,
}

impl Default for TranscriptSummarizer {
    fn default() -> Self {
        Self { max_line_chars: 160 }
    }
}

impl TranscriptSummarizer {
    fn clip(&self, text: &str) -> String {
        let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if flat.chars().count() <= self.max_line_chars {
            return flat;
        }
        let mut clipped: String = flat.chars().take(self.max_line_chars).collect();
        clipped.push('…');
        clipped
    }
}

#[async_trait]
impl Summarizer for TranscriptSummarizer {
    async fn summarize(&self, events: &[ThreadEvent]) -> Result<String> {
        let lines: Vec<String> = events
            .iter()
            .map(|event| match event.kind {
                EventKind::Summary => format!("Earlier: {}", self.clip(&event.content)),
                kind => format!("{}: {}", kind.speaker(), self.clip(&event.content)),
            })
            .collect();
        Ok(lines.join("\n"))
    }
}

/// Turn stored history into model messages.
///
/// A summary at the head of the history becomes one system message
/// announcing how many events it replaces.
pub fn assemble_context(events: &[ThreadEvent]) -> Vec<ContextMessage> {
    events
        .iter()
        .map(|event| match event.kind {
            EventKind::Summary => ContextMessage {
                role: ContextRole::System,
                content: format!(
                    "[Summary of {} earlier events]\n{}",
                    event.weight(),
                    event.content
                ),
            },
            EventKind::UserMessage => ContextMessage {
                role: ContextRole::User,
                content: event.content.clone(),
            },
            EventKind::AssistantMessage => ContextMessage {
                role: ContextRole::Assistant,
                content: event.content.clone(),
            },
            EventKind::ToolUse | EventKind::ToolResult => ContextMessage {
                role: ContextRole::Tool,
                content: event.content.clone(),
            },
            EventKind::System => ContextMessage {
                role: ContextRole::System,
                content: event.content.clone(),
            },
        })
        .collect()
}
