//! Thread model: stored threads, their history events, and status rules.

use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

static LAST_MICROS: AtomicI64 = AtomicI64::new(0);

/// Current time at the microsecond precision the store keeps, strictly
/// increasing within the process so history entries never tie.
pub(crate) fn now() -> DateTime<Utc> {
    let wall = Utc::now().timestamp_micros();
    let previous = LAST_MICROS
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |last| {
            Some(wall.max(last + 1))
        })
        .unwrap_or(wall);
    DateTime::from_timestamp_micros(wall.max(previous + 1)).unwrap_or_else(Utc::now)
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// What kind of thread this is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadKind {
    /// User-facing conversation
    #[default]
    Chat,
    /// Activity log written by the system itself
    SystemLog,
    /// Worker thread for one piece of delegated work
    Task,
}

impl ThreadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::SystemLog => "system_log",
            Self::Task => "task",
        }
    }
}

impl FromStr for ThreadKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "chat" => Ok(Self::Chat),
            "system_log" => Ok(Self::SystemLog),
            "task" => Ok(Self::Task),
            other => Err(CoreError::Validation(format!("unknown thread kind: {other}"))),
        }
    }
}

/// Thread lifecycle status.
///
/// Allowed moves: `active -> paused`, `paused -> active | stopped`,
/// `stopped -> paused | archived`, `archived -> paused`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    #[default]
    Active,
    Paused,
    Stopped,
    Archived,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Archived => "archived",
        }
    }

    pub fn can_transition_to(&self, next: ThreadStatus) -> bool {
        use ThreadStatus::*;
        matches!(
            (*self, next),
            (Active, Paused)
                | (Paused, Active)
                | (Paused, Stopped)
                | (Stopped, Paused)
                | (Stopped, Archived)
                | (Archived, Paused)
        )
    }

    /// Validate a move to `next`, returning the new status.
    pub fn transition_to(&self, next: ThreadStatus) -> Result<ThreadStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThreadStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "stopped" => Ok(Self::Stopped),
            "archived" => Ok(Self::Archived),
            other => Err(CoreError::Validation(format!("unknown thread status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    Issue,
    PullRequest,
}

/// Issue or pull request a thread is working on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadRef {
    pub kind: RefKind,
    /// `owner/name`
    pub repo: String,
    pub number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A thread as stored: flat, with its parent link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadRecord {
    pub id: String,
    pub topic: Option<String>,
    pub display_name: Option<String>,
    pub kind: ThreadKind,
    pub status: ThreadStatus,
    pub parent_thread_id: Option<String>,
    /// Last parent event inherited when this thread was forked.
    pub fork_point_event_id: Option<String>,
    #[serde(default)]
    pub refs: Vec<ThreadRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ThreadRecord {
    /// A fresh active root thread.
    pub fn new(kind: ThreadKind) -> Self {
        let now = now();
        Self {
            id: new_id(),
            topic: None,
            display_name: None,
            kind,
            status: ThreadStatus::Active,
            parent_thread_id: None,
            fork_point_event_id: None,
            refs: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Name to show a human: display name, then topic, then the id.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.topic.as_deref())
            .unwrap_or(self.id.as_str())
    }
}

/// Kind of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    UserMessage,
    AssistantMessage,
    ToolUse,
    ToolResult,
    System,
    /// Stands in for a run of older events removed by compaction.
    Summary,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserMessage => "user_message",
            Self::AssistantMessage => "assistant_message",
            Self::ToolUse => "tool_use",
            Self::ToolResult => "tool_result",
            Self::System => "system",
            Self::Summary => "summary",
        }
    }

    /// Speaker label used in transcripts.
    pub fn speaker(&self) -> &'static str {
        match self {
            Self::UserMessage => "User",
            Self::AssistantMessage => "Assistant",
            Self::ToolUse | Self::ToolResult => "Tool",
            Self::System | Self::Summary => "System",
        }
    }
}

impl FromStr for EventKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user_message" => Ok(Self::UserMessage),
            "assistant_message" => Ok(Self::AssistantMessage),
            "tool_use" => Ok(Self::ToolUse),
            "tool_result" => Ok(Self::ToolResult),
            "system" => Ok(Self::System),
            "summary" => Ok(Self::Summary),
            other => Err(CoreError::Validation(format!("unknown event kind: {other}"))),
        }
    }
}

/// One entry in a thread's stored history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadEvent {
    pub id: String,
    pub thread_id: String,
    /// Insertion order within the thread, assigned by the store.
    pub seq: i64,
    pub kind: EventKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// For summaries: how many original events this one replaces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summarized_count: Option<u64>,
}

impl ThreadEvent {
    pub fn new(thread_id: impl Into<String>, kind: EventKind, content: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            thread_id: thread_id.into(),
            seq: 0,
            kind,
            content: content.into(),
            created_at: now(),
            summarized_count: None,
        }
    }

    pub fn summary(thread_id: impl Into<String>, content: impl Into<String>, count: u64) -> Self {
        Self {
            summarized_count: Some(count),
            ..Self::new(thread_id, EventKind::Summary, content)
        }
    }

    /// Copy of this event under a new id in another thread, keeping its
    /// timestamp so inherited history sorts before anything new.
    pub fn inherit_into(&self, thread_id: &str) -> Self {
        Self {
            id: new_id(),
            thread_id: thread_id.to_string(),
            seq: 0,
            ..self.clone()
        }
    }

    /// Number of original events this entry accounts for.
    pub fn weight(&self) -> u64 {
        match (self.kind, self.summarized_count) {
            (EventKind::Summary, Some(count)) => count,
            _ => 1,
        }
    }
}

/// Role of a message handed to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in an assembled model context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: ContextRole,
    pub content: String,
}

/// Options for [`ThreadService::spawn_sub_thread`](super::ThreadService::spawn_sub_thread).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnOptions {
    pub display_name: String,
    /// Defaults to the parent's kind.
    #[serde(default)]
    pub kind: Option<ThreadKind>,
    /// Defaults to "Fork of: <parent topic>".
    #[serde(default)]
    pub topic: Option<String>,
    /// Appended to the new thread as a system event.
    #[serde(default)]
    pub initial_context: Option<String>,
    #[serde(default)]
    pub link_ref: Option<ThreadRef>,
    /// Defaults to the parent's latest event.
    #[serde(default)]
    pub fork_point_event_id: Option<String>,
}

impl SpawnOptions {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            ..Default::default()
        }
    }
}
