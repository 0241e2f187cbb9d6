//! Event bus: synchronous fan-out of agent events to every subscriber.
//!
//! `emit` runs every handler on the caller's thread, in subscription order.
//! The subscriber list is snapshotted per emit so handlers may subscribe or
//! unsubscribe (themselves or others) while an event is being delivered.
//! Handlers should do the minimum work inline; async consumers use
//! [`EventBus::subscribe_channel`] and drain their own queue.

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Events published by agent turns, tools and integrations.
///
/// Serialized with a `type` tag (`tool_use`, `ask_user`, ...) and camelCase
/// fields, which is exactly what observers receive on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AgentEvent {
    AgentStart {
        conversation_id: String,
    },

    /// Streamed assistant text.
    TextChunk {
        conversation_id: String,
        text: String,
    },

    ToolUse {
        conversation_id: String,
        tool_use_id: String,
        name: String,
        input: Value,
    },

    ToolResult {
        conversation_id: String,
        tool_use_id: String,
        output: String,
        #[serde(default)]
        is_error: bool,
    },

    ToolProgress {
        conversation_id: String,
        tool_use_id: String,
        message: String,
    },

    /// A tool is blocked on a human answer.
    AskUser {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
        question_id: String,
        question: String,
        #[serde(default)]
        options: Vec<String>,
    },

    AgentDone {
        conversation_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },

    AgentError {
        conversation_id: String,
        error: String,
    },

    AgentStopped {
        conversation_id: String,
    },

    /// Thread metadata or history changed (fork, compaction, status).
    ConversationUpdated {
        conversation_id: String,
    },

    /// Forge webhook relayed into a conversation.
    GiteaEvent {
        conversation_id: String,
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<String>,
        #[serde(default)]
        payload: Value,
    },
}

impl AgentEvent {
    /// The conversation this event belongs to, if any.
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            Self::AgentStart { conversation_id }
            | Self::TextChunk { conversation_id, .. }
            | Self::ToolUse { conversation_id, .. }
            | Self::ToolResult { conversation_id, .. }
            | Self::ToolProgress { conversation_id, .. }
            | Self::AgentDone { conversation_id, .. }
            | Self::AgentError { conversation_id, .. }
            | Self::AgentStopped { conversation_id }
            | Self::ConversationUpdated { conversation_id }
            | Self::GiteaEvent { conversation_id, .. } => Some(conversation_id),
            Self::AskUser { conversation_id, .. } => conversation_id.as_deref(),
        }
    }

    /// Wire name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AgentStart { .. } => "agent_start",
            Self::TextChunk { .. } => "text_chunk",
            Self::ToolUse { .. } => "tool_use",
            Self::ToolResult { .. } => "tool_result",
            Self::ToolProgress { .. } => "tool_progress",
            Self::AskUser { .. } => "ask_user",
            Self::AgentDone { .. } => "agent_done",
            Self::AgentError { .. } => "agent_error",
            Self::AgentStopped { .. } => "agent_stopped",
            Self::ConversationUpdated { .. } => "conversation_updated",
            Self::GiteaEvent { .. } => "gitea_event",
        }
    }
}

type Handler = dyn Fn(&AgentEvent) + Send + Sync;

struct Subscriber {
    id: u64,
    active: AtomicBool,
    handler: Box<Handler>,
}

struct BusInner {
    subscribers: RwLock<Vec<Arc<Subscriber>>>,
    next_id: AtomicU64,
    /// Serializes emits across threads; re-entrant so a handler may emit.
    dispatch: ReentrantMutex<()>,
}

impl BusInner {
    fn remove(&self, id: u64) {
        self.subscribers.write().retain(|s| s.id != id);
    }
}

/// Process-wide publish/subscribe channel for [`AgentEvent`]s.
///
/// Cloning is cheap; all clones share one subscriber set.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                dispatch: ReentrantMutex::new(()),
            }),
        }
    }

    /// Register a handler. It stays subscribed until the returned
    /// [`Subscription`] is unsubscribed or dropped.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        let subscriber = Arc::new(Subscriber {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            active: AtomicBool::new(true),
            handler: Box::new(handler),
        });
        self.inner.subscribers.write().push(subscriber.clone());
        debug!(subscriber = subscriber.id, "event bus subscriber added");

        Subscription {
            bus: Arc::downgrade(&self.inner),
            subscriber,
            detached: false,
        }
    }

    /// Subscribe with a handler that only forwards into an unbounded queue.
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |event| {
            // Receiver gone means the consumer is shutting down.
            let _ = tx.send(event.clone());
        });
        (subscription, rx)
    }

    /// Like [`EventBus::subscribe_channel`], but holding at most `capacity`
    /// undelivered events. A consumer that falls further behind is cut off:
    /// the sender is dropped, so the receiver yields what was buffered and
    /// then `None`. `emit` never blocks on a slow consumer.
    pub fn subscribe_bounded(&self, capacity: usize) -> (Subscription, mpsc::Receiver<AgentEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let tx = Mutex::new(Some(tx));
        let subscription = self.subscribe(move |event| {
            let mut slot = tx.lock();
            let Some(sender) = slot.as_ref() else {
                return;
            };
            match sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(capacity, "channel subscriber fell behind, closing its queue");
                    *slot = None;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => *slot = None,
            }
        });
        (subscription, rx)
    }

    /// Deliver `event` to every current subscriber, in subscription order.
    pub fn emit(&self, event: AgentEvent) {
        let _dispatch = self.inner.dispatch.lock();
        let snapshot: Vec<Arc<Subscriber>> = self.inner.subscribers.read().clone();

        for subscriber in snapshot {
            if !subscriber.active.load(Ordering::Acquire) {
                continue;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| (subscriber.handler)(&event)));
            if let Err(panic) = outcome {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                error!(
                    subscriber = subscriber.id,
                    event = event.kind(),
                    %message,
                    "event handler panicked"
                );
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[must_use = "dropping a Subscription unsubscribes the handler"]
pub struct Subscription {
    bus: Weak<BusInner>,
    subscriber: Arc<Subscriber>,
    detached: bool,
}

impl Subscription {
    /// Stop delivery to this handler. Calling it again is a no-op.
    pub fn unsubscribe(&self) {
        if !self.subscriber.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.subscriber.id);
            debug!(subscriber = self.subscriber.id, "event bus subscriber removed");
        }
    }

    pub fn is_active(&self) -> bool {
        self.subscriber.active.load(Ordering::Acquire)
    }

    /// Keep the handler subscribed for the lifetime of the bus.
    pub fn detach(mut self) {
        self.detached = true;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.detached {
            self.unsubscribe();
        }
    }
}
