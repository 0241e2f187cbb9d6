//! Ask-user bridge: lets a tool call block on a human answer that arrives
//! through some other channel (a UI socket, an HTTP callback).
//!
//! Each question is a one-shot channel keyed by its id. The asking side
//! awaits the receiver; whoever calls [`AskUserBridge::answer_question`]
//! first sends into it. Later answers find nothing and return `false`.

use crate::error::{CoreError, Result};
use crate::events::{AgentEvent, EventBus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Snapshot of a question waiting for an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingQuestion {
    pub question_id: String,
    pub question: String,
    pub options: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A question to put to the user.
#[derive(Debug, Clone, Default)]
pub struct Question {
    pub question_id: String,
    pub question: String,
    pub options: Vec<String>,
    pub conversation_id: Option<String>,
}

impl Question {
    pub fn new(question_id: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            question_id: question_id.into(),
            question: question.into(),
            ..Default::default()
        }
    }

    /// Offer a fixed set of answers. Free text is still accepted.
    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn in_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.question_id.trim().is_empty() {
            return Err(CoreError::Validation("questionId is required".into()));
        }
        if self.question.trim().is_empty() {
            return Err(CoreError::Validation("question is required".into()));
        }
        Ok(())
    }
}

struct PendingEntry {
    token: u64,
    question: PendingQuestion,
    answer_tx: oneshot::Sender<String>,
}

struct BridgeInner {
    pending: Mutex<HashMap<String, PendingEntry>>,
    next_token: AtomicU64,
}

impl BridgeInner {
    /// Remove `question_id` only if it is still the registration `token`
    /// created. A later question reusing the id is left alone.
    fn evict(&self, question_id: &str, token: u64) -> bool {
        let mut pending = self.pending.lock();
        match pending.get(question_id) {
            Some(entry) if entry.token == token => {
                pending.remove(question_id);
                true
            }
            _ => false,
        }
    }
}

/// Registry of outstanding questions.
///
/// Cloning is cheap; clones share the registry and the event bus.
#[derive(Clone)]
pub struct AskUserBridge {
    inner: Arc<BridgeInner>,
    bus: EventBus,
}

impl AskUserBridge {
    pub fn new(bus: EventBus) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                pending: Mutex::new(HashMap::new()),
                next_token: AtomicU64::new(1),
            }),
            bus,
        }
    }

    /// Ask a question and wait for the answer.
    ///
    /// There is no timeout here. Wrap the future in `tokio::time::timeout`
    /// if you need one; dropping it removes the question from the registry.
    pub async fn ask_user(
        &self,
        question_id: &str,
        question: &str,
        options: &[String],
    ) -> Result<String> {
        self.ask(Question::new(question_id, question).with_options(options.iter().cloned()))
            .await
    }

    pub async fn ask(&self, question: Question) -> Result<String> {
        let question_id = question.question_id.clone();
        let (answer_rx, _guard) = self.register(question)?;
        answer_rx
            .await
            .map_err(|_| CoreError::QuestionAbandoned(question_id))
    }

    /// Blocking variant for synchronous tool code running on its own OS
    /// thread. Must not be called from inside an async runtime worker.
    pub fn ask_user_blocking(&self, question: Question) -> Result<String> {
        let question_id = question.question_id.clone();
        let (answer_rx, _guard) = self.register(question)?;
        answer_rx
            .blocking_recv()
            .map_err(|_| CoreError::QuestionAbandoned(question_id))
    }

    /// Deliver `answer` to the caller waiting on `question_id`.
    ///
    /// Returns `false` if the question is unknown or was already answered.
    pub fn answer_question(&self, question_id: &str, answer: impl Into<String>) -> bool {
        let Some(entry) = self.inner.pending.lock().remove(question_id) else {
            debug!(question_id, "answer for unknown question ignored");
            return false;
        };
        // The asker may have gone away between our removal and this send.
        // The entry is consumed either way, so the first answer still wins.
        if entry.answer_tx.send(answer.into()).is_err() {
            debug!(question_id, "answered question had no waiting caller");
        } else {
            debug!(question_id, "question answered");
        }
        true
    }

    pub fn has_pending_question(&self, question_id: &str) -> bool {
        self.inner.pending.lock().contains_key(question_id)
    }

    /// Outstanding questions, oldest first.
    pub fn pending_questions(&self) -> Vec<PendingQuestion> {
        let mut questions: Vec<PendingQuestion> = self
            .inner
            .pending
            .lock()
            .values()
            .map(|entry| entry.question.clone())
            .collect();
        questions.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.question_id.cmp(&b.question_id))
        });
        questions
    }

    /// Drop a pending question. Its caller fails with
    /// [`CoreError::QuestionAbandoned`].
    pub fn abandon(&self, question_id: &str) -> bool {
        let removed = self.inner.pending.lock().remove(question_id).is_some();
        if removed {
            warn!(question_id, "pending question abandoned");
        }
        removed
    }

    /// Abandon every question that has been waiting longer than `max_age`.
    pub fn evict_older_than(&self, max_age: Duration) -> usize {
        // An age reaching back past the representable range evicts nothing.
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|max_age| Utc::now().checked_sub_signed(max_age))
        else {
            return 0;
        };
        let mut pending = self.inner.pending.lock();
        let before = pending.len();
        pending.retain(|_, entry| entry.question.created_at > cutoff);
        let evicted = before - pending.len();
        drop(pending);

        if evicted > 0 {
            warn!(evicted, "evicted stale pending questions");
        }
        evicted
    }

    fn register(&self, question: Question) -> Result<(oneshot::Receiver<String>, PendingAsk)> {
        question.validate()?;

        let (answer_tx, answer_rx) = oneshot::channel();
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        let pending = PendingQuestion {
            question_id: question.question_id.clone(),
            question: question.question,
            options: question.options,
            conversation_id: question.conversation_id,
            created_at: Utc::now(),
        };

        {
            let mut registry = self.inner.pending.lock();
            if registry.contains_key(&pending.question_id) {
                return Err(CoreError::QuestionAlreadyPending(pending.question_id));
            }
            registry.insert(
                pending.question_id.clone(),
                PendingEntry {
                    token,
                    question: pending.clone(),
                    answer_tx,
                },
            );
        }
        debug!(question_id = %pending.question_id, "question registered");

        let guard = PendingAsk {
            inner: self.inner.clone(),
            question_id: pending.question_id.clone(),
            token,
        };

        // Published outside the registry lock: a handler may answer inline.
        self.bus.emit(AgentEvent::AskUser {
            conversation_id: pending.conversation_id,
            question_id: pending.question_id,
            question: pending.question,
            options: pending.options,
        });

        Ok((answer_rx, guard))
    }
}

/// Evicts the question when the asking side stops waiting.
struct PendingAsk {
    inner: Arc<BridgeInner>,
    question_id: String,
    token: u64,
}

impl Drop for PendingAsk {
    fn drop(&mut self) {
        if self.inner.evict(&self.question_id, self.token) {
            debug!(question_id = %self.question_id, "question withdrawn by caller");
        }
    }
}
