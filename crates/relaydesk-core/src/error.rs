//! Error types for the coordination core.
//!
//! Expected races (answering an already-answered question, force-releasing a
//! free lock) are reported as `bool`/`Option` by the operations themselves and
//! never show up here.

use crate::threads::ThreadStatus;

/// Errors raised by `relaydesk-core` operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Lock acquisition exceeded its deadline.
    #[error("timed out after {waited_ms}ms waiting for conversation lock '{conversation_id}'")]
    LockTimeout {
        conversation_id: String,
        waited_ms: u64,
    },

    /// The wait ended without a grant or a deadline: the waiter was removed
    /// from the queue by someone other than the caller.
    #[error("wait for conversation lock '{conversation_id}' was aborted")]
    LockWaitAborted { conversation_id: String },

    /// A question with this id is already waiting for an answer.
    #[error("question '{0}' is already pending")]
    QuestionAlreadyPending(String),

    /// The pending question was evicted before anyone answered it.
    #[error("question '{0}' was abandoned before it was answered")]
    QuestionAbandoned(String),

    #[error("thread '{0}' not found")]
    ThreadNotFound(String),

    #[error("event '{0}' not found")]
    EventNotFound(String),

    /// A fork point was requested that is not part of the source thread.
    #[error("event '{event_id}' does not belong to thread '{thread_id}'")]
    EventNotInThread { event_id: String, thread_id: String },

    #[error("invalid thread status transition {from} -> {to}")]
    InvalidTransition { from: ThreadStatus, to: ThreadStatus },

    /// Malformed request from an external caller.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("summarizer failed: {0}")]
    Summarizer(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
