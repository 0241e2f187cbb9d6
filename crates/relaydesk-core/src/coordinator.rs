//! The bundle of registries every front end shares.

use crate::ask_user::AskUserBridge;
use crate::config::Config;
use crate::error::Result;
use crate::events::EventBus;
use crate::lock::{ConversationLocks, LockHandle, QueuedMessage};
use crate::store::{SqliteThreadStore, ThreadStore};
use crate::threads::{CompactionPolicy, ThreadService};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Outcome of [`Coordinator::admit`].
#[derive(Debug)]
pub enum Admission {
    /// The conversation was free; run the turn, then release the handle.
    Run(LockHandle),
    /// A turn is already running; the message waits in the queue at this
    /// 1-based position.
    Queued(usize),
}

/// One event bus, lock registry, ask-user bridge and thread service, wired
/// to the same bus. Cloning shares everything.
#[derive(Clone)]
pub struct Coordinator {
    bus: EventBus,
    locks: ConversationLocks,
    ask_user: AskUserBridge,
    threads: ThreadService,
    lock_timeout: Option<Duration>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn ThreadStore>) -> Self {
        Self::with_policy(store, CompactionPolicy::default())
    }

    pub fn with_policy(store: Arc<dyn ThreadStore>, policy: CompactionPolicy) -> Self {
        let bus = EventBus::new();
        Self {
            locks: ConversationLocks::new(),
            ask_user: AskUserBridge::new(bus.clone()),
            threads: ThreadService::with_policy(store, bus.clone(), policy),
            bus,
            lock_timeout: None,
        }
    }

    /// Bound how long [`Coordinator::acquire`] waits for a busy conversation.
    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Open the thread database named by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = SqliteThreadStore::open(&config.thread_db_path())?;
        Ok(Self::with_policy(Arc::new(store), config.compaction_policy())
            .with_lock_timeout(config.locks.default_timeout()))
    }

    /// Backed by an in-memory store; nothing survives the process.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Arc::new(SqliteThreadStore::open_in_memory()?)))
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn locks(&self) -> &ConversationLocks {
        &self.locks
    }

    pub fn ask_user(&self) -> &AskUserBridge {
        &self.ask_user
    }

    pub fn threads(&self) -> &ThreadService {
        &self.threads
    }

    /// Route an inbound message: start a turn if the conversation is idle,
    /// otherwise buffer the message for the running turn to pick up.
    pub fn admit(
        &self,
        conversation_id: &str,
        holder: &str,
        text: &str,
        channel: &str,
    ) -> Admission {
        match self.locks.try_acquire(conversation_id, holder) {
            Some(handle) => Admission::Run(handle),
            None => {
                let position = self.locks.enqueue_message(conversation_id, text, channel);
                debug!(conversation_id, channel, position, "message queued behind running turn");
                Admission::Queued(position)
            }
        }
    }

    /// Wait for the conversation, bounded by the configured lock timeout.
    pub async fn acquire(&self, conversation_id: &str, holder: &str) -> Result<LockHandle> {
        self.locks
            .acquire(conversation_id, holder, self.lock_timeout)
            .await
    }

    /// Messages that arrived while the turn held the lock. Call before
    /// releasing so nothing slips between the drain and the release.
    pub fn take_queued(&self, handle: &LockHandle) -> Vec<QueuedMessage> {
        self.locks.drain_queue(handle.conversation_id())
    }
}
