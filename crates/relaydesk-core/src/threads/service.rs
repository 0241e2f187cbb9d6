//! Thread service: thread lifecycle over a [`ThreadStore`], announcing
//! changes on the event bus.

use super::compaction::{CompactionPolicy, Summarizer, assemble_context};
use super::fork::{events_to_fork, fork_topic};
use super::model::{
    ContextMessage, EventKind, SpawnOptions, ThreadEvent, ThreadKind, ThreadRecord, ThreadStatus,
    now,
};
use super::tree::{ThreadTreeNode, build_tree};
use crate::error::{CoreError, Result};
use crate::events::{AgentEvent, EventBus};
use crate::store::ThreadStore;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Creates, forks, compacts and reads threads.
#[derive(Clone)]
pub struct ThreadService {
    store: Arc<dyn ThreadStore>,
    bus: EventBus,
    policy: CompactionPolicy,
}

impl ThreadService {
    pub fn new(store: Arc<dyn ThreadStore>, bus: EventBus) -> Self {
        Self::with_policy(store, bus, CompactionPolicy::default())
    }

    pub fn with_policy(store: Arc<dyn ThreadStore>, bus: EventBus, policy: CompactionPolicy) -> Self {
        Self { store, bus, policy }
    }

    pub fn policy(&self) -> CompactionPolicy {
        self.policy
    }

    // ── Thread Creation ─────────────────────────────────────────────────────

    /// Create a root thread.
    #[instrument(skip(self))]
    pub fn create_thread(
        &self,
        kind: ThreadKind,
        topic: Option<String>,
        display_name: Option<String>,
    ) -> Result<ThreadRecord> {
        let mut thread = ThreadRecord::new(kind);
        thread.topic = topic;
        thread.display_name = display_name;
        self.store.insert_thread(&thread)?;
        debug!(thread_id = %thread.id, "thread created");
        Ok(thread)
    }

    /// Fork `parent_id` into a new child thread.
    ///
    /// The child inherits the parent's history up to the fork point (the
    /// requested event, or the parent's latest one) as fresh copies.
    #[instrument(skip(self, options), fields(display_name = %options.display_name))]
    pub fn spawn_sub_thread(&self, parent_id: &str, options: SpawnOptions) -> Result<ThreadRecord> {
        let parent = self.require_thread(parent_id)?;
        let parent_events = self.store.list_events(parent_id)?;

        let (fork_point, inherited) = match options.fork_point_event_id.as_deref() {
            Some(event_id) => (
                Some(event_id.to_string()),
                events_to_fork(&parent_events, event_id).map_err(|_| {
                    CoreError::EventNotInThread {
                        event_id: event_id.to_string(),
                        thread_id: parent_id.to_string(),
                    }
                })?,
            ),
            None => (parent_events.last().map(|e| e.id.clone()), parent_events),
        };

        let mut child = ThreadRecord::new(options.kind.unwrap_or(parent.kind));
        child.topic = fork_topic(parent.topic.as_deref(), options.topic.as_deref());
        child.display_name = Some(options.display_name);
        child.parent_thread_id = Some(parent.id.clone());
        child.fork_point_event_id = fork_point;
        child.refs.extend(options.link_ref);
        self.store.insert_thread(&child)?;

        for event in &inherited {
            self.store.append_event(&event.inherit_into(&child.id))?;
        }
        if let Some(context) = options.initial_context.filter(|c| !c.trim().is_empty()) {
            self.store
                .append_event(&ThreadEvent::new(&child.id, EventKind::System, context))?;
        }
        self.store.touch(&parent.id, now())?;

        info!(
            parent = %parent.id,
            child = %child.id,
            inherited = inherited.len(),
            "sub-thread spawned"
        );
        self.announce(&parent.id);
        self.announce(&child.id);
        Ok(child)
    }

    // ── Thread Updates ──────────────────────────────────────────────────────

    /// Move a thread to `status`, enforcing the transition table.
    #[instrument(skip(self))]
    pub fn set_status(&self, thread_id: &str, status: ThreadStatus) -> Result<ThreadRecord> {
        let mut thread = self.require_thread(thread_id)?;
        thread.status = thread.status.transition_to(status)?;
        thread.updated_at = now();
        self.store
            .update_status(thread_id, thread.status, thread.updated_at)?;
        self.announce(thread_id);
        Ok(thread)
    }

    /// Record a history entry and bump the thread's `updated_at`.
    pub fn append_event(
        &self,
        thread_id: &str,
        kind: EventKind,
        content: impl Into<String>,
    ) -> Result<ThreadEvent> {
        self.require_thread(thread_id)?;
        let event = self
            .store
            .append_event(&ThreadEvent::new(thread_id, kind, content))?;
        self.store.touch(thread_id, event.created_at)?;
        Ok(event)
    }

    /// Fold old history into one summary event when the thread is past the
    /// policy threshold. Returns the new summary, or `None` if the thread
    /// did not need compacting.
    #[instrument(skip(self, summarizer))]
    pub async fn compact(
        &self,
        thread_id: &str,
        summarizer: &dyn Summarizer,
    ) -> Result<Option<ThreadEvent>> {
        self.require_thread(thread_id)?;
        let events = self.store.list_events(thread_id)?;
        let Some(plan) = self.policy.plan(&events) else {
            debug!(thread_id, events = events.len(), "below compaction threshold");
            return Ok(None);
        };

        let text = summarizer.summarize(plan.condensed).await?;
        let mut summary = ThreadEvent::summary(thread_id, text, plan.summarized_count());
        // Sort where the condensed run used to be.
        if let Some(last) = plan.condensed.last() {
            summary.created_at = last.created_at;
        }

        let replaced: Vec<String> = plan.condensed.iter().map(|e| e.id.clone()).collect();
        let stored = self
            .store
            .replace_with_summary(thread_id, &replaced, &summary)?;
        self.store.touch(thread_id, now())?;

        info!(
            thread_id,
            condensed = replaced.len(),
            retained = plan.retained.len(),
            summarized = plan.summarized_count(),
            "thread compacted"
        );
        self.announce(thread_id);
        Ok(Some(stored))
    }

    // ── Thread Access ───────────────────────────────────────────────────────

    pub fn get_thread(&self, thread_id: &str) -> Result<Option<ThreadRecord>> {
        self.store.get_thread(thread_id)
    }

    pub fn events(&self, thread_id: &str) -> Result<Vec<ThreadEvent>> {
        self.require_thread(thread_id)?;
        self.store.list_events(thread_id)
    }

    /// Every stored thread, arranged as a forest.
    pub fn tree(&self) -> Result<Vec<ThreadTreeNode>> {
        Ok(build_tree(&self.store.list_threads()?))
    }

    /// Messages to hand the model for `thread_id`.
    pub fn context_for(&self, thread_id: &str) -> Result<Vec<ContextMessage>> {
        Ok(assemble_context(&self.events(thread_id)?))
    }

    // ── Internal ────────────────────────────────────────────────────────────

    fn require_thread(&self, thread_id: &str) -> Result<ThreadRecord> {
        self.store
            .get_thread(thread_id)?
            .ok_or_else(|| CoreError::ThreadNotFound(thread_id.to_string()))
    }

    fn announce(&self, thread_id: &str) {
        self.bus.emit(AgentEvent::ConversationUpdated {
            conversation_id: thread_id.to_string(),
        });
    }
}
