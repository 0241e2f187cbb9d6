//! Per-conversation locks with FIFO hand-off, plus inbound message buffering.
//!
//! Exactly one agent turn may run per conversation. Callers that find the
//! conversation busy either queue behind the holder ([`ConversationLocks::acquire`])
//! or buffer their text ([`ConversationLocks::enqueue_message`]) for the next
//! holder to drain.
//!
//! Registry state sits behind a plain mutex that is only held for map edits,
//! never across an `.await`. Grants are delivered to waiters through
//! one-shot channels, so a release hands the lock straight to the head of the
//! queue without any polling.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{CoreError, Result};

/// Snapshot of a held lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    pub conversation_id: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// A message buffered while its conversation was busy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    pub text: String,
    pub channel: String,
    pub enqueued_at: DateTime<Utc>,
}

struct Holder {
    token: u64,
    label: String,
    acquired_at: DateTime<Utc>,
    since: Instant,
}

impl Holder {
    fn new(token: u64, label: String) -> Self {
        Self {
            token,
            label,
            acquired_at: Utc::now(),
            since: Instant::now(),
        }
    }

    fn info(&self, conversation_id: &str) -> LockInfo {
        LockInfo {
            conversation_id: conversation_id.to_string(),
            holder: self.label.clone(),
            acquired_at: self.acquired_at,
            duration_ms: self.since.elapsed().as_millis() as u64,
        }
    }
}

struct Waiter {
    token: u64,
    label: String,
    grant: oneshot::Sender<()>,
}

#[derive(Default)]
struct LockState {
    holder: Option<Holder>,
    waiters: VecDeque<Waiter>,
}

impl LockState {
    fn is_idle(&self) -> bool {
        self.holder.is_none() && self.waiters.is_empty()
    }

    /// Hand the lock to the first waiter that is still listening.
    fn promote_next(&mut self, conversation_id: &str) {
        while let Some(Waiter { token, label, grant }) = self.waiters.pop_front() {
            self.holder = Some(Holder::new(token, label));
            if grant.send(()).is_ok() {
                debug!(conversation_id, token, "conversation lock handed off");
                return;
            }
            debug!(conversation_id, token, "skipping abandoned waiter");
            self.holder = None;
        }
    }
}

struct LocksInner {
    locks: Mutex<HashMap<String, LockState>>,
    queues: Mutex<HashMap<String, Vec<QueuedMessage>>>,
    next_token: AtomicU64,
}

impl LocksInner {
    fn token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    /// Release `token` if it is still the holder; returns whether it was.
    fn release(&self, conversation_id: &str, token: u64) -> bool {
        let mut locks = self.locks.lock();
        let Some(state) = locks.get_mut(conversation_id) else {
            return false;
        };
        if state.holder.as_ref().map(|h| h.token) != Some(token) {
            return false;
        }
        state.holder = None;
        state.promote_next(conversation_id);
        if state.is_idle() {
            locks.remove(conversation_id);
        }
        true
    }

    /// Drop a waiter that gave up. Returns `true` if it was still queued.
    fn withdraw(&self, conversation_id: &str, token: u64) -> bool {
        let mut locks = self.locks.lock();
        let Some(state) = locks.get_mut(conversation_id) else {
            return false;
        };
        let before = state.waiters.len();
        state.waiters.retain(|w| w.token != token);
        let withdrawn = state.waiters.len() != before;
        if state.is_idle() {
            locks.remove(conversation_id);
        }
        withdrawn
    }

    fn holds(&self, conversation_id: &str, token: u64) -> bool {
        self.locks
            .lock()
            .get(conversation_id)
            .and_then(|s| s.holder.as_ref())
            .is_some_and(|h| h.token == token)
    }
}

/// Registry of conversation locks and message queues.
///
/// Cloning shares the registry.
#[derive(Clone)]
pub struct ConversationLocks {
    inner: Arc<LocksInner>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LocksInner {
                locks: Mutex::new(HashMap::new()),
                queues: Mutex::new(HashMap::new()),
                next_token: AtomicU64::new(1),
            }),
        }
    }

    /// Acquire the lock for `conversation_id`, waiting in FIFO order behind
    /// the current holder. With `timeout`, gives up after that long with
    /// [`CoreError::LockTimeout`] and leaves no trace in the queue.
    pub async fn acquire(
        &self,
        conversation_id: &str,
        holder: &str,
        timeout: Option<Duration>,
    ) -> Result<LockHandle> {
        let (token, mut granted) = {
            let mut locks = self.inner.locks.lock();
            let state = locks.entry(conversation_id.to_string()).or_default();
            let token = self.inner.token();
            if state.holder.is_none() && state.waiters.is_empty() {
                state.holder = Some(Holder::new(token, holder.to_string()));
                debug!(conversation_id, holder, "conversation lock acquired");
                return Ok(self.handle(conversation_id, holder, token));
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(Waiter {
                token,
                label: holder.to_string(),
                grant: tx,
            });
            debug!(
                conversation_id,
                holder,
                position = state.waiters.len(),
                "waiting for conversation lock"
            );
            (token, rx)
        };

        let mut pending = PendingWaiter {
            inner: &self.inner,
            conversation_id,
            token,
            settled: false,
        };
        let started = Instant::now();

        let outcome = match timeout {
            Some(limit) => tokio::time::timeout(limit, &mut granted).await.ok(),
            None => Some((&mut granted).await),
        };

        match outcome {
            Some(Ok(())) => {}
            // Grants are sent before the waiter leaves the queue, so a sender
            // dropped unsent means the waiter was removed without a grant.
            Some(Err(_)) if !self.inner.holds(conversation_id, token) => {
                pending.settled = true;
                warn!(conversation_id, holder, "conversation lock wait aborted");
                return Err(CoreError::LockWaitAborted {
                    conversation_id: conversation_id.to_string(),
                });
            }
            Some(Err(_)) => {}
            None => {
                if self.inner.withdraw(conversation_id, token) {
                    pending.settled = true;
                    debug!(conversation_id, holder, "conversation lock wait timed out");
                    return Err(CoreError::LockTimeout {
                        conversation_id: conversation_id.to_string(),
                        waited_ms: started.elapsed().as_millis() as u64,
                    });
                }
                // Granted in the same instant the deadline fired: keep it.
            }
        }

        pending.settled = true;
        debug!(
            conversation_id,
            holder,
            waited_ms = started.elapsed().as_millis() as u64,
            "conversation lock acquired after wait"
        );
        Ok(self.handle(conversation_id, holder, token))
    }

    /// Take the lock only if nobody holds it.
    pub fn try_acquire(&self, conversation_id: &str, holder: &str) -> Option<LockHandle> {
        let mut locks = self.inner.locks.lock();
        let state = locks.entry(conversation_id.to_string()).or_default();
        if state.holder.is_some() || !state.waiters.is_empty() {
            return None;
        }
        let token = self.inner.token();
        state.holder = Some(Holder::new(token, holder.to_string()));
        debug!(conversation_id, holder, "conversation lock acquired");
        Some(self.handle(conversation_id, holder, token))
    }

    fn handle(&self, conversation_id: &str, holder: &str, token: u64) -> LockHandle {
        LockHandle {
            inner: self.inner.clone(),
            conversation_id: conversation_id.to_string(),
            holder: holder.to_string(),
            token,
            released: AtomicBool::new(false),
        }
    }

    pub fn is_locked(&self, conversation_id: &str) -> bool {
        self.inner
            .locks
            .lock()
            .get(conversation_id)
            .is_some_and(|s| s.holder.is_some())
    }

    pub fn lock_info(&self, conversation_id: &str) -> Option<LockInfo> {
        self.inner
            .locks
            .lock()
            .get(conversation_id)
            .and_then(|s| s.holder.as_ref())
            .map(|h| h.info(conversation_id))
    }

    /// Ids of every conversation that currently has a holder, sorted.
    pub fn locked_conversations(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .locks
            .lock()
            .iter()
            .filter(|(_, s)| s.holder.is_some())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn waiter_count(&self, conversation_id: &str) -> usize {
        self.inner
            .locks
            .lock()
            .get(conversation_id)
            .map_or(0, |s| s.waiters.len())
    }

    /// Holders that have held their lock for longer than `max_hold`.
    pub fn stale_holders(&self, max_hold: Duration) -> Vec<LockInfo> {
        let mut stale: Vec<LockInfo> = self
            .inner
            .locks
            .lock()
            .iter()
            .filter_map(|(id, s)| s.holder.as_ref().map(|h| (id, h)))
            .filter(|(_, h)| h.since.elapsed() > max_hold)
            .map(|(id, h)| h.info(id))
            .collect();
        stale.sort_by(|a, b| a.conversation_id.cmp(&b.conversation_id));
        stale
    }

    /// Release the current holder regardless of who it is and promote the
    /// next waiter. Returns `false` if nothing was held.
    pub fn force_release(&self, conversation_id: &str) -> bool {
        let mut locks = self.inner.locks.lock();
        let Some(state) = locks.get_mut(conversation_id) else {
            return false;
        };
        let Some(previous) = state.holder.take() else {
            return false;
        };
        warn!(
            conversation_id,
            holder = %previous.label,
            held_ms = previous.since.elapsed().as_millis() as u64,
            "force-releasing conversation lock"
        );
        state.promote_next(conversation_id);
        if state.is_idle() {
            locks.remove(conversation_id);
        }
        true
    }

    /// Force-release every holder older than `max_hold` in one pass, so a
    /// holder that changed in the meantime is never the one released.
    /// Returns what was released.
    pub fn release_stale(&self, max_hold: Duration) -> Vec<LockInfo> {
        let mut locks = self.inner.locks.lock();
        let mut released = Vec::new();
        for (conversation_id, state) in locks.iter_mut() {
            let stale = state
                .holder
                .as_ref()
                .is_some_and(|h| h.since.elapsed() > max_hold);
            if !stale {
                continue;
            }
            if let Some(previous) = state.holder.take() {
                warn!(
                    conversation_id = %conversation_id,
                    holder = %previous.label,
                    held_ms = previous.since.elapsed().as_millis() as u64,
                    "releasing stale conversation lock"
                );
                released.push(previous.info(conversation_id));
            }
            state.promote_next(conversation_id);
        }
        locks.retain(|_, state| !state.is_idle());
        released.sort_by(|a, b| a.conversation_id.cmp(&b.conversation_id));
        released
    }

    // ── Message queue ───────────────────────────────────────────────────────

    /// Buffer an inbound message. Returns the new queue length.
    pub fn enqueue_message(
        &self,
        conversation_id: &str,
        text: impl Into<String>,
        channel: impl Into<String>,
    ) -> usize {
        let mut queues = self.inner.queues.lock();
        let queue = queues.entry(conversation_id.to_string()).or_default();
        queue.push(QueuedMessage {
            text: text.into(),
            channel: channel.into(),
            enqueued_at: Utc::now(),
        });
        queue.len()
    }

    /// Take every buffered message, oldest first, leaving the queue empty.
    pub fn drain_queue(&self, conversation_id: &str) -> Vec<QueuedMessage> {
        self.inner
            .queues
            .lock()
            .remove(conversation_id)
            .unwrap_or_default()
    }

    pub fn queue_size(&self, conversation_id: &str) -> usize {
        self.inner
            .queues
            .lock()
            .get(conversation_id)
            .map_or(0, Vec::len)
    }
}

impl Default for ConversationLocks {
    fn default() -> Self {
        Self::new()
    }
}

/// Cleans up after an `acquire` future that is dropped before it settles.
struct PendingWaiter<'a> {
    inner: &'a LocksInner,
    conversation_id: &'a str,
    token: u64,
    settled: bool,
}

impl Drop for PendingWaiter<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        // Still queued: just leave. Already granted: pass the lock on.
        if !self.inner.withdraw(self.conversation_id, self.token) {
            self.inner.release(self.conversation_id, self.token);
        }
    }
}

/// Ownership of a conversation lock. Released by [`LockHandle::release`] or
/// on drop, whichever comes first.
#[must_use = "dropping a LockHandle releases the conversation lock"]
pub struct LockHandle {
    inner: Arc<LocksInner>,
    conversation_id: String,
    holder: String,
    token: u64,
    released: AtomicBool,
}

impl LockHandle {
    /// Release the lock. Safe to call any number of times; after a
    /// `force_release` it never touches the new holder.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.inner.release(&self.conversation_id, self.token) {
            debug!(
                conversation_id = %self.conversation_id,
                holder = %self.holder,
                "conversation lock released"
            );
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Whether this handle is still the live holder.
    pub fn is_held(&self) -> bool {
        !self.released.load(Ordering::Acquire) && self.inner.holds(&self.conversation_id, self.token)
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("conversation_id", &self.conversation_id)
            .field("holder", &self.holder)
            .field("token", &self.token)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tokio::time::{sleep, timeout};

    async fn wait_for_waiters(locks: &ConversationLocks, id: &str, n: usize) {
        for _ in 0..200 {
            if locks.waiter_count(id) >= n {
                return;
            }
            sleep(Duration::from_millis(2)).await;
        }
        panic!("waiters never reached {n}");
    }

    #[tokio::test]
    async fn test_second_acquire_waits_for_release() {
        let locks = ConversationLocks::new();
        let first = locks.acquire("c1", "first", None).await.unwrap();
        assert!(locks.is_locked("c1"));

        let locks_clone = locks.clone();
        let second = tokio::spawn(async move { locks_clone.acquire("c1", "second", None).await });
        wait_for_waiters(&locks, "c1", 1).await;

        sleep(Duration::from_millis(30)).await;
        assert!(!second.is_finished());
        assert_eq!(locks.lock_info("c1").unwrap().holder, "first");

        first.release();
        let handle = timeout(Duration::from_secs(1), second).await.unwrap().unwrap().unwrap();
        assert_eq!(handle.holder(), "second");
        assert_eq!(locks.lock_info("c1").unwrap().holder, "second");
    }

    #[tokio::test]
    async fn test_waiters_granted_in_fifo_order() {
        let locks = ConversationLocks::new();
        let order = Arc::new(StdMutex::new(Vec::new()));
        let holder = locks.acquire("c1", "holder", None).await.unwrap();

        let mut tasks = Vec::new();
        for (i, name) in ["w1", "w2", "w3", "w4"].into_iter().enumerate() {
            let locks_clone = locks.clone();
            let order_clone = order.clone();
            tasks.push(tokio::spawn(async move {
                let handle = locks_clone.acquire("c1", name, None).await.unwrap();
                order_clone.lock().unwrap().push(name);
                sleep(Duration::from_millis(5)).await;
                handle.release();
            }));
            wait_for_waiters(&locks, "c1", i + 1).await;
        }

        holder.release();
        for task in tasks {
            timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec!["w1", "w2", "w3", "w4"]);
        assert!(!locks.is_locked("c1"));
        assert!(locks.locked_conversations().is_empty());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let locks = ConversationLocks::new();
        let a = locks.acquire("c1", "a", None).await.unwrap();

        let (l1, l2) = (locks.clone(), locks.clone());
        let b = tokio::spawn(async move { l1.acquire("c1", "b", None).await });
        wait_for_waiters(&locks, "c1", 1).await;
        let c = tokio::spawn(async move { l2.acquire("c1", "c", None).await });
        wait_for_waiters(&locks, "c1", 2).await;

        a.release();
        a.release();
        drop(a);

        let b_handle = timeout(Duration::from_secs(1), b).await.unwrap().unwrap().unwrap();
        assert_eq!(locks.lock_info("c1").unwrap().holder, "b");
        assert_eq!(locks.waiter_count("c1"), 1);
        sleep(Duration::from_millis(20)).await;
        assert!(!c.is_finished());

        b_handle.release();
        let c_handle = timeout(Duration::from_secs(1), c).await.unwrap().unwrap().unwrap();
        assert_eq!(c_handle.holder(), "c");
    }

    #[tokio::test]
    async fn test_try_acquire() {
        let locks = ConversationLocks::new();
        let held = locks.try_acquire("c1", "a").expect("free lock is granted");
        assert!(locks.try_acquire("c1", "b").is_none());
        assert!(held.is_held());

        let err = locks
            .acquire("c1", "c", Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::LockTimeout { .. }));

        held.release();
        assert!(!held.is_held());
        assert!(locks.try_acquire("c1", "d").is_some());
    }

    #[tokio::test]
    async fn test_timeout_shorter_than_hold_fails_and_leaves_queue() {
        let locks = ConversationLocks::new();
        let holder = locks.acquire("c1", "holder", None).await.unwrap();

        let err = locks
            .acquire("c1", "impatient", Some(Duration::from_millis(30)))
            .await
            .unwrap_err();
        match err {
            CoreError::LockTimeout { conversation_id, waited_ms } => {
                assert_eq!(conversation_id, "c1");
                assert!(waited_ms >= 25);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(locks.waiter_count("c1"), 0);

        holder.release();
        assert!(!locks.is_locked("c1"));
    }

    #[tokio::test]
    async fn test_timeout_longer_than_hold_succeeds() {
        let locks = ConversationLocks::new();
        let holder = locks.acquire("c1", "holder", None).await.unwrap();

        let locks_clone = locks.clone();
        let patient = tokio::spawn(async move {
            locks_clone
                .acquire("c1", "patient", Some(Duration::from_secs(2)))
                .await
        });
        wait_for_waiters(&locks, "c1", 1).await;
        sleep(Duration::from_millis(20)).await;
        holder.release();

        let handle = timeout(Duration::from_secs(3), patient).await.unwrap().unwrap().unwrap();
        assert_eq!(handle.holder(), "patient");
    }

    #[tokio::test]
    async fn test_force_release_promotes_waiter() {
        let locks = ConversationLocks::new();
        let stuck = locks.acquire("c1", "stuck", None).await.unwrap();

        let locks_clone = locks.clone();
        let waiter = tokio::spawn(async move { locks_clone.acquire("c1", "rescuer", None).await });
        wait_for_waiters(&locks, "c1", 1).await;

        assert!(locks.force_release("c1"));
        let handle = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap().unwrap();
        assert_eq!(handle.holder(), "rescuer");
        assert_eq!(locks.lock_info("c1").unwrap().holder, "rescuer");

        // The superseded handle must not free the new holder.
        assert!(!stuck.is_held());
        stuck.release();
        assert_eq!(locks.lock_info("c1").unwrap().holder, "rescuer");
    }

    #[test]
    fn test_force_release_absent_lock() {
        let locks = ConversationLocks::new();
        assert!(!locks.force_release("nobody"));
        let handle = locks.try_acquire("c1", "a").unwrap();
        handle.release();
        assert!(!locks.force_release("c1"));
    }

    #[tokio::test]
    async fn test_waiter_removed_without_grant_is_aborted_not_timed_out() {
        let locks = ConversationLocks::new();
        let holder = locks.acquire("c1", "holder", None).await.unwrap();

        let locks_clone = locks.clone();
        let waiter = tokio::spawn(async move { locks_clone.acquire("c1", "waiter", None).await });
        wait_for_waiters(&locks, "c1", 1).await;

        // Drop the queued grant sender without sending it.
        locks
            .inner
            .locks
            .lock()
            .get_mut("c1")
            .unwrap()
            .waiters
            .clear();

        let err = timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(
            matches!(err, CoreError::LockWaitAborted { ref conversation_id } if conversation_id == "c1"),
            "unexpected error: {err}"
        );
        assert!(holder.is_held());
        assert_eq!(locks.lock_info("c1").unwrap().holder, "holder");
    }

    #[tokio::test]
    async fn test_dropped_waiter_does_not_leak() {
        let locks = ConversationLocks::new();
        let holder = locks.acquire("c1", "holder", None).await.unwrap();

        let locks_clone = locks.clone();
        let abandoned = tokio::spawn(async move { locks_clone.acquire("c1", "gone", None).await });
        wait_for_waiters(&locks, "c1", 1).await;
        abandoned.abort();
        let _ = abandoned.await;

        assert_eq!(locks.waiter_count("c1"), 0);
        holder.release();
        assert!(!locks.is_locked("c1"));
        assert!(locks.try_acquire("c1", "next").is_some());
    }

    #[tokio::test]
    async fn test_lock_info_and_stale_holders() {
        let locks = ConversationLocks::new();
        assert!(locks.lock_info("c1").is_none());

        let _a = locks.acquire("c1", "agent-turn", None).await.unwrap();
        let _b = locks.acquire("c2", "other", None).await.unwrap();
        sleep(Duration::from_millis(20)).await;

        let info = locks.lock_info("c1").unwrap();
        assert_eq!(info.holder, "agent-turn");
        assert!(info.duration_ms >= 15);
        assert_eq!(locks.locked_conversations(), vec!["c1", "c2"]);

        let stale = locks.stale_holders(Duration::from_millis(10));
        assert_eq!(stale.len(), 2);
        assert!(locks.stale_holders(Duration::from_secs(60)).is_empty());
    }

    #[tokio::test]
    async fn test_release_stale_promotes_waiters() {
        let locks = ConversationLocks::new();
        let stuck = locks.acquire("c1", "stuck", None).await.unwrap();
        let locks_clone = locks.clone();
        let next = tokio::spawn(async move { locks_clone.acquire("c1", "next", None).await });
        wait_for_waiters(&locks, "c1", 1).await;
        sleep(Duration::from_millis(20)).await;

        assert!(locks.release_stale(Duration::from_secs(60)).is_empty());
        let released = locks.release_stale(Duration::from_millis(10));
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].holder, "stuck");

        let handle = timeout(Duration::from_secs(1), next).await.unwrap().unwrap().unwrap();
        assert_eq!(handle.holder(), "next");
        // Fresh holder is not stale yet.
        assert!(locks.release_stale(Duration::from_millis(10)).is_empty());
        assert!(!stuck.is_held());
    }

    #[test]
    fn test_message_queue_drain() {
        let locks = ConversationLocks::new();
        locks.enqueue_message("c1", "a", "web");
        assert_eq!(locks.enqueue_message("c1", "b", "tg"), 2);
        locks.enqueue_message("c2", "other", "web");

        let drained = locks.drain_queue("c1");
        let pairs: Vec<(&str, &str)> = drained
            .iter()
            .map(|m| (m.text.as_str(), m.channel.as_str()))
            .collect();
        assert_eq!(pairs, vec![("a", "web"), ("b", "tg")]);
        assert_eq!(locks.queue_size("c1"), 0);
        assert!(locks.drain_queue("c1").is_empty());
        assert_eq!(locks.queue_size("c2"), 1);
    }

    #[tokio::test]
    async fn test_queue_independent_of_lock() {
        let locks = ConversationLocks::new();
        let held = locks.acquire("c1", "turn", None).await.unwrap();
        locks.enqueue_message("c1", "while busy", "web");
        held.release();
        assert_eq!(locks.queue_size("c1"), 1);
        assert!(!locks.is_locked("c1"));
    }
}
