//! Fork helpers: which history a new thread inherits, and what it is called.

use super::model::ThreadEvent;
use crate::error::{CoreError, Result};

/// Events from `source_events` that a fork at `fork_point_id` inherits.
///
/// That is every event created no later than the fork point, in the order
/// given. The fork point must be one of `source_events`.
pub fn events_to_fork(source_events: &[ThreadEvent], fork_point_id: &str) -> Result<Vec<ThreadEvent>> {
    let fork_point = source_events
        .iter()
        .find(|e| e.id == fork_point_id)
        .ok_or_else(|| CoreError::EventNotInThread {
            event_id: fork_point_id.to_string(),
            thread_id: source_events
                .first()
                .map(|e| e.thread_id.clone())
                .unwrap_or_default(),
        })?;

    Ok(source_events
        .iter()
        .filter(|e| e.created_at <= fork_point.created_at)
        .cloned()
        .collect())
}

/// Topic for a forked thread.
pub fn fork_topic(source_topic: Option<&str>, explicit: Option<&str>) -> Option<String> {
    match (explicit, source_topic) {
        (Some(topic), _) => Some(topic.to_string()),
        (None, Some(topic)) => Some(format!("Fork of: {topic}")),
        (None, None) => None,
    }
}
