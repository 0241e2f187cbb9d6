//! Thread forest assembly from flat stored records.

use super::model::{ThreadKind, ThreadRecord, ThreadRef, ThreadStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Back-reference from a child to the thread it was forked from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkSource {
    pub thread_id: String,
    pub display_name: Option<String>,
    pub topic: Option<String>,
}

/// A thread with its children attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadTreeNode {
    pub id: String,
    pub topic: Option<String>,
    pub display_name: Option<String>,
    pub kind: ThreadKind,
    pub status: ThreadStatus,
    pub parent_thread_id: Option<String>,
    pub fork_point_event_id: Option<String>,
    pub refs: Vec<ThreadRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Most recently updated first.
    pub children: Vec<ThreadTreeNode>,
    /// Present on every node that is not a root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fork_source: Option<ForkSource>,
}

impl ThreadTreeNode {
    /// Number of threads in this subtree, this one included.
    pub fn subtree_size(&self) -> usize {
        1 + self.children.iter().map(ThreadTreeNode::subtree_size).sum::<usize>()
    }
}

fn recency(a: &ThreadRecord, b: &ThreadRecord) -> Ordering {
    b.updated_at
        .cmp(&a.updated_at)
        .then_with(|| a.id.cmp(&b.id))
}

/// Ids of records whose parent chain loops back on itself.
fn cycle_members(by_id: &HashMap<&str, &ThreadRecord>) -> HashSet<String> {
    let mut members = HashSet::new();
    for record in by_id.values() {
        let mut seen = HashSet::new();
        let mut cursor = record.id.as_str();
        seen.insert(cursor);
        while let Some(parent) = by_id
            .get(cursor)
            .and_then(|r| r.parent_thread_id.as_deref())
            .filter(|p| by_id.contains_key(p))
        {
            if parent == record.id {
                members.insert(record.id.clone());
                break;
            }
            if !seen.insert(parent) {
                // Loops, but not through this record.
                break;
            }
            cursor = parent;
        }
    }
    members
}

/// Arrange flat records into a forest.
///
/// A record is a root when it has no parent, when its parent is not in
/// `records`, or when it sits on a parent cycle. Siblings (roots included)
/// are ordered by `updated_at` descending, then by id.
pub fn build_tree(records: &[ThreadRecord]) -> Vec<ThreadTreeNode> {
    let by_id: HashMap<&str, &ThreadRecord> =
        records.iter().map(|r| (r.id.as_str(), r)).collect();
    let cyclic = cycle_members(&by_id);

    let mut roots: Vec<&ThreadRecord> = Vec::new();
    let mut children: HashMap<&str, Vec<&ThreadRecord>> = HashMap::new();

    for &record in by_id.values() {
        let parent = record
            .parent_thread_id
            .as_deref()
            .filter(|p| by_id.contains_key(p) && !cyclic.contains(&record.id));
        match parent {
            Some(parent) => children.entry(parent).or_default().push(record),
            None => roots.push(record),
        }
    }

    roots.sort_by(|a, b| recency(a, b));
    for siblings in children.values_mut() {
        siblings.sort_by(|a, b| recency(a, b));
    }

    roots
        .into_iter()
        .map(|root| attach(root, None, &children))
        .collect()
}

fn attach(
    record: &ThreadRecord,
    parent: Option<&ThreadRecord>,
    children: &HashMap<&str, Vec<&ThreadRecord>>,
) -> ThreadTreeNode {
    let kids = children
        .get(record.id.as_str())
        .map(|kids| {
            kids.iter()
                .map(|child| attach(child, Some(record), children))
                .collect()
        })
        .unwrap_or_default();

    ThreadTreeNode {
        id: record.id.clone(),
        topic: record.topic.clone(),
        display_name: record.display_name.clone(),
        kind: record.kind,
        status: record.status,
        parent_thread_id: record.parent_thread_id.clone(),
        fork_point_event_id: record.fork_point_event_id.clone(),
        refs: record.refs.clone(),
        created_at: record.created_at,
        updated_at: record.updated_at,
        children: kids,
        fork_source: parent.map(|p| ForkSource {
            thread_id: p.id.clone(),
            display_name: p.display_name.clone(),
            topic: p.topic.clone(),
        }),
    }
}
