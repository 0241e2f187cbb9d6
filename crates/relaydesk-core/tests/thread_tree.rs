//! Fork and compaction through the service, against a real SQLite file.

use relaydesk_core::Coordinator;
use relaydesk_core::config::Config;
use relaydesk_core::threads::{
    ContextRole, EventKind, SpawnOptions, ThreadKind, ThreadStatus, TranscriptSummarizer,
};

fn chat(coordinator: &Coordinator, thread_id: &str, range: std::ops::Range<usize>) {
    for i in range {
        let kind = if i % 2 == 0 {
            EventKind::UserMessage
        } else {
            EventKind::AssistantMessage
        };
        coordinator
            .threads()
            .append_event(thread_id, kind, format!("message {i}"))
            .unwrap();
    }
}

#[tokio::test]
async fn test_fork_and_compact_round_trip() {
    let coordinator = Coordinator::in_memory().unwrap();
    let threads = coordinator.threads();
    let root = threads
        .create_thread(ThreadKind::Chat, Some("planning".into()), Some("Main".into()))
        .unwrap();
    chat(&coordinator, &root.id, 0..25);

    // Fork at the tenth event: the child sees exactly the first ten.
    let tenth = threads.events(&root.id).unwrap()[9].clone();
    let mut options = SpawnOptions::new("early branch");
    options.fork_point_event_id = Some(tenth.id.clone());
    let early = threads.spawn_sub_thread(&root.id, options).unwrap();
    let early_events = threads.events(&early.id).unwrap();
    assert_eq!(early_events.len(), 10);
    assert_eq!(early_events.last().unwrap().content, "message 9");
    assert!(early_events.iter().all(|e| e.thread_id == early.id));

    // Compaction on the root leaves one summary plus the five most recent.
    let summary = threads
        .compact(&root.id, &TranscriptSummarizer::default())
        .await
        .unwrap()
        .expect("25 events is past the threshold");
    assert_eq!(summary.summarized_count, Some(20));
    let root_events = threads.events(&root.id).unwrap();
    assert_eq!(root_events.len(), 6);
    assert_eq!(root_events[0].kind, EventKind::Summary);
    assert_eq!(root_events[1].content, "message 20");

    // The fork made earlier is unaffected.
    assert_eq!(threads.events(&early.id).unwrap().len(), 10);

    // A fork after compaction inherits the summary, and compacting it again
    // counts through the nested summary.
    let late = threads
        .spawn_sub_thread(&root.id, SpawnOptions::new("late branch"))
        .unwrap();
    chat(&coordinator, &late.id, 100..116);
    assert_eq!(threads.events(&late.id).unwrap().len(), 22);
    let nested = threads
        .compact(&late.id, &TranscriptSummarizer::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(nested.summarized_count, Some(36));

    let context = threads.context_for(&late.id).unwrap();
    assert_eq!(context.len(), 6);
    assert_eq!(context[0].role, ContextRole::System);
    assert!(context[0].content.starts_with("[Summary of 36 earlier events]"));

    // Both forks hang off the root, most recently updated first.
    let tree = threads.tree().unwrap();
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].subtree_size(), 3);
    let children: Vec<&str> = tree[0].children.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(children, [late.id.as_str(), early.id.as_str()]);
}

#[tokio::test]
async fn test_threads_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::default().with_settings_dir(dir.path());

    let (root_id, child_id) = {
        let coordinator = Coordinator::from_config(&config).unwrap();
        let threads = coordinator.threads();
        let root = threads
            .create_thread(ThreadKind::Task, Some("nightly".into()), None)
            .unwrap();
        chat(&coordinator, &root.id, 0..3);
        let child = threads
            .spawn_sub_thread(&root.id, SpawnOptions::new("retry"))
            .unwrap();
        threads.set_status(&root.id, ThreadStatus::Paused).unwrap();
        (root.id, child.id)
    };

    let coordinator = Coordinator::from_config(&config).unwrap();
    let threads = coordinator.threads();
    let root = threads.get_thread(&root_id).unwrap().unwrap();
    assert_eq!(root.status, ThreadStatus::Paused);
    assert_eq!(root.kind, ThreadKind::Task);

    let child = threads.get_thread(&child_id).unwrap().unwrap();
    assert_eq!(child.parent_thread_id.as_deref(), Some(root_id.as_str()));
    assert_eq!(child.kind, ThreadKind::Task);
    let inherited: Vec<String> = threads
        .events(&child_id)
        .unwrap()
        .into_iter()
        .map(|e| e.content)
        .collect();
    assert_eq!(inherited, ["message 0", "message 1", "message 2"]);
}
