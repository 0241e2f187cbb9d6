//! Conversation threads as a forkable, compactable tree.
//!
//! Threads are stored flat with a parent link and assembled into a forest on
//! read. A fork copies the parent's history up to a chosen event into the
//! child. Compaction replaces old history with a summary event once a
//! thread grows past its policy threshold.

mod compaction;
mod fork;
mod model;
mod service;
mod tree;

pub use compaction::*;
pub use fork::*;
pub use model::*;
pub use service::*;
pub use tree::*;
