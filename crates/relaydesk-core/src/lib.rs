// ── relaydesk core library ──────────────────────────────────────────────────
//
// Coordination for a multi-channel agent assistant: one turn per
// conversation, blocking ask-user round trips, ordered event fan-out, and a
// forkable, compactable thread tree. The gateway exposes all of it over
// HTTP and WebSocket.

pub mod args;
pub mod ask_user;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod gateway;
pub mod lock;
pub mod logging;
pub mod store;
pub mod threads;

pub use coordinator::{Admission, Coordinator};
pub use error::{CoreError, Result};
pub use events::{AgentEvent, EventBus, Subscription};
