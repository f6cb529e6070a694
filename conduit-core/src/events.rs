//! Observer and outbound-delivery collaborator traits.
//!
//! A single observer interface is handed to every component at
//! construction, replacing a process-wide broadcast bus. Callbacks run
//! synchronously from the component that produced the event and must not
//! block — a slow sink should buffer internally.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

/// Opaque transport chat identifier. Used only for outbound routing and
/// as the ordering key for per-chat FIFO (I7).
pub type ChatId = i64;

/// Lifecycle events emitted by the queue and session layers.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    JobQueued {
        id: Uuid,
        position: usize,
    },
    JobStarted {
        id: Uuid,
    },
    JobFinished {
        id: Uuid,
        ok: bool,
        elapsed: Duration,
        reply_ref: Option<String>,
    },
    SessionRespawned {
        name: String,
    },
    SessionDead {
        name: String,
        reason: String,
    },
    QueueCapacityExceeded,
}

/// A single observer receiving every `CoreEvent`. Implementations must not
/// block; offload slow work behind a channel.
pub trait Observer: Send + Sync {
    fn on_event(&self, event: CoreEvent);
}

/// An observer that drops every event, for components assembled without an
/// interested collaborator (e.g. tests, or `conduit-cli` when quiet).
pub struct NullObserver;

impl Observer for NullObserver {
    fn on_event(&self, _event: CoreEvent) {}
}

/// A reply ready for outbound delivery: either inline text (within the
/// configured length) or a Markdown file artifact.
#[derive(Debug, Clone)]
pub enum ReplyPayload {
    Inline(String),
    File { filename: String, markdown: String },
}

/// Outbound delivery collaborator. `conduit-telegram` implements this over
/// teloxide; `conduit-cli` implements it by printing to stdout.
#[async_trait]
pub trait OutboundSink: Send + Sync {
    async fn send(&self, chat_id: ChatId, payload: ReplyPayload);
}
