//! Terminal collaborator implementations: the observer and outbound sink
//! `main` hands to `Core::new`, shared between the one-shot and REPL paths.

use conduit_core::events::{ChatId, CoreEvent, Observer, OutboundSink, ReplyPayload};

/// Logs every lifecycle event via `tracing` instead of broadcasting it.
pub struct StdoutObserver;

impl Observer for StdoutObserver {
    fn on_event(&self, event: CoreEvent) {
        match event {
            CoreEvent::JobQueued { id, position } => {
                tracing::debug!(%id, position, "job queued");
            }
            CoreEvent::JobStarted { id } => {
                tracing::debug!(%id, "job started");
            }
            CoreEvent::JobFinished { id, ok, elapsed, .. } => {
                tracing::info!(%id, ok, elapsed_ms = elapsed.as_millis() as u64, "job finished");
            }
            CoreEvent::SessionRespawned { name } => {
                tracing::info!(session = %name, "session respawned");
            }
            CoreEvent::SessionDead { name, reason } => {
                tracing::warn!(session = %name, reason = %reason, "session dead");
            }
            CoreEvent::QueueCapacityExceeded => {
                tracing::warn!("queue capacity exceeded");
            }
        }
    }
}

/// Prints every reply directly to stdout. There is exactly one local
/// operator, so `chat_id` is not used to route anywhere — it is printed for
/// parity with the Telegram transport's multi-chat output.
pub struct StdoutOutboundSink;

#[async_trait::async_trait]
impl OutboundSink for StdoutOutboundSink {
    async fn send(&self, chat_id: ChatId, payload: ReplyPayload) {
        match payload {
            ReplyPayload::Inline(text) => {
                println!("[{chat_id}] {text}");
            }
            ReplyPayload::File { filename, markdown } => {
                println!("[{chat_id}] <{filename}>");
                println!("{markdown}");
            }
        }
    }
}
