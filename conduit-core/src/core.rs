//! `Core` — the composition root that owns the `SessionManager`,
//! `MessageQueue` and `HistoryStore`, and exposes the single entry point
//! (`on_message`) a transport binding calls.
//!
//! Everything is owned by this explicit struct and passed by reference to
//! whatever transport binds it — `conduit-telegram` over teloxide,
//! `conduit-cli` directly from a terminal — rather than living behind
//! process-wide mutable state.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::errors::{HistoryError, ManagerError, McpInjectError, QueueError, SessionError};
use crate::events::{ChatId, Observer, OutboundSink};
use crate::history::{HistoryBackend, HistoryEntry, HistoryStore, NullHistoryBackend, SqliteHistoryBackend};
use crate::manager::{SessionListEntry, SessionManager};
use crate::mcp_inject::{McpConfigInjector, McpInjectionSpec, McpServerEntry};
use crate::queue::{JobPayload, MessageQueue, QueueJobSummary};
use crate::session::{Session, SessionSpawnConfig};
use crate::workdir::SessionDirectoryAllocator;

/// Errors that can abort startup. Only the default session's spawn failure
/// is fatal; MCP-injection and history-backend failures are logged as
/// warnings by `Core::new` and do not appear here.
#[derive(Debug, thiserror::Error)]
pub enum CoreStartupError {
    #[error("failed to create default session: {0}")]
    DefaultSessionSpawnFailed(#[from] ManagerError),
    #[error("failed to initialize history backend: {0}")]
    HistoryBackend(#[from] HistoryError),
}

/// The payload of an inbound message as delivered by a transport's
/// `OnMessage(chatID, userID, text | {imagePath, caption})` callback.
#[derive(Debug, Clone)]
pub enum InboundPayload {
    Text(String),
    Image { path: String, caption: String },
}

/// What `on_message` decided to do with an inbound message.
#[derive(Debug, Clone)]
pub enum OnMessageOutcome {
    /// Admitted and enqueued at this 1-based position.
    Enqueued { position: usize },
    /// `userID` was not on the allow-list; dropped silently.
    NotAllowed,
    /// The queue rejected the job (over capacity, or shutting down).
    Rejected(QueueError),
}

/// Owns every in-scope subsystem and is passed by reference to the
/// transport binding. No transport touches a `SessionManager` or
/// `MessageQueue` directly.
pub struct Core {
    pub manager: Arc<SessionManager>,
    pub queue: Arc<MessageQueue>,
    pub history: Arc<HistoryStore>,
    allowed_users: HashSet<u64>,
}

impl Core {
    /// Compose the whole system: inject the MCP config (best-effort),
    /// build the history store, create the default session, then start the
    /// message queue's dispatcher. Startup order: MCP config injection,
    /// then the history store, then the default session, then the queue.
    pub async fn new(
        config: &Config,
        observer: Arc<dyn Observer>,
        outbound: Arc<dyn OutboundSink>,
    ) -> Result<Arc<Self>, CoreStartupError> {
        if let Some(mcp) = &config.mcp {
            if let Err(e) = inject_mcp_config(mcp) {
                tracing::warn!(error = %e, "MCP config injection failed, continuing without it");
            }
        }

        let history_backend: Arc<dyn HistoryBackend> = match &config.history.database_url {
            Some(url) => match SqliteHistoryBackend::new(url).await {
                Ok(backend) => Arc::new(backend),
                Err(e) => return Err(CoreStartupError::HistoryBackend(e)),
            },
            None => Arc::new(NullHistoryBackend),
        };
        let history = Arc::new(HistoryStore::with_capacity(
            history_backend,
            config.history.ring_capacity,
        ));

        let allocator = SessionDirectoryAllocator::new(config.session.workdir_root.clone());
        let spawn_config = SessionSpawnConfig {
            binary: config.assistant.binary.clone(),
            args: config.assistant.args.clone(),
            env: config.assistant.env.clone(),
            ask_deadline: Duration::from_secs(config.assistant.ask_deadline_secs),
        };
        let manager = Arc::new(SessionManager::with_max_sessions(
            allocator,
            spawn_config,
            config.session.default_name.clone(),
            config.session.max_sessions,
        ));
        manager.create_default().await?;

        let allowed_users = config
            .telegram
            .as_ref()
            .map(|t| t.allowed_users.iter().copied().collect())
            .unwrap_or_default();

        let inline_limit = config
            .telegram
            .as_ref()
            .map(|t| t.inline_limit)
            .unwrap_or(crate::reply::DEFAULT_INLINE_LIMIT);

        let queue = MessageQueue::new(
            manager.clone(),
            history.clone(),
            observer,
            outbound,
            config.queue.workers,
            config.queue.depth,
            inline_limit,
        );

        Ok(Arc::new(Self {
            manager,
            queue,
            history,
            allowed_users,
        }))
    }

    /// The single entry point a transport calls for every inbound update:
    /// allow-list check, then build and enqueue a `QueueJob`. The `@name`
    /// prefix (if any) is parsed here and left unresolved against the
    /// current default until dispatch time (see
    /// `SessionManager::parse_target`), so a `/default` change between
    /// admission and dispatch still takes effect.
    pub async fn on_message(
        &self,
        chat_id: ChatId,
        user_id: u64,
        payload: InboundPayload,
    ) -> OnMessageOutcome {
        if !self.is_allowed(user_id) {
            return OnMessageOutcome::NotAllowed;
        }

        let routable_text = match &payload {
            InboundPayload::Text(text) => text.as_str(),
            InboundPayload::Image { caption, .. } => caption.as_str(),
        };
        let (target, stripped) = self.manager.parse_target(routable_text).await;

        let job_payload = match payload {
            InboundPayload::Text(_) => JobPayload::Text(stripped),
            InboundPayload::Image { path, .. } => JobPayload::Image {
                path,
                caption: stripped,
            },
        };

        match self.queue.enqueue(chat_id, job_payload, target).await {
            Ok(position) => OnMessageOutcome::Enqueued { position },
            Err(e) => OnMessageOutcome::Rejected(e),
        }
    }

    /// Whether `user_id` may use the bot at all. An empty allow-list means
    /// every user is admitted. Transports use this to gate control paths
    /// (session listing, queue inspection) the same way `on_message` gates
    /// enqueueing.
    pub fn is_allowed(&self, user_id: u64) -> bool {
        self.allowed_users.is_empty() || self.allowed_users.contains(&user_id)
    }

    /// `/new [name]` / `/open <name> [dir]`.
    pub async fn open_session(
        &self,
        name: impl Into<String>,
        workdir: Option<PathBuf>,
    ) -> Result<Arc<Session>, ManagerError> {
        self.manager.open(name, workdir).await
    }

    /// `/close [name]`: regular close refuses the configured default.
    pub async fn close_session(&self, name: &str) -> Result<(), ManagerError> {
        self.manager.close(name, false).await
    }

    /// The distinct administrative path that may close the default
    /// session. Also clears its in-memory history ring.
    pub async fn admin_close_default(&self, name: &str) -> Result<(), ManagerError> {
        self.manager.close(name, true).await?;
        self.history.clear_ring(name).await;
        Ok(())
    }

    /// Recreates the default session after `admin_close_default`. Goes
    /// through `SessionManager::reopen_default` rather than `open_session`
    /// since the default name is reserved against regular user-initiated
    /// opens.
    pub async fn reopen_default_session(
        &self,
        workdir: Option<PathBuf>,
    ) -> Result<Arc<Session>, ManagerError> {
        self.manager.reopen_default(workdir).await
    }

    /// `@` with no text, or `/job`-adjacent session inspection.
    pub async fn list_sessions(&self) -> Vec<SessionListEntry> {
        self.manager.list().await
    }

    /// `/default [name]`.
    pub async fn set_default(&self, name: Option<&str>) -> Result<(), ManagerError> {
        self.manager.set_default(name).await
    }

    /// Reset a session's conversation context in place (same name, same
    /// workdir, fresh child process).
    pub async fn new_conversation(&self, name: &str) -> Result<(), SessionError> {
        match self.manager.get(name).await {
            Some(session) => session.new_conversation().await,
            None => Err(SessionError::HardFail(format!("session '{name}' not found"))),
        }
    }

    /// `/job`.
    pub async fn queue_snapshot(&self) -> Vec<QueueJobSummary> {
        self.queue.snapshot().await
    }

    /// `/history [n]`.
    pub async fn history_recent(&self, name: &str, n: usize) -> Vec<HistoryEntry> {
        self.history.recent(name, n).await
    }

    /// `/clean`: reset in-memory history caches for every known session.
    /// The durable backend (if any) is left untouched — it is an
    /// append-only audit log, not a cache.
    pub async fn clean_histories(&self) {
        for entry in self.manager.list().await {
            self.history.clear_ring(&entry.status.name).await;
        }
    }

    /// Graceful shutdown: stop admitting new jobs, drain running ones.
    pub async fn shutdown(&self, deadline: Duration) {
        self.queue.shutdown(deadline).await;
    }
}

fn inject_mcp_config(mcp: &crate::config::McpConfigSection) -> Result<(), McpInjectError> {
    let token = std::env::var(&mcp.token_var).unwrap_or_default();
    if token.is_empty() {
        return Ok(());
    }

    let injector = McpConfigInjector::resolve(mcp.config_path.as_deref());
    let spec = McpInjectionSpec {
        server_name: mcp.server_name.clone(),
        entry: McpServerEntry {
            command: mcp.launcher.clone(),
            args: mcp.launcher_args.clone(),
            env: std::collections::HashMap::from([(mcp.token_var.clone(), token)]),
        },
    };
    injector.inject(&spec)
}
