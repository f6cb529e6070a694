//! Error taxonomy for the conduit core.
//!
//! Each subsystem gets its own `thiserror` enum rather than one shared
//! error type, mirroring how `ProviderError` / `StorageError` / `McpError`
//! stay separate per concern.

use thiserror::Error;

/// Errors raised by [`crate::driver::ProcessDriver`].
#[derive(Debug, Error)]
pub enum DriverError {
    /// The configured assistant binary could not be found or is not executable.
    #[error("assistant binary is not executable: {0}")]
    NotExecutable(String),

    /// The working directory does not exist or is not a directory.
    #[error("workdir missing: {0}")]
    WorkdirMissing(String),

    /// The child process could not be spawned.
    #[error("failed to spawn assistant process: {0}")]
    SpawnFailed(String),

    /// The child process has exited (crashed) while a request was in flight or since.
    #[error("assistant process is dead{}", stderr_tail.as_ref().map(|s| format!(": {s}")).unwrap_or_default())]
    Dead {
        /// Tail of the stderr ring at the time of death, if any was captured.
        stderr_tail: Option<String>,
    },

    /// A line from the child violated the expected framing (not valid JSON with a `type` field).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The caller's deadline elapsed before a result frame arrived.
    #[error("request cancelled")]
    Cancelled,

    /// `Close` has already completed; the driver can no longer be used.
    #[error("driver is closed")]
    Closed,
}

/// Errors raised by [`crate::session::Session`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// The requested session name does not meet the name grammar.
    #[error("invalid session name: {0}")]
    NameInvalid(String),

    /// The requested workdir is invalid (missing, or a file rather than a directory).
    #[error("invalid workdir: {0}")]
    WorkdirInvalid(String),

    /// Spawning the session's driver failed.
    #[error("failed to spawn session: {0}")]
    SpawnFailed(#[from] DriverError),

    /// The session died and a respawn-and-retry also failed.
    #[error("session failed permanently: {0}")]
    HardFail(String),

    /// The caller's deadline elapsed; the session has been closed and respawned.
    #[error("request timed out")]
    Timeout,
}

/// Errors raised by [`crate::manager::SessionManager`].
#[derive(Debug, Error)]
pub enum ManagerError {
    /// A session with this name is already registered.
    #[error("session already exists: {0}")]
    NameExists(String),

    /// The name does not meet the name grammar.
    #[error("invalid session name: {0}")]
    NameInvalid(String),

    /// The name is reserved and cannot be used for a session.
    #[error("session name is reserved: {0}")]
    NameReserved(String),

    /// No session is registered under this name.
    #[error("session not found: {0}")]
    NotFound(String),

    /// The operation refuses to act on the default session.
    #[error("refusing to act on the default session")]
    IsDefault,

    /// The workdir supplied or allocated for the session is invalid.
    #[error("invalid workdir: {0}")]
    WorkdirInvalid(String),

    /// Spawning the new session's driver failed.
    #[error("failed to spawn session: {0}")]
    SpawnFailed(#[from] DriverError),

    /// The registry already holds the configured maximum number of sessions.
    #[error("maximum concurrent session count ({0}) reached")]
    MaxSessionsReached(usize),
}

/// Errors raised by [`crate::queue::MessageQueue`].
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue has been shut down and no longer accepts jobs.
    #[error("queue is shut down")]
    Shutdown,

    /// The queue is at its configured depth limit.
    #[error("queue is over capacity")]
    OverCapacity,

    /// No job with this id is known.
    #[error("job not found: {0}")]
    NotFound(uuid::Uuid),

    /// The job has already started running and cannot be cancelled.
    #[error("job is already running: {0}")]
    AlreadyRunning(uuid::Uuid),

    /// The job has already reached a terminal status.
    #[error("job already finished: {0}")]
    AlreadyTerminal(uuid::Uuid),
}

/// Errors raised by the [`crate::history`] subsystem.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// The durable backend failed.
    #[error("history storage error: {0}")]
    Storage(String),

    /// A migration failed on startup.
    #[error("history migration error: {0}")]
    Migration(String),
}

/// Errors raised by [`crate::workdir::SessionDirectoryAllocator`].
#[derive(Debug, Error)]
pub enum WorkdirError {
    /// The path exists but is a regular file, not a directory.
    #[error("path exists and is not a directory: {0}")]
    NotADirectory(String),

    /// The directory could not be created.
    #[error("failed to create directory: {0}")]
    CreateFailed(String),
}

/// Errors raised by [`crate::mcp_inject::MCPConfigInjector`].
#[derive(Debug, Error)]
pub enum McpInjectError {
    /// The existing config file could not be read or parsed.
    #[error("failed to read MCP config: {0}")]
    Read(String),

    /// The merged config file could not be written.
    #[error("failed to write MCP config: {0}")]
    Write(String),
}
