//! Conduit core library.
//!
//! Implements the three tightly coupled subsystems that front a
//! Telegram-style chat surface for a long-running assistant CLI:
//!
//! - [`driver`] — the per-child streaming-JSON protocol engine.
//! - [`session`] / [`manager`] — the named session registry and its
//!   respawn-on-death lifecycle.
//! - [`queue`] — the ordered admission queue with bounded workers.
//!
//! [`core`] wires these together behind a single composition root so no
//! transport binding ever touches module-level mutable state.

pub mod config;
pub mod core;
pub mod driver;
pub mod errors;
pub mod events;
pub mod history;
pub mod manager;
pub mod mcp_inject;
pub mod queue;
pub mod reply;
pub mod session;
pub mod workdir;

pub use config::Config;
pub use core::{Core, CoreStartupError, InboundPayload, OnMessageOutcome};
pub use driver::ProcessDriver;
pub use events::{ChatId, CoreEvent, NullObserver, Observer, OutboundSink, ReplyPayload};
pub use history::{Direction, HistoryBackend, HistoryEntry, HistoryStore, NullHistoryBackend};
pub use manager::{SessionListEntry, SessionManager};
pub use mcp_inject::McpConfigInjector;
pub use queue::{JobStatus, MessageQueue, QueueJob, QueueJobSummary};
pub use session::{Session, SessionSpawnConfig, SessionState, SessionStatus};
pub use workdir::SessionDirectoryAllocator;
