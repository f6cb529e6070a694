//! `SessionManager` — a process-wide registry `name -> Session` with a
//! designated default session name. Owns Sessions exclusively by name.
//!
//! Session creation never holds the registry lock during process spawn:
//! the name is reserved atomically under a short lock, the Session is
//! spawned outside any lock, then committed under the lock (or the
//! reservation is rolled back on spawn failure).

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::errors::ManagerError;
use crate::session::{validate_name, Session, SessionSpawnConfig, SessionStatus};
use crate::workdir::SessionDirectoryAllocator;

/// Names that may never be used for a Session.
const RESERVED_NAMES: &[&str] = &["default"];

/// A `{name, state, workdir, lastActivityAt, age}` row for `List`.
#[derive(Debug, Clone)]
pub struct SessionListEntry {
    pub status: SessionStatus,
}

struct Registry {
    sessions: HashMap<String, Arc<Session>>,
    /// Names currently being spawned, reserved so a concurrent `open` for
    /// the same name fails fast instead of racing the spawn.
    reserving: HashSet<String>,
    default_name: String,
    configured_default_name: String,
}

/// The process-wide session registry.
pub struct SessionManager {
    registry: RwLock<Registry>,
    allocator: SessionDirectoryAllocator,
    spawn_config: SessionSpawnConfig,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(
        allocator: SessionDirectoryAllocator,
        spawn_config: SessionSpawnConfig,
        default_name: impl Into<String>,
    ) -> Self {
        Self::with_max_sessions(allocator, spawn_config, default_name, crate::config::default_max_sessions())
    }

    pub fn with_max_sessions(
        allocator: SessionDirectoryAllocator,
        spawn_config: SessionSpawnConfig,
        default_name: impl Into<String>,
        max_sessions: usize,
    ) -> Self {
        let default_name = default_name.into();
        Self {
            registry: RwLock::new(Registry {
                sessions: HashMap::new(),
                reserving: HashSet::new(),
                default_name: default_name.clone(),
                configured_default_name: default_name,
            }),
            allocator,
            spawn_config,
            max_sessions,
        }
    }

    /// At startup, materializes the default Session. Must complete before
    /// the message queue starts dispatching. The configured default name is
    /// exempt from the `RESERVED_NAMES` check — `default` is reserved only
    /// against user-initiated `open`, since the bootstrap default session is
    /// the one thing the `default` keyword is allowed to name.
    pub async fn create_default(&self) -> Result<(), ManagerError> {
        let default_name = self.registry.read().await.default_name.clone();
        self.open_inner(default_name, None, false).await?;
        Ok(())
    }

    /// Open (create) a new named session. `workdir` defaults to allocator output.
    pub async fn open(
        &self,
        name: impl Into<String>,
        workdir: Option<PathBuf>,
    ) -> Result<Arc<Session>, ManagerError> {
        self.open_inner(name, workdir, true).await
    }

    /// Recreate the configured default session after an administrative
    /// close, bypassing the reserved-name check the same way
    /// [`Self::create_default`] does. Only ever re-opens the *current*
    /// configured default name, never an arbitrary caller-supplied one.
    pub async fn reopen_default(&self, workdir: Option<PathBuf>) -> Result<Arc<Session>, ManagerError> {
        let default_name = self.registry.read().await.default_name.clone();
        self.open_inner(default_name, workdir, false).await
    }

    async fn open_inner(
        &self,
        name: impl Into<String>,
        workdir: Option<PathBuf>,
        check_reserved: bool,
    ) -> Result<Arc<Session>, ManagerError> {
        let name = name.into();
        validate_name(&name).map_err(ManagerError::NameInvalid)?;
        if check_reserved && RESERVED_NAMES.contains(&name.as_str()) {
            return Err(ManagerError::NameReserved(name));
        }

        {
            let mut reg = self.registry.write().await;
            if reg.sessions.contains_key(&name) || reg.reserving.contains(&name) {
                return Err(ManagerError::NameExists(name));
            }
            if reg.sessions.len() + reg.reserving.len() >= self.max_sessions {
                return Err(ManagerError::MaxSessionsReached(self.max_sessions));
            }
            reg.reserving.insert(name.clone());
        }

        let resolved_workdir = match workdir {
            Some(dir) => {
                if !dir.is_dir() {
                    self.registry.write().await.reserving.remove(&name);
                    return Err(ManagerError::WorkdirInvalid(dir.display().to_string()));
                }
                dir
            }
            None => match self.allocator.allocate(&name) {
                Ok(dir) => dir,
                Err(e) => {
                    self.registry.write().await.reserving.remove(&name);
                    return Err(ManagerError::WorkdirInvalid(e.to_string()));
                }
            },
        };

        let spawned = Session::open(name.clone(), resolved_workdir, self.spawn_config.clone()).await;

        let mut reg = self.registry.write().await;
        reg.reserving.remove(&name);
        match spawned {
            Ok(session) => {
                reg.sessions.insert(name, session.clone());
                Ok(session)
            }
            Err(e) => Err(ManagerError::SpawnFailed(match e {
                crate::errors::SessionError::SpawnFailed(driver_err) => driver_err,
                other => crate::errors::DriverError::SpawnFailed(other.to_string()),
            })),
        }
    }

    /// Close a named session. Closing the configured default requires
    /// `force_default = true` (a distinct administrative path);
    /// regular `close` refuses to remove it.
    pub async fn close(&self, name: &str, force_default: bool) -> Result<(), ManagerError> {
        let configured_default = self.registry.read().await.configured_default_name.clone();
        if name == configured_default && !force_default {
            return Err(ManagerError::IsDefault);
        }

        let session = {
            let mut reg = self.registry.write().await;
            reg.sessions.remove(name)
        };
        match session {
            Some(session) => {
                session.close().await;
                Ok(())
            }
            None => Err(ManagerError::NotFound(name.to_string())),
        }
    }

    /// Enumerate all registered sessions.
    pub async fn list(&self) -> Vec<SessionListEntry> {
        let reg = self.registry.read().await;
        let mut out = Vec::with_capacity(reg.sessions.len());
        for session in reg.sessions.values() {
            out.push(SessionListEntry {
                status: session.status().await,
            });
        }
        out
    }

    /// Look up a session by name.
    pub async fn get(&self, name: &str) -> Option<Arc<Session>> {
        self.registry.read().await.sessions.get(name).cloned()
    }

    /// Parse a leading `@name` token and return `(sessionName, strippedText)`.
    /// Unknown or absent prefixes fall back to the current default, text
    /// unchanged.
    pub async fn resolve(&self, text: &str) -> (String, String) {
        let reg = self.registry.read().await;
        if let Some(rest) = text.strip_prefix('@') {
            let (candidate, remainder) = match rest.find(char::is_whitespace) {
                Some(idx) => (&rest[..idx], rest[idx..].trim_start().to_string()),
                None => (rest, String::new()),
            };
            if reg.sessions.contains_key(candidate) {
                return (candidate.to_string(), remainder);
            }
        }
        (reg.default_name.clone(), text.to_string())
    }

    /// Like `resolve`, but leaves an unmatched/absent prefix as `None`
    /// rather than baking in the current default. The `MessageQueue`
    /// dispatcher re-resolves `None` against the default at dispatch time,
    /// so a default change between enqueue and dispatch still takes effect.
    pub async fn parse_target(&self, text: &str) -> (Option<String>, String) {
        let reg = self.registry.read().await;
        if let Some(rest) = text.strip_prefix('@') {
            let (candidate, remainder) = match rest.find(char::is_whitespace) {
                Some(idx) => (&rest[..idx], rest[idx..].trim_start().to_string()),
                None => (rest, String::new()),
            };
            if reg.sessions.contains_key(candidate) {
                return (Some(candidate.to_string()), remainder);
            }
        }
        (None, text.to_string())
    }

    /// Set the default session name, or `None` to revert to the
    /// configured startup default.
    pub async fn set_default(&self, name: Option<&str>) -> Result<(), ManagerError> {
        let mut reg = self.registry.write().await;
        match name {
            Some(name) => {
                if !reg.sessions.contains_key(name) {
                    return Err(ManagerError::NotFound(name.to_string()));
                }
                reg.default_name = name.to_string();
            }
            None => {
                reg.default_name = reg.configured_default_name.clone();
            }
        }
        Ok(())
    }

    pub async fn default_name(&self) -> String {
        self.registry.read().await.default_name.clone()
    }
}
