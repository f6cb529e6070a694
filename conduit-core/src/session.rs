//! `Session` — a named, pinned-workdir conversation wrapping exactly one
//! [`ProcessDriver`] at a time, with respawn-on-death and a mutex that
//! serializes in-flight requests.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use crate::driver::ProcessDriver;
use crate::errors::{DriverError, SessionError};

/// Number of deaths within [`DEATH_WINDOW`] that disables auto-respawn.
const DEATH_THRESHOLD: usize = 2;
/// Sliding window over which repeated deaths are counted.
const DEATH_WINDOW: Duration = Duration::from_secs(60);

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Busy,
    Dead,
}

/// Static configuration a [`Session`] needs to spawn (and respawn) its driver.
#[derive(Debug, Clone)]
pub struct SessionSpawnConfig {
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub ask_deadline: Duration,
}

/// A point-in-time snapshot of a Session, safe to read without holding the
/// request mutex (values may lag by one transition).
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub name: String,
    pub workdir: PathBuf,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub inflight: bool,
}

/// A named, long-lived conversation pinned to a workdir.
pub struct Session {
    name: String,
    workdir: PathBuf,
    spawn_config: SessionSpawnConfig,
    driver: RwLock<Option<ProcessDriver>>,
    /// Serializes `ask`/`new_conversation`/`close` — only one in flight.
    request_mutex: Mutex<()>,
    state: RwLock<SessionState>,
    created_at: DateTime<Utc>,
    last_activity_at: RwLock<DateTime<Utc>>,
    inflight: std::sync::atomic::AtomicBool,
    deaths: Mutex<VecDeque<Instant>>,
    respawn_disabled: std::sync::atomic::AtomicBool,
    ask_count: AtomicU64,
}

/// Events a Session reports to its owner (the `SessionManager` forwards
/// these to the process-wide observer).
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Respawned { name: String },
    Dead { name: String, reason: String },
}

impl Session {
    /// Open a new session: validates the name and workdir, then spawns the
    /// first driver. The Session starts `idle` on success.
    pub async fn open(
        name: impl Into<String>,
        workdir: PathBuf,
        spawn_config: SessionSpawnConfig,
    ) -> Result<Arc<Self>, SessionError> {
        let name = name.into();
        validate_name(&name).map_err(SessionError::NameInvalid)?;

        if !workdir.is_dir() {
            return Err(SessionError::WorkdirInvalid(workdir.display().to_string()));
        }

        let driver = ProcessDriver::spawn(
            &workdir,
            &spawn_config.binary,
            &spawn_config.args,
            &spawn_config.env,
        )
        .await?;

        let now = Utc::now();
        Ok(Arc::new(Self {
            name,
            workdir,
            spawn_config,
            driver: RwLock::new(Some(driver)),
            request_mutex: Mutex::new(()),
            state: RwLock::new(SessionState::Idle),
            created_at: now,
            last_activity_at: RwLock::new(now),
            inflight: std::sync::atomic::AtomicBool::new(false),
            deaths: Mutex::new(VecDeque::new()),
            respawn_disabled: std::sync::atomic::AtomicBool::new(false),
            ask_count: AtomicU64::new(0),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workdir(&self) -> &PathBuf {
        &self.workdir
    }

    /// Serialized request: runs the prompt against the live driver. On
    /// detected death, attempts exactly one respawn and one retry.
    pub async fn ask(&self, prompt: &str) -> Result<(String, Option<SessionEvent>), SessionError> {
        let _permit = self.request_mutex.lock().await;

        if matches!(*self.state.read().await, SessionState::Dead) {
            return Err(SessionError::HardFail("session is dead".to_string()));
        }

        self.inflight.store(true, Ordering::SeqCst);
        *self.state.write().await = SessionState::Busy;
        self.ask_count.fetch_add(1, Ordering::Relaxed);

        let result = self.ask_driver(prompt).await;

        let (outcome, event) = match result {
            Ok(text) => (Ok(text), None),
            Err(DriverError::Dead { .. }) => self.handle_death_and_retry(prompt).await,
            Err(DriverError::Cancelled) => {
                self.close_and_respawn_best_effort().await;
                (Err(SessionError::Timeout), None)
            }
            Err(other) => (Err(SessionError::HardFail(other.to_string())), None),
        };

        self.inflight.store(false, Ordering::SeqCst);
        *self.last_activity_at.write().await = Utc::now();
        if outcome.is_ok() {
            *self.state.write().await = SessionState::Idle;
        }

        outcome.map(|text| (text, event))
    }

    async fn ask_driver(&self, prompt: &str) -> Result<String, DriverError> {
        let guard = self.driver.read().await;
        match guard.as_ref() {
            Some(driver) => driver.ask(prompt, self.spawn_config.ask_deadline).await,
            None => Err(DriverError::Dead { stderr_tail: None }),
        }
    }

    async fn handle_death_and_retry(
        &self,
        prompt: &str,
    ) -> (Result<String, SessionError>, Option<SessionEvent>) {
        self.record_death().await;
        *self.state.write().await = SessionState::Dead;

        if self.respawn_disabled.load(Ordering::SeqCst) {
            return (
                Err(SessionError::HardFail(
                    "auto-respawn disabled after repeated deaths".to_string(),
                )),
                Some(SessionEvent::Dead {
                    name: self.name.clone(),
                    reason: "auto-respawn disabled".to_string(),
                }),
            );
        }

        match self.respawn().await {
            Ok(()) => match self.ask_driver(prompt).await {
                Ok(text) => {
                    *self.state.write().await = SessionState::Idle;
                    (
                        Ok(text),
                        Some(SessionEvent::Respawned {
                            name: self.name.clone(),
                        }),
                    )
                }
                Err(e) => (
                    Err(SessionError::HardFail(e.to_string())),
                    Some(SessionEvent::Dead {
                        name: self.name.clone(),
                        reason: e.to_string(),
                    }),
                ),
            },
            Err(e) => (
                Err(SessionError::HardFail(e.to_string())),
                Some(SessionEvent::Dead {
                    name: self.name.clone(),
                    reason: e.to_string(),
                }),
            ),
        }
    }

    /// Spawn a fresh driver in the same workdir, replacing the dead one.
    async fn respawn(&self) -> Result<(), DriverError> {
        {
            let mut guard = self.driver.write().await;
            if let Some(old) = guard.take() {
                old.close().await;
            }
        }
        let driver = ProcessDriver::spawn(
            &self.workdir,
            &self.spawn_config.binary,
            &self.spawn_config.args,
            &self.spawn_config.env,
        )
        .await?;
        *self.driver.write().await = Some(driver);
        Ok(())
    }

    async fn close_and_respawn_best_effort(&self) {
        *self.state.write().await = SessionState::Dead;
        let _ = self.respawn().await;
        if self.driver.read().await.is_some() {
            *self.state.write().await = SessionState::Idle;
        }
    }

    async fn record_death(&self) {
        let now = Instant::now();
        let mut deaths = self.deaths.lock().await;
        deaths.push_back(now);
        while let Some(&front) = deaths.front() {
            if now.duration_since(front) > DEATH_WINDOW {
                deaths.pop_front();
            } else {
                break;
            }
        }
        if deaths.len() >= DEATH_THRESHOLD {
            self.respawn_disabled.store(true, Ordering::SeqCst);
        }
    }

    /// Reset conversation context: closes the driver and spawns a fresh one
    /// in the same workdir. Serialized against `ask` via the same mutex.
    pub async fn new_conversation(&self) -> Result<(), SessionError> {
        let _permit = self.request_mutex.lock().await;
        self.respawn().await?;
        *self.state.write().await = SessionState::Idle;
        self.respawn_disabled.store(false, Ordering::SeqCst);
        self.deaths.lock().await.clear();
        Ok(())
    }

    /// Idempotent: transitions to `dead`, closes the driver, releases resources.
    pub async fn close(&self) {
        let _permit = self.request_mutex.lock().await;
        *self.state.write().await = SessionState::Dead;
        if let Some(driver) = self.driver.write().await.take() {
            driver.close().await;
        }
    }

    /// Clear the disable-respawn flag and death history without touching
    /// the driver. Used by an explicit administrative reset command.
    pub async fn reset_respawn_policy(&self) {
        self.respawn_disabled.store(false, Ordering::SeqCst);
        self.deaths.lock().await.clear();
    }

    pub async fn status(&self) -> SessionStatus {
        SessionStatus {
            name: self.name.clone(),
            workdir: self.workdir.clone(),
            state: *self.state.read().await,
            created_at: self.created_at,
            last_activity_at: *self.last_activity_at.read().await,
            inflight: self.inflight.load(Ordering::SeqCst),
        }
    }
}

/// `name := [^\s@]{1,64}`.
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.chars().count() > 64 {
        return Err(format!(
            "name must be 1-64 characters, got {}",
            name.chars().count()
        ));
    }
    if name.chars().any(|c| c.is_whitespace() || c == '@') {
        return Err("name must not contain whitespace or '@'".to_string());
    }
    Ok(())
}
