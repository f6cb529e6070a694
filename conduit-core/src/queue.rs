//! `MessageQueue` — an ordered admission queue in front of the
//! [`SessionManager`], dispatching to a bounded worker pool while
//! preserving per-`chatID` arrival order (I7).
//!
//! The dispatcher is a single loop that repeatedly scans from the head of
//! the waiting queue for the first job whose target session has no job
//! currently running against it. A job is only allowed to "jump ahead" of
//! an earlier job with a different `chatID`; once a job is skipped because
//! its session slot is occupied, every later job sharing its `chatID` is
//! skipped too for this pass, preserving per-chat FIFO start order.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify, Semaphore};
use uuid::Uuid;

use crate::errors::{QueueError, SessionError};
use crate::events::{ChatId, CoreEvent, Observer, OutboundSink, ReplyPayload};
use crate::history::{Direction, HistoryStore};
use crate::manager::SessionManager;
use crate::reply;

/// Default number of bounded workers.
pub const DEFAULT_WORKERS: usize = 5;
/// Default soft queue depth.
pub const DEFAULT_DEPTH: usize = 1024;
/// How long a terminal job's summary is retained for status queries.
const TERMINAL_RETENTION: Duration = Duration::from_secs(300);

/// Inbound payload a job carries.
#[derive(Debug, Clone)]
pub enum JobPayload {
    Text(String),
    Image { path: String, caption: String },
}

/// Terminal/in-flight lifecycle state of a [`QueueJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Waiting,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// A unit of admitted work.
#[derive(Debug, Clone)]
pub struct QueueJob {
    pub id: Uuid,
    pub chat_id: ChatId,
    pub payload: JobPayload,
    /// Explicit target session name, or `None` to resolve against the
    /// current default at dispatch time.
    pub target_session: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
}

/// A read-only snapshot row, as returned by `Snapshot`.
#[derive(Debug, Clone)]
pub struct QueueJobSummary {
    pub id: Uuid,
    pub chat_id: ChatId,
    pub target_session: Option<String>,
    pub status: JobStatus,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&QueueJob> for QueueJobSummary {
    fn from(job: &QueueJob) -> Self {
        Self {
            id: job.id,
            chat_id: job.chat_id,
            target_session: job.target_session.clone(),
            status: job.status,
            enqueued_at: job.enqueued_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

struct State {
    waiting: VecDeque<QueueJob>,
    running: Vec<QueueJob>,
    terminal: VecDeque<(QueueJob, std::time::Instant)>,
    in_flight_sessions: HashSet<String>,
    accepting: bool,
}

/// The process-wide ordered admission queue.
pub struct MessageQueue {
    state: Mutex<State>,
    notify: Notify,
    dispatch_permits: Arc<Semaphore>,
    depth: usize,
    manager: Arc<SessionManager>,
    history: Arc<HistoryStore>,
    observer: Arc<dyn Observer>,
    outbound: Arc<dyn OutboundSink>,
    inline_limit: usize,
    dispatcher: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl MessageQueue {
    pub fn new(
        manager: Arc<SessionManager>,
        history: Arc<HistoryStore>,
        observer: Arc<dyn Observer>,
        outbound: Arc<dyn OutboundSink>,
        workers: usize,
        depth: usize,
        inline_limit: usize,
    ) -> Arc<Self> {
        let queue = Arc::new(Self {
            state: Mutex::new(State {
                waiting: VecDeque::new(),
                running: Vec::new(),
                terminal: VecDeque::new(),
                in_flight_sessions: HashSet::new(),
                accepting: true,
            }),
            notify: Notify::new(),
            dispatch_permits: Arc::new(Semaphore::new(workers)),
            depth,
            manager,
            history,
            observer,
            outbound,
            inline_limit,
            dispatcher: Mutex::new(None),
        });
        let dispatcher_queue = queue.clone();
        let handle = tokio::spawn(async move { dispatcher_queue.dispatch_loop().await });
        // Can't await inside `new`; stash the handle via try_lock (uncontended,
        // nothing else holds it yet).
        if let Ok(mut guard) = queue.dispatcher.try_lock() {
            *guard = Some(handle);
        }
        queue
    }

    /// Append a job to the FIFO. Returns its 1-based position counted from
    /// the next-to-dispatch waiting job.
    pub async fn enqueue(
        &self,
        chat_id: ChatId,
        payload: JobPayload,
        target_session: Option<String>,
    ) -> Result<usize, QueueError> {
        let mut state = self.state.lock().await;
        if !state.accepting {
            return Err(QueueError::Shutdown);
        }
        if state.waiting.len() >= self.depth {
            drop(state);
            self.observer.on_event(CoreEvent::QueueCapacityExceeded);
            return Err(QueueError::OverCapacity);
        }

        let job = QueueJob {
            id: Uuid::now_v7(),
            chat_id,
            payload,
            target_session,
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            status: JobStatus::Waiting,
        };
        let id = job.id;
        state.waiting.push_back(job);
        let position = state.waiting.len();
        drop(state);

        self.observer.on_event(CoreEvent::JobQueued { id, position });
        self.notify.notify_one();
        Ok(position)
    }

    /// Cancel a waiting job. Running and terminal jobs cannot be cancelled.
    pub async fn cancel(&self, id: Uuid) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if let Some(idx) = state.waiting.iter().position(|j| j.id == id) {
            let mut job = state.waiting.remove(idx).unwrap();
            job.status = JobStatus::Cancelled;
            job.finished_at = Some(Utc::now());
            state.terminal.push_back((job, std::time::Instant::now()));
            return Ok(());
        }
        if state.running.iter().any(|j| j.id == id) {
            return Err(QueueError::AlreadyRunning(id));
        }
        if state.terminal.iter().any(|(j, _)| j.id == id) {
            return Err(QueueError::AlreadyTerminal(id));
        }
        Err(QueueError::NotFound(id))
    }

    /// Ordered snapshot: running jobs first (dispatch order is not
    /// meaningful for them), then waiting jobs in FIFO order.
    pub async fn snapshot(&self) -> Vec<QueueJobSummary> {
        let mut state_guard = self.state.lock().await;
        prune_terminal(&mut state_guard.terminal);
        let mut out: Vec<QueueJobSummary> =
            state_guard.running.iter().map(QueueJobSummary::from).collect();
        out.extend(state_guard.waiting.iter().map(QueueJobSummary::from));
        out
    }

    /// Current waiting-queue depth.
    pub async fn len(&self) -> usize {
        self.state.lock().await.waiting.len()
    }

    /// Stop accepting new jobs and wait up to `deadline` for running jobs
    /// to drain, then abort the dispatcher.
    pub async fn shutdown(&self, deadline: Duration) {
        self.state.lock().await.accepting = false;
        let start = tokio::time::Instant::now();
        loop {
            if self.state.lock().await.running.is_empty() {
                break;
            }
            if start.elapsed() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        if let Some(handle) = self.dispatcher.lock().await.take() {
            handle.abort();
        }
    }

    async fn dispatch_loop(self: Arc<Self>) {
        loop {
            // Reserve worker capacity before a job is ever marked `Running`, so
            // `state.running` never holds more entries than there are permits (P3).
            let permit = match self.dispatch_permits.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };

            let selected = self.select_next().await;
            let Some(job) = selected else {
                drop(permit);
                self.notify.notified().await;
                continue;
            };

            let queue = self.clone();
            tokio::spawn(async move {
                queue.process_job(job).await;
                drop(permit);
                queue.notify.notify_one();
            });
        }
    }

    /// Scan from the head of the waiting queue for the first job whose
    /// target session slot is free, honoring the per-`chatID` skip rule.
    async fn select_next(&self) -> Option<QueueJob> {
        let default_name = self.manager.default_name().await;
        let mut state = self.state.lock().await;

        let mut skipped_chats: HashSet<ChatId> = HashSet::new();
        let mut found: Option<(usize, String)> = None;
        for (idx, job) in state.waiting.iter().enumerate() {
            if skipped_chats.contains(&job.chat_id) {
                continue;
            }
            let target = job
                .target_session
                .clone()
                .unwrap_or_else(|| default_name.clone());
            if state.in_flight_sessions.contains(&target) {
                skipped_chats.insert(job.chat_id);
                continue;
            }
            found = Some((idx, target));
            break;
        }

        let (idx, target) = found?;
        let mut job = state.waiting.remove(idx).unwrap();
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        job.target_session = Some(target.clone());
        state.in_flight_sessions.insert(target);
        state.running.push(job.clone());
        Some(job)
    }

    async fn process_job(&self, mut job: QueueJob) {
        self.observer.on_event(CoreEvent::JobStarted { id: job.id });
        let started = std::time::Instant::now();

        let target = job
            .target_session
            .clone()
            .expect("select_next always resolves a target session before dispatch");

        let text = match &job.payload {
            JobPayload::Text(t) => t.clone(),
            JobPayload::Image { path, caption } => {
                format!("[image: {path}] {caption}")
            }
        };

        let outcome = self.run_against_session(&target, &text).await;

        let elapsed = started.elapsed();
        job.finished_at = Some(Utc::now());

        match outcome {
            Ok(reply_text) => {
                job.status = JobStatus::Succeeded;
                self.history.append(&target, Direction::User, &text).await;
                self.history
                    .append(&target, Direction::Assistant, &reply_text)
                    .await;

                let payload = reply::render(&reply_text, self.inline_limit, job.id);
                let reply_ref = match &payload {
                    ReplyPayload::Inline(_) => None,
                    ReplyPayload::File { filename, .. } => Some(filename.clone()),
                };
                self.outbound.send(job.chat_id, payload).await;

                self.observer.on_event(CoreEvent::JobFinished {
                    id: job.id,
                    ok: true,
                    elapsed,
                    reply_ref,
                });
            }
            Err(message) => {
                job.status = JobStatus::Failed;
                self.history.append(&target, Direction::User, &text).await;
                self.outbound
                    .send(job.chat_id, ReplyPayload::Inline(message.clone()))
                    .await;
                self.observer.on_event(CoreEvent::JobFinished {
                    id: job.id,
                    ok: false,
                    elapsed,
                    reply_ref: None,
                });
            }
        }

        let mut state = self.state.lock().await;
        state.in_flight_sessions.remove(&target);
        state.running.retain(|j| j.id != job.id);
        state.terminal.push_back((job, std::time::Instant::now()));
        prune_terminal(&mut state.terminal);
    }

    /// Run the prompt against the named session, surfacing a concise
    /// user-facing message on any runtime failure.
    async fn run_against_session(&self, session_name: &str, text: &str) -> Result<String, String> {
        let session = match self.manager.get(session_name).await {
            Some(s) => s,
            None => return Err(format!("session '{session_name}' not found")),
        };

        match session.ask(text).await {
            Ok((reply, event)) => {
                if let Some(event) = event {
                    self.emit_session_event(event);
                }
                Ok(reply)
            }
            Err(SessionError::Timeout) => Err("request timed out".to_string()),
            Err(SessionError::HardFail(cause)) => Err(format!("request failed: {cause}")),
            Err(other) => Err(other.to_string()),
        }
    }

    fn emit_session_event(&self, event: crate::session::SessionEvent) {
        match event {
            crate::session::SessionEvent::Respawned { name } => {
                self.observer.on_event(CoreEvent::SessionRespawned { name });
            }
            crate::session::SessionEvent::Dead { name, reason } => {
                self.observer.on_event(CoreEvent::SessionDead { name, reason });
            }
        }
    }
}

fn prune_terminal(terminal: &mut VecDeque<(QueueJob, std::time::Instant)>) {
    while let Some((_, at)) = terminal.front() {
        if at.elapsed() > TERMINAL_RETENTION {
            terminal.pop_front();
        } else {
            break;
        }
    }
}
