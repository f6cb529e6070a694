//! `ProcessDriver` — owns one child process of the assistant CLI and speaks
//! its line-delimited streaming-JSON protocol over stdin/stdout.
//!
//! A driver knows nothing about sessions, chats, or queues. It exposes
//! `ask` (write one request frame, collect the response until the
//! terminating `result` frame) and `close` (graceful-then-forced shutdown).
//! Four background tasks per driver keep stdin writes, stdout parsing,
//! stderr draining and exit detection from blocking each other or the
//! caller — the same shape as a managed child session, generalized to a
//! tagged-JSON wire format instead of raw bytes.

use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::errors::DriverError;

/// Default grace period `Close` waits after closing stdin before sending a
/// termination signal.
pub const T_GRACEFUL: Duration = Duration::from_secs(5);
/// Default period `Close` waits after the termination signal before sending
/// a kill signal.
pub const T_FORCE: Duration = Duration::from_secs(2);

const STDERR_RING_LINES: usize = 200;
const FRAME_CHANNEL_DEPTH: usize = 64;
const STDIN_CHANNEL_DEPTH: usize = 32;
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A single outbound request frame: `{"type":"user","message":{"role":"user","content":"..."}}`.
#[derive(Debug, Serialize)]
struct OutboundFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    message: OutboundMessage<'a>,
}

#[derive(Debug, Serialize)]
struct OutboundMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Inbound frames recognized on the child's stdout.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireFrame {
    Assistant {
        message: AssistantMessage,
    },
    Result {
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: Option<bool>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(other)]
    Other,
}

/// What the stdout reader hands to `ask`: a parsed wire frame, or EOF/exit.
enum ReaderEvent {
    Frame(WireFrame),
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverState {
    Alive,
    Closing,
    Exited,
}

/// Owns one long-lived child process speaking the streaming-JSON protocol.
pub struct ProcessDriver {
    state: Mutex<DriverState>,
    stdin_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    reader_rx: Mutex<mpsc::Receiver<ReaderEvent>>,
    alive: Arc<AtomicBool>,
    stderr_ring: Arc<Mutex<VecDeque<String>>>,
    exit_status: Arc<Mutex<Option<ExitStatus>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    pid: Option<u32>,
}

impl ProcessDriver {
    /// Spawn the assistant binary in `workdir` with the given args and
    /// environment. The child's stdin/stdout/stderr are piped; four
    /// background tasks are started to drive them.
    pub async fn spawn(
        workdir: &Path,
        binary: &Path,
        args: &[String],
        env: &[(String, String)],
    ) -> Result<Self, DriverError> {
        if !workdir.is_dir() {
            return Err(DriverError::WorkdirMissing(workdir.display().to_string()));
        }
        if !is_executable(binary) {
            return Err(DriverError::NotExecutable(binary.display().to_string()));
        }

        let mut cmd = Command::new(binary);
        cmd.args(args)
            .current_dir(workdir)
            .envs(env.iter().map(|(k, v)| (k.clone(), v.clone())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| DriverError::SpawnFailed(e.to_string()))?;
        let pid = child.id();

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let (stdin_tx, mut stdin_rx) = mpsc::channel::<Vec<u8>>(STDIN_CHANNEL_DEPTH);
        let stdin_task = tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(data) = stdin_rx.recv().await {
                if stdin.write_all(&data).await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
            // stdin is dropped here, sending EOF to the child.
        });

        let (reader_tx, reader_rx) = mpsc::channel::<ReaderEvent>(FRAME_CHANNEL_DEPTH);
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let frame = match serde_json::from_str::<WireFrame>(&line) {
                            Ok(frame) => frame,
                            Err(e) => {
                                tracing::warn!(error = %e, line = %line, "unparseable assistant frame");
                                WireFrame::Other
                            }
                        };
                        if reader_tx.send(ReaderEvent::Frame(frame)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) | Err(_) => {
                        let _ = reader_tx.send(ReaderEvent::Closed).await;
                        break;
                    }
                }
            }
        });

        let stderr_ring = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_RING_LINES)));
        let ring = stderr_ring.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let mut ring = ring.lock().await;
                if ring.len() >= STDERR_RING_LINES {
                    ring.pop_front();
                }
                ring.push_back(line);
            }
        });

        let alive = Arc::new(AtomicBool::new(true));
        let exit_status = Arc::new(Mutex::new(None));
        let alive_exit = alive.clone();
        let exit_status_exit = exit_status.clone();
        let exit_task = tokio::spawn(async move {
            let status = child.wait().await.ok();
            *exit_status_exit.lock().await = status;
            alive_exit.store(false, Ordering::SeqCst);
        });

        Ok(Self {
            state: Mutex::new(DriverState::Alive),
            stdin_tx: Mutex::new(Some(stdin_tx)),
            reader_rx: Mutex::new(reader_rx),
            alive,
            stderr_ring,
            exit_status,
            tasks: Mutex::new(vec![stdin_task, stdout_task, stderr_task, exit_task]),
            pid,
        })
    }

    /// Whether the child process is still alive (best-effort snapshot).
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// OS pid of the child, if it was available at spawn time.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Write one request frame and collect the response until a `result`
    /// frame arrives, a deadline elapses, or the child exits.
    pub async fn ask(&self, prompt: &str, deadline: Duration) -> Result<String, DriverError> {
        {
            let state = self.state.lock().await;
            if *state != DriverState::Alive {
                return Err(DriverError::Closed);
            }
        }
        if !self.alive.load(Ordering::SeqCst) {
            return Err(DriverError::Dead {
                stderr_tail: self.stderr_tail().await,
            });
        }

        let frame = OutboundFrame {
            kind: "user",
            message: OutboundMessage {
                role: "user",
                content: prompt,
            },
        };
        let mut line = serde_json::to_vec(&frame)
            .map_err(|e| DriverError::ProtocolViolation(e.to_string()))?;
        line.push(b'\n');

        let tx = {
            let guard = self.stdin_tx.lock().await;
            guard.clone().ok_or(DriverError::Closed)?
        };
        tx.send(line)
            .await
            .map_err(|_| DriverError::Dead { stderr_tail: None })?;

        let mut reader_rx = self.reader_rx.lock().await;
        let outcome = tokio::time::timeout(deadline, async {
            let mut accumulator = String::new();
            loop {
                match reader_rx.recv().await {
                    Some(ReaderEvent::Frame(WireFrame::Assistant { message })) => {
                        for block in message.content {
                            if let ContentBlock::Text { text } = block {
                                accumulator.push_str(&text);
                            }
                        }
                    }
                    Some(ReaderEvent::Frame(WireFrame::Result { result, is_error })) => {
                        if is_error == Some(true) {
                            tracing::warn!("assistant reported is_error on result frame");
                        }
                        return AskOutcome::Reply(result.unwrap_or(accumulator));
                    }
                    Some(ReaderEvent::Frame(WireFrame::Other)) => continue,
                    Some(ReaderEvent::Closed) | None => return AskOutcome::Dead,
                }
            }
        })
        .await;
        drop(reader_rx);

        match outcome {
            Ok(AskOutcome::Reply(text)) => Ok(text),
            Ok(AskOutcome::Dead) => {
                *self.state.lock().await = DriverState::Exited;
                Err(DriverError::Dead {
                    stderr_tail: self.stderr_tail().await,
                })
            }
            Err(_elapsed) => Err(DriverError::Cancelled),
        }
    }

    /// Close the driver: close stdin, wait `T_graceful`, send a termination
    /// signal, wait `T_force`, send a kill signal. Idempotent.
    pub async fn close(&self) {
        self.close_with(T_GRACEFUL, T_FORCE).await;
    }

    /// `close` with caller-supplied grace/force deadlines, for tests.
    pub async fn close_with(&self, t_graceful: Duration, t_force: Duration) {
        {
            let mut state = self.state.lock().await;
            if matches!(*state, DriverState::Closing | DriverState::Exited) {
                return;
            }
            *state = DriverState::Closing;
        }

        // (a) close stdin
        self.stdin_tx.lock().await.take();

        // (b) wait T_graceful
        if !self.poll_until_exited(t_graceful).await {
            // (c) termination signal
            self.signal(libc::SIGTERM);
            // (d) wait T_force
            if !self.poll_until_exited(t_force).await {
                // (e) kill signal
                self.signal(libc::SIGKILL);
                self.poll_until_exited(Duration::from_secs(10)).await;
            }
        }

        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        *self.state.lock().await = DriverState::Exited;
    }

    /// Join on process exit, returning the exit status if one was observed.
    pub async fn wait(&self) -> Option<ExitStatus> {
        self.poll_until_exited(Duration::from_secs(3600)).await;
        *self.exit_status.lock().await
    }

    async fn poll_until_exited(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !self.alive.load(Ordering::SeqCst) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }

    fn signal(&self, sig: i32) {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            // SAFETY: pid came from the Child we spawned and owns this signal.
            unsafe {
                libc::kill(pid as libc::pid_t, sig);
            }
        }
        #[cfg(not(unix))]
        let _ = sig;
    }

    async fn stderr_tail(&self) -> Option<String> {
        let ring = self.stderr_ring.lock().await;
        if ring.is_empty() {
            None
        } else {
            Some(ring.iter().cloned().collect::<Vec<_>>().join("\n"))
        }
    }
}

enum AskOutcome {
    Reply(String),
    Dead,
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path)
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Writes a tiny shell script that behaves like a streaming-JSON
    /// assistant: for each input line it emits an `assistant` frame
    /// echoing the prompt, then a `result` frame.
    fn fake_assistant_script(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("fake_assistant.sh");
        let script = r#"#!/bin/sh
while IFS= read -r line; do
  printf '{"type":"assistant","message":{"content":[{"type":"text","text":"echo:"}]}}\n'
  printf '{"type":"result","result":null,"is_error":false}\n'
done
"#;
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(script.as_bytes()).unwrap();
        drop(f);
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        use std::os::unix::fs::PermissionsExt;
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn dying_assistant_script(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("dying_assistant.sh");
        let script = "#!/bin/sh\nread -r line\nexit 1\n";
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(script.as_bytes()).unwrap();
        drop(f);
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        use std::os::unix::fs::PermissionsExt;
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn silent_assistant_script(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("silent_assistant.sh");
        let script = "#!/bin/sh\nwhile IFS= read -r line; do :; done\n";
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(script.as_bytes()).unwrap();
        drop(f);
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        use std::os::unix::fs::PermissionsExt;
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[tokio::test]
    async fn ask_collects_accumulator_when_result_has_no_text() {
        let dir = tempdir();
        let bin = fake_assistant_script(dir.path());
        let driver = ProcessDriver::spawn(dir.path(), &bin, &[], &[])
            .await
            .unwrap();
        let reply = driver.ask("hello", Duration::from_secs(2)).await.unwrap();
        assert_eq!(reply, "echo:");
        driver.close_with(Duration::from_millis(200), Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn spawn_rejects_missing_workdir() {
        let err = ProcessDriver::spawn(
            Path::new("/nonexistent/workdir/for/sure"),
            Path::new("/bin/sh"),
            &[],
            &[],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DriverError::WorkdirMissing(_)));
    }

    #[tokio::test]
    async fn spawn_rejects_non_executable_binary() {
        let dir = tempdir();
        let not_exec = dir.path().join("not_exec.sh");
        std::fs::write(&not_exec, "#!/bin/sh\necho hi\n").unwrap();
        let err = ProcessDriver::spawn(dir.path(), &not_exec, &[], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::NotExecutable(_)));
    }

    #[tokio::test]
    async fn ask_returns_dead_after_child_exits() {
        let dir = tempdir();
        let bin = dying_assistant_script(dir.path());
        let driver = ProcessDriver::spawn(dir.path(), &bin, &[], &[])
            .await
            .unwrap();
        let err = driver
            .ask("hello", Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Dead { .. }));
        assert!(!driver.is_alive());
    }

    #[tokio::test]
    async fn ask_times_out_on_silent_child() {
        let dir = tempdir();
        let bin = silent_assistant_script(dir.path());
        let driver = ProcessDriver::spawn(dir.path(), &bin, &[], &[])
            .await
            .unwrap();
        let err = driver
            .ask("hello", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Cancelled));
        driver.close_with(Duration::from_millis(200), Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn close_is_idempotent_and_child_exits() {
        let dir = tempdir();
        let bin = silent_assistant_script(dir.path());
        let driver = ProcessDriver::spawn(dir.path(), &bin, &[], &[])
            .await
            .unwrap();
        driver.close_with(Duration::from_millis(200), Duration::from_millis(200)).await;
        driver.close_with(Duration::from_millis(200), Duration::from_millis(200)).await;
        assert!(!driver.is_alive());
    }

    fn tempdir() -> TempDir {
        TempDir::new()
    }

    /// Minimal self-cleaning temp dir, avoiding a dependency on the `tempfile` crate.
    struct TempDir(std::path::PathBuf);

    impl TempDir {
        fn new() -> Self {
            let path = std::env::temp_dir().join(format!(
                "conduit-driver-test-{}-{}",
                std::process::id(),
                uuid::Uuid::new_v4()
            ));
            std::fs::create_dir_all(&path).unwrap();
            Self(path)
        }

        fn path(&self) -> &Path {
            &self.0
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }
}
