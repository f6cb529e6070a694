//! Line-based admin REPL: reads commands and free-text prompts from stdin
//! and drives a `conduit-core` `Core` directly, without going through any
//! transport. Mirrors the minimum command surface `conduit-telegram`'s
//! `commands` module exposes, adapted to a single local operator instead
//! of many Telegram chats.
//!
//! There is exactly one "chat" here (`LOCAL_CHAT_ID`) and exactly one
//! "user" (`LOCAL_USER_ID`); the admin console never consults an
//! allow-list, so `Core::is_allowed` always returns true for it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use conduit_core::{Core, InboundPayload, OnMessageOutcome};
use tokio::io::{AsyncBufReadExt, BufReader};

/// The fixed chat id the admin console's outbound sink prints replies
/// under.
const LOCAL_CHAT_ID: i64 = 0;
/// The fixed user id passed to `Core::on_message`; irrelevant since the
/// console's allow-list is always empty (admit-all).
const LOCAL_USER_ID: u64 = 0;

/// Run the REPL until stdin closes, `/quit` is entered, or Ctrl-C fires.
pub async fn run(core: Arc<Core>) -> Result<()> {
    println!("conduit admin console — /help for commands, /quit to exit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if line == "/quit" {
                            break;
                        }
                        handle_line(&core, line).await;
                    }
                    None => break, // EOF (Ctrl-D)
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\ninterrupted");
                break;
            }
        }
    }

    Ok(())
}

async fn handle_line(core: &Core, line: &str) {
    let reply = if let Some(rest) = line.strip_prefix('/') {
        dispatch_command(core, rest).await
    } else if line == "@" {
        Some(render_session_list(core).await)
    } else {
        match core
            .on_message(LOCAL_CHAT_ID, LOCAL_USER_ID, InboundPayload::Text(line.to_string()))
            .await
        {
            OnMessageOutcome::Enqueued { position } => Some(format!("queued (position {position})")),
            OnMessageOutcome::NotAllowed => Some("not allowed".to_string()),
            OnMessageOutcome::Rejected(e) => Some(format!("rejected: {e}")),
        }
    };

    if let Some(reply) = reply {
        println!("{reply}");
    }
}

/// Dispatch a `/command [args]` line (the leading `/` already stripped) to
/// the matching `Core` administrative operation.
async fn dispatch_command(core: &Core, command_line: &str) -> Option<String> {
    let (command, args) = command_line
        .split_once(char::is_whitespace)
        .map(|(c, a)| (c, a.trim()))
        .unwrap_or((command_line, ""));

    Some(match command {
        "help" => help_text(),
        "new" => cmd_new(core, args).await,
        "open" => cmd_open(core, args).await,
        "close" => cmd_close(core, args).await,
        "default" => cmd_default(core, args).await,
        "reset" => cmd_reset(core, args).await,
        "job" => cmd_job(core).await,
        "clean" => {
            core.clean_histories().await;
            "history caches cleared".to_string()
        }
        "status" => cmd_status(core, args).await,
        "history" => cmd_history(core, args).await,
        other => format!("unknown command '/{other}', try /help"),
    })
}

fn help_text() -> String {
    [
        "/new [name]            open a new session",
        "/open <name> [dir]     open a session pinned to a workdir",
        "/close [name]          close a session (not the default)",
        "/default [name]        set or revert the default session",
        "/reset [name]          reset a session's conversation context",
        "@                      list open sessions",
        "@<name> <text>         send text to a named session",
        "/job                   show the admission queue",
        "/clean                 clear in-memory history caches",
        "/status [name]         show session status",
        "/history [name] [n]    show recent history",
        "/quit                  exit",
    ]
    .join("\n")
}

async fn cmd_new(core: &Core, args: &str) -> String {
    let (name, _dir) = parse_open_args(args);
    let name = name.unwrap_or_else(generate_session_name);
    match core.open_session(name.clone(), None).await {
        Ok(_) => format!("opened session '{name}'"),
        Err(e) => format!("failed to open '{name}': {e}"),
    }
}

async fn cmd_open(core: &Core, args: &str) -> String {
    let (name, dir) = parse_open_args(args);
    let Some(name) = name else {
        return "usage: /open <name> [dir]".to_string();
    };
    match core.open_session(name.clone(), dir).await {
        Ok(_) => format!("opened session '{name}'"),
        Err(e) => format!("failed to open '{name}': {e}"),
    }
}

async fn cmd_close(core: &Core, args: &str) -> String {
    let name = resolve_name_arg(core, args).await;
    match core.close_session(&name).await {
        Ok(()) => format!("closed session '{name}'"),
        Err(e) => format!("failed to close '{name}': {e}"),
    }
}

async fn cmd_default(core: &Core, args: &str) -> String {
    let name = args.trim();
    let target = if name.is_empty() { None } else { Some(name) };
    match core.set_default(target).await {
        Ok(()) => match target {
            Some(name) => format!("default session set to '{name}'"),
            None => "default session reverted to the configured default".to_string(),
        },
        Err(e) => format!("failed to set default: {e}"),
    }
}

async fn cmd_reset(core: &Core, args: &str) -> String {
    let name = resolve_name_arg(core, args).await;
    match core.new_conversation(&name).await {
        Ok(()) => format!("session '{name}' context reset"),
        Err(e) => format!("failed to reset '{name}': {e}"),
    }
}

async fn cmd_job(core: &Core) -> String {
    let jobs = core.queue_snapshot().await;
    if jobs.is_empty() {
        return "no jobs in the queue".to_string();
    }
    let mut out = String::new();
    for job in jobs {
        let target = job.target_session.as_deref().unwrap_or("default");
        out.push_str(&format!(
            "{} [{}] chat={} session={}\n",
            job.id,
            status_label(job.status),
            job.chat_id,
            target
        ));
    }
    out.trim_end().to_string()
}

fn status_label(status: conduit_core::JobStatus) -> &'static str {
    use conduit_core::JobStatus::*;
    match status {
        Waiting => "waiting",
        Running => "running",
        Succeeded => "ok",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

async fn cmd_status(core: &Core, args: &str) -> String {
    let name = resolve_name_arg(core, args).await;
    match core.manager.get(&name).await {
        Some(session) => {
            let status = session.status().await;
            format!(
                "{}: {:?} workdir={} last_activity={}",
                status.name,
                status.state,
                status.workdir.display(),
                status.last_activity_at.to_rfc3339(),
            )
        }
        None => format!("no such session '{name}'"),
    }
}

async fn cmd_history(core: &Core, args: &str) -> String {
    let (name_arg, count_arg) = args
        .split_once(char::is_whitespace)
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .unwrap_or_else(|| (args.to_string(), String::new()));

    let (name, n) = if name_arg.parse::<usize>().is_ok() {
        (None, parse_history_count(&name_arg))
    } else if name_arg.is_empty() {
        (None, 10)
    } else {
        (Some(name_arg), parse_history_count(&count_arg))
    };

    let name = match name {
        Some(n) => n,
        None => core.manager.default_name().await,
    };

    let entries = core.history_recent(&name, n).await;
    if entries.is_empty() {
        return format!("no history for '{name}'");
    }
    let mut out = String::new();
    for entry in entries {
        out.push_str(&format!(
            "[{}] {}\n{}\n\n",
            entry.direction.as_str(),
            entry.ts.to_rfc3339(),
            entry.text
        ));
    }
    out.trim_end().to_string()
}

async fn render_session_list(core: &Core) -> String {
    let entries = core.list_sessions().await;
    if entries.is_empty() {
        return "no sessions open".to_string();
    }
    let default_name = core.manager.default_name().await;
    let mut out = String::new();
    for entry in entries {
        let marker = if entry.status.name == default_name { "*" } else { " " };
        out.push_str(&format!(
            "{} {} [{:?}] workdir={}\n",
            marker,
            entry.status.name,
            entry.status.state,
            entry.status.workdir.display(),
        ));
    }
    out.trim_end().to_string()
}

/// An empty trailing argument resolves to the current default session
/// name rather than an empty string.
async fn resolve_name_arg(core: &Core, args: &str) -> String {
    let name = args.trim();
    if name.is_empty() {
        core.manager.default_name().await
    } else {
        name.to_string()
    }
}

/// Split `/new`/`/open` argument text into `(name, workdir)`. Empty input
/// yields `(None, None)`; a second whitespace-separated token becomes the
/// working directory.
fn parse_open_args(args: &str) -> (Option<String>, Option<PathBuf>) {
    let args = args.trim();
    if args.is_empty() {
        return (None, None);
    }
    match args.split_once(char::is_whitespace) {
        Some((name, rest)) => {
            let rest = rest.trim();
            let dir = if rest.is_empty() { None } else { Some(PathBuf::from(rest)) };
            (Some(name.to_string()), dir)
        }
        None => (Some(args.to_string()), None),
    }
}

/// Parse a `/history [n]`-style trailing count, defaulting to 10 on
/// garbage or absent input.
fn parse_history_count(arg: &str) -> usize {
    arg.trim().parse().unwrap_or(10)
}

/// Generate a short, collision-resistant session name for a bare `/new`
/// with no explicit name.
fn generate_session_name() -> String {
    format!("s-{}", uuid::Uuid::new_v4().simple().to_string().split_at(8).0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_open_args_name_only() {
        let (name, dir) = parse_open_args("alpha");
        assert_eq!(name.as_deref(), Some("alpha"));
        assert!(dir.is_none());
    }

    #[test]
    fn parse_open_args_name_and_dir() {
        let (name, dir) = parse_open_args("alpha /tmp/work");
        assert_eq!(name.as_deref(), Some("alpha"));
        assert_eq!(dir, Some(PathBuf::from("/tmp/work")));
    }

    #[test]
    fn parse_open_args_empty_is_none() {
        let (name, dir) = parse_open_args("   ");
        assert!(name.is_none());
        assert!(dir.is_none());
    }

    #[test]
    fn parse_history_count_defaults_on_garbage() {
        assert_eq!(parse_history_count("not-a-number"), 10);
        assert_eq!(parse_history_count(""), 10);
    }

    #[test]
    fn parse_history_count_parses_valid_number() {
        assert_eq!(parse_history_count("25"), 25);
    }

    #[test]
    fn generate_session_name_is_short_and_prefixed() {
        let name = generate_session_name();
        assert!(name.starts_with("s-"));
        assert_eq!(name.len(), 10);
    }

    #[test]
    fn help_text_mentions_quit() {
        assert!(help_text().contains("/quit"));
    }
}
