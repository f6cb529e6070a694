//! Telegram slash-command handlers: session lifecycle, queue inspection,
//! and history.
//!
//! None of these commands touch the assistant child process directly —
//! they all go through `conduit_core::Core`'s administrative surface.

use std::path::PathBuf;
use std::sync::Arc;

use conduit_core::Core;
use teloxide::prelude::*;
use teloxide::types::Message as TgMessage;
use teloxide::utils::command::BotCommands;

/// All slash commands the bot understands.
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    /// Show available commands.
    #[command(description = "Show available commands")]
    Help,
    /// Open a new named session (or the next auto-generated name).
    #[command(description = "Open a new session: /new [name]")]
    New(String),
    /// Open a named session in a specific working directory.
    #[command(description = "Open a session in a directory: /open <name> [dir]")]
    Open(String),
    /// Close a named session (refuses the configured default).
    #[command(description = "Close a session: /close [name]")]
    Close(String),
    /// Change (or revert) the default session.
    #[command(description = "Set the default session: /default [name]")]
    Default(String),
    /// Reset a session's conversation context in place.
    #[command(description = "Reset a session's context: /reset [name]")]
    Reset(String),
    /// Snapshot the admission queue.
    #[command(description = "Show the job queue")]
    Job,
    /// Reset in-memory history caches for every session.
    #[command(description = "Clear in-memory history caches")]
    Clean,
    /// Show session status.
    #[command(description = "Show session status: /status [name]")]
    Status(String),
    /// Show recent history for a session.
    #[command(description = "Show recent history: /history [name] [n]")]
    History(String),
}

/// Entry point for all slash commands. Gates on `core.is_allowed` the same
/// way `Core::on_message` gates free-text enqueueing.
pub async fn handle_command(
    bot: Bot,
    msg: TgMessage,
    cmd: Command,
    core: Arc<Core>,
) -> ResponseResult<()> {
    let user_id = msg.from.as_ref().map(|u| u.id.0).unwrap_or(0);
    if !core.is_allowed(user_id) {
        return Ok(());
    }

    let reply = match cmd {
        Command::Help => Command::descriptions().to_string(),
        Command::New(args) => cmd_new(&core, &args).await,
        Command::Open(args) => cmd_open(&core, &args).await,
        Command::Close(args) => cmd_close(&core, &args).await,
        Command::Default(args) => cmd_default(&core, &args).await,
        Command::Reset(args) => cmd_reset(&core, &args).await,
        Command::Job => cmd_job(&core).await,
        Command::Clean => {
            core.clean_histories().await;
            "History caches cleared.".to_string()
        }
        Command::Status(args) => cmd_status(&core, &args).await,
        Command::History(args) => cmd_history(&core, &args).await,
    };

    for chunk in crate::format::chunk_message(&reply) {
        bot.send_message(msg.chat.id, chunk).await?;
    }
    Ok(())
}

async fn cmd_new(core: &Core, args: &str) -> String {
    let (name, _dir) = parse_open_args(args);
    let name = name.unwrap_or_else(generate_session_name);
    match core.open_session(name.clone(), None).await {
        Ok(_) => format!("Opened session '{name}'."),
        Err(e) => format!("Failed to open '{name}': {e}"),
    }
}

async fn cmd_open(core: &Core, args: &str) -> String {
    let (name, dir) = parse_open_args(args);
    let Some(name) = name else {
        return "Usage: /open <name> [dir]".to_string();
    };
    match core.open_session(name.clone(), dir).await {
        Ok(_) => format!("Opened session '{name}'."),
        Err(e) => format!("Failed to open '{name}': {e}"),
    }
}

async fn cmd_close(core: &Core, args: &str) -> String {
    let name = args.trim();
    let name = if name.is_empty() {
        core.manager.default_name().await
    } else {
        name.to_string()
    };
    match core.close_session(&name).await {
        Ok(()) => format!("Closed session '{name}'."),
        Err(e) => format!("Failed to close '{name}': {e}"),
    }
}

async fn cmd_default(core: &Core, args: &str) -> String {
    let name = args.trim();
    let target = if name.is_empty() { None } else { Some(name) };
    match core.set_default(target).await {
        Ok(()) => match target {
            Some(name) => format!("Default session set to '{name}'."),
            None => "Default session reverted to the configured default.".to_string(),
        },
        Err(e) => format!("Failed to set default: {e}"),
    }
}

async fn cmd_reset(core: &Core, args: &str) -> String {
    let name = args.trim();
    let name = if name.is_empty() {
        core.manager.default_name().await
    } else {
        name.to_string()
    };
    match core.new_conversation(&name).await {
        Ok(()) => format!("Session '{name}' context reset."),
        Err(e) => format!("Failed to reset '{name}': {e}"),
    }
}

async fn cmd_job(core: &Core) -> String {
    let jobs = core.queue_snapshot().await;
    if jobs.is_empty() {
        return "No jobs in the queue.".to_string();
    }
    let mut out = String::new();
    for job in jobs {
        let target = job.target_session.as_deref().unwrap_or("default");
        out.push_str(&format!(
            "{} [{}] chat={} session={} {:?}\n",
            job.id, status_label(job.status), job.chat_id, target, job.status
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
    let name = args.trim();
    let name = if name.is_empty() {
        core.manager.default_name().await
    } else {
        name.to_string()
    };
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
        None => format!("No such session '{name}'."),
    }
}

async fn cmd_history(core: &Core, args: &str) -> String {
    let (name_arg, count_arg) = args
        .trim()
        .split_once(char::is_whitespace)
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .unwrap_or_else(|| (args.trim().to_string(), String::new()));

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
        return format!("No history for '{name}'.");
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
            let dir = if rest.is_empty() {
                None
            } else {
                Some(PathBuf::from(rest))
            };
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
}
