//! Free-text message handler: routes everything that isn't a recognized
//! slash command through `Core::on_message`.
//!
//! A bare `@` with no further text is handled here rather than in
//! `commands.rs` since it isn't a slash command — it's the `SessionManager
//! List` shorthand from the external-interface command table.

use std::sync::Arc;

use conduit_core::{Core, InboundPayload, OnMessageOutcome};
use teloxide::prelude::*;
use teloxide::types::Message as TgMessage;

pub async fn handle_message(bot: Bot, msg: TgMessage, core: Arc<Core>) -> ResponseResult<()> {
    let user_id = msg.from.as_ref().map(|u| u.id.0).unwrap_or(0);

    let Some(text) = msg.text() else {
        return Ok(());
    };

    if text.trim() == "@" {
        if !core.is_allowed(user_id) {
            return Ok(());
        }
        let reply = render_session_list(&core).await;
        for chunk in crate::format::chunk_message(&reply) {
            bot.send_message(msg.chat.id, chunk).await?;
        }
        return Ok(());
    }

    match core
        .on_message(msg.chat.id.0, user_id, InboundPayload::Text(text.to_string()))
        .await
    {
        OnMessageOutcome::Enqueued { .. } | OnMessageOutcome::NotAllowed => {}
        OnMessageOutcome::Rejected(e) => {
            bot.send_message(msg.chat.id, format!("Request rejected: {e}"))
                .await?;
        }
    }
    Ok(())
}

async fn render_session_list(core: &Core) -> String {
    let entries = core.list_sessions().await;
    if entries.is_empty() {
        return "No sessions open.".to_string();
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
