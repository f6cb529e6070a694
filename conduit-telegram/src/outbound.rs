//! `TelegramOutboundSink` — delivers `ReplyPayload`s over the Bot API.
//!
//! Inline replies go out as Markdown→HTML, chunked to Telegram's
//! 4096-character limit, with a plain-text fallback (also chunked) if the
//! HTML send is rejected. File replies are sent as a document attachment
//! with the Markdown as its content; on failure they fall back to an
//! inline (possibly chunked) plain-text send.

use async_trait::async_trait;
use conduit_core::events::{ChatId, OutboundSink, ReplyPayload};
use teloxide::prelude::*;
use teloxide::types::{ChatId as TgChatId, InputFile, ParseMode};

use crate::format;

pub struct TelegramOutboundSink {
    bot: Bot,
}

impl TelegramOutboundSink {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    async fn send_inline(&self, chat_id: TgChatId, text: &str) {
        let html = format::md_to_telegram_html(text);
        let chunks = format::chunk_html(&html);
        let mut html_failed = false;
        for chunk in &chunks {
            if let Err(e) = self
                .bot
                .send_message(chat_id, chunk)
                .parse_mode(ParseMode::Html)
                .await
            {
                tracing::warn!(
                    chat_id = chat_id.0,
                    error = %e,
                    "HTML send failed, falling back to plain text"
                );
                html_failed = true;
                break;
            }
        }
        if !html_failed {
            return;
        }
        for chunk in format::chunk_message(text) {
            if let Err(e) = self.bot.send_message(chat_id, chunk).await {
                tracing::warn!(chat_id = chat_id.0, error = %e, "plain-text send failed");
            }
        }
    }

    async fn send_file(&self, chat_id: TgChatId, filename: &str, markdown: &str) {
        let file = InputFile::memory(markdown.as_bytes().to_vec()).file_name(filename.to_string());
        if let Err(e) = self.bot.send_document(chat_id, file).await {
            tracing::warn!(
                chat_id = chat_id.0,
                error = %e,
                "document send failed, falling back to inline"
            );
            self.send_inline(chat_id, markdown).await;
        }
    }
}

#[async_trait]
impl OutboundSink for TelegramOutboundSink {
    async fn send(&self, chat_id: ChatId, payload: ReplyPayload) {
        let tg_chat_id = TgChatId(chat_id);
        match payload {
            ReplyPayload::Inline(text) => self.send_inline(tg_chat_id, &text).await,
            ReplyPayload::File { filename, markdown } => {
                self.send_file(tg_chat_id, &filename, &markdown).await
            }
        }
    }
}
