//! Reply rendering — pure functions shared by every transport binding.
//!
//! An assistant reply is either sent inline (short enough) or spilled to a
//! Markdown file artifact, decided by a pure inline-or-file split so every
//! transport binding renders replies the same way regardless of how it
//! delivers them.

use uuid::Uuid;

use crate::events::ReplyPayload;

/// Default inline length threshold, in characters.
pub const DEFAULT_INLINE_LIMIT: usize = 3000;

/// Render `text` as an inline reply if it fits within `inline_limit`
/// characters, otherwise as a Markdown file artifact named after `job_id`.
pub fn render(text: &str, inline_limit: usize, job_id: Uuid) -> ReplyPayload {
    if text.chars().count() <= inline_limit {
        ReplyPayload::Inline(text.to_string())
    } else {
        ReplyPayload::File {
            filename: format!("reply-{job_id}.md"),
            markdown: text.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_renders_inline() {
        let payload = render("hello", DEFAULT_INLINE_LIMIT, Uuid::nil());
        assert!(matches!(payload, ReplyPayload::Inline(s) if s == "hello"));
    }

    #[test]
    fn text_at_limit_renders_inline() {
        let text = "a".repeat(DEFAULT_INLINE_LIMIT);
        let payload = render(&text, DEFAULT_INLINE_LIMIT, Uuid::nil());
        assert!(matches!(payload, ReplyPayload::Inline(_)));
    }

    #[test]
    fn text_over_limit_renders_as_file() {
        let text = "a".repeat(DEFAULT_INLINE_LIMIT + 1);
        let job_id = Uuid::nil();
        let payload = render(&text, DEFAULT_INLINE_LIMIT, job_id);
        match payload {
            ReplyPayload::File { filename, markdown } => {
                assert_eq!(filename, format!("reply-{job_id}.md"));
                assert_eq!(markdown, text);
            }
            ReplyPayload::Inline(_) => panic!("expected file payload"),
        }
    }

    #[test]
    fn multibyte_text_counts_chars_not_bytes() {
        // Each "é" is two bytes in UTF-8 but one char; this must not panic
        // or mis-measure against the char-based limit.
        let text = "é".repeat(10);
        let payload = render(&text, 20, Uuid::nil());
        assert!(matches!(payload, ReplyPayload::Inline(_)));
    }
}
