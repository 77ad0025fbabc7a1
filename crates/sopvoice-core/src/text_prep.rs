//! Text preparation for speech: chat answers rendered as plain sentences.
//!
//! Pure functions, no I/O. Builds on [`crate::message`] so that what is
//! spoken follows the same block structure the chat view displays.

use regex::Regex;
use std::sync::LazyLock;

use crate::message::{Block, Span, inline_spans, parse_message};

static RE_MULTI_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s{2,}").unwrap());

const CODE_PLACEHOLDER: &str = "See the code in our conversation.";

/// Render a chat answer as text suitable for speech synthesis.
///
/// Markup is removed, code blocks are replaced with a short placeholder,
/// URLs are dropped, and every block ends as its own sentence.
pub fn speakable_text(message: &str) -> String {
    let mut sentences: Vec<String> = Vec::new();

    for block in parse_message(message) {
        let sentence = match block {
            Block::Blank => continue,
            Block::Code { .. } => CODE_PLACEHOLDER.to_string(),
            Block::Heading { text, .. }
            | Block::Bullet { text, .. }
            | Block::Numbered { text, .. }
            | Block::Quote { text }
            | Block::Paragraph { text } => plain(&text),
            Block::Callout { kind, text } => format!("{}. {}", kind.label(), plain(&text)),
            Block::Step { number, text } => format!("Step {number}. {}", plain(&text)),
        };
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }
        sentences.push(terminate(sentence));
    }

    let joined = sentences.join(" ");
    RE_MULTI_SPACE.replace_all(&joined, " ").trim().to_string()
}

/// True when `text` has anything worth synthesizing.
pub fn is_speakable(text: &str) -> bool {
    text.trim().chars().count() >= 2 && text.chars().any(|c| c.is_alphanumeric())
}

fn plain(text: &str) -> String {
    inline_spans(text)
        .into_iter()
        .filter_map(|span| match span {
            Span::Text(t) | Span::Bold(t) | Span::Italic(t) | Span::Code(t) => Some(t),
            Span::Link(_) => None,
        })
        .collect()
}

fn terminate(sentence: &str) -> String {
    if sentence.ends_with(['.', '!', '?', ':', ';']) {
        sentence.to_string()
    } else {
        format!("{sentence}.")
    }
}
