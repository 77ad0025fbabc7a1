//! Chat answer structure: line-oriented blocks and inline spans.
//!
//! Answers from the SOP assistant use a small markdown-like dialect:
//! headings, bullets, numbered items, fenced code, quotes, callouts
//! (`WARNING:` etc.) and `Step N:` lines. [`parse_message`] turns an answer
//! into [`Block`]s; [`inline_spans`] splits a line's inline markup.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

static RE_BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)[-*•]\s(.*)$").unwrap());
static RE_NUMBERED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)(\d+)\.\s(.+)$").unwrap());
static RE_CALLOUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(WARNING|CAUTION|ALERT|DANGER|NOTE|IMPORTANT):\s*(.*)$").unwrap()
});
static RE_STEP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^Step\s+(\d+):\s*(.+)$").unwrap());
static RE_INLINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\*\*(?P<bold>.*?)\*\*|\*(?P<italic>.*?)\*|`(?P<code>.*?)`|(?P<url>https?://\S+)")
        .unwrap()
});

/// Severity of a callout line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CalloutKind {
    Warning,
    Caution,
    Alert,
    Danger,
    Note,
    Important,
}

impl CalloutKind {
    fn parse(label: &str) -> Option<Self> {
        Some(match label.to_ascii_uppercase().as_str() {
            "WARNING" => Self::Warning,
            "CAUTION" => Self::Caution,
            "ALERT" => Self::Alert,
            "DANGER" => Self::Danger,
            "NOTE" => Self::Note,
            "IMPORTANT" => Self::Important,
            _ => return None,
        })
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Warning => "Warning",
            Self::Caution => "Caution",
            Self::Alert => "Alert",
            Self::Danger => "Danger",
            Self::Note => "Note",
            Self::Important => "Important",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Blank,
    Heading { level: u8, text: String },
    Bullet { indented: bool, text: String },
    Numbered { indented: bool, number: u32, text: String },
    Code { code: String },
    Quote { text: String },
    Callout { kind: CalloutKind, text: String },
    Step { number: u32, text: String },
    Paragraph { text: String },
}

/// Inline markup within a block's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "text", rename_all = "lowercase")]
pub enum Span {
    Text(String),
    Bold(String),
    Italic(String),
    Code(String),
    Link(String),
}

/// Split a chat answer into blocks, one per line except fenced code, which
/// swallows lines up to its closing fence (or the end of the message).
pub fn parse_message(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        if line.trim().is_empty() {
            blocks.push(Block::Blank);
            continue;
        }

        if line.starts_with("```") {
            let code: Vec<&str> = lines.by_ref().take_while(|l| !l.starts_with("```")).collect();
            blocks.push(Block::Code {
                code: code.join("\n"),
            });
            continue;
        }

        if let Some(block) = heading(line) {
            blocks.push(block);
            continue;
        }

        if let Some(caps) = RE_BULLET.captures(line) {
            blocks.push(Block::Bullet {
                indented: !caps[1].is_empty(),
                text: caps[2].to_string(),
            });
            continue;
        }

        if let Some(caps) = RE_NUMBERED.captures(line) {
            if let Ok(number) = caps[2].parse() {
                blocks.push(Block::Numbered {
                    indented: !caps[1].is_empty(),
                    number,
                    text: caps[3].to_string(),
                });
                continue;
            }
        }

        if let Some(rest) = line.strip_prefix('>') {
            blocks.push(Block::Quote {
                text: rest.trim_start().to_string(),
            });
            continue;
        }

        if let Some(caps) = RE_CALLOUT.captures(line) {
            if let Some(kind) = CalloutKind::parse(&caps[1]) {
                blocks.push(Block::Callout {
                    kind,
                    text: caps[2].to_string(),
                });
                continue;
            }
        }

        if let Some(caps) = RE_STEP.captures(line) {
            if let Ok(number) = caps[1].parse() {
                blocks.push(Block::Step {
                    number,
                    text: caps[2].to_string(),
                });
                continue;
            }
        }

        blocks.push(Block::Paragraph {
            text: line.to_string(),
        });
    }

    blocks
}

fn heading(line: &str) -> Option<Block> {
    let level = line.chars().take_while(|&c| c == '#').count();
    if level == 0 {
        return None;
    }
    // Deeper headings render at the smallest size.
    let level = level.min(3) as u8;
    Some(Block::Heading {
        level,
        text: line.trim_start_matches('#').trim_start().to_string(),
    })
}

/// Split inline `**bold**`, `*italic*`, `` `code` `` and bare URLs.
pub fn inline_spans(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut last = 0;

    for caps in RE_INLINE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() > last {
            spans.push(Span::Text(text[last..whole.start()].to_string()));
        }
        let span = if let Some(m) = caps.name("bold") {
            Span::Bold(m.as_str().to_string())
        } else if let Some(m) = caps.name("italic") {
            Span::Italic(m.as_str().to_string())
        } else if let Some(m) = caps.name("code") {
            Span::Code(m.as_str().to_string())
        } else {
            Span::Link(whole.as_str().to_string())
        };
        spans.push(span);
        last = whole.end();
    }

    if last < text.len() {
        spans.push(Span::Text(text[last..].to_string()));
    }
    spans
}
