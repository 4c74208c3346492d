//! Light markdown parsing for analysis text.
//!
//! Handles what generated analyses actually contain: `#` headings, bullet
//! and numbered lists, `**bold**` emphasis, horizontal rules and paragraphs.
//! Inline bold inside a longer line is not styled, only unwrapped.

use std::sync::LazyLock;

use regex::Regex;

static NUMBERED_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,3})[.)]\s+(.*)$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading { level: u8, text: String },
    Paragraph { text: String, bold: bool },
    Bullet { text: String },
    Numbered { number: String, text: String },
    Rule,
}

/// Split text into blocks. Consecutive plain lines join into one paragraph.
pub fn parse(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();

    for raw in text.lines() {
        let line = raw.trim();

        if line.is_empty() {
            flush_paragraph(&mut paragraph, &mut blocks);
            continue;
        }

        if let Some(block) = parse_line(line) {
            flush_paragraph(&mut paragraph, &mut blocks);
            blocks.push(block);
        } else {
            paragraph.push(line);
        }
    }
    flush_paragraph(&mut paragraph, &mut blocks);

    blocks
}

/// Parse a line that forms a block on its own; plain text returns None.
fn parse_line(line: &str) -> Option<Block> {
    if is_rule(line) {
        return Some(Block::Rule);
    }

    let hashes = line.chars().take_while(|&c| c == '#').count();
    if (1..=6).contains(&hashes) && line[hashes..].starts_with(' ') {
        let (text, _) = strip_bold(line[hashes..].trim());
        return Some(Block::Heading {
            level: hashes.min(3) as u8,
            text,
        });
    }

    for marker in ["- ", "* ", "+ "] {
        if let Some(rest) = line.strip_prefix(marker) {
            let (text, _) = strip_bold(rest.trim());
            return Some(Block::Bullet { text });
        }
    }

    if let Some(caps) = NUMBERED_ITEM.captures(line) {
        let (text, _) = strip_bold(caps[2].trim());
        return Some(Block::Numbered {
            number: caps[1].to_string(),
            text,
        });
    }

    None
}

fn flush_paragraph(lines: &mut Vec<&str>, blocks: &mut Vec<Block>) {
    if lines.is_empty() {
        return;
    }
    let joined = lines.join(" ");
    lines.clear();
    let (text, bold) = strip_bold(&joined);
    if !text.is_empty() {
        blocks.push(Block::Paragraph { text, bold });
    }
}

/// `---`, `***` or `___`, optionally spaced.
fn is_rule(line: &str) -> bool {
    let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();
    compact.len() >= 3
        && ['-', '*', '_']
            .iter()
            .any(|&m| compact.chars().all(|c| c == m))
}

/// Remove `**` markers. Reports whether the whole text was wrapped in them.
pub fn strip_bold(text: &str) -> (String, bool) {
    let fully_bold = text.len() > 4
        && text.starts_with("**")
        && text.ends_with("**")
        && !text[2..text.len() - 2].contains("**");
    (text.replace("**", "").trim().to_string(), fully_bold)
}
