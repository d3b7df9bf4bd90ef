/// Markdown flashcard parser.
///
/// Handles the core format:
///   --- metadata block (optional, `recall: bullet reverse` overrides the level) ---
///   # Header card
///
///   second page
///
///   third page
///   - Term: definition          (bullet level: term / definition / rest)
///
/// Every boundary match starts a card that runs until the next match. Spans that
/// end up with fewer than two non-empty pages are dropped.
use std::sync::LazyLock;

use regex::{Match, Regex};

use crate::config::{CardLevel, ParseConfig};
use crate::identity;
use crate::types::{Card, CardState, FileData};

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^(#+)\s").unwrap());
static BULLET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^(#+|-)\s").unwrap());
static ASTERISK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(#+|\*)\s").unwrap());

static METADATA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\A---[ \t]*\r?\n((?s:.*?)\r?\n)?---[ \t]*(?:\r?\n|\z)").unwrap()
});
static PAGE_BREAK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\r?\n\r?\n").unwrap());

/// Reverse cards are scheduled this far behind their original.
pub const REVERSE_DELAY_MS: i64 = identity::JITTER_SPAN_MS;

/// Compiled boundary matcher for a card level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundary {
    pub level: CardLevel,
    /// Generate reverse cards for non-header spans.
    pub reverse: bool,
}

impl Boundary {
    pub fn from_config(config: &ParseConfig) -> Self {
        Self {
            level: config.level,
            reverse: config.reverse,
        }
    }

    pub fn matcher(&self) -> &'static Regex {
        match self.level {
            CardLevel::Header => &HEADER_RE,
            CardLevel::Bullet => &BULLET_RE,
            CardLevel::Asterisk => &ASTERISK_RE,
        }
    }
}

/// Parse a document into cards. Never fails: unusable input yields no cards.
pub fn parse(content: &str, config: &ParseConfig) -> FileData {
    let (body_offset, effective) = match METADATA_RE.captures(content) {
        Some(caps) => {
            let metadata = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            let end = caps.get(0).map(|m| m.end()).unwrap_or(0);
            (end, apply_metadata(config, metadata))
        }
        None => (0, config.clone()),
    };

    let cards = parse_body(&content[body_offset..], body_offset, &effective);
    log::debug!(
        "[recall.parser] {} cards at {} level (reverse: {})",
        cards.len(),
        effective.level,
        effective.reverse
    );

    let mut data = FileData::empty(effective);
    data.cards = cards;
    data
}

/// Apply `recall:` settings from a metadata block on top of `config`.
fn apply_metadata(config: &ParseConfig, metadata: &str) -> ParseConfig {
    let mut effective = config.clone();

    for line in metadata.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key.trim() != "recall" {
            continue;
        }

        let tokens = value
            .split(|c: char| c.is_whitespace() || c == ',' || c == '+')
            .map(|t| t.trim_matches(|c| c == '"' || c == '\''))
            .filter(|t| !t.is_empty());
        for token in tokens {
            if token.eq_ignore_ascii_case("reverse") {
                effective.reverse = true;
                continue;
            }
            match token.parse::<CardLevel>() {
                Ok(level) => effective.level = level,
                Err(e) => log::warn!("[recall.parser.metadata] Ignoring {}", e),
            }
        }
    }

    effective
}

fn parse_body(body: &str, body_offset: usize, config: &ParseConfig) -> Vec<Card> {
    let boundary = Boundary::from_config(config);
    let matcher = boundary.matcher();
    let matches: Vec<Match> = matcher.find_iter(body).collect();

    let mut cards = Vec::new();
    if matches.is_empty() {
        return cards;
    }

    // Enclosing header titles indexed by depth. Slot 0 is never filled.
    let mut header_stack: Vec<Option<String>> = vec![None];

    for (i, m) in matches.iter().enumerate() {
        let span_end = matches.get(i + 1).map(|next| next.start()).unwrap_or(body.len());
        let card_type = m.as_str().trim().to_string();
        let is_header = card_type.starts_with('#');

        let text = format!("# {}", &body[m.end()..span_end]);
        let text = text.trim();

        let pages = if is_header {
            header_pages(text)
        } else {
            divider_pages(text, &config.line_divider)
        };
        let pages: Vec<String> = pages.into_iter().filter(|p| !p.trim().is_empty()).collect();

        let depth = card_type.len();
        if is_header {
            header_stack.truncate(depth);
        }
        let title = pages.first().map(|page| header_title(page));

        if pages.len() > 1 {
            let header_path: Vec<String> = header_stack.iter().flatten().cloned().collect();
            let checksums = vec![
                identity::checksum(&pages),
                identity::stripped_checksum(&pages, matcher),
            ];
            let next_review_date = identity::jitter_ms(&checksums[0]);

            let card = Card {
                pages,
                offset: body_offset + m.start(),
                end_offset: body_offset + span_end,
                card_type,
                header_path,
                checksums,
                recall: 0.0,
                success: None,
                state: CardState::New,
                last_review_date: None,
                next_review_date,
                reverse: false,
                reverse_for: None,
            };

            if boundary.reverse && !is_header {
                let index = cards.len();
                let mut original = card;
                let mut mirror = reverse_card(&original, matcher);
                original.reverse_for = Some(index + 1);
                mirror.reverse_for = Some(index);
                cards.push(original);
                cards.push(mirror);
            } else {
                cards.push(card);
            }
        }

        if is_header {
            header_stack.resize(depth, None);
            header_stack.push(title);
        }
    }

    cards
}

/// Split a header span into pages on blank lines. Blank lines inside an open
/// fenced code block do not break the page.
fn header_pages(text: &str) -> Vec<String> {
    let mut pages = Vec::new();
    let mut open: Option<String> = None;
    let mut fences = 0usize;

    for chunk in PAGE_BREAK_RE.split(text) {
        let page = match open.take() {
            Some(mut prev) => {
                prev.push_str("\n\n");
                prev.push_str(chunk);
                prev
            }
            None => chunk.to_string(),
        };

        fences += count_fences(chunk);
        if fences % 2 == 1 {
            open = Some(page);
        } else {
            fences = 0;
            pages.push(page.trim().to_string());
        }
    }

    // Unterminated fence: keep the rest as one page
    if let Some(page) = open {
        pages.push(page.trim().to_string());
    }

    pages
}

fn count_fences(chunk: &str) -> usize {
    chunk
        .lines()
        .filter(|line| {
            let line = line.trim_start();
            line.starts_with("```") || line.starts_with("~~~")
        })
        .count()
}

/// Split a bullet span on the line divider, then split the last segment on its
/// first newline: `term / definition / remaining lines`.
fn divider_pages(text: &str, divider: &str) -> Vec<String> {
    let mut pages: Vec<String> = if divider.is_empty() {
        vec![text.trim().to_string()]
    } else {
        text.split(divider).map(|p| p.trim().to_string()).collect()
    };

    if let Some(last) = pages.pop() {
        let mut lines = last.split('\n').map(str::trim);
        let first = lines.next().unwrap_or("").to_string();
        let rest = lines.collect::<Vec<_>>().join("\n");
        pages.push(first);
        pages.push(rest);
    }

    pages
}

/// Section title of a header page: its first line without the marker.
fn header_title(page: &str) -> String {
    let first_line = page.lines().next().unwrap_or("");
    identity::strip_markers(first_line, &HEADER_RE).trim().to_string()
}

/// Mirror of a bullet card: the answer becomes the header, the term the answer.
fn reverse_card(original: &Card, matcher: &Regex) -> Card {
    let mut pages = Vec::with_capacity(original.pages.len());
    pages.push(format!("# {}", original.pages[1]));
    pages.push(identity::strip_markers(&original.pages[0], matcher).trim().to_string());
    pages.extend(original.pages[2..].iter().cloned());

    let checksums = vec![
        identity::checksum(&pages),
        identity::stripped_checksum(&pages, matcher),
    ];

    Card {
        pages,
        checksums,
        reverse: true,
        next_review_date: original.next_review_date + REVERSE_DELAY_MS,
        ..original.clone()
    }
}
