use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::config::ParseConfig;

/// Recall (in days) at or above which a card counts as archived.
pub const ARCHIVE_THRESHOLD: f64 = 10000.0;

/// Milliseconds in one scheduling day.
pub const DAY_MS: i64 = 24 * 3600 * 1000;

/// Start of the UTC day containing `timestamp` (milliseconds since the epoch).
pub fn day_start(timestamp: i64) -> i64 {
    timestamp.div_euclid(DAY_MS) * DAY_MS
}

/// Length of `days` scheduling days in milliseconds.
pub fn days_to_ms(days: f64) -> i64 {
    (days * DAY_MS as f64).round() as i64
}

/// Outcome of a single review, as recorded in the history log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewOutcome {
    Fail,
    Struggle,
    Success,
    Archive,
}

impl ReviewOutcome {
    /// Numeric code written to the `success` column of the log.
    pub fn code(self) -> u8 {
        match self {
            ReviewOutcome::Fail => 0,
            ReviewOutcome::Struggle => 1,
            ReviewOutcome::Success => 2,
            ReviewOutcome::Archive => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ReviewOutcome::Fail),
            1 => Some(ReviewOutcome::Struggle),
            2 => Some(ReviewOutcome::Success),
            3 => Some(ReviewOutcome::Archive),
            _ => None,
        }
    }

    /// Recall multiplier. `None` for ARCHIVE, which jumps straight to the threshold.
    pub fn multiplier(self) -> Option<f64> {
        match self {
            ReviewOutcome::Fail => Some(0.0),
            ReviewOutcome::Struggle => Some(0.5),
            ReviewOutcome::Success => Some(2.0),
            ReviewOutcome::Archive => None,
        }
    }
}

/// Display state of a card, derived from its recall and last outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardState {
    #[default]
    New,
    Good,
    Hard,
    Fail,
    Archived,
}

impl CardState {
    pub fn as_str(self) -> &'static str {
        match self {
            CardState::New => "NEW",
            CardState::Good => "GOOD",
            CardState::Hard => "HARD",
            CardState::Fail => "FAIL",
            CardState::Archived => "ARCHIVED",
        }
    }
}

impl fmt::Display for CardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Badge shown next to a card in the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Badge {
    /// The card's own state.
    State(CardState),
    /// A reverse card whose original is archived: `ARCHIVED.<own state>`.
    ArchivedPair(CardState),
}

impl fmt::Display for Badge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Badge::State(state) => write!(f, "{}", state),
            Badge::ArchivedPair(state) => write!(f, "{}.{}", CardState::Archived, state),
        }
    }
}

/// A reviewable unit extracted from a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    /// Front first, then the remaining pages. Always at least two.
    pub pages: Vec<String>,
    /// Byte offset of the card start in the source document.
    pub offset: usize,
    pub end_offset: usize,
    /// Trimmed boundary marker that started the card (`#`, `##`, `-`, `*`).
    pub card_type: String,
    pub header_path: Vec<String>,
    /// `[as extracted, markers stripped, ...checksums linked through history]`
    pub checksums: Vec<String>,
    /// Days until next review; `0` means never reviewed.
    pub recall: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<ReviewOutcome>,
    pub state: CardState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_review_date: Option<i64>,
    /// Milliseconds since the epoch. Unseen cards hold a small jitter value instead.
    pub next_review_date: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reverse: bool,
    /// Index of the paired card within the same `FileData`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reverse_for: Option<usize>,
}

impl Card {
    /// Primary identity: checksum over the pages as extracted.
    pub fn checksum(&self) -> &str {
        self.checksums.first().map(String::as_str).unwrap_or("")
    }

    pub fn has_checksum(&self, checksum: &str) -> bool {
        self.checksums.iter().any(|c| c == checksum)
    }

    /// Add a checksum to the lookup set unless already known.
    pub fn link_checksum(&mut self, checksum: &str) -> bool {
        if self.has_checksum(checksum) {
            return false;
        }
        self.checksums.push(checksum.to_string());
        true
    }

    pub fn is_new(&self) -> bool {
        self.recall == 0.0
    }
}

/// Parse result for one source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub path: PathBuf,
    /// Workspace root the document belongs to (owner of its review history).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    /// Effective configuration, after any metadata-block override.
    pub config: ParseConfig,
    pub cards: Vec<Card>,
}

impl FileData {
    pub fn empty(config: ParseConfig) -> Self {
        Self {
            path: PathBuf::new(),
            root: None,
            config,
            cards: Vec::new(),
        }
    }

    pub fn with_source(mut self, path: PathBuf, root: Option<PathBuf>) -> Self {
        self.path = path;
        self.root = root;
        self
    }

    /// The paired reverse/original card of `cards[index]`, if any.
    pub fn partner_of(&self, index: usize) -> Option<&Card> {
        self.cards
            .get(index)
            .and_then(|card| card.reverse_for)
            .and_then(|partner| self.cards.get(partner))
    }
}

/// One logged review event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub checksum: String,
    pub timestamp: i64,
    /// `None` when the logged code is unknown or malformed.
    pub success: Option<ReviewOutcome>,
    /// NaN when the logged value could not be parsed.
    pub recall: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_checksum: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_codes_roundtrip() {
        for outcome in [
            ReviewOutcome::Fail,
            ReviewOutcome::Struggle,
            ReviewOutcome::Success,
            ReviewOutcome::Archive,
        ] {
            assert_eq!(ReviewOutcome::from_code(outcome.code() as i64), Some(outcome));
        }
        assert_eq!(ReviewOutcome::from_code(42), None);
    }

    #[test]
    fn test_day_start() {
        assert_eq!(day_start(0), 0);
        assert_eq!(day_start(DAY_MS + 5), DAY_MS);
        assert_eq!(day_start(-1), -DAY_MS);
        assert_eq!(days_to_ms(0.5), DAY_MS / 2);
    }

    #[test]
    fn test_badge_display() {
        assert_eq!(Badge::State(CardState::Good).to_string(), "GOOD");
        assert_eq!(Badge::ArchivedPair(CardState::New).to_string(), "ARCHIVED.NEW");
    }

    #[test]
    fn test_link_checksum_dedupes() {
        let mut card = Card {
            pages: vec!["# Q".into(), "A".into()],
            offset: 0,
            end_offset: 7,
            card_type: "#".into(),
            header_path: Vec::new(),
            checksums: vec!["aa".into(), "bb".into()],
            recall: 0.0,
            success: None,
            state: CardState::New,
            last_review_date: None,
            next_review_date: 0,
            reverse: false,
            reverse_for: None,
        };
        assert!(!card.link_checksum("bb"));
        assert!(card.link_checksum("cc"));
        assert_eq!(card.checksums, vec!["aa", "bb", "cc"]);
        assert_eq!(card.checksum(), "aa");
    }
}
