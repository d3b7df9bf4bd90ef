use std::collections::VecDeque;
use std::path::PathBuf;

use super::is_card_due;
use crate::types::{Card, FileData};

/// A due card and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedCard {
    pub path: PathBuf,
    /// Index of the card within its `FileData`.
    pub index: usize,
    pub card: Card,
}

/// Cards due for review, earliest first.
#[derive(Debug, Clone, Default)]
pub struct ReviewQueue {
    cards: VecDeque<QueuedCard>,
    /// New cards left out because of the new-card limit.
    skipped_new: usize,
}

impl ReviewQueue {
    /// Collect the due cards of `files` at `now`, admitting at most
    /// `new_card_limit` never-reviewed cards. Reverse cards do not count
    /// against the limit.
    pub fn build<'a>(
        files: impl IntoIterator<Item = &'a FileData>,
        now: i64,
        new_card_limit: Option<usize>,
    ) -> Self {
        let mut due: Vec<QueuedCard> = Vec::new();
        for file in files {
            for (index, card) in file.cards.iter().enumerate() {
                if is_card_due(card, file.partner_of(index), now) {
                    due.push(QueuedCard {
                        path: file.path.clone(),
                        index,
                        card: card.clone(),
                    });
                }
            }
        }
        due.sort_by(|a, b| {
            a.card
                .next_review_date
                .cmp(&b.card.next_review_date)
                .then_with(|| a.path.cmp(&b.path))
                .then_with(|| a.index.cmp(&b.index))
        });

        let mut cards = VecDeque::with_capacity(due.len());
        let mut admitted_new = 0;
        let mut skipped_new = 0;
        for queued in due {
            if queued.card.is_new() && !queued.card.reverse {
                if new_card_limit.is_some_and(|limit| admitted_new >= limit) {
                    skipped_new += 1;
                    continue;
                }
                admitted_new += 1;
            }
            cards.push_back(queued);
        }

        if skipped_new > 0 {
            log::debug!("[recall.queue] Skipped {} new cards", skipped_new);
        }
        Self { cards, skipped_new }
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn skipped_new(&self) -> usize {
        self.skipped_new
    }

    pub fn new_cards(&self) -> usize {
        self.cards.iter().filter(|q| q.card.is_new()).count()
    }

    pub fn peek(&self) -> Option<&QueuedCard> {
        self.cards.front()
    }

    pub fn pop(&mut self) -> Option<QueuedCard> {
        self.cards.pop_front()
    }

    /// Move the front card to the back of the queue.
    pub fn skip(&mut self) {
        if let Some(card) = self.cards.pop_front() {
            self.cards.push_back(card);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedCard> {
        self.cards.iter()
    }
}
