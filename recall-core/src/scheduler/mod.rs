/// Card state derivation and review scheduling.
///
/// Reverse cards are evaluated together with their partner (the card at
/// `reverse_for` in the same `FileData`), which callers pass alongside.
pub mod queue;

pub use queue::ReviewQueue;

use crate::identity;
use crate::types::{
    day_start, days_to_ms, Badge, Card, CardState, ReviewOutcome, ARCHIVE_THRESHOLD,
};

pub fn card_state(card: &Card) -> CardState {
    if card.recall == 0.0 {
        return CardState::New;
    }
    if card.recall >= ARCHIVE_THRESHOLD {
        return CardState::Archived;
    }
    match card.success {
        Some(ReviewOutcome::Fail) => CardState::Fail,
        Some(ReviewOutcome::Struggle) => CardState::Hard,
        Some(ReviewOutcome::Success) => CardState::Good,
        _ => CardState::Archived,
    }
}

pub fn refresh_state(card: &mut Card) {
    card.state = card_state(card);
}

/// Recall after a review with `outcome`.
///
/// An archived card reviewed with FAIL or STRUGGLE is un-archived first; one
/// reviewed with SUCCESS stays archived at exactly the threshold.
pub fn next_recall(recall: f64, outcome: ReviewOutcome) -> f64 {
    let Some(multiplier) = outcome.multiplier() else {
        return ARCHIVE_THRESHOLD;
    };

    let recall = if recall >= ARCHIVE_THRESHOLD {
        match outcome {
            ReviewOutcome::Success => ARCHIVE_THRESHOLD / multiplier,
            _ => recall - ARCHIVE_THRESHOLD,
        }
    } else {
        recall
    };
    (recall * multiplier).max(1.0)
}

/// Apply a review outcome at time `now` (ms since the epoch).
///
/// The card is rescheduled from the start of the current day, so the next
/// review date is always at least one day ahead of `now`. Logging the result
/// is left to the caller.
pub fn apply_review(card: &mut Card, outcome: ReviewOutcome, now: i64) {
    let today = day_start(now);
    card.recall = next_recall(card.recall, outcome);
    card.success = Some(outcome);
    card.last_review_date = Some(today);
    card.next_review_date = today
        .saturating_add(days_to_ms(card.recall))
        .saturating_add(identity::jitter_ms(card.checksum()));
    refresh_state(card);
}

/// Archive an active card or restore an archived one. Returns whether the card
/// is archived afterwards.
///
/// A restored card keeps at least one day of recall, and one archived through
/// the ARCHIVE outcome comes back as a success, so it stays reviewed.
pub fn toggle_archive(card: &mut Card) -> bool {
    if card.recall >= ARCHIVE_THRESHOLD {
        card.recall = (card.recall - ARCHIVE_THRESHOLD).max(1.0);
        if card.success == Some(ReviewOutcome::Archive) {
            card.success = Some(ReviewOutcome::Success);
        }
    } else {
        card.recall += ARCHIVE_THRESHOLD;
    }
    refresh_state(card);
    card.state == CardState::Archived
}

/// Carry the review state of `original` over to its edited replacement.
pub fn daisychain_card(card: &mut Card, original: &Card) {
    card.recall = original.recall;
    card.success = original.success;
    card.last_review_date = original.last_review_date;
    card.next_review_date = original.next_review_date;
    card.state = original.state;
}

/// Whether `card` should be shown in a review session at `now`.
///
/// A reverse card is held back until its original is archived.
pub fn is_card_due(card: &Card, partner: Option<&Card>, now: i64) -> bool {
    if card.reverse {
        if let Some(original) = partner {
            if original.state != CardState::Archived {
                return false;
            }
        }
    }
    card.next_review_date <= now
}

/// Badge to show next to `card`, or `None` when its pair is represented by the
/// other card.
pub fn decoration_badge_state(card: &Card, partner: Option<&Card>) -> Option<Badge> {
    let archived = card.state == CardState::Archived;
    let Some(partner) = partner else {
        return Some(Badge::State(card.state));
    };

    if archived == card.reverse {
        Some(Badge::State(card.state))
    } else if card.reverse && partner.state == CardState::Archived {
        Some(Badge::ArchivedPair(card.state))
    } else {
        None
    }
}
