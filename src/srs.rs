//! Spaced repetition scheduling.
//!
//! A review moves a card along six repetition levels:
//! - correct: up one level (capped at 5), ease +0.1
//! - incorrect: down two levels (floored at 0), ease -0.2
//!
//! The next review lands `round(BASE[level] * ease)` days later, and the
//! level decides the mastery status. Everything here is pure; the caller
//! supplies `now`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, ReviewError};
use crate::models::{CardStatus, Flashcard, MASTERY_LEVEL, MAX_LEVEL, MIN_EASE_FACTOR};

/// Base interval in days, indexed by repetition level.
pub const BASE_INTERVAL_DAYS: [u32; 6] = [0, 1, 3, 7, 14, 30];

/// Longest interval a review may schedule, about 2700 years. Larger ease
/// factors are rejected instead of overflowing the date arithmetic.
pub const MAX_INTERVAL_DAYS: i64 = 1_000_000;

const EASE_REWARD: f64 = 0.1;
const EASE_PENALTY: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub level: u8,
    pub ease_factor: f64,
}

/// Change in the owning deck's mastered count caused by one review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MasteryDelta {
    Gained,
    Unchanged,
    Lost,
}

impl MasteryDelta {
    pub fn between(was_mastered: bool, is_mastered: bool) -> Self {
        match (was_mastered, is_mastered) {
            (false, true) => MasteryDelta::Gained,
            (true, false) => MasteryDelta::Lost,
            _ => MasteryDelta::Unchanged,
        }
    }

    pub fn value(&self) -> i32 {
        match self {
            MasteryDelta::Gained => 1,
            MasteryDelta::Unchanged => 0,
            MasteryDelta::Lost => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryTransition {
    pub deck_id: Uuid,
    pub delta: MasteryDelta,
}

impl MasteryTransition {
    pub fn is_noop(&self) -> bool {
        self.delta == MasteryDelta::Unchanged
    }
}

/// Result of reviewing one card: the card as it should be stored, plus the
/// counter change to apply to its deck.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOutcome {
    pub card: Flashcard,
    pub transition: MasteryTransition,
}

/// When the card would be due next for each possible answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewPreview {
    pub if_correct: DateTime<Utc>,
    pub if_incorrect: DateTime<Utc>,
}

fn check_level(level: u8) -> Result<()> {
    if level > MAX_LEVEL {
        return Err(ReviewError::InvalidInput(format!(
            "repetition level {level} outside 0..={MAX_LEVEL}"
        )));
    }
    Ok(())
}

fn check_ease(ease_factor: f64) -> Result<()> {
    // NaN fails this comparison too
    if !(ease_factor >= MIN_EASE_FACTOR) || !ease_factor.is_finite() {
        return Err(ReviewError::InvalidInput(format!(
            "ease factor {ease_factor} below minimum {MIN_EASE_FACTOR}"
        )));
    }
    Ok(())
}

/// Computes the next level and ease factor from the current ones.
pub fn evaluate(level: u8, was_correct: bool, ease_factor: f64) -> Result<Evaluation> {
    check_level(level)?;
    check_ease(ease_factor)?;

    let evaluation = if was_correct {
        Evaluation {
            level: (level + 1).min(MAX_LEVEL),
            ease_factor: (ease_factor + EASE_REWARD).max(MIN_EASE_FACTOR),
        }
    } else {
        Evaluation {
            level: level.saturating_sub(2),
            ease_factor: (ease_factor - EASE_PENALTY).max(MIN_EASE_FACTOR),
        }
    };

    Ok(evaluation)
}

/// Interval in whole days. Half days round away from zero (1.5 -> 2).
pub fn interval_days(level: u8, ease_factor: f64) -> Result<i64> {
    check_level(level)?;
    check_ease(ease_factor)?;

    let base = BASE_INTERVAL_DAYS[level as usize] as f64;
    let days = (base * ease_factor).round();
    if !days.is_finite() || days > MAX_INTERVAL_DAYS as f64 {
        return Err(ReviewError::InvalidInput(format!(
            "ease factor {ease_factor} gives an interval beyond {MAX_INTERVAL_DAYS} days"
        )));
    }
    Ok(days as i64)
}

pub fn next_due_date(level: u8, ease_factor: f64, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let days = interval_days(level, ease_factor)?;
    Duration::try_days(days)
        .and_then(|interval| now.checked_add_signed(interval))
        .ok_or_else(|| ReviewError::InvalidInput(format!("due date {days} days after {now} is out of range")))
}

/// Status for a level. A card that has never been reviewed is always `New`.
pub fn classify(level: u8, review_count: u32) -> CardStatus {
    if review_count == 0 {
        return CardStatus::New;
    }
    match level {
        l if l >= MASTERY_LEVEL => CardStatus::Mastered,
        2 | 3 => CardStatus::Review,
        _ => CardStatus::Learning,
    }
}

fn check_card(card: &Flashcard) -> Result<()> {
    if card.correct_count > card.review_count {
        return Err(ReviewError::ConsistencyViolation(format!(
            "card {} has correct_count {} > review_count {}",
            card.id, card.correct_count, card.review_count
        )));
    }
    Ok(())
}

/// Applies one review to a copy of `card`.
pub fn review(card: &Flashcard, was_correct: bool, now: DateTime<Utc>) -> Result<ReviewOutcome> {
    check_card(card)?;
    let evaluation = evaluate(card.repetition_level, was_correct, card.ease_factor)?;
    let next_review_at = next_due_date(evaluation.level, evaluation.ease_factor, now)?;

    let mut updated = card.clone();
    updated.repetition_level = evaluation.level;
    updated.ease_factor = evaluation.ease_factor;
    updated.review_count += 1;
    if was_correct {
        updated.correct_count += 1;
    }
    updated.status = classify(updated.repetition_level, updated.review_count);
    updated.last_reviewed_at = Some(now);
    updated.next_review_at = Some(next_review_at);

    let transition = MasteryTransition {
        deck_id: card.deck_id,
        delta: MasteryDelta::between(card.is_mastered(), updated.is_mastered()),
    };

    log::debug!(
        "card {} reviewed ({}): level {} -> {}, ease {:.2} -> {:.2}, status {} -> {}",
        card.id,
        if was_correct { "correct" } else { "incorrect" },
        card.repetition_level,
        updated.repetition_level,
        card.ease_factor,
        updated.ease_factor,
        card.status,
        updated.status,
    );

    Ok(ReviewOutcome { card: updated, transition })
}

pub fn preview(card: &Flashcard, now: DateTime<Utc>) -> Result<ReviewPreview> {
    Ok(ReviewPreview {
        if_correct: review(card, true, now)?.card.next_review_at.unwrap_or(now),
        if_incorrect: review(card, false, now)?.card.next_review_at.unwrap_or(now),
    })
}
