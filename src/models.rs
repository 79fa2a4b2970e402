use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ReviewError;

/// Highest repetition level a card can reach.
pub const MAX_LEVEL: u8 = 5;
/// Level from which a card counts as mastered.
pub const MASTERY_LEVEL: u8 = 4;
pub const DEFAULT_EASE_FACTOR: f64 = 2.5;
/// Ease factor never drops below this, otherwise intervals collapse.
pub const MIN_EASE_FACTOR: f64 = 1.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum CardStatus {
    /// Never reviewed
    #[default]
    New,
    Learning,
    Review,
    /// Excluded from due lists
    Mastered,
}

impl CardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardStatus::New => "new",
            CardStatus::Learning => "learning",
            CardStatus::Review => "review",
            CardStatus::Mastered => "mastered",
        }
    }

    pub fn is_mastered(&self) -> bool {
        matches!(self, CardStatus::Mastered)
    }
}

impl fmt::Display for CardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CardStatus {
    type Err = ReviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(CardStatus::New),
            "learning" => Ok(CardStatus::Learning),
            "review" => Ok(CardStatus::Review),
            "mastered" => Ok(CardStatus::Mastered),
            other => Err(ReviewError::InvalidInput(format!("unknown card status '{other}'"))),
        }
    }
}

/// A question/answer pair under spaced repetition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flashcard {
    pub id: Uuid,
    pub deck_id: Uuid,
    pub front: String,
    pub back: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    pub status: CardStatus,
    pub repetition_level: u8,
    pub ease_factor: f64,
    pub review_count: u32,
    pub correct_count: u32,
    pub last_reviewed_at: Option<DateTime<Utc>>,
    /// Unset until the first review; an unset value means due now.
    pub next_review_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Flashcard {
    pub fn new(deck_id: Uuid, content: NewFlashcard, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            deck_id,
            front: content.front,
            back: content.back,
            hint: content.hint,
            status: CardStatus::New,
            repetition_level: 0,
            ease_factor: DEFAULT_EASE_FACTOR,
            review_count: 0,
            correct_count: 0,
            last_reviewed_at: None,
            next_review_at: None,
            created_at: now,
        }
    }

    pub fn is_mastered(&self) -> bool {
        self.status.is_mastered()
    }
}

/// Caller-supplied content for a new card. Scheduling fields always start at their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFlashcard {
    pub front: String,
    pub back: String,
    #[serde(default)]
    pub hint: Option<String>,
}

impl NewFlashcard {
    pub fn new(front: impl Into<String>, back: impl Into<String>) -> Self {
        Self {
            front: front.into(),
            back: back.into(),
            hint: None,
        }
    }
}

/// Text edit of an existing card; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardEdit {
    #[serde(default)]
    pub front: Option<String>,
    #[serde(default)]
    pub back: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

impl CardEdit {
    pub fn is_empty(&self) -> bool {
        self.front.is_none() && self.back.is_none() && self.hint.is_none()
    }

    /// Front and back may be replaced but never blanked.
    pub fn check(&self) -> Result<(), ReviewError> {
        let blank = |text: &Option<String>| text.as_deref().is_some_and(|t| t.trim().is_empty());
        if blank(&self.front) || blank(&self.back) {
            return Err(ReviewError::InvalidInput("card front and back must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn apply_to(&self, card: &mut Flashcard) {
        if let Some(front) = &self.front {
            card.front = front.clone();
        }
        if let Some(back) = &self.back {
            card.back = back.clone();
        }
        if let Some(hint) = &self.hint {
            card.hint = if hint.is_empty() { None } else { Some(hint.clone()) };
        }
    }
}

/// A named collection of cards. The two counters are maintained incrementally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashcardDeck {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub card_count: u32,
    #[serde(default)]
    pub mastered_count: u32,
    pub created_at: DateTime<Utc>,
}

impl FlashcardDeck {
    pub fn new(name: String, subject_id: Option<Uuid>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id,
            name,
            card_count: 0,
            mastered_count: 0,
            created_at: now,
        }
    }
}
