use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::due;
use crate::error::{Result, ReviewError};
use crate::models::{CardEdit, CardStatus, Flashcard, FlashcardDeck, NewFlashcard, MAX_LEVEL, MIN_EASE_FACTOR};
use crate::srs::{self, ReviewOutcome, ReviewPreview};

/// Counts and accuracy for one deck, computed by scanning its cards.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckSummary {
    pub deck: FlashcardDeck,
    pub new: u32,
    pub learning: u32,
    pub review: u32,
    pub mastered: u32,
    pub due_now: u32,
    /// Share of reviews answered correctly, absent before the first review.
    pub accuracy: Option<f64>,
}

/// All decks and cards held in memory. Every mutation goes through `&mut self`,
/// so wrapping a session in a mutex serializes reviews per card and counter
/// updates per deck.
#[derive(Debug, Clone, Default)]
pub struct Session {
    decks: HashMap<Uuid, FlashcardDeck>,
    cards: HashMap<Uuid, Flashcard>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a session from stored rows, rejecting data whose counters or
    /// ownership do not add up.
    pub fn from_parts(decks: Vec<FlashcardDeck>, cards: Vec<Flashcard>) -> Result<Self> {
        let session = Self::from_rows(decks, cards)?;
        for deck_id in session.decks.keys() {
            session.verify_counters(*deck_id)?;
        }
        Ok(session)
    }

    /// Like `from_parts`, but drifted deck counters are rebuilt from the
    /// cards instead of rejected. Returns the ids of the repaired decks.
    pub fn from_parts_repairing(decks: Vec<FlashcardDeck>, cards: Vec<Flashcard>) -> Result<(Self, Vec<Uuid>)> {
        let mut session = Self::from_rows(decks, cards)?;
        let repaired = session.repair_counters();
        Ok((session, repaired))
    }

    fn from_rows(decks: Vec<FlashcardDeck>, cards: Vec<Flashcard>) -> Result<Self> {
        let mut session = Session::new();
        for deck in decks {
            session.decks.insert(deck.id, deck);
        }
        for card in cards {
            if !session.decks.contains_key(&card.deck_id) {
                return Err(ReviewError::ConsistencyViolation(format!(
                    "card {} belongs to missing deck {}",
                    card.id, card.deck_id
                )));
            }
            check_stored_card(&card)?;
            session.cards.insert(card.id, card);
        }
        Ok(session)
    }

    // ==================== Decks ====================

    pub fn create_deck(&mut self, name: String, subject_id: Option<Uuid>, now: DateTime<Utc>) -> Result<FlashcardDeck> {
        let deck = FlashcardDeck::new(name, subject_id, now);
        self.insert_deck(deck.clone())?;
        Ok(deck)
    }

    /// Checks that a deck built elsewhere can be registered. It must start empty.
    pub fn check_new_deck(&self, deck: &FlashcardDeck) -> Result<()> {
        if deck.name.trim().is_empty() {
            return Err(ReviewError::InvalidInput("deck name is empty".to_string()));
        }
        if deck.card_count != 0 || deck.mastered_count != 0 {
            return Err(ReviewError::InvalidInput(format!(
                "new deck {} must start with zero counters",
                deck.id
            )));
        }
        if self.decks.contains_key(&deck.id) {
            return Err(ReviewError::InvalidInput(format!("deck {} already exists", deck.id)));
        }
        Ok(())
    }

    pub fn insert_deck(&mut self, deck: FlashcardDeck) -> Result<()> {
        self.check_new_deck(&deck)?;
        log::info!("created deck {} ({})", deck.id, deck.name);
        self.decks.insert(deck.id, deck);
        Ok(())
    }

    pub fn deck(&self, deck_id: Uuid) -> Result<&FlashcardDeck> {
        self.decks.get(&deck_id).ok_or(ReviewError::DeckNotFound(deck_id))
    }

    pub fn decks(&self) -> impl Iterator<Item = &FlashcardDeck> {
        self.decks.values()
    }

    /// Removes a deck together with every card it owns.
    pub fn delete_deck(&mut self, deck_id: Uuid) -> Result<(FlashcardDeck, Vec<Flashcard>)> {
        let deck = self.decks.remove(&deck_id).ok_or(ReviewError::DeckNotFound(deck_id))?;

        let card_ids: Vec<Uuid> = self
            .cards
            .values()
            .filter(|c| c.deck_id == deck_id)
            .map(|c| c.id)
            .collect();
        let removed: Vec<Flashcard> = card_ids
            .iter()
            .filter_map(|id| self.cards.remove(id))
            .collect();

        log::info!("deleted deck {} and {} cards", deck_id, removed.len());
        Ok((deck, removed))
    }

    // ==================== Cards ====================

    pub fn card(&self, card_id: Uuid) -> Result<&Flashcard> {
        self.cards.get(&card_id).ok_or(ReviewError::CardNotFound(card_id))
    }

    pub fn cards_in_deck(&self, deck_id: Uuid) -> Vec<&Flashcard> {
        self.cards.values().filter(|c| c.deck_id == deck_id).collect()
    }

    /// Builds a card for `deck_id` without storing it.
    pub fn new_card(&self, deck_id: Uuid, content: NewFlashcard, now: DateTime<Utc>) -> Result<Flashcard> {
        self.deck(deck_id)?;
        if content.front.trim().is_empty() || content.back.trim().is_empty() {
            return Err(ReviewError::InvalidInput("card front and back must not be empty".to_string()));
        }
        Ok(Flashcard::new(deck_id, content, now))
    }

    pub fn add_card(&mut self, deck_id: Uuid, content: NewFlashcard, now: DateTime<Utc>) -> Result<Flashcard> {
        let card = self.new_card(deck_id, content, now)?;
        self.insert_card(card.clone())?;
        Ok(card)
    }

    /// Stores a freshly built card and bumps its deck's card count.
    pub fn insert_card(&mut self, card: Flashcard) -> Result<()> {
        if card.status != CardStatus::New || card.review_count != 0 {
            return Err(ReviewError::InvalidInput(format!(
                "card {} must be new when added",
                card.id
            )));
        }
        if self.cards.contains_key(&card.id) {
            return Err(ReviewError::InvalidInput(format!("card {} already exists", card.id)));
        }
        let deck = self
            .decks
            .get_mut(&card.deck_id)
            .ok_or(ReviewError::DeckNotFound(card.deck_id))?;
        deck.record_card_added();

        log::debug!("added card {} to deck {}", card.id, card.deck_id);
        self.cards.insert(card.id, card);
        Ok(())
    }

    /// Changes card text. Scheduling fields are never touched.
    pub fn edit_card(&mut self, card_id: Uuid, edit: &CardEdit) -> Result<Flashcard> {
        edit.check()?;
        let card = self.cards.get_mut(&card_id).ok_or(ReviewError::CardNotFound(card_id))?;
        edit.apply_to(card);
        Ok(card.clone())
    }

    pub fn delete_card(&mut self, card_id: Uuid) -> Result<Flashcard> {
        let card = self.cards.remove(&card_id).ok_or(ReviewError::CardNotFound(card_id))?;
        let deck = self
            .decks
            .get_mut(&card.deck_id)
            .ok_or(ReviewError::DeckNotFound(card.deck_id))?;
        deck.record_card_removed(card.is_mastered())?;

        log::debug!("deleted card {} from deck {}", card.id, card.deck_id);
        Ok(card)
    }

    // ==================== Reviews ====================

    /// Computes the effect of a review without applying it.
    pub fn plan_review(&self, card_id: Uuid, was_correct: bool, now: DateTime<Utc>) -> Result<ReviewOutcome> {
        let card = self.card(card_id)?;
        srs::review(card, was_correct, now)
    }

    /// Stores the reviewed card and applies its mastery transition to the deck.
    ///
    /// The card is stored even if the deck counter update reports a
    /// consistency violation; the error is returned so the caller can surface it.
    pub fn apply_review(&mut self, outcome: &ReviewOutcome) -> Result<()> {
        let card_id = outcome.card.id;
        let current = self.cards.get_mut(&card_id).ok_or(ReviewError::CardNotFound(card_id))?;
        if current.review_count + 1 != outcome.card.review_count {
            return Err(ReviewError::InvalidInput(format!(
                "stale review for card {}: stored {} reviews, outcome expects {}",
                card_id,
                current.review_count,
                outcome.card.review_count.saturating_sub(1)
            )));
        }
        *current = outcome.card.clone();

        let deck = self
            .decks
            .get_mut(&outcome.transition.deck_id)
            .ok_or(ReviewError::DeckNotFound(outcome.transition.deck_id))?;
        deck.apply_transition(&outcome.transition)
    }

    /// Single entry point for a review: evaluate, reschedule, classify, and
    /// update deck counters.
    pub fn review_card(&mut self, card_id: Uuid, was_correct: bool, now: DateTime<Utc>) -> Result<ReviewOutcome> {
        let outcome = self.plan_review(card_id, was_correct, now)?;
        self.apply_review(&outcome)?;
        Ok(outcome)
    }

    pub fn preview(&self, card_id: Uuid, now: DateTime<Utc>) -> Result<ReviewPreview> {
        srs::preview(self.card(card_id)?, now)
    }

    pub fn due_cards(&self, deck_id: Option<Uuid>, now: DateTime<Utc>) -> Result<Vec<&Flashcard>> {
        if let Some(id) = deck_id {
            self.deck(id)?;
        }
        Ok(due::due_cards(self.cards.values(), deck_id, now))
    }

    // ==================== Aggregates ====================

    /// Card and mastered counts by scanning the deck's cards.
    fn scan_counters(&self, deck_id: Uuid) -> (u32, u32) {
        let cards = self.cards_in_deck(deck_id);
        let mastered = cards.iter().filter(|c| c.is_mastered()).count() as u32;
        (cards.len() as u32, mastered)
    }

    /// Recounts a deck by scanning and compares with its stored counters.
    pub fn verify_counters(&self, deck_id: Uuid) -> Result<()> {
        let deck = self.deck(deck_id)?;
        let (actual_cards, actual_mastered) = self.scan_counters(deck_id);

        if deck.card_count != actual_cards || deck.mastered_count != actual_mastered {
            log::error!(
                "deck {} counters drifted: stored {}/{} mastered, actual {}/{}",
                deck_id,
                deck.mastered_count,
                deck.card_count,
                actual_mastered,
                actual_cards
            );
            return Err(ReviewError::ConsistencyViolation(format!(
                "deck {} counters ({} cards, {} mastered) do not match its cards ({}, {})",
                deck_id, deck.card_count, deck.mastered_count, actual_cards, actual_mastered
            )));
        }
        Ok(())
    }

    /// Overwrites drifted counters with scanned values and returns the
    /// affected deck ids, sorted.
    pub fn repair_counters(&mut self) -> Vec<Uuid> {
        let mut drifted: Vec<Uuid> = self
            .decks
            .keys()
            .copied()
            .filter(|id| self.verify_counters(*id).is_err())
            .collect();
        drifted.sort();

        for deck_id in &drifted {
            let (card_count, mastered_count) = self.scan_counters(*deck_id);
            if let Some(deck) = self.decks.get_mut(deck_id) {
                deck.card_count = card_count;
                deck.mastered_count = mastered_count;
                log::warn!(
                    "rebuilt counters for deck {}: {} cards, {} mastered",
                    deck_id,
                    card_count,
                    mastered_count
                );
            }
        }
        drifted
    }

    pub fn deck_summary(&self, deck_id: Uuid, now: DateTime<Utc>) -> Result<DeckSummary> {
        let deck = self.deck(deck_id)?;
        let mut summary = DeckSummary {
            deck: deck.clone(),
            new: 0,
            learning: 0,
            review: 0,
            mastered: 0,
            due_now: 0,
            accuracy: None,
        };

        let mut reviews = 0u64;
        let mut correct = 0u64;
        for card in self.cards_in_deck(deck_id) {
            match card.status {
                CardStatus::New => summary.new += 1,
                CardStatus::Learning => summary.learning += 1,
                CardStatus::Review => summary.review += 1,
                CardStatus::Mastered => summary.mastered += 1,
            }
            if card.is_due(now) {
                summary.due_now += 1;
            }
            reviews += card.review_count as u64;
            correct += card.correct_count as u64;
        }
        if reviews > 0 {
            summary.accuracy = Some(correct as f64 / reviews as f64);
        }

        Ok(summary)
    }
}

/// Rejects a stored card whose scheduling fields could never come out of a review.
fn check_stored_card(card: &Flashcard) -> Result<()> {
    let problem = if card.repetition_level > MAX_LEVEL {
        format!("level {} above {}", card.repetition_level, MAX_LEVEL)
    } else if !(card.ease_factor >= MIN_EASE_FACTOR) || !card.ease_factor.is_finite() {
        format!("ease factor {} below {}", card.ease_factor, MIN_EASE_FACTOR)
    } else if card.correct_count > card.review_count {
        format!("correct_count {} > review_count {}", card.correct_count, card.review_count)
    } else if card.status != srs::classify(card.repetition_level, card.review_count) {
        format!(
            "status {} does not match level {} after {} reviews",
            card.status, card.repetition_level, card.review_count
        )
    } else {
        return Ok(());
    };
    Err(ReviewError::ConsistencyViolation(format!("card {} has {}", card.id, problem)))
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
