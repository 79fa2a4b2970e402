//! Incremental maintenance of a deck's card and mastered counters.
//!
//! Counters change on card creation, deletion, and mastery transitions only.
//! A decrement below zero clamps to zero and is reported as a consistency
//! violation.

use uuid::Uuid;

use crate::error::{Result, ReviewError};
use crate::models::FlashcardDeck;
use crate::srs::{MasteryDelta, MasteryTransition};

fn decrement(counter: &mut u32, deck_id: Uuid, name: &str) -> Result<()> {
    match counter.checked_sub(1) {
        Some(value) => {
            *counter = value;
            Ok(())
        }
        None => {
            log::error!("deck {} {} would go negative, clamped to 0", deck_id, name);
            Err(ReviewError::ConsistencyViolation(format!(
                "deck {} {} decremented below zero",
                deck_id, name
            )))
        }
    }
}

impl FlashcardDeck {
    pub fn record_card_added(&mut self) {
        self.card_count += 1;
    }

    pub fn record_card_removed(&mut self, was_mastered: bool) -> Result<()> {
        let card_result = decrement(&mut self.card_count, self.id, "card_count");
        let mastered_result = if was_mastered {
            decrement(&mut self.mastered_count, self.id, "mastered_count")
        } else {
            Ok(())
        };

        // Both counters are updated before either failure is surfaced
        card_result.and(mastered_result)
    }

    pub fn apply_transition(&mut self, transition: &MasteryTransition) -> Result<()> {
        if transition.deck_id != self.id {
            return Err(ReviewError::InvalidInput(format!(
                "transition for deck {} applied to deck {}",
                transition.deck_id, self.id
            )));
        }

        match transition.delta {
            MasteryDelta::Gained => {
                self.mastered_count += 1;
                if self.mastered_count > self.card_count {
                    log::error!(
                        "deck {} mastered_count {} exceeds card_count {}",
                        self.id,
                        self.mastered_count,
                        self.card_count
                    );
                    return Err(ReviewError::ConsistencyViolation(format!(
                        "deck {} has more mastered cards than cards",
                        self.id
                    )));
                }
                Ok(())
            }
            MasteryDelta::Lost => decrement(&mut self.mastered_count, self.id, "mastered_count"),
            MasteryDelta::Unchanged => Ok(()),
        }
    }
}
