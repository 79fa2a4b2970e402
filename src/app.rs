use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::Config;
use crate::db::Db;
use crate::due;
use crate::models::{CardEdit, Flashcard, FlashcardDeck, NewFlashcard};
use crate::session::{DeckSummary, Session};
use crate::srs::{ReviewOutcome, ReviewPreview};

/// Ties the in-memory session to storage.
///
/// Storage is written first; the session only changes after the write
/// succeeded. Deck counters from reviews are written on their own and
/// queued for retry when that write fails. If the process stops before the
/// retry lands, the next load rebuilds the counters from the cards.
pub struct App {
    pub db: Db,
    pub session: Session,
    deck_write_retries: u32,
    pending_counters: HashSet<Uuid>,
}

impl App {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let db = Db::connect(&config.database_url, config.max_connections).await?;
        Self::with_db(db, config.deck_write_retries).await
    }

    pub async fn with_db(db: Db, deck_write_retries: u32) -> anyhow::Result<Self> {
        let session = db.load_session().await?;
        Ok(Self {
            db,
            session,
            deck_write_retries,
            pending_counters: HashSet::new(),
        })
    }

    pub fn pending_counter_writes(&self) -> usize {
        self.pending_counters.len()
    }

    pub async fn create_deck(&mut self, name: String, subject_id: Option<Uuid>, now: DateTime<Utc>) -> anyhow::Result<FlashcardDeck> {
        self.flush_pending_counters().await;

        let deck = FlashcardDeck::new(name, subject_id, now);
        self.session.check_new_deck(&deck)?;

        self.db.insert_deck(&deck).await?;
        self.session.insert_deck(deck.clone())?;
        Ok(deck)
    }

    pub async fn delete_deck(&mut self, deck_id: Uuid) -> anyhow::Result<usize> {
        self.session.deck(deck_id)?;
        self.db.delete_deck(deck_id).await?;
        self.pending_counters.remove(&deck_id);

        let (_, removed) = self.session.delete_deck(deck_id)?;
        Ok(removed.len())
    }

    pub async fn add_card(&mut self, deck_id: Uuid, content: NewFlashcard, now: DateTime<Utc>) -> anyhow::Result<Flashcard> {
        self.flush_pending_counters().await;

        let card = self.session.new_card(deck_id, content, now)?;
        let mut deck = self.session.deck(deck_id)?.clone();
        deck.record_card_added();

        self.db.insert_card(&card, &deck).await?;
        self.session.insert_card(card.clone())?;
        self.pending_counters.remove(&deck_id);
        Ok(card)
    }

    pub async fn edit_card(&mut self, card_id: Uuid, edit: &CardEdit) -> anyhow::Result<Flashcard> {
        edit.check()?;
        let mut card = self.session.card(card_id)?.clone();
        edit.apply_to(&mut card);

        self.db.update_card_content(&card).await?;
        Ok(self.session.edit_card(card_id, edit)?)
    }

    pub async fn delete_card(&mut self, card_id: Uuid) -> anyhow::Result<Flashcard> {
        self.flush_pending_counters().await;

        let card = self.session.card(card_id)?.clone();
        let mut deck = self.session.deck(card.deck_id)?.clone();
        deck.record_card_removed(card.is_mastered())?;

        self.db.delete_card(card_id, &deck).await?;
        self.pending_counters.remove(&deck.id);
        Ok(self.session.delete_card(card_id)?)
    }

    pub async fn review_card(&mut self, card_id: Uuid, was_correct: bool, now: DateTime<Utc>) -> anyhow::Result<ReviewOutcome> {
        self.flush_pending_counters().await;

        let outcome = self.session.plan_review(card_id, was_correct, now)?;
        self.db.save_review(&outcome.card).await?;

        if let Err(e) = self.session.apply_review(&outcome) {
            log::error!("review of card {} left deck {} inconsistent: {}", card_id, outcome.transition.deck_id, e);
            // The card is stored either way; keep the clamped counters with it
            if e.is_consistency_violation() {
                self.write_deck_counters(outcome.transition.deck_id).await;
            }
            return Err(e.into());
        }

        if !outcome.transition.is_noop() {
            self.write_deck_counters(outcome.transition.deck_id).await;
        }
        Ok(outcome)
    }

    pub fn preview(&self, card_id: Uuid, now: DateTime<Utc>) -> anyhow::Result<ReviewPreview> {
        Ok(self.session.preview(card_id, now)?)
    }

    /// Due cards in study order, at most `limit` of them.
    pub fn study_queue(&self, deck_id: Option<Uuid>, now: DateTime<Utc>, limit: Option<usize>) -> anyhow::Result<Vec<Flashcard>> {
        let mut due = self.session.due_cards(deck_id, now)?;
        due::sort_for_study(&mut due);
        if let Some(limit) = limit {
            due.truncate(limit);
        }
        Ok(due.into_iter().cloned().collect())
    }

    pub fn deck_summaries(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<DeckSummary>> {
        let mut summaries = self
            .session
            .decks()
            .map(|deck| self.session.deck_summary(deck.id, now))
            .collect::<Result<Vec<_>, _>>()?;
        summaries.sort_by(|a, b| a.deck.created_at.cmp(&b.deck.created_at).then_with(|| a.deck.name.cmp(&b.deck.name)));
        Ok(summaries)
    }

    async fn write_deck_counters(&mut self, deck_id: Uuid) {
        let Ok(deck) = self.session.deck(deck_id).cloned() else {
            return;
        };

        for attempt in 0..=self.deck_write_retries {
            match self.db.save_deck_counters(&deck).await {
                Ok(()) => {
                    self.pending_counters.remove(&deck_id);
                    return;
                }
                Err(e) => log::warn!(
                    "writing counters for deck {} failed (attempt {}): {:#}",
                    deck_id,
                    attempt + 1,
                    e
                ),
            }
        }

        log::warn!("queued counter write for deck {}", deck_id);
        self.pending_counters.insert(deck_id);
    }

    async fn flush_pending_counters(&mut self) {
        if self.pending_counters.is_empty() {
            return;
        }

        let pending: Vec<Uuid> = self.pending_counters.drain().collect();
        for deck_id in pending {
            let Ok(deck) = self.session.deck(deck_id).cloned() else {
                continue;
            };
            if let Err(e) = self.db.save_deck_counters(&deck).await {
                log::warn!("retrying counters for deck {} failed: {:#}", deck_id, e);
                self.pending_counters.insert(deck_id);
            }
        }
    }
}
