use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{CardStatus, Flashcard};

impl Flashcard {
    /// Never-reviewed cards are due immediately; mastered cards are never due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if self.is_mastered() {
            return false;
        }
        match self.next_review_at {
            None => true,
            Some(at) => at <= now,
        }
    }
}

/// Cards eligible for review at `now`, optionally limited to one deck.
/// Order follows the input and carries no meaning.
pub fn due_cards<'a, I>(cards: I, deck_id: Option<Uuid>, now: DateTime<Utc>) -> Vec<&'a Flashcard>
where
    I: IntoIterator<Item = &'a Flashcard>,
{
    cards
        .into_iter()
        .filter(|c| deck_id.map_or(true, |id| c.deck_id == id))
        .filter(|c| c.is_due(now))
        .collect()
}

fn priority(status: CardStatus) -> u8 {
    match status {
        CardStatus::Learning => 1,
        CardStatus::Review => 2,
        CardStatus::New => 3,
        CardStatus::Mastered => 4,
    }
}

/// Study order: learning, then review, then new cards.
/// Within reviewed groups the most overdue card comes first.
pub fn sort_for_study(cards: &mut [&Flashcard]) {
    cards.sort_by(|a, b| {
        priority(a.status)
            .cmp(&priority(b.status))
            .then_with(|| match (a.next_review_at, b.next_review_at) {
                (Some(x), Some(y)) => x.cmp(&y),
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (None, None) => a.created_at.cmp(&b.created_at),
            })
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewFlashcard;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap()
    }

    fn card(deck_id: Uuid, status: CardStatus, next: Option<DateTime<Utc>>) -> Flashcard {
        let mut card = Flashcard::new(deck_id, NewFlashcard::new("q", "a"), now() - Duration::days(30));
        card.status = status;
        card.next_review_at = next;
        if status != CardStatus::New {
            card.review_count = 1;
        }
        card
    }

    #[test]
    fn test_mixed_deck_selection() {
        let deck = Uuid::new_v4();
        let yesterday = Some(now() - Duration::days(1));
        let tomorrow = Some(now() + Duration::days(1));

        let mut cards = vec![
            card(deck, CardStatus::Mastered, yesterday),
            card(deck, CardStatus::Mastered, None),
            card(deck, CardStatus::Mastered, tomorrow),
            card(deck, CardStatus::New, None),
            card(deck, CardStatus::New, None),
            card(deck, CardStatus::Review, yesterday),
            card(deck, CardStatus::Learning, tomorrow),
        ];
        let expected: Vec<Uuid> = cards[3..6].iter().map(|c| c.id).collect();

        let due: Vec<Uuid> = due_cards(&cards, Some(deck), now()).iter().map(|c| c.id).collect();
        assert_eq!(due.len(), 3);
        for id in &expected {
            assert!(due.contains(id));
        }

        // Exactly now counts as due
        cards[6].next_review_at = Some(now());
        assert_eq!(due_cards(&cards, Some(deck), now()).len(), 4);
    }

    #[test]
    fn test_mastered_never_due() {
        let deck = Uuid::new_v4();
        let cards = vec![
            card(deck, CardStatus::Mastered, Some(now() - Duration::days(400))),
            card(deck, CardStatus::Mastered, None),
        ];
        assert!(due_cards(&cards, None, now()).is_empty());
    }

    #[test]
    fn test_deck_scope() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let cards = vec![card(a, CardStatus::New, None), card(b, CardStatus::New, None)];

        assert_eq!(due_cards(&cards, None, now()).len(), 2);
        let only_a = due_cards(&cards, Some(a), now());
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].deck_id, a);
        assert!(due_cards(&cards, Some(Uuid::new_v4()), now()).is_empty());
    }

    #[test]
    fn test_study_order() {
        let deck = Uuid::new_v4();
        let new = card(deck, CardStatus::New, None);
        let review_old = card(deck, CardStatus::Review, Some(now() - Duration::days(5)));
        let review_recent = card(deck, CardStatus::Review, Some(now() - Duration::days(1)));
        let learning = card(deck, CardStatus::Learning, Some(now()));

        let mut queue = vec![&new, &review_recent, &learning, &review_old];
        sort_for_study(&mut queue);

        let ids: Vec<Uuid> = queue.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![learning.id, review_old.id, review_recent.id, new.id]);
    }
}
