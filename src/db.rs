use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous},
    ConnectOptions, Pool, Row, Sqlite,
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::str::FromStr;
use uuid::Uuid;

use crate::models::{CardStatus, Flashcard, FlashcardDeck};
use crate::session::Session;

fn decode_err(column: &str, source: impl std::error::Error + Send + Sync + 'static) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(source),
    }
}

fn uuid_column(row: &SqliteRow, column: &str) -> Result<Uuid, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    Uuid::parse_str(&raw).map_err(|e| decode_err(column, e))
}

fn count_column<T: TryFrom<i64>>(row: &SqliteRow, column: &str) -> Result<T, sqlx::Error>
where
    T::Error: std::error::Error + Send + Sync + 'static,
{
    let raw: i64 = row.try_get(column)?;
    T::try_from(raw).map_err(|e| decode_err(column, e))
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for Flashcard {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        let status = CardStatus::from_str(&status).map_err(|e| decode_err("status", e))?;

        Ok(Flashcard {
            id: uuid_column(row, "id")?,
            deck_id: uuid_column(row, "deck_id")?,
            front: row.try_get("front")?,
            back: row.try_get("back")?,
            hint: row.try_get("hint")?,
            status,
            repetition_level: count_column(row, "repetition_level")?,
            ease_factor: row.try_get("ease_factor")?,
            review_count: count_column(row, "review_count")?,
            correct_count: count_column(row, "correct_count")?,
            last_reviewed_at: row.try_get::<Option<DateTime<Utc>>, _>("last_reviewed_at")?,
            next_review_at: row.try_get::<Option<DateTime<Utc>>, _>("next_review_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for FlashcardDeck {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let subject_id: Option<String> = row.try_get("subject_id")?;
        let subject_id = subject_id
            .map(|raw| Uuid::parse_str(&raw).map_err(|e| decode_err("subject_id", e)))
            .transpose()?;

        Ok(FlashcardDeck {
            id: uuid_column(row, "id")?,
            subject_id,
            name: row.try_get("name")?,
            card_count: count_column(row, "card_count")?,
            mastered_count: count_column(row, "mastered_count")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// SQLite storage for decks and cards.
#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

impl Db {
    pub async fn connect(url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let mut options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid database url '{url}'"))?
            .create_if_missing(true)
            .foreign_keys(true)
            .synchronous(SqliteSynchronous::Normal)
            .log_statements(log::LevelFilter::Trace);
        if !url.contains(":memory:") {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open database '{url}'"))?;

        let db = Db { pool };
        db.migrate().await?;

        Ok(db)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS decks (
                id TEXT PRIMARY KEY,
                subject_id TEXT,
                name TEXT NOT NULL,
                card_count INTEGER NOT NULL DEFAULT 0 CHECK (card_count >= 0),
                mastered_count INTEGER NOT NULL DEFAULT 0 CHECK (mastered_count >= 0),
                created_at DATETIME NOT NULL
            );
            "#
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS flashcards (
                id TEXT PRIMARY KEY,
                deck_id TEXT NOT NULL REFERENCES decks(id) ON DELETE CASCADE,
                front TEXT NOT NULL,
                back TEXT NOT NULL,
                hint TEXT,
                status TEXT NOT NULL DEFAULT 'new',
                repetition_level INTEGER NOT NULL DEFAULT 0,
                ease_factor REAL NOT NULL DEFAULT 2.5,
                review_count INTEGER NOT NULL DEFAULT 0,
                correct_count INTEGER NOT NULL DEFAULT 0,
                last_reviewed_at DATETIME,
                next_review_at DATETIME,
                created_at DATETIME NOT NULL
            );
            "#
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_flashcards_deck_due ON flashcards (deck_id, next_review_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Reads every deck and card and rebuilds the in-memory session.
    ///
    /// Deck counters that drifted from the stored cards (a review whose
    /// counter write never landed) are rebuilt and written back. Cards that
    /// break scheduling invariants still fail the load.
    pub async fn load_session(&self) -> anyhow::Result<Session> {
        let decks = sqlx::query_as::<_, FlashcardDeck>("SELECT * FROM decks")
            .fetch_all(&self.pool)
            .await?;
        let cards = sqlx::query_as::<_, Flashcard>("SELECT * FROM flashcards")
            .fetch_all(&self.pool)
            .await?;

        log::info!("loaded {} decks and {} cards", decks.len(), cards.len());
        let (session, repaired) = Session::from_parts_repairing(decks, cards).context("stored data is inconsistent")?;

        for deck_id in repaired {
            let deck = session.deck(deck_id)?;
            self.save_deck_counters(deck)
                .await
                .with_context(|| format!("failed to store rebuilt counters for deck {deck_id}"))?;
        }
        Ok(session)
    }

    pub async fn insert_deck(&self, deck: &FlashcardDeck) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO decks (id, subject_id, name, card_count, mastered_count, created_at) VALUES (?, ?, ?, ?, ?, ?)"
        )
        .bind(deck.id.to_string())
        .bind(deck.subject_id.map(|id| id.to_string()))
        .bind(&deck.name)
        .bind(deck.card_count as i64)
        .bind(deck.mastered_count as i64)
        .bind(deck.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Inserts the card and writes its deck's counters in one transaction.
    /// `deck` carries the counters as they are after the insert.
    pub async fn insert_card(&self, card: &Flashcard, deck: &FlashcardDeck) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO flashcards (
                id, deck_id, front, back, hint, status, repetition_level, ease_factor,
                review_count, correct_count, last_reviewed_at, next_review_at, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#
        )
        .bind(card.id.to_string())
        .bind(card.deck_id.to_string())
        .bind(&card.front)
        .bind(&card.back)
        .bind(&card.hint)
        .bind(card.status.as_str())
        .bind(card.repetition_level as i64)
        .bind(card.ease_factor)
        .bind(card.review_count as i64)
        .bind(card.correct_count as i64)
        .bind(card.last_reviewed_at)
        .bind(card.next_review_at)
        .bind(card.created_at)
        .execute(&mut *tx)
        .await?;

        Self::write_counters(&mut tx, deck).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn update_card_content(&self, card: &Flashcard) -> anyhow::Result<()> {
        sqlx::query("UPDATE flashcards SET front = ?, back = ?, hint = ? WHERE id = ?")
            .bind(&card.front)
            .bind(&card.back)
            .bind(&card.hint)
            .bind(card.id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Writes the scheduling fields of a reviewed card.
    pub async fn save_review(&self, card: &Flashcard) -> anyhow::Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE flashcards SET
                status = ?, repetition_level = ?, ease_factor = ?, review_count = ?,
                correct_count = ?, last_reviewed_at = ?, next_review_at = ?
            WHERE id = ?
            "#
        )
        .bind(card.status.as_str())
        .bind(card.repetition_level as i64)
        .bind(card.ease_factor)
        .bind(card.review_count as i64)
        .bind(card.correct_count as i64)
        .bind(card.last_reviewed_at)
        .bind(card.next_review_at)
        .bind(card.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("card {} is not stored", card.id);
        }
        Ok(())
    }

    /// Overwrites a deck's counters with absolute values, so repeating the
    /// write after a failure is safe.
    pub async fn save_deck_counters(&self, deck: &FlashcardDeck) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::write_counters(&mut tx, deck).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn write_counters(tx: &mut sqlx::Transaction<'_, Sqlite>, deck: &FlashcardDeck) -> anyhow::Result<()> {
        let result = sqlx::query("UPDATE decks SET card_count = ?, mastered_count = ? WHERE id = ?")
            .bind(deck.card_count as i64)
            .bind(deck.mastered_count as i64)
            .bind(deck.id.to_string())
            .execute(&mut **tx)
            .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("deck {} is not stored", deck.id);
        }
        Ok(())
    }

    /// Removes the card and writes its deck's counters in one transaction.
    pub async fn delete_card(&self, card_id: Uuid, deck: &FlashcardDeck) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM flashcards WHERE id = ?")
            .bind(card_id.to_string())
            .execute(&mut *tx)
            .await?;

        Self::write_counters(&mut tx, deck).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_deck(&self, deck_id: Uuid) -> anyhow::Result<u64> {
        let mut tx = self.pool.begin().await?;

        let cards = sqlx::query("DELETE FROM flashcards WHERE deck_id = ?")
            .bind(deck_id.to_string())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query("DELETE FROM decks WHERE id = ?")
            .bind(deck_id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(cards)
    }

    /// Stored `(card_count, mastered_count)` of a deck.
    pub async fn deck_counters(&self, deck_id: Uuid) -> anyhow::Result<(i64, i64)> {
        let counters = sqlx::query_as::<_, (i64, i64)>("SELECT card_count, mastered_count FROM decks WHERE id = ?")
            .bind(deck_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .with_context(|| format!("deck {deck_id} is not stored"))?;
        Ok(counters)
    }

    pub async fn count_cards(&self, deck_id: Uuid) -> anyhow::Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM flashcards WHERE deck_id = ?")
            .bind(deck_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
