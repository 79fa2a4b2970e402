//! Flashcard review engine: spaced-repetition scheduling, mastery tracking,
//! due-card selection and deck counters, plus SQLite storage and a JSON API.

pub mod api;
pub mod app;
pub mod config;
pub mod db;
pub mod deck;
pub mod due;
pub mod error;
pub mod models;
pub mod session;
pub mod srs;

pub use error::{Result, ReviewError};
pub use models::{CardEdit, CardStatus, Flashcard, FlashcardDeck, NewFlashcard};
pub use session::{DeckSummary, Session};
pub use srs::{MasteryDelta, MasteryTransition, ReviewOutcome, ReviewPreview};
