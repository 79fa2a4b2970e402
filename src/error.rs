use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReviewError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("card not found: {0}")]
    CardNotFound(Uuid),

    #[error("deck not found: {0}")]
    DeckNotFound(Uuid),

    #[error("consistency violation: {0}")]
    ConsistencyViolation(String),
}

impl ReviewError {
    /// Unknown ids count as bad caller input, same as out-of-range values.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            ReviewError::InvalidInput(_) | ReviewError::CardNotFound(_) | ReviewError::DeckNotFound(_)
        )
    }

    pub fn is_consistency_violation(&self) -> bool {
        matches!(self, ReviewError::ConsistencyViolation(_))
    }
}

pub type Result<T> = std::result::Result<T, ReviewError>;
