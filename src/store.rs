use std::time::Duration;
use thiserror::Error;

use crate::models::{score_factor, ApplicationRecord, FilterPreset, Scorecard};

/// Failures talking to a record store. None of these are fatal; callers
/// report them and abandon the operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("record store returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("malformed payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable home of application records, filter presets and scorecards.
/// Every call is one request/response with no retry.
pub trait RecordStore {
    fn list_records(&self) -> StoreResult<Vec<ApplicationRecord>>;

    /// Inserts `draft` (its `id` is ignored) and returns the assigned id.
    fn create_record(&self, draft: &ApplicationRecord) -> StoreResult<i64>;

    /// Full-record update.
    fn update_record(&self, id: i64, record: &ApplicationRecord) -> StoreResult<()>;

    fn delete_record(&self, id: i64) -> StoreResult<()>;

    fn list_presets(&self) -> StoreResult<Vec<FilterPreset>>;

    /// Saves `config` under `name`, replacing any preset of the same name.
    fn save_preset(&self, name: &str, config: &str) -> StoreResult<i64>;

    fn delete_preset(&self, id: i64) -> StoreResult<()>;

    fn list_scores(&self, application_id: i64) -> StoreResult<Scorecard>;

    fn set_score(&self, application_id: i64, factor: &str, value: u8) -> StoreResult<()>;

    fn remove_score(&self, application_id: i64, factor: &str) -> StoreResult<()>;
}

pub fn check_score(factor: &str, value: u8) -> StoreResult<()> {
    let Some(known) = score_factor(factor) else {
        return Err(StoreError::Validation(format!("unknown score factor '{}'", factor)));
    };
    if value > known.max {
        return Err(StoreError::Validation(format!(
            "{} must be between 0 and {}",
            known.name, known.max
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_score() {
        assert!(check_score("communication", 0).is_ok());
        assert!(check_score("benefits", 10).is_ok());
        assert!(matches!(check_score("benefits", 11), Err(StoreError::Validation(_))));
        assert!(matches!(check_score("vibes", 5), Err(StoreError::Validation(_))));
    }
}
