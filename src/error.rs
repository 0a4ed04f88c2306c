//! Error types for the reconciliation engine

use crate::DocumentID;
use thiserror::Error;

/// Errors raised by models and collections
///
/// Identity mismatches on inbound events and empty patches are not errors:
/// they are absorbed where they occur.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A model carrying its own reactive query was inserted into a collection
    #[error("models in reactive collections must delegate reactivity to the collection (model {id:?})")]
    ReactivityConflict { id: Option<DocumentID> },

    /// `set` was entered while another update was being applied to the same model
    #[error("model {id:?} is already applying an update")]
    ReentrantUpdate { id: Option<DocumentID> },

    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON ingestion failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reactivity_conflict_message() {
        let err = SyncError::ReactivityConflict {
            id: Some("doc-1".to_string()),
        };
        assert!(err.to_string().contains("delegate reactivity"));
        assert!(err.to_string().contains("doc-1"));
    }

    #[test]
    fn test_json_error_conversion() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json");
        let err: SyncError = parse.unwrap_err().into();
        assert!(matches!(err, SyncError::Json(_)));
    }
}
