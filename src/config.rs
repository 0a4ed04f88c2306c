//! Model and collection configuration

use crate::error::{Result, SyncError};
use crate::sync::query::{SharedGate, SharedQuery};
use serde::{Deserialize, Serialize};

/// Default identity attribute
pub const DEFAULT_ID_ATTRIBUTE: &str = "_id";

/// Default creation-timestamp attribute
pub const DEFAULT_CREATED_AT_ATTRIBUTE: &str = "createdAt";

/// Reserved attribute names of a document
///
/// ```
/// use pubsync_core::config::ModelConfig;
///
/// let config: ModelConfig = serde_json::from_str(r#"{ "id_attribute": "key" }"#).unwrap();
/// assert_eq!(config.id_attribute, "key");
/// assert_eq!(config.created_at_attribute.as_deref(), Some("createdAt"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Immutable identity field, excluded from diff and merge
    pub id_attribute: String,

    /// Creation timestamp, excluded from the merge baseline
    pub created_at_attribute: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            id_attribute: DEFAULT_ID_ATTRIBUTE.to_string(),
            created_at_attribute: Some(DEFAULT_CREATED_AT_ATTRIBUTE.to_string()),
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.id_attribute.is_empty() {
            return Err(SyncError::InvalidConfig(
                "id_attribute must not be empty".to_string(),
            ));
        }
        if self.created_at_attribute.as_deref() == Some(self.id_attribute.as_str()) {
            return Err(SyncError::InvalidConfig(format!(
                "created_at_attribute must differ from id_attribute ({})",
                self.id_attribute
            )));
        }
        Ok(())
    }

    /// True for the identity and creation-timestamp attributes
    pub fn is_reserved(&self, key: &str) -> bool {
        key == self.id_attribute || self.created_at_attribute.as_deref() == Some(key)
    }
}

/// Options for a standalone model
#[derive(Clone)]
pub struct ModelOptions {
    pub config: ModelConfig,

    /// Query to observe. Must be left unset for models held by a collection.
    pub reactive_query: Option<SharedQuery>,

    /// Subscribe as soon as the model is built
    pub start_observing_changes: bool,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            config: ModelConfig::default(),
            reactive_query: None,
            start_observing_changes: true,
        }
    }
}

impl ModelOptions {
    pub fn with_query(mut self, query: SharedQuery) -> Self {
        self.reactive_query = Some(query);
        self
    }

    pub fn with_config(mut self, config: ModelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn deferred(mut self) -> Self {
        self.start_observing_changes = false;
        self
    }
}

impl std::fmt::Debug for ModelOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelOptions")
            .field("config", &self.config)
            .field("reactive_query", &self.reactive_query.is_some())
            .field("start_observing_changes", &self.start_observing_changes)
            .finish()
    }
}

/// Options for a collection
#[derive(Clone)]
pub struct CollectionOptions {
    /// Configuration shared by every member model
    pub config: ModelConfig,

    pub reactive_query: Option<SharedQuery>,

    /// Gate to wait on before resetting to the query's result set and subscribing
    pub wait_on: Option<SharedGate>,

    /// Subscribe immediately when no gate is given
    pub start_observing_changes: bool,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            config: ModelConfig::default(),
            reactive_query: None,
            wait_on: None,
            start_observing_changes: true,
        }
    }
}

impl CollectionOptions {
    pub fn with_query(mut self, query: SharedQuery) -> Self {
        self.reactive_query = Some(query);
        self
    }

    pub fn wait_on(mut self, gate: SharedGate) -> Self {
        self.wait_on = Some(gate);
        self
    }

    pub fn with_config(mut self, config: ModelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn deferred(mut self) -> Self {
        self.start_observing_changes = false;
        self
    }
}

impl std::fmt::Debug for CollectionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionOptions")
            .field("config", &self.config)
            .field("reactive_query", &self.reactive_query.is_some())
            .field("wait_on", &self.wait_on.is_some())
            .field("start_observing_changes", &self.start_observing_changes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ModelConfig::default();
        assert_eq!(config.id_attribute, "_id");
        assert!(config.is_reserved("_id"));
        assert!(config.is_reserved("createdAt"));
        assert!(!config.is_reserved("title"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_without_created_at() {
        let config: ModelConfig =
            serde_json::from_str(r#"{ "created_at_attribute": null }"#).unwrap();
        assert_eq!(config.id_attribute, "_id");
        assert!(!config.is_reserved("createdAt"));
    }

    #[test]
    fn test_validate_rejects_bad_config() {
        let empty = ModelConfig {
            id_attribute: String::new(),
            created_at_attribute: None,
        };
        assert!(matches!(empty.validate(), Err(SyncError::InvalidConfig(_))));

        let clash = ModelConfig {
            id_attribute: "id".to_string(),
            created_at_attribute: Some("id".to_string()),
        };
        assert!(clash.validate().is_err());
    }

    #[test]
    fn test_options_default_to_observing() {
        assert!(ModelOptions::default().start_observing_changes);
        assert!(!CollectionOptions::default().deferred().start_observing_changes);
    }
}
