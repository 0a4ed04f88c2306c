//! PubSync Core - Deep reconciliation engine
//!
//! Keeps local document models in step with a reactive query that pushes
//! `added`/`changed`/`removed` events. It implements:
//! - Structural value operations (deep merge, clone, pick, omit, changes)
//! - A model that applies only the top-level keys an update really changes
//! - An adapter that routes query events, with `null` meaning "clear"
//! - A keyed collection with a readiness gate
//!
//! # Examples
//!
//! ```rust
//! use pubsync_core::{Model, ModelOptions, SharedModel};
//! use pubsync_core::sync::LocalQuery;
//! use pubsync_core::value::record_from_json;
//! use serde_json::json;
//!
//! let query = LocalQuery::new();
//! let model: SharedModel = Model::with_options(
//!     record_from_json(json!({ "_id": "doc-1", "title": "draft" })).unwrap(),
//!     ModelOptions::default().with_query(query.clone()),
//! )
//! .unwrap();
//!
//! query.insert(record_from_json(json!({ "_id": "doc-1", "title": "draft", "meta": { "views": 1 } })).unwrap());
//! query.update("doc-1", record_from_json(json!({ "title": null })).unwrap());
//!
//! assert_eq!(model.borrow().to_json(), json!({ "_id": "doc-1", "meta": { "views": 1 } }));
//! ```

pub mod collection;
pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod sync;
pub mod value;

// Re-exports for convenience
pub use collection::{AddOptions, Collection, CollectionEvent, CollectionItem, SharedCollection};
pub use config::{CollectionOptions, ModelConfig, ModelOptions};
pub use error::{Result, SyncError};
pub use model::{Model, ModelEvent, Patch, SetOptions, SharedModel};
pub use value::{Record, Value};

/// Document identifier type
pub type DocumentID = String;
