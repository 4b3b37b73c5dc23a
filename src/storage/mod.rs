//! Storage Layer - SQLite-backed persistence
//!
//! System of record is SQLite (WAL, single writer) with tables:
//! - entities(entity_id, version, name, entity_type, observations, created_at, updated_at, valid_from, valid_to, changed_by)
//! - relations(id, from_entity_id, to_entity_id, from_name, to_name, relation_type, strength, confidence, metadata, version, ...)
//! - entity_embeddings(vector_id, entity_id, dimensions, vector, model, updated_at)
//!
//! Every multi-row version transition runs inside one immediate transaction.

pub mod embeddings;
pub mod entities;
pub mod relations;
pub mod schema;
pub mod sqlite;

pub use embeddings::{EmbeddingSample, EntityEmbedding, VectorDiagnostics};
pub use sqlite::{SqliteStore, StoreStats};
