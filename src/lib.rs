//! # Timegraph - Temporal Knowledge Graph Store
//!
//! Embedded, temporally-versioned knowledge graph for development memory.
//!
//! Timegraph provides:
//! - Typed entities and typed relations with full version history
//! - Point-in-time and confidence-decayed views of the graph
//! - SQLite-backed storage (WAL, single writer) with transactional version transitions
//! - Fixed-dimension embedding storage with cosine similarity search
//! - An out-of-core embedding job queue with token-bucket rate limiting

pub mod clock;
pub mod config;
pub mod decay;
pub mod embedding;
pub mod entity;
pub mod graph;
pub mod relation;
pub mod search;
pub mod storage;
pub mod ui;
pub mod vector;

// Re-exports for convenient access
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use decay::{DecayOptions, decay};
pub use embedding::{Embedder, EmbeddingJob, EmbeddingQueue, EmbeddingWorker};
pub use entity::{
    AddedObservations, Entity, EntityType, NewEntity, ObservationAddition, ObservationDeletion,
};
pub use graph::{GraphEngine, KnowledgeGraph};
pub use relation::{Metadata, NewRelation, Relation, RelationKey, RelationType, RelationUpdate};
pub use search::{SearchMode, SemanticSearchOptions, SemanticSearchResult, SimilarEntity};
pub use storage::{EntityEmbedding, SqliteStore, StoreStats, VectorDiagnostics};

use serde::Serialize;

/// Result type alias for Timegraph operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Timegraph operations
///
/// Every variant maps onto one caller-facing [`ErrorCode`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Entity not found: {}", .0.join(", "))]
    EntityNotFound(Vec<String>),

    #[error("Relation not found: {0}")]
    RelationNotFound(RelationKey),

    #[error("Entity already exists: {0}")]
    EntityAlreadyExists(String),

    #[error("Relation already exists: {0}")]
    RelationAlreadyExists(RelationKey),

    #[error("Database error ({kind}): {source}")]
    Database {
        kind: DatabaseErrorKind,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn entity_not_found(name: impl Into<String>) -> Self {
        Error::EntityNotFound(vec![name.into()])
    }

    /// The caller-facing error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidInput(_) => ErrorCode::InvalidInput,
            Error::EntityNotFound(_) => ErrorCode::EntityNotFound,
            Error::RelationNotFound(_) => ErrorCode::RelationNotFound,
            Error::EntityAlreadyExists(_) => ErrorCode::EntityAlreadyExists,
            Error::RelationAlreadyExists(_) => ErrorCode::RelationAlreadyExists,
            Error::Database { .. } => ErrorCode::DatabaseError,
            Error::Serialization(_) | Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Database error subtype, if this is a database error
    pub fn database_kind(&self) -> Option<DatabaseErrorKind> {
        match self {
            Error::Database { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Only lock contention is worth retrying; everything else is fatal to the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.database_kind(),
            Some(DatabaseErrorKind::Busy | DatabaseErrorKind::Locked)
        )
    }
}

impl From<rusqlite::Error> for Error {
    fn from(source: rusqlite::Error) -> Self {
        let kind = DatabaseErrorKind::classify(&source);
        Error::Database { kind, source }
    }
}

/// Caller-facing error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidInput,
    EntityNotFound,
    RelationNotFound,
    EntityAlreadyExists,
    RelationAlreadyExists,
    DatabaseError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::EntityNotFound => "ENTITY_NOT_FOUND",
            ErrorCode::RelationNotFound => "RELATION_NOT_FOUND",
            ErrorCode::EntityAlreadyExists => "ENTITY_ALREADY_EXISTS",
            ErrorCode::RelationAlreadyExists => "RELATION_ALREADY_EXISTS",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Distinguishable subtypes of `DATABASE_ERROR`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseErrorKind {
    Busy,
    Locked,
    Corrupt,
    ReadOnly,
    Io,
    Full,
    Constraint,
    Other,
}

impl DatabaseErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseErrorKind::Busy => "busy",
            DatabaseErrorKind::Locked => "locked",
            DatabaseErrorKind::Corrupt => "corrupt",
            DatabaseErrorKind::ReadOnly => "readonly",
            DatabaseErrorKind::Io => "io",
            DatabaseErrorKind::Full => "full",
            DatabaseErrorKind::Constraint => "constraint",
            DatabaseErrorKind::Other => "other",
        }
    }

    /// Classify a rusqlite error by its primary SQLite result code
    pub fn classify(err: &rusqlite::Error) -> Self {
        use rusqlite::ErrorCode as Code;

        // A stored value that no longer decodes means the file is damaged
        if matches!(
            err,
            rusqlite::Error::FromSqlConversionFailure(..) | rusqlite::Error::InvalidColumnType(..)
        ) {
            return DatabaseErrorKind::Corrupt;
        }

        match err.sqlite_error_code() {
            Some(Code::DatabaseBusy) => DatabaseErrorKind::Busy,
            Some(Code::DatabaseLocked) => DatabaseErrorKind::Locked,
            Some(Code::DatabaseCorrupt | Code::NotADatabase) => DatabaseErrorKind::Corrupt,
            Some(Code::ReadOnly) => DatabaseErrorKind::ReadOnly,
            Some(Code::SystemIoFailure | Code::CannotOpen) => DatabaseErrorKind::Io,
            Some(Code::DiskFull) => DatabaseErrorKind::Full,
            Some(Code::ConstraintViolation) => DatabaseErrorKind::Constraint,
            _ => DatabaseErrorKind::Other,
        }
    }
}

impl std::fmt::Display for DatabaseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
