//! Database schema definitions
//!
//! Version rows are never updated except to close them (`valid_to`) or to
//! rewrite the denormalized endpoint names of live relation rows. Uniqueness
//! that only applies to live rows is expressed as partial unique indexes.

/// Schema version recorded in the `meta` table
pub const SCHEMA_VERSION: &str = "1";

/// SQL to create the meta table
pub const CREATE_META_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
"#;

/// SQL to create the entities table (one row per entity version)
pub const CREATE_ENTITIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS entities (
    entity_id TEXT NOT NULL,
    version INTEGER NOT NULL CHECK (version >= 1),
    name TEXT NOT NULL,
    entity_type TEXT NOT NULL
        CHECK (entity_type IN ('feature', 'task', 'decision', 'component', 'test')),
    observations TEXT NOT NULL DEFAULT '[]',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    valid_from INTEGER NOT NULL,
    valid_to INTEGER CHECK (valid_to IS NULL OR valid_to >= valid_from),
    changed_by TEXT,
    PRIMARY KEY (entity_id, version)
)
"#;

/// SQL to create the relations table (one row per relation version).
///
/// Endpoints are plain columns, not foreign keys: a relation points at the
/// logical entity, and liveness of that entity is checked in the writing
/// transaction.
pub const CREATE_RELATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS relations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    from_entity_id TEXT NOT NULL,
    to_entity_id TEXT NOT NULL,
    from_name TEXT NOT NULL,
    to_name TEXT NOT NULL,
    relation_type TEXT NOT NULL
        CHECK (relation_type IN ('depends_on', 'implements', 'part_of', 'relates_to')),
    strength REAL CHECK (strength IS NULL OR (strength >= 0.0 AND strength <= 1.0)),
    confidence REAL CHECK (confidence IS NULL OR (confidence >= 0.0 AND confidence <= 1.0)),
    metadata TEXT NOT NULL DEFAULT '{}',
    version INTEGER NOT NULL CHECK (version >= 1),
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    valid_from INTEGER NOT NULL,
    valid_to INTEGER CHECK (valid_to IS NULL OR valid_to >= valid_from),
    UNIQUE (from_entity_id, to_entity_id, relation_type, version)
)
"#;

/// SQL to create the vector index table.
///
/// `vector_id` is the stable row identifier of the index, mapped 1:1 to
/// `entity_id`. It survives re-embedding because upserts update in place.
pub const CREATE_EMBEDDINGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS entity_embeddings (
    vector_id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_id TEXT NOT NULL UNIQUE,
    dimensions INTEGER NOT NULL,
    vector BLOB NOT NULL,
    model TEXT NOT NULL,
    updated_at INTEGER NOT NULL
)
"#;

/// SQL to create indexes
pub const CREATE_INDEXES: &[&str] = &[
    // At most one live row per entity and per live name
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_entities_live_id ON entities(entity_id) WHERE valid_to IS NULL",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_entities_live_name ON entities(name) WHERE valid_to IS NULL",
    "CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(name)",
    "CREATE INDEX IF NOT EXISTS idx_entities_validity ON entities(valid_from, valid_to)",
    // At most one live row per natural key
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_relations_live_key ON relations(from_entity_id, to_entity_id, relation_type) WHERE valid_to IS NULL",
    "CREATE INDEX IF NOT EXISTS idx_relations_live_names ON relations(from_name, to_name, relation_type) WHERE valid_to IS NULL",
    "CREATE INDEX IF NOT EXISTS idx_relations_from ON relations(from_entity_id)",
    "CREATE INDEX IF NOT EXISTS idx_relations_to ON relations(to_entity_id)",
    "CREATE INDEX IF NOT EXISTS idx_relations_validity ON relations(valid_from, valid_to)",
];

/// All schema creation statements
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut stmts = vec![
        CREATE_META_TABLE,
        CREATE_ENTITIES_TABLE,
        CREATE_RELATIONS_TABLE,
        CREATE_EMBEDDINGS_TABLE,
    ];
    stmts.extend(CREATE_INDEXES.iter().copied());
    stmts
}
