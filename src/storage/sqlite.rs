//! SQLite storage implementation

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};

use super::{entities, relations, schema};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::graph::KnowledgeGraph;
use crate::{Error, Result};

/// SQLite-backed storage for the temporal knowledge graph.
///
/// One connection, one writer. Reads run inside a deferred transaction so a
/// multi-query read sees a single snapshot; writes run inside an immediate
/// transaction and are retried a bounded number of times on busy/locked.
pub struct SqliteStore {
    conn: Connection,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    actor: Option<String>,
}

impl SqliteStore {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path, config: EngineConfig) -> Result<Self> {
        Self::open_with_clock(path, config, Arc::new(SystemClock))
    }

    pub fn open_with_clock(path: &Path, config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let conn = Connection::open(path)?;
        let store = Self::initialize(conn, config, clock)?;
        tracing::debug!("Opened graph store at {}", path.display());
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory(config: EngineConfig) -> Result<Self> {
        Self::open_in_memory_with_clock(config, Arc::new(SystemClock))
    }

    pub fn open_in_memory_with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn, config, clock)
    }

    fn initialize(conn: Connection, config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        conn.busy_timeout(config.busy_timeout())?;
        // In-memory databases report "memory" and keep it
        let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        tracing::debug!("journal_mode = {}", mode);

        let store = Self {
            conn,
            config,
            clock,
            actor: None,
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Initialize the database schema
    fn initialize_schema(&self) -> Result<()> {
        for stmt in schema::all_schema_statements() {
            self.conn.execute(stmt, [])?;
        }
        self.conn.execute(
            "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', ?1)",
            [schema::SCHEMA_VERSION],
        )?;
        self.conn.execute(
            "INSERT OR IGNORE INTO meta (key, value) VALUES ('dimensions', ?1)",
            [self.config.dimensions.to_string()],
        )?;

        if let Some(stored) = self.stored_dimensions()? {
            if stored != self.config.dimensions {
                return Err(Error::invalid_input(format!(
                    "database holds {}-dimensional embeddings, config requests {}",
                    stored, self.config.dimensions
                )));
            }
        }
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current time according to the store's clock
    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Actor stamped into `changed_by` on every entity version this store writes
    pub fn set_actor(&mut self, actor: Option<String>) {
        self.actor = actor;
    }

    pub(crate) fn actor(&self) -> Option<String> {
        self.actor.clone()
    }

    /// Dimensionality the database was first created with
    pub fn stored_dimensions(&self) -> Result<Option<usize>> {
        let value: Option<String> = self
            .conn
            .query_row("SELECT value FROM meta WHERE key = 'dimensions'", [], |row| row.get(0))
            .optional()?;
        Ok(value.and_then(|v| v.parse().ok()))
    }

    // ========== Transactions ==========

    /// Run `f` inside one immediate write transaction, committing on success.
    ///
    /// `f` receives the transaction and the operation's timestamp. Busy and
    /// locked failures roll back and retry up to `max_busy_retries` attempts;
    /// any other error rolls back and is returned as-is.
    pub(crate) fn write<T, F>(&mut self, operation: &str, mut f: F) -> Result<T>
    where
        F: FnMut(&Transaction<'_>, i64) -> Result<T>,
    {
        let max_attempts = self.config.max_busy_retries;
        let mut attempt = 1;
        loop {
            match self.try_write(&mut f) {
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let backoff = self.config.retry_backoff(attempt);
                    tracing::warn!(
                        "{} hit a busy database (attempt {}/{}), retrying in {:?}: {}",
                        operation,
                        attempt,
                        max_attempts,
                        backoff,
                        err
                    );
                    std::thread::sleep(backoff);
                    attempt += 1;
                }
                Err(err) => {
                    tracing::debug!("{} rolled back: {}", operation, err);
                    return Err(err);
                }
                Ok(value) => return Ok(value),
            }
        }
    }

    fn try_write<T, F>(&mut self, f: &mut F) -> Result<T>
    where
        F: FnMut(&Transaction<'_>, i64) -> Result<T>,
    {
        let now = self.clock.now_millis();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx, now)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run `f` against a single read snapshot
    pub(crate) fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let tx = self.conn.unchecked_transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    // ========== Graph Views ==========

    /// All live entities and relations
    pub fn live_graph(&self) -> Result<KnowledgeGraph> {
        self.read(|conn| {
            Ok(KnowledgeGraph {
                entities: entities::all_current(conn)?,
                relations: relations::all_current(conn)?,
            })
        })
    }

    /// The graph as it was at `timestamp`.
    ///
    /// Relation endpoint names are taken from the entity rows valid at that
    /// instant, since the stored names track the current ones.
    pub fn graph_at(&self, timestamp: i64) -> Result<KnowledgeGraph> {
        self.read(|conn| {
            let entities = entities::at_time(conn, timestamp)?;
            let mut relations = relations::at_time(conn, timestamp)?;

            let names: HashMap<&str, &str> = entities
                .iter()
                .map(|e| (e.entity_id.as_str(), e.name.as_str()))
                .collect();
            for relation in &mut relations {
                if let Some(name) = names.get(relation.from_entity_id.as_str()) {
                    relation.from_name = name.to_string();
                }
                if let Some(name) = names.get(relation.to_entity_id.as_str()) {
                    relation.to_name = name.to_string();
                }
            }

            Ok(KnowledgeGraph { entities, relations })
        })
    }

    /// Live entities with the given names plus the relations between them.
    ///
    /// Entities are returned in the order of `names`; unknown names are skipped.
    pub fn subgraph(&self, names: &[String]) -> Result<KnowledgeGraph> {
        self.read(|conn| {
            let mut entities = Vec::with_capacity(names.len());
            for name in names {
                if let Some(entity) = entities::current_by_name(conn, name)? {
                    if !entities.iter().any(|e: &crate::Entity| e.entity_id == entity.entity_id) {
                        entities.push(entity);
                    }
                }
            }
            let ids: Vec<String> = entities.iter().map(|e| e.entity_id.clone()).collect();
            let relations = relations::induced(conn, &ids)?;
            Ok(KnowledgeGraph { entities, relations })
        })
    }

    // ========== Statistics ==========

    pub fn stats(&self) -> Result<StoreStats> {
        self.read(|conn| {
            let count = |sql: &str| -> Result<usize> {
                let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
                Ok(n as usize)
            };
            Ok(StoreStats {
                live_entities: count("SELECT COUNT(*) FROM entities WHERE valid_to IS NULL")?,
                entity_versions: count("SELECT COUNT(*) FROM entities")?,
                live_relations: count("SELECT COUNT(*) FROM relations WHERE valid_to IS NULL")?,
                relation_versions: count("SELECT COUNT(*) FROM relations")?,
                embeddings: count("SELECT COUNT(*) FROM entity_embeddings")?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub live_entities: usize,
    pub entity_versions: usize,
    pub live_relations: usize,
    pub relation_versions: usize,
    pub embeddings: usize,
}

impl std::fmt::Display for StoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Database Statistics:")?;
        writeln!(f, "  Entities: {} live / {} versions", self.live_entities, self.entity_versions)?;
        writeln!(f, "  Relations: {} live / {} versions", self.live_relations, self.relation_versions)?;
        writeln!(f, "  Embeddings: {}", self.embeddings)
    }
}

/// Encode a list of strings as a JSON array column
pub(crate) fn to_json_column<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Decode a JSON column inside a row mapper
pub(crate) fn from_json_column<T: serde::de::DeserializeOwned>(
    idx: usize,
    text: &str,
) -> rusqlite::Result<T> {
    serde_json::from_str(text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Parse an enum column inside a row mapper
pub(crate) fn parse_column<T>(idx: usize, text: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = crate::Error>,
{
    text.parse().map_err(|e: crate::Error| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
