//! Relation store
//!
//! Relations point at stable entity ids. The live endpoint names are copied
//! onto each row so reads by name need no join; a rename rewrites them in
//! place on live rows instead of writing a new relation version.

use std::collections::{BTreeSet, HashSet};

use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use super::entities;
use super::sqlite::{SqliteStore, from_json_column, parse_column, to_json_column};
use crate::entity::validate_name;
use crate::relation::{NewRelation, Relation, RelationKey, RelationType, RelationUpdate};
use crate::{DatabaseErrorKind, Error, Result};

const RELATION_COLUMNS: &str = "id, from_entity_id, to_entity_id, from_name, to_name, relation_type, strength, confidence, metadata, version, created_at, updated_at, valid_from, valid_to";

impl SqliteStore {
    // ========== Relation Operations ==========

    /// Create a batch of relations between live entities; all or nothing.
    pub fn create_relations(&mut self, new_relations: &[NewRelation]) -> Result<Vec<Relation>> {
        if new_relations.is_empty() {
            return Err(Error::invalid_input("relations must not be empty"));
        }
        for relation in new_relations {
            relation.validate()?;
        }

        let created = self.write("create_relations", |tx, now| create(tx, now, new_relations))?;
        tracing::info!("Created {} relations", created.len());
        Ok(created)
    }

    /// The live relation with this natural key
    pub fn get_relation(&self, key: &RelationKey) -> Result<Option<Relation>> {
        self.read(|conn| current_by_key(conn, key))
    }

    pub fn update_relation(&mut self, update: &RelationUpdate) -> Result<Relation> {
        validate_name(&update.from)?;
        validate_name(&update.to)?;
        update.validate()?;

        self.write("update_relation", |tx, now| apply_update(tx, now, update))
    }

    /// Soft-delete relations by natural key. Keys without a live row are ignored.
    pub fn delete_relations(&mut self, keys: &[RelationKey]) -> Result<usize> {
        if keys.is_empty() {
            return Err(Error::invalid_input("relations must not be empty"));
        }
        let deleted = self.write("delete_relations", |tx, now| delete(tx, now, keys))?;
        tracing::info!("Deleted {} of {} requested relations", deleted, keys.len());
        Ok(deleted)
    }

    pub fn relation_history(&self, key: &RelationKey) -> Result<Vec<Relation>> {
        self.read(|conn| history(conn, key))
    }
}

// ========== Row Helpers ==========

fn row_to_relation(row: &rusqlite::Row) -> rusqlite::Result<Relation> {
    let relation_type: String = row.get(5)?;
    let metadata: String = row.get(8)?;

    Ok(Relation {
        id: row.get(0)?,
        from_entity_id: row.get(1)?,
        to_entity_id: row.get(2)?,
        from_name: row.get(3)?,
        to_name: row.get(4)?,
        relation_type: parse_column(5, &relation_type)?,
        strength: row.get(6)?,
        confidence: row.get(7)?,
        metadata: from_json_column(8, &metadata)?,
        version: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
        valid_from: row.get(12)?,
        valid_to: row.get(13)?,
    })
}

fn query_relations(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Relation>> {
    let mut stmt = conn.prepare(sql)?;
    let relations = stmt
        .query_map(params, row_to_relation)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(relations)
}

/// Insert a version row and return it with its assigned row id
fn insert_version(conn: &Connection, mut relation: Relation) -> Result<Relation> {
    conn.execute(
        "INSERT INTO relations (from_entity_id, to_entity_id, from_name, to_name, relation_type,
                                strength, confidence, metadata, version,
                                created_at, updated_at, valid_from, valid_to)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            relation.from_entity_id,
            relation.to_entity_id,
            relation.from_name,
            relation.to_name,
            relation.relation_type.as_str(),
            relation.strength,
            relation.confidence,
            to_json_column(&relation.metadata)?,
            relation.version,
            relation.created_at,
            relation.updated_at,
            relation.valid_from,
            relation.valid_to,
        ],
    )
    .map_err(|e| match Error::from(e) {
        err if err.database_kind() == Some(DatabaseErrorKind::Constraint) => {
            Error::RelationAlreadyExists(relation.key())
        }
        err => err,
    })?;

    relation.id = conn.last_insert_rowid();
    Ok(relation)
}

fn close_version(conn: &Connection, relation: &Relation, at: i64) -> Result<()> {
    let closed = conn.execute(
        "UPDATE relations SET valid_to = ?2 WHERE id = ?1 AND valid_to IS NULL",
        params![relation.id, at],
    )?;
    if closed != 1 {
        return Err(Error::Internal(format!(
            "expected to close relation row {}, closed {} rows",
            relation.id, closed
        )));
    }
    Ok(())
}

// ========== Queries ==========

fn current_by_ids(
    conn: &Connection,
    from_entity_id: &str,
    to_entity_id: &str,
    relation_type: RelationType,
) -> Result<Option<Relation>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM relations
             WHERE from_entity_id = ?1 AND to_entity_id = ?2 AND relation_type = ?3
               AND valid_to IS NULL",
            RELATION_COLUMNS
        ),
        params![from_entity_id, to_entity_id, relation_type.as_str()],
        row_to_relation,
    )
    .optional()
    .map_err(Into::into)
}

pub(crate) fn current_by_key(conn: &Connection, key: &RelationKey) -> Result<Option<Relation>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM relations
             WHERE from_name = ?1 AND to_name = ?2 AND relation_type = ?3
               AND valid_to IS NULL",
            RELATION_COLUMNS
        ),
        params![key.from, key.to, key.relation_type.as_str()],
        row_to_relation,
    )
    .optional()
    .map_err(Into::into)
}

/// Next version number for a natural key, continuing across delete and re-create
fn next_version(
    conn: &Connection,
    from_entity_id: &str,
    to_entity_id: &str,
    relation_type: RelationType,
) -> Result<i64> {
    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) + 1 FROM relations
         WHERE from_entity_id = ?1 AND to_entity_id = ?2 AND relation_type = ?3",
        params![from_entity_id, to_entity_id, relation_type.as_str()],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Every version of a natural key, resolving names to the entities that hold
/// (or most recently held) them
pub(crate) fn history(conn: &Connection, key: &RelationKey) -> Result<Vec<Relation>> {
    let from_id = entities::latest_id_for_name(conn, &key.from)?;
    let to_id = entities::latest_id_for_name(conn, &key.to)?;
    let (Some(from_id), Some(to_id)) = (from_id, to_id) else {
        return Ok(Vec::new());
    };

    query_relations(
        conn,
        &format!(
            "SELECT {} FROM relations
             WHERE from_entity_id = ?1 AND to_entity_id = ?2 AND relation_type = ?3
             ORDER BY version ASC",
            RELATION_COLUMNS
        ),
        params![from_id, to_id, key.relation_type.as_str()],
    )
}

pub(crate) fn all_current(conn: &Connection) -> Result<Vec<Relation>> {
    query_relations(
        conn,
        &format!(
            "SELECT {} FROM relations WHERE valid_to IS NULL
             ORDER BY from_name, to_name, relation_type",
            RELATION_COLUMNS
        ),
        [],
    )
}

pub(crate) fn at_time(conn: &Connection, timestamp: i64) -> Result<Vec<Relation>> {
    query_relations(
        conn,
        &format!(
            "SELECT {} FROM relations
             WHERE valid_from <= ?1 AND (valid_to IS NULL OR valid_to > ?1)
             ORDER BY from_name, to_name, relation_type",
            RELATION_COLUMNS
        ),
        [timestamp],
    )
}

/// Live relations whose both endpoints are in `entity_ids`
pub(crate) fn induced(conn: &Connection, entity_ids: &[String]) -> Result<Vec<Relation>> {
    if entity_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = (1..=entity_ids.len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {} FROM relations
         WHERE valid_to IS NULL
           AND from_entity_id IN ({p}) AND to_entity_id IN ({p})
         ORDER BY from_name, to_name, relation_type",
        RELATION_COLUMNS,
        p = placeholders
    );
    query_relations(conn, &sql, params_from_iter(entity_ids.iter()))
}

// ========== Mutations ==========

pub(crate) fn create(conn: &Connection, now: i64, new_relations: &[NewRelation]) -> Result<Vec<Relation>> {
    let names: BTreeSet<&str> = new_relations
        .iter()
        .flat_map(|r| [r.from.as_str(), r.to.as_str()])
        .collect();
    let resolved = entities::resolve_live_ids(conn, &names)?;

    let missing: Vec<String> = names
        .iter()
        .filter(|name| !resolved.contains_key(**name))
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(Error::EntityNotFound(missing));
    }

    let mut seen = HashSet::new();
    let mut created = Vec::with_capacity(new_relations.len());

    for new in new_relations {
        let from_id = &resolved[new.from.as_str()];
        let to_id = &resolved[new.to.as_str()];

        if !seen.insert((from_id.as_str(), to_id.as_str(), new.relation_type))
            || current_by_ids(conn, from_id, to_id, new.relation_type)?.is_some()
        {
            return Err(Error::RelationAlreadyExists(new.key()));
        }

        let relation = insert_version(
            conn,
            Relation {
                id: 0,
                from_entity_id: from_id.clone(),
                to_entity_id: to_id.clone(),
                from_name: new.from.clone(),
                to_name: new.to.clone(),
                relation_type: new.relation_type,
                strength: new.strength,
                confidence: new.confidence,
                metadata: new.metadata.clone(),
                version: next_version(conn, from_id, to_id, new.relation_type)?,
                created_at: now,
                updated_at: now,
                valid_from: now,
                valid_to: None,
            },
        )?;
        tracing::debug!("Relation {} created at version {}", relation.key(), relation.version);
        created.push(relation);
    }

    Ok(created)
}

pub(crate) fn apply_update(conn: &Connection, now: i64, update: &RelationUpdate) -> Result<Relation> {
    let key = update.key();
    let current = current_by_key(conn, &key)?.ok_or_else(|| Error::RelationNotFound(key.clone()))?;

    let at = now.max(current.valid_from);
    close_version(conn, &current, at)?;

    let mut metadata = current.metadata.clone();
    if let Some(changes) = &update.metadata {
        for (k, v) in changes {
            metadata.insert(k.clone(), v.clone());
        }
    }

    let next = insert_version(
        conn,
        Relation {
            id: 0,
            strength: update.strength.or(current.strength),
            confidence: update.confidence.or(current.confidence),
            metadata,
            version: current.version + 1,
            updated_at: at,
            valid_from: at,
            valid_to: None,
            ..current
        },
    )?;
    tracing::debug!("Relation {} moved to version {}", key, next.version);
    Ok(next)
}

pub(crate) fn delete(conn: &Connection, now: i64, keys: &[RelationKey]) -> Result<usize> {
    let mut deleted = 0;
    for key in keys {
        if let Some(current) = current_by_key(conn, key)? {
            close_version(conn, &current, now.max(current.valid_from))?;
            deleted += 1;
        }
    }
    Ok(deleted)
}

/// Rewrite denormalized endpoint names on live rows touching `entity_id`
pub(crate) fn propagate_name(conn: &Connection, entity_id: &str, new_name: &str) -> Result<usize> {
    let from = conn.execute(
        "UPDATE relations SET from_name = ?2 WHERE from_entity_id = ?1 AND valid_to IS NULL",
        params![entity_id, new_name],
    )?;
    let to = conn.execute(
        "UPDATE relations SET to_name = ?2 WHERE to_entity_id = ?1 AND valid_to IS NULL",
        params![entity_id, new_name],
    )?;
    Ok(from + to)
}

/// Close every live relation with `entity_id` at either end
pub(crate) fn close_touching(conn: &Connection, entity_id: &str, at: i64) -> Result<usize> {
    let closed = conn.execute(
        "UPDATE relations SET valid_to = MAX(?2, valid_from)
         WHERE (from_entity_id = ?1 OR to_entity_id = ?1) AND valid_to IS NULL",
        params![entity_id, at],
    )?;
    Ok(closed)
}
