//! Temporal entity store
//!
//! Mutations never rewrite a version row. They close the live row
//! (`valid_to = now`) and insert version N+1 carrying `created_at` over,
//! all inside the caller's transaction.

use std::collections::{BTreeSet, HashMap, HashSet};

use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use uuid::Uuid;

use super::sqlite::{SqliteStore, from_json_column, parse_column, to_json_column};
use super::{embeddings, relations};
use crate::entity::{
    AddedObservations, Entity, NewEntity, ObservationAddition, ObservationDeletion, validate_name,
};
use crate::{DatabaseErrorKind, Error, Result};

const ENTITY_COLUMNS: &str = "entity_id, version, name, entity_type, observations, created_at, updated_at, valid_from, valid_to, changed_by";

impl SqliteStore {
    // ========== Entity Operations ==========

    /// Create a batch of entities; all or nothing.
    pub fn create_entities(&mut self, new_entities: &[NewEntity]) -> Result<Vec<Entity>> {
        if new_entities.is_empty() {
            return Err(Error::invalid_input("entities must not be empty"));
        }
        for entity in new_entities {
            entity.validate()?;
        }

        let actor = self.actor();
        let created = self.write("create_entities", |tx, now| {
            create(tx, now, new_entities, actor.as_deref())
        })?;
        tracing::info!("Created {} entities", created.len());
        Ok(created)
    }

    /// The live version of the entity called `name`
    pub fn get_entity(&self, name: &str) -> Result<Option<Entity>> {
        self.read(|conn| current_by_name(conn, name))
    }

    /// Every version of the entity that is, or most recently was, called `name`
    pub fn entity_history(&self, name: &str) -> Result<Vec<Entity>> {
        self.read(|conn| history(conn, name))
    }

    pub fn add_observations(&mut self, additions: &[ObservationAddition]) -> Result<Vec<AddedObservations>> {
        if additions.is_empty() {
            return Err(Error::invalid_input("observations must not be empty"));
        }
        for addition in additions {
            validate_name(&addition.entity_name)?;
        }

        let actor = self.actor();
        self.write("add_observations", |tx, now| {
            add_observations(tx, now, additions, actor.as_deref())
        })
    }

    pub fn delete_observations(&mut self, deletions: &[ObservationDeletion]) -> Result<()> {
        if deletions.is_empty() {
            return Err(Error::invalid_input("deletions must not be empty"));
        }
        for deletion in deletions {
            validate_name(&deletion.entity_name)?;
        }

        let actor = self.actor();
        self.write("delete_observations", |tx, now| {
            delete_observations(tx, now, deletions, actor.as_deref())
        })
    }

    /// Rename a live entity, keeping its identity and history
    pub fn rename_entity(&mut self, name: &str, new_name: &str) -> Result<Entity> {
        validate_name(name)?;
        validate_name(new_name)?;

        let actor = self.actor();
        self.write("rename_entity", |tx, now| {
            rename(tx, now, name, new_name, actor.as_deref())
        })
    }

    /// Soft-delete entities by name. Unknown names are ignored.
    ///
    /// Returns the number of entities that were live and are now closed.
    pub fn delete_entities(&mut self, names: &[String]) -> Result<usize> {
        if names.is_empty() {
            return Err(Error::invalid_input("entity names must not be empty"));
        }
        let deleted = self.write("delete_entities", |tx, now| delete(tx, now, names))?;
        tracing::info!("Deleted {} of {} requested entities", deleted, names.len());
        Ok(deleted)
    }

    /// Case-insensitive substring match over names and observations of live entities
    pub fn search_entities(&self, query: &str) -> Result<Vec<Entity>> {
        let needle = query.trim().to_lowercase();
        self.read(|conn| {
            Ok(all_current(conn)?
                .into_iter()
                .filter(|e| e.matches_text(&needle))
                .collect())
        })
    }

    /// Live entities that have no stored embedding, by name
    pub fn entities_missing_embeddings(&self, limit: usize) -> Result<Vec<Entity>> {
        self.read(|conn| missing_embeddings(conn, limit))
    }
}

// ========== Row Helpers ==========

fn row_to_entity(row: &rusqlite::Row) -> rusqlite::Result<Entity> {
    let entity_type: String = row.get(3)?;
    let observations: String = row.get(4)?;

    Ok(Entity {
        entity_id: row.get(0)?,
        version: row.get(1)?,
        name: row.get(2)?,
        entity_type: parse_column(3, &entity_type)?,
        observations: from_json_column(4, &observations)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        valid_from: row.get(7)?,
        valid_to: row.get(8)?,
        changed_by: row.get(9)?,
    })
}

fn query_entities(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Entity>> {
    let mut stmt = conn.prepare(sql)?;
    let entities = stmt
        .query_map(params, row_to_entity)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entities)
}

fn insert_version(conn: &Connection, entity: &Entity) -> Result<()> {
    conn.execute(
        &format!("INSERT INTO entities ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)", ENTITY_COLUMNS),
        params![
            entity.entity_id,
            entity.version,
            entity.name,
            entity.entity_type.as_str(),
            to_json_column(&entity.observations)?,
            entity.created_at,
            entity.updated_at,
            entity.valid_from,
            entity.valid_to,
            entity.changed_by,
        ],
    )
    .map_err(|e| match Error::from(e) {
        // The live-name index caught a race the lookup missed
        err if err.database_kind() == Some(DatabaseErrorKind::Constraint) => {
            Error::EntityAlreadyExists(entity.name.clone())
        }
        err => err,
    })?;
    Ok(())
}

/// Close a live row. Exactly one row must be affected.
fn close_version(conn: &Connection, entity: &Entity, at: i64) -> Result<()> {
    let closed = conn.execute(
        "UPDATE entities SET valid_to = ?3 WHERE entity_id = ?1 AND version = ?2 AND valid_to IS NULL",
        params![entity.entity_id, entity.version, at],
    )?;
    if closed != 1 {
        return Err(Error::Internal(format!(
            "expected to close version {} of entity {}, closed {} rows",
            entity.version, entity.entity_id, closed
        )));
    }
    Ok(())
}

/// Close `current` and insert its successor produced by `mutate`.
fn transition(
    conn: &Connection,
    current: &Entity,
    now: i64,
    actor: Option<&str>,
    mutate: impl FnOnce(&mut Entity),
) -> Result<Entity> {
    // Never close a row before it opened, even if the clock stepped back
    let at = now.max(current.valid_from);
    close_version(conn, current, at)?;

    let mut next = current.clone();
    mutate(&mut next);
    next.version = current.version + 1;
    next.updated_at = at;
    next.valid_from = at;
    next.valid_to = None;
    next.changed_by = actor.map(str::to_string);
    insert_version(conn, &next)?;

    tracing::debug!(
        "Entity {} ({}) moved to version {}",
        next.name,
        next.entity_id,
        next.version
    );
    Ok(next)
}

fn require_current(conn: &Connection, name: &str) -> Result<Entity> {
    current_by_name(conn, name)?.ok_or_else(|| Error::entity_not_found(name))
}

// ========== Queries ==========

pub(crate) fn current_by_name(conn: &Connection, name: &str) -> Result<Option<Entity>> {
    conn.query_row(
        &format!("SELECT {} FROM entities WHERE name = ?1 AND valid_to IS NULL", ENTITY_COLUMNS),
        [name],
        row_to_entity,
    )
    .optional()
    .map_err(Into::into)
}

pub(crate) fn current_by_id(conn: &Connection, entity_id: &str) -> Result<Option<Entity>> {
    conn.query_row(
        &format!("SELECT {} FROM entities WHERE entity_id = ?1 AND valid_to IS NULL", ENTITY_COLUMNS),
        [entity_id],
        row_to_entity,
    )
    .optional()
    .map_err(Into::into)
}

/// The entity id currently holding `name`, or the one that held it most recently
pub(crate) fn latest_id_for_name(conn: &Connection, name: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT entity_id FROM entities WHERE name = ?1
         ORDER BY (valid_to IS NULL) DESC, valid_from DESC, version DESC
         LIMIT 1",
        [name],
        |row| row.get(0),
    )
    .optional()
    .map_err(Into::into)
}

/// Resolve live entity ids for a set of names in one query
pub(crate) fn resolve_live_ids(conn: &Connection, names: &BTreeSet<&str>) -> Result<HashMap<String, String>> {
    if names.is_empty() {
        return Ok(HashMap::new());
    }
    let placeholders = (1..=names.len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT name, entity_id FROM entities WHERE valid_to IS NULL AND name IN ({})",
        placeholders
    );

    let mut stmt = conn.prepare(&sql)?;
    let resolved = stmt
        .query_map(params_from_iter(names.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<rusqlite::Result<HashMap<_, _>>>()?;
    Ok(resolved)
}

pub(crate) fn history(conn: &Connection, name: &str) -> Result<Vec<Entity>> {
    let Some(entity_id) = latest_id_for_name(conn, name)? else {
        return Ok(Vec::new());
    };
    query_entities(
        conn,
        &format!("SELECT {} FROM entities WHERE entity_id = ?1 ORDER BY version ASC", ENTITY_COLUMNS),
        [entity_id],
    )
}

pub(crate) fn all_current(conn: &Connection) -> Result<Vec<Entity>> {
    query_entities(
        conn,
        &format!("SELECT {} FROM entities WHERE valid_to IS NULL ORDER BY name", ENTITY_COLUMNS),
        [],
    )
}

/// One row per entity: the version valid at `timestamp`
pub(crate) fn at_time(conn: &Connection, timestamp: i64) -> Result<Vec<Entity>> {
    query_entities(
        conn,
        &format!(
            "SELECT {} FROM entities
             WHERE valid_from <= ?1 AND (valid_to IS NULL OR valid_to > ?1)
             ORDER BY name",
            ENTITY_COLUMNS
        ),
        [timestamp],
    )
}

fn missing_embeddings(conn: &Connection, limit: usize) -> Result<Vec<Entity>> {
    query_entities(
        conn,
        &format!(
            "SELECT {} FROM entities e
             WHERE e.valid_to IS NULL
               AND NOT EXISTS (SELECT 1 FROM entity_embeddings v WHERE v.entity_id = e.entity_id)
             ORDER BY e.name
             LIMIT ?1",
            ENTITY_COLUMNS
        ),
        [limit as i64],
    )
}

// ========== Mutations ==========

pub(crate) fn create(
    conn: &Connection,
    now: i64,
    new_entities: &[NewEntity],
    actor: Option<&str>,
) -> Result<Vec<Entity>> {
    let mut seen = HashSet::new();
    let mut created = Vec::with_capacity(new_entities.len());

    for new in new_entities {
        if !seen.insert(new.name.as_str()) || current_by_name(conn, &new.name)?.is_some() {
            return Err(Error::EntityAlreadyExists(new.name.clone()));
        }

        let entity = Entity {
            entity_id: Uuid::new_v4().to_string(),
            name: new.name.clone(),
            entity_type: new.entity_type,
            observations: new.observations.clone(),
            version: 1,
            created_at: now,
            updated_at: now,
            valid_from: now,
            valid_to: None,
            changed_by: actor.map(str::to_string),
        };
        insert_version(conn, &entity)?;
        tracing::debug!("Entity {} created as {}", entity.name, entity.entity_id);
        created.push(entity);
    }

    Ok(created)
}

pub(crate) fn add_observations(
    conn: &Connection,
    now: i64,
    additions: &[ObservationAddition],
    actor: Option<&str>,
) -> Result<Vec<AddedObservations>> {
    let mut results = Vec::with_capacity(additions.len());

    for addition in additions {
        let current = require_current(conn, &addition.entity_name)?;

        let mut added: Vec<String> = Vec::new();
        for content in &addition.contents {
            if !current.observations.contains(content) && !added.contains(content) {
                added.push(content.clone());
            }
        }

        if !added.is_empty() {
            transition(conn, &current, now, actor, |next| {
                next.observations.extend(added.iter().cloned());
            })?;
        }

        results.push(AddedObservations {
            entity_name: addition.entity_name.clone(),
            added_observations: added,
        });
    }

    Ok(results)
}

pub(crate) fn delete_observations(
    conn: &Connection,
    now: i64,
    deletions: &[ObservationDeletion],
    actor: Option<&str>,
) -> Result<()> {
    for deletion in deletions {
        let current = require_current(conn, &deletion.entity_name)?;

        let remaining: Vec<String> = current
            .observations
            .iter()
            .filter(|o| !deletion.observations.contains(o))
            .cloned()
            .collect();

        if remaining.len() != current.observations.len() {
            transition(conn, &current, now, actor, |next| {
                next.observations = remaining;
            })?;
        }
    }
    Ok(())
}

pub(crate) fn rename(
    conn: &Connection,
    now: i64,
    name: &str,
    new_name: &str,
    actor: Option<&str>,
) -> Result<Entity> {
    let current = require_current(conn, name)?;
    if name == new_name {
        return Ok(current);
    }
    if current_by_name(conn, new_name)?.is_some() {
        return Err(Error::EntityAlreadyExists(new_name.to_string()));
    }

    let renamed = transition(conn, &current, now, actor, |next| {
        next.name = new_name.to_string();
    })?;
    let touched = relations::propagate_name(conn, &renamed.entity_id, new_name)?;
    tracing::debug!("Renamed {} to {}, updated {} relation rows", name, new_name, touched);
    Ok(renamed)
}

/// Close live rows for `names`, their live relations, and drop their vectors.
pub(crate) fn delete(conn: &Connection, now: i64, names: &[String]) -> Result<usize> {
    let mut deleted = 0;

    for name in names {
        let Some(current) = current_by_name(conn, name)? else {
            tracing::debug!("Delete of unknown entity {} ignored", name);
            continue;
        };

        let at = now.max(current.valid_from);
        close_version(conn, &current, at)?;
        let closed_relations = relations::close_touching(conn, &current.entity_id, at)?;
        embeddings::remove(conn, &current.entity_id)?;

        tracing::debug!(
            "Entity {} ({}) deleted, closed {} relations",
            name,
            current.entity_id,
            closed_relations
        );
        deleted += 1;
    }

    Ok(deleted)
}
