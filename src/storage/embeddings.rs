//! Vector embedding store
//!
//! One vector per entity id, stored as a little-endian f32 blob. Search is
//! an exhaustive cosine scan over vectors of live entities.

use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use super::sqlite::SqliteStore;
use crate::search::SimilarEntity;
use crate::vector;
use crate::{Error, Result};

/// A stored embedding
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityEmbedding {
    pub vector: Vec<f32>,
    pub model: String,
    pub last_updated: i64,
}

/// Health report for vector search
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorDiagnostics {
    pub total_entities: usize,
    pub entities_with_embeddings: usize,
    pub dimensions: usize,
    /// Stored vectors whose length differs from the configured dimensions
    pub mismatched_dimensions: usize,
    pub sample: Vec<EmbeddingSample>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingSample {
    pub entity_id: String,
    pub name: String,
    pub model: String,
    pub dimensions: usize,
    pub updated_at: i64,
}

impl SqliteStore {
    // ========== Embedding Operations ==========

    /// Insert or replace the embedding of a live entity
    pub fn upsert_embedding(
        &mut self,
        entity_id: &str,
        embedding: &[f32],
        model: &str,
        timestamp: Option<i64>,
    ) -> Result<()> {
        vector::validate(embedding, self.config().dimensions)?;
        if model.trim().is_empty() {
            return Err(Error::invalid_input("model must not be empty"));
        }

        self.write("upsert_embedding", |tx, now| {
            upsert(tx, entity_id, embedding, model, timestamp.unwrap_or(now))
        })?;
        tracing::debug!("Stored {}-dim embedding for {}", embedding.len(), entity_id);
        Ok(())
    }

    pub fn get_embedding(&self, entity_id: &str) -> Result<Option<EntityEmbedding>> {
        self.read(|conn| get(conn, entity_id))
    }

    /// Drop the embedding of `entity_id`; returns whether one existed
    pub fn remove_embedding(&mut self, entity_id: &str) -> Result<bool> {
        self.write("remove_embedding", |tx, _| remove(tx, entity_id))
    }

    /// Live entities nearest to `query`, most similar first
    pub fn find_similar(&self, query: &[f32], limit: usize) -> Result<Vec<SimilarEntity>> {
        vector::validate(query, self.config().dimensions)?;
        if limit == 0 {
            return Err(Error::invalid_input("limit must be positive"));
        }
        self.read(|conn| find_similar(conn, query, limit))
    }

    pub fn vector_diagnostics(&self, sample_size: usize) -> Result<VectorDiagnostics> {
        let dimensions = self.config().dimensions;
        self.read(|conn| diagnostics(conn, dimensions, sample_size))
    }
}

pub(crate) fn upsert(
    conn: &Connection,
    entity_id: &str,
    embedding: &[f32],
    model: &str,
    timestamp: i64,
) -> Result<()> {
    if super::entities::current_by_id(conn, entity_id)?.is_none() {
        return Err(Error::entity_not_found(entity_id));
    }

    // Update in place so vector_id stays stable across re-embedding
    conn.execute(
        "INSERT INTO entity_embeddings (entity_id, dimensions, vector, model, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(entity_id) DO UPDATE SET
             dimensions = excluded.dimensions,
             vector = excluded.vector,
             model = excluded.model,
             updated_at = excluded.updated_at",
        params![
            entity_id,
            embedding.len() as i64,
            vector::encode(embedding),
            model,
            timestamp
        ],
    )?;
    Ok(())
}

pub(crate) fn get(conn: &Connection, entity_id: &str) -> Result<Option<EntityEmbedding>> {
    let row: Option<(Vec<u8>, String, i64)> = conn
        .query_row(
            "SELECT vector, model, updated_at FROM entity_embeddings WHERE entity_id = ?1",
            [entity_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    match row {
        Some((blob, model, last_updated)) => Ok(Some(EntityEmbedding {
            vector: vector::decode(&blob)?,
            model,
            last_updated,
        })),
        None => Ok(None),
    }
}

pub(crate) fn remove(conn: &Connection, entity_id: &str) -> Result<bool> {
    let removed = conn.execute("DELETE FROM entity_embeddings WHERE entity_id = ?1", [entity_id])?;
    Ok(removed > 0)
}

pub(crate) fn find_similar(conn: &Connection, query: &[f32], limit: usize) -> Result<Vec<SimilarEntity>> {
    let mut stmt = conn.prepare(
        "SELECT v.entity_id, e.name, v.vector
         FROM entity_embeddings v
         JOIN entities e ON e.entity_id = v.entity_id AND e.valid_to IS NULL",
    )?;

    let candidates = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut scored = Vec::with_capacity(candidates.len());
    for (entity_id, name, blob) in candidates {
        let stored = vector::decode(&blob)?;
        if stored.len() != query.len() {
            tracing::warn!(
                "Skipping embedding of {} with {} dimensions, expected {}",
                name,
                stored.len(),
                query.len()
            );
            continue;
        }
        scored.push(SimilarEntity {
            entity_id,
            name,
            similarity: vector::similarity(query, &stored),
        });
    }

    scored.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.name.cmp(&b.name))
    });
    scored.truncate(limit);
    Ok(scored)
}

pub(crate) fn diagnostics(conn: &Connection, dimensions: usize, sample_size: usize) -> Result<VectorDiagnostics> {
    let count = |sql: &str| -> Result<usize> {
        let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(n as usize)
    };

    let total_entities = count("SELECT COUNT(*) FROM entities WHERE valid_to IS NULL")?;
    let entities_with_embeddings = count(
        "SELECT COUNT(*) FROM entity_embeddings v
         JOIN entities e ON e.entity_id = v.entity_id AND e.valid_to IS NULL",
    )?;
    let mismatched: i64 = conn.query_row(
        "SELECT COUNT(*) FROM entity_embeddings WHERE dimensions != ?1",
        [dimensions as i64],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(
        "SELECT v.entity_id, e.name, v.model, v.dimensions, v.updated_at
         FROM entity_embeddings v
         JOIN entities e ON e.entity_id = v.entity_id AND e.valid_to IS NULL
         ORDER BY v.updated_at DESC, e.name
         LIMIT ?1",
    )?;
    let sample = stmt
        .query_map([sample_size as i64], |row| {
            Ok(EmbeddingSample {
                entity_id: row.get(0)?,
                name: row.get(1)?,
                model: row.get(2)?,
                dimensions: row.get::<_, i64>(3)? as usize,
                updated_at: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(VectorDiagnostics {
        total_entities,
        entities_with_embeddings,
        dimensions,
        mismatched_dimensions: mismatched as usize,
        sample,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::entity::{EntityType, NewEntity};
    use crate::ErrorCode;

    fn store_with(names: &[&str]) -> (SqliteStore, Vec<String>) {
        let mut store = SqliteStore::open_in_memory(EngineConfig::with_dimensions(3)).unwrap();
        let new_entities: Vec<NewEntity> = names
            .iter()
            .map(|name| NewEntity::new(*name, EntityType::Feature))
            .collect();
        let ids = store
            .create_entities(&new_entities)
            .unwrap()
            .into_iter()
            .map(|e| e.entity_id)
            .collect();
        (store, ids)
    }

    #[test]
    fn test_embedding_crud() {
        let (mut store, ids) = store_with(&["A"]);
        let vector = vec![0.1, 0.2, 0.3];
        store.upsert_embedding(&ids[0], &vector, "test-model", Some(42)).unwrap();

        let stored = store.get_embedding(&ids[0]).unwrap().unwrap();
        assert_eq!(stored.vector, vector);
        assert_eq!(stored.model, "test-model");
        assert_eq!(stored.last_updated, 42);

        assert!(store.remove_embedding(&ids[0]).unwrap());
        assert!(!store.remove_embedding(&ids[0]).unwrap());
        assert!(store.get_embedding(&ids[0]).unwrap().is_none());
    }

    #[test]
    fn test_reembedding_keeps_vector_id() {
        let (mut store, ids) = store_with(&["A"]);
        store.upsert_embedding(&ids[0], &[1.0, 0.0, 0.0], "m1", Some(1)).unwrap();
        let vector_id = |store: &SqliteStore| -> i64 {
            store
                .read(|conn| {
                    Ok(conn.query_row(
                        "SELECT vector_id FROM entity_embeddings WHERE entity_id = ?1",
                        [&ids[0]],
                        |row| row.get(0),
                    )?)
                })
                .unwrap()
        };
        let before = vector_id(&store);

        store.upsert_embedding(&ids[0], &[0.0, 1.0, 0.0], "m2", Some(2)).unwrap();
        assert_eq!(vector_id(&store), before);
        assert_eq!(store.get_embedding(&ids[0]).unwrap().unwrap().model, "m2");
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let (mut store, ids) = store_with(&["A"]);
        let err = store.upsert_embedding(&ids[0], &[0.1, 0.2], "m", None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
        assert!(store.get_embedding(&ids[0]).unwrap().is_none());
    }

    #[test]
    fn test_unknown_entity_rejected() {
        let (mut store, _) = store_with(&["A"]);
        let err = store.upsert_embedding("nope", &[0.1, 0.2, 0.3], "m", None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::EntityNotFound);
    }

    #[test]
    fn test_find_similar_orders_and_breaks_ties_by_name() {
        let (mut store, ids) = store_with(&["Charlie", "Alpha", "Bravo"]);
        store.upsert_embedding(&ids[0], &[1.0, 0.0, 0.0], "m", None).unwrap();
        store.upsert_embedding(&ids[1], &[1.0, 1.0, 0.0], "m", None).unwrap();
        store.upsert_embedding(&ids[2], &[2.0, 2.0, 0.0], "m", None).unwrap();

        let hits = store.find_similar(&[1.0, 1.0, 0.0], 10).unwrap();
        let names: Vec<&str> = hits.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Bravo", "Charlie"]);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert!(hits.iter().all(|h| (0.0..=1.0).contains(&h.similarity)));

        assert_eq!(store.find_similar(&[1.0, 1.0, 0.0], 1).unwrap().len(), 1);
    }

    #[test]
    fn test_find_similar_with_large_magnitudes() {
        let (mut store, ids) = store_with(&["Exact", "Big"]);
        store.upsert_embedding(&ids[0], &[1.0, 1.0, 0.0], "m", None).unwrap();
        store.upsert_embedding(&ids[1], &[1e20, 0.0, 0.0], "m", None).unwrap();

        let hits = store.find_similar(&[1e20, 1e20, 0.0], 2).unwrap();
        assert_eq!(hits[0].name, "Exact");
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].name, "Big");
        assert!((hits[1].similarity - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn test_deleted_entities_leave_the_index() {
        let (mut store, ids) = store_with(&["A", "B"]);
        store.upsert_embedding(&ids[0], &[1.0, 0.0, 0.0], "m", None).unwrap();
        store.upsert_embedding(&ids[1], &[0.0, 1.0, 0.0], "m", None).unwrap();

        store.delete_entities(&["A".to_string()]).unwrap();

        assert!(store.get_embedding(&ids[0]).unwrap().is_none());
        let hits = store.find_similar(&[1.0, 0.0, 0.0], 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "B");
    }

    #[test]
    fn test_diagnostics() {
        let (mut store, ids) = store_with(&["A", "B", "C"]);
        store.upsert_embedding(&ids[1], &[0.5, 0.5, 0.5], "m", Some(7)).unwrap();

        let report = store.vector_diagnostics(5).unwrap();
        assert_eq!(report.total_entities, 3);
        assert_eq!(report.entities_with_embeddings, 1);
        assert_eq!(report.dimensions, 3);
        assert_eq!(report.mismatched_dimensions, 0);
        assert_eq!(report.sample.len(), 1);
        assert_eq!(report.sample[0].name, "B");
        assert_eq!(report.sample[0].updated_at, 7);
    }
}
