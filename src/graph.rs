//! Graph facade - the single entry point over the entity, relation and
//! vector stores
//!
//! `GraphEngine` validates input, delegates to [`SqliteStore`], and
//! composes whole-graph views: live, point-in-time, confidence-decayed
//! and search-induced subgraphs.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::decay::DecayOptions;
use crate::entity::{AddedObservations, Entity, NewEntity, ObservationAddition, ObservationDeletion};
use crate::relation::{NewRelation, Relation, RelationKey, RelationUpdate};
use crate::search::{SearchMode, SemanticSearchOptions, SemanticSearchResult, SimilarEntity};
use crate::storage::{EntityEmbedding, SqliteStore, StoreStats, VectorDiagnostics, embeddings, entities};
use crate::{Error, Result, vector};

/// Number of stored embeddings listed by [`GraphEngine::diagnose_vector_search`]
const DIAGNOSTIC_SAMPLE_SIZE: usize = 5;

/// A snapshot of entities and the relations between them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

impl KnowledgeGraph {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }

    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn relation(&self, key: &RelationKey) -> Option<&Relation> {
        self.relations.iter().find(|r| &r.key() == key)
    }

    /// Relations with `name` at either end
    pub fn relations_of<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Relation> + 'a {
        self.relations
            .iter()
            .filter(move |r| r.from_name == name || r.to_name == name)
    }
}

/// Embedded temporal knowledge graph.
pub struct GraphEngine {
    store: SqliteStore,
}

impl GraphEngine {
    /// Open (or create) a graph database file
    pub fn open(path: &Path, config: EngineConfig) -> Result<Self> {
        Self::open_with_clock(path, config, Arc::new(SystemClock))
    }

    pub fn open_with_clock(path: &Path, config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let store = SqliteStore::open_with_clock(path, config, clock)?;
        Ok(Self::from_store(store))
    }

    pub fn open_in_memory(config: EngineConfig) -> Result<Self> {
        Self::open_in_memory_with_clock(config, Arc::new(SystemClock))
    }

    pub fn open_in_memory_with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self::from_store(SqliteStore::open_in_memory_with_clock(config, clock)?))
    }

    pub fn from_store(store: SqliteStore) -> Self {
        Self { store }
    }

    /// Stamp `actor` as `changedBy` on entity versions written from now on
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.store.set_actor(Some(actor.into()));
        self
    }

    pub fn config(&self) -> &EngineConfig {
        self.store.config()
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    // ========== Entities ==========

    pub fn create_entities(&mut self, new_entities: &[NewEntity]) -> Result<Vec<Entity>> {
        self.store.create_entities(new_entities)
    }

    pub fn get_entity(&self, name: &str) -> Result<Option<Entity>> {
        self.store.get_entity(name)
    }

    pub fn get_entity_history(&self, name: &str) -> Result<Vec<Entity>> {
        self.store.entity_history(name)
    }

    pub fn delete_entities(&mut self, names: &[String]) -> Result<usize> {
        self.store.delete_entities(names)
    }

    pub fn add_observations(&mut self, additions: &[ObservationAddition]) -> Result<Vec<AddedObservations>> {
        self.store.add_observations(additions)
    }

    pub fn delete_observations(&mut self, deletions: &[ObservationDeletion]) -> Result<()> {
        self.store.delete_observations(deletions)
    }

    pub fn rename_entity(&mut self, name: &str, new_name: &str) -> Result<Entity> {
        self.store.rename_entity(name, new_name)
    }

    /// Live entities by name plus the relations among them
    pub fn open_nodes(&self, names: &[String]) -> Result<KnowledgeGraph> {
        if names.is_empty() {
            return Err(Error::invalid_input("names must not be empty"));
        }
        self.store.subgraph(names)
    }

    // ========== Relations ==========

    pub fn create_relations(&mut self, new_relations: &[NewRelation]) -> Result<Vec<Relation>> {
        self.store.create_relations(new_relations)
    }

    pub fn get_relation(&self, key: &RelationKey) -> Result<Option<Relation>> {
        self.store.get_relation(key)
    }

    pub fn update_relation(&mut self, update: &RelationUpdate) -> Result<Relation> {
        self.store.update_relation(update)
    }

    pub fn delete_relations(&mut self, keys: &[RelationKey]) -> Result<usize> {
        self.store.delete_relations(keys)
    }

    pub fn get_relation_history(&self, key: &RelationKey) -> Result<Vec<Relation>> {
        self.store.relation_history(key)
    }

    // ========== Graph Views ==========

    pub fn read_graph(&self) -> Result<KnowledgeGraph> {
        self.store.live_graph()
    }

    pub fn get_graph_at_time(&self, timestamp: i64) -> Result<KnowledgeGraph> {
        self.store.graph_at(timestamp)
    }

    /// The live graph with every relation confidence decayed from its own `validFrom`.
    ///
    /// Unset parameters come from the engine configuration; the reference
    /// time defaults to now.
    pub fn get_decayed_graph(
        &self,
        reference_time: Option<i64>,
        half_life_days: Option<f64>,
        min_confidence: Option<f64>,
    ) -> Result<KnowledgeGraph> {
        let options = DecayOptions::resolve(
            self.config(),
            self.store.now(),
            reference_time,
            half_life_days,
            min_confidence,
        )?;

        let mut graph = self.read_graph()?;
        for relation in &mut graph.relations {
            relation.confidence = options.apply(relation.confidence, relation.valid_from);
        }
        tracing::debug!(
            "Decayed {} relations to {} (half-life {} days)",
            graph.relations.len(),
            options.reference_time,
            options.half_life_days
        );
        Ok(graph)
    }

    // ========== Search ==========

    /// Case-insensitive substring search over names and observations
    pub fn search_nodes(&self, query: &str) -> Result<KnowledgeGraph> {
        if query.trim().is_empty() {
            return Err(Error::invalid_input("query must not be empty"));
        }
        let names: Vec<String> = self
            .store
            .search_entities(query)?
            .into_iter()
            .map(|e| e.name)
            .collect();
        self.store.subgraph(&names)
    }

    /// Vector search when a query vector is supplied, text search otherwise.
    ///
    /// Returns the matched entities and only the relations between them.
    pub fn semantic_search(&self, query: &str, options: &SemanticSearchOptions) -> Result<SemanticSearchResult> {
        options.validate()?;

        let Some(query_vector) = &options.query_vector else {
            if query.trim().is_empty() {
                return Err(Error::invalid_input("query must not be empty without a query vector"));
            }
            let names: Vec<String> = self
                .store
                .search_entities(query)?
                .into_iter()
                .take(options.limit)
                .map(|e| e.name)
                .collect();
            let graph = self.store.subgraph(&names)?;
            tracing::debug!("Text search for {:?} matched {} entities", query, graph.entities.len());
            return Ok(SemanticSearchResult {
                entities: graph.entities,
                relations: graph.relations,
                matches: Vec::new(),
                mode: SearchMode::Text,
            });
        };

        let matches: Vec<SimilarEntity> = self
            .store
            .find_similar(query_vector, options.limit)?
            .into_iter()
            .filter(|m| m.similarity >= options.min_similarity)
            .collect();
        let names: Vec<String> = matches.iter().map(|m| m.name.clone()).collect();
        let graph = self.store.subgraph(&names)?;
        tracing::debug!(
            "Vector search matched {} entities above {}",
            matches.len(),
            options.min_similarity
        );

        Ok(SemanticSearchResult {
            entities: graph.entities,
            relations: graph.relations,
            matches,
            mode: SearchMode::Vector,
        })
    }

    // ========== Embeddings ==========

    /// The stored embedding of the live entity called `name`
    pub fn get_entity_embedding(&self, name: &str) -> Result<Option<EntityEmbedding>> {
        self.store.read(|conn| match entities::current_by_name(conn, name)? {
            Some(entity) => embeddings::get(conn, &entity.entity_id),
            None => Err(Error::entity_not_found(name)),
        })
    }

    /// Store or replace the embedding of the live entity called `name`.
    ///
    /// `timestamp` defaults to now.
    pub fn update_entity_embedding(
        &mut self,
        name: &str,
        embedding: &[f32],
        model: &str,
        timestamp: Option<i64>,
    ) -> Result<()> {
        vector::validate(embedding, self.config().dimensions)?;
        if model.trim().is_empty() {
            return Err(Error::invalid_input("model must not be empty"));
        }

        self.store.write("update_entity_embedding", |tx, now| {
            let entity = entities::current_by_name(tx, name)?.ok_or_else(|| Error::entity_not_found(name))?;
            embeddings::upsert(tx, &entity.entity_id, embedding, model, timestamp.unwrap_or(now))
        })?;
        tracing::debug!("Updated embedding of {} ({})", name, model);
        Ok(())
    }

    pub fn find_similar_entities(&self, query: &[f32], limit: usize) -> Result<Vec<SimilarEntity>> {
        self.store.find_similar(query, limit)
    }

    pub fn diagnose_vector_search(&self) -> Result<VectorDiagnostics> {
        self.store.vector_diagnostics(DIAGNOSTIC_SAMPLE_SIZE)
    }

    /// Live entities still waiting for an embedding
    pub fn entities_missing_embeddings(&self, limit: usize) -> Result<Vec<Entity>> {
        if limit == 0 {
            return Err(Error::invalid_input("limit must be positive"));
        }
        self.store.entities_missing_embeddings(limit)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.store.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, MILLIS_PER_DAY};
    use crate::entity::EntityType;
    use crate::relation::RelationType;
    use crate::ErrorCode;

    const START: i64 = 1_700_000_000_000;

    fn engine() -> (GraphEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(START));
        let engine =
            GraphEngine::open_in_memory_with_clock(EngineConfig::with_dimensions(3), clock.clone()).unwrap();
        (engine, clock)
    }

    fn seed(engine: &mut GraphEngine) {
        engine
            .create_entities(&[
                NewEntity::new("A", EntityType::Feature).with_observations(["Login with OAuth"]),
                NewEntity::new("B", EntityType::Task).with_observations(["Wire the token refresh"]),
                NewEntity::new("C", EntityType::Test),
            ])
            .unwrap();
    }

    fn depends(from: &str, to: &str) -> RelationKey {
        RelationKey::new(from, to, RelationType::DependsOn)
    }

    #[test]
    fn test_relation_update_scenario() {
        let (mut engine, clock) = engine();
        seed(&mut engine);
        engine
            .create_relations(&[NewRelation::new("A", "B", RelationType::DependsOn).with_strength(0.8)])
            .unwrap();

        let relation = engine.get_relation(&depends("A", "B")).unwrap().unwrap();
        assert_eq!((relation.strength, relation.version), (Some(0.8), 1));

        clock.advance(60_000);
        engine
            .update_relation(&RelationUpdate::new("A", "B", RelationType::DependsOn).with_strength(0.3))
            .unwrap();

        let history = engine.get_relation_history(&depends("A", "B")).unwrap();
        assert_eq!(history.iter().map(|r| r.version).collect::<Vec<_>>(), vec![1, 2]);
        let current = engine.get_relation(&depends("A", "B")).unwrap().unwrap();
        assert_eq!(current.strength, Some(0.3));
    }

    #[test]
    fn test_decayed_graph_scenario() {
        let (mut engine, clock) = engine();
        seed(&mut engine);
        engine
            .create_relations(&[NewRelation::new("A", "B", RelationType::DependsOn).with_confidence(0.9)])
            .unwrap();
        engine
            .create_relations(&[NewRelation::new("B", "C", RelationType::RelatesTo)])
            .unwrap();
        clock.advance(30 * MILLIS_PER_DAY);

        let graph = engine.get_decayed_graph(None, Some(14.0), Some(0.05)).unwrap();
        let decayed = graph.relation(&depends("A", "B")).unwrap().confidence.unwrap();
        assert!((decayed - 0.9 * 2f64.powf(-30.0 / 14.0)).abs() < 1e-9);
        assert!((decayed - 0.194).abs() < 1e-3);

        let untouched = graph
            .relation(&RelationKey::new("B", "C", RelationType::RelatesTo))
            .unwrap();
        assert_eq!(untouched.confidence, None);

        // The stored row is not modified
        let stored = engine.get_relation(&depends("A", "B")).unwrap().unwrap();
        assert_eq!(stored.confidence, Some(0.9));
    }

    #[test]
    fn test_decayed_graph_defaults_and_validation() {
        let (mut engine, clock) = engine();
        seed(&mut engine);
        engine
            .create_relations(&[NewRelation::new("A", "B", RelationType::DependsOn).with_confidence(0.8)])
            .unwrap();
        clock.advance(30 * MILLIS_PER_DAY);

        // Default half-life is 30 days
        let graph = engine.get_decayed_graph(None, None, None).unwrap();
        let decayed = graph.relations[0].confidence.unwrap();
        assert!((decayed - 0.4).abs() < 1e-9);

        // Reference time at creation leaves confidence untouched
        let graph = engine.get_decayed_graph(Some(START), None, None).unwrap();
        assert_eq!(graph.relations[0].confidence, Some(0.8));

        // Extreme reference times saturate instead of overflowing
        let graph = engine.get_decayed_graph(Some(i64::MIN), None, None).unwrap();
        assert_eq!(graph.relations[0].confidence, Some(0.8));
        let graph = engine.get_decayed_graph(Some(i64::MAX), None, None).unwrap();
        assert_eq!(graph.relations[0].confidence, Some(engine.config().min_confidence));

        let err = engine.get_decayed_graph(None, Some(0.0), None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
    }

    #[test]
    fn test_graph_at_time() {
        let (mut engine, clock) = engine();
        seed(&mut engine);
        let t_created = START;

        let t_related = clock.advance(1_000);
        engine
            .create_relations(&[NewRelation::new("A", "B", RelationType::DependsOn)])
            .unwrap();

        let t_renamed = clock.advance(1_000);
        engine.rename_entity("A", "Auth").unwrap();

        let t_deleted = clock.advance(1_000);
        engine.delete_entities(&["C".to_string()]).unwrap();

        let before_relation = engine.get_graph_at_time(t_created).unwrap();
        assert_eq!(before_relation.entities.len(), 3);
        assert!(before_relation.relations.is_empty());

        let before_rename = engine.get_graph_at_time(t_related).unwrap();
        assert!(before_rename.entity("A").is_some());
        assert_eq!(before_rename.relations.len(), 1);
        assert_eq!(before_rename.relations[0].from_name, "A");

        let after_rename = engine.get_graph_at_time(t_renamed).unwrap();
        assert!(after_rename.entity("A").is_none());
        assert_eq!(after_rename.relations[0].from_name, "Auth");
        assert!(after_rename.entity("C").is_some());

        let after_delete = engine.get_graph_at_time(t_deleted).unwrap();
        assert_eq!(after_delete.entities.len(), 2);
        assert!(after_delete.entity("C").is_none());

        // Nothing existed before the first write
        assert!(engine.get_graph_at_time(START - 1).unwrap().is_empty());
    }

    #[test]
    fn test_history_is_gapless_with_single_live_row() {
        let (mut engine, clock) = engine();
        seed(&mut engine);
        for i in 0..5 {
            clock.advance(10);
            engine
                .add_observations(&[ObservationAddition::new("A", [format!("note {i}")])])
                .unwrap();
        }
        engine.rename_entity("A", "A2").unwrap();

        let history = engine.get_entity_history("A2").unwrap();
        assert_eq!(history.len(), 7);
        for (i, row) in history.iter().enumerate() {
            assert_eq!(row.version, i as i64 + 1);
        }
        assert_eq!(history.iter().filter(|r| r.is_current()).count(), 1);
    }

    #[test]
    fn test_soft_delete() {
        let (mut engine, clock) = engine();
        seed(&mut engine);
        clock.advance(5);
        engine.delete_entities(&["A".to_string()]).unwrap();

        assert!(engine.get_entity("A").unwrap().is_none());
        let history = engine.get_entity_history("A").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].valid_to, Some(START + 5));
        assert_eq!(engine.read_graph().unwrap().entities.len(), 2);
    }

    #[test]
    fn test_embedding_round_trip_is_bit_exact() {
        let (mut engine, _) = engine();
        seed(&mut engine);
        let vector = vec![0.1f32, -0.2, 0.333_333_34];
        engine.update_entity_embedding("A", &vector, "m", Some(99)).unwrap();

        let stored = engine.get_entity_embedding("A").unwrap().unwrap();
        assert_eq!(
            stored.vector.iter().map(|f| f.to_bits()).collect::<Vec<_>>(),
            vector.iter().map(|f| f.to_bits()).collect::<Vec<_>>()
        );
        assert_eq!(stored.model, "m");
        assert_eq!(stored.last_updated, 99);

        assert!(engine.get_entity_embedding("B").unwrap().is_none());
        let err = engine.get_entity_embedding("Nobody").unwrap_err();
        assert_eq!(err.code(), ErrorCode::EntityNotFound);
    }

    #[test]
    fn test_embedding_dimension_scenario() {
        let (mut engine, _) = engine();
        seed(&mut engine);
        let err = engine.update_entity_embedding("A", &[0.1, 0.2], "m", None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);

        let err = engine.find_similar_entities(&[0.1, 0.2], 5).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
    }

    #[test]
    fn test_find_similar_ranks_exact_match_first() {
        let (mut engine, _) = engine();
        seed(&mut engine);
        engine.update_entity_embedding("A", &[0.9, 0.1, 0.0], "m", None).unwrap();
        engine.update_entity_embedding("B", &[0.1, 0.9, 0.0], "m", None).unwrap();
        engine.update_entity_embedding("C", &[0.0, 0.2, 0.9], "m", None).unwrap();

        let hits = engine.find_similar_entities(&[0.1, 0.9, 0.0], 3).unwrap();
        assert_eq!(hits[0].name, "B");
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert!(hits.windows(2).all(|w| w[0].similarity >= w[1].similarity));
    }

    #[test]
    fn test_semantic_search_vector_returns_induced_subgraph() {
        let (mut engine, _) = engine();
        seed(&mut engine);
        engine
            .create_relations(&[
                NewRelation::new("A", "B", RelationType::DependsOn),
                NewRelation::new("B", "C", RelationType::DependsOn),
            ])
            .unwrap();
        engine.update_entity_embedding("A", &[1.0, 0.0, 0.0], "m", None).unwrap();
        engine.update_entity_embedding("B", &[0.9, 0.1, 0.0], "m", None).unwrap();
        engine.update_entity_embedding("C", &[0.0, 0.0, 1.0], "m", None).unwrap();

        let options = SemanticSearchOptions::default().with_vector(vec![1.0, 0.0, 0.0]);
        let result = engine.semantic_search("", &options).unwrap();

        assert_eq!(result.mode, SearchMode::Vector);
        let names: Vec<&str> = result.entities.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(result.relations.len(), 1);
        assert_eq!(result.relations[0].key(), depends("A", "B"));
        assert!(result.matches.iter().all(|m| m.similarity >= 0.5));
    }

    #[test]
    fn test_semantic_search_falls_back_to_text() {
        let (mut engine, _) = engine();
        seed(&mut engine);
        engine
            .create_relations(&[NewRelation::new("A", "B", RelationType::DependsOn)])
            .unwrap();

        let result = engine
            .semantic_search("TOKEN", &SemanticSearchOptions::default())
            .unwrap();
        assert_eq!(result.mode, SearchMode::Text);
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].name, "B");
        assert!(result.relations.is_empty());

        let err = engine
            .semantic_search("  ", &SemanticSearchOptions::default())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
    }

    #[test]
    fn test_search_and_open_nodes() {
        let (mut engine, _) = engine();
        seed(&mut engine);
        engine
            .create_relations(&[
                NewRelation::new("A", "B", RelationType::DependsOn),
                NewRelation::new("A", "C", RelationType::DependsOn),
            ])
            .unwrap();

        let graph = engine.search_nodes("o").unwrap();
        assert_eq!(graph.entities.len(), 2);
        assert_eq!(graph.relations.len(), 1);

        let graph = engine
            .open_nodes(&["C".to_string(), "A".to_string(), "Missing".to_string()])
            .unwrap();
        assert_eq!(graph.entities[0].name, "C");
        assert_eq!(graph.entities.len(), 2);
        assert_eq!(graph.relations_of("C").count(), 1);
    }

    #[test]
    fn test_missing_embeddings_and_stats() {
        let (mut engine, _) = engine();
        seed(&mut engine);
        engine.update_entity_embedding("B", &[0.0, 1.0, 0.0], "m", None).unwrap();

        let missing: Vec<String> = engine
            .entities_missing_embeddings(10)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(missing, vec!["A", "C"]);

        let stats = engine.stats().unwrap();
        assert_eq!(stats.live_entities, 3);
        assert_eq!(stats.embeddings, 1);

        let report = engine.diagnose_vector_search().unwrap();
        assert_eq!(report.total_entities, 3);
        assert_eq!(report.entities_with_embeddings, 1);
    }

    #[test]
    fn test_actor_is_recorded() {
        let (engine, _) = engine();
        let mut engine = engine.with_actor("session-7");
        seed(&mut engine);
        let entity = engine.get_entity("A").unwrap().unwrap();
        assert_eq!(entity.changed_by.as_deref(), Some("session-7"));
    }
}
