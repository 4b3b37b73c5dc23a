//! Search types shared by the vector store and the graph facade

use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::relation::Relation;
use crate::{Error, Result};

/// Default number of matches returned by a search
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Default similarity cut-off for vector search
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.5;

/// An entity ranked by vector similarity
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarEntity {
    pub entity_id: String,
    pub name: String,
    /// Cosine similarity clamped to [0, 1]
    pub similarity: f32,
}

/// Options for [`crate::GraphEngine::semantic_search`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticSearchOptions {
    /// Pre-computed query embedding. Without one the search falls back to text matching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_vector: Option<Vec<f32>>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
}

fn default_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}

fn default_min_similarity() -> f32 {
    DEFAULT_MIN_SIMILARITY
}

impl Default for SemanticSearchOptions {
    fn default() -> Self {
        Self {
            query_vector: None,
            limit: DEFAULT_SEARCH_LIMIT,
            min_similarity: DEFAULT_MIN_SIMILARITY,
        }
    }
}

impl SemanticSearchOptions {
    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.query_vector = Some(vector);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(Error::invalid_input("limit must be positive"));
        }
        if !(0.0..=1.0).contains(&self.min_similarity) {
            return Err(Error::invalid_input("minSimilarity must be within [0, 1]"));
        }
        Ok(())
    }
}

/// How a semantic search produced its matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Vector,
    Text,
}

/// Matched entities plus the relations among them
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticSearchResult {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
    /// Similarity per matched entity, in rank order. Empty for text search.
    pub matches: Vec<SimilarEntity>,
    pub mode: SearchMode,
}
