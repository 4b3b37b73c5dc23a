//! Out-of-core embedding pipeline
//!
//! The graph engine only stores vectors it is handed. Generating them is the
//! job of an [`Embedder`] supplied by the caller, fed from a bounded
//! [`EmbeddingQueue`] and throttled by a token-bucket [`RateLimiter`].
//! [`EmbeddingWorker::drain`] ties the pieces together and writes results
//! back through [`crate::GraphEngine::update_entity_embedding`].

mod queue;
mod rate_limit;
mod worker;

pub use queue::{EmbeddingQueue, QueueError};
pub use rate_limit::RateLimiter;
pub use worker::{DrainReport, EmbeddingWorker};

/// Produces embedding vectors from text, usually by calling a model service.
pub trait Embedder {
    /// Model identifier stored alongside each vector
    fn model(&self) -> &str;

    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

/// Request to (re)compute the embedding of one entity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmbeddingJob {
    pub entity_name: String,
}

impl EmbeddingJob {
    pub fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
        }
    }
}
