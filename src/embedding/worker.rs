use serde::Serialize;

use super::{Embedder, EmbeddingJob, EmbeddingQueue, QueueError, RateLimiter};
use crate::config::EngineConfig;
use crate::graph::GraphEngine;
use crate::{ErrorCode, Result};

/// Outcome of one [`EmbeddingWorker::drain`] pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    /// Jobs whose vector was stored
    pub processed: usize,
    /// Jobs the embedder or vector validation rejected
    pub failed: usize,
    /// Jobs for entities that are no longer live
    pub skipped: usize,
    /// Whether the pass stopped early because the rate limit was reached
    pub rate_limited: bool,
}

/// Pulls jobs off the queue, embeds them and writes the vectors back.
///
/// The worker holds no reference to the engine; each drain borrows it for
/// the duration of the pass, so graph writes stay single-writer.
pub struct EmbeddingWorker<E: Embedder> {
    embedder: E,
    queue: EmbeddingQueue,
    limiter: RateLimiter,
}

impl<E: Embedder> EmbeddingWorker<E> {
    pub fn new(embedder: E, config: &EngineConfig) -> Self {
        Self {
            embedder,
            queue: EmbeddingQueue::new(config.embedding_queue_capacity),
            limiter: RateLimiter::from_config(config),
        }
    }

    pub fn queue(&self) -> &EmbeddingQueue {
        &self.queue
    }

    pub fn enqueue(&self, entity_name: impl Into<String>) -> std::result::Result<(), QueueError> {
        self.queue.try_enqueue(EmbeddingJob::new(entity_name))
    }

    /// Queue jobs for up to `limit` live entities without an embedding.
    ///
    /// Stops quietly when the queue fills; returns how many were queued.
    pub fn enqueue_missing(&self, engine: &GraphEngine, limit: usize) -> Result<usize> {
        let mut queued = 0;
        for entity in engine.entities_missing_embeddings(limit)? {
            match self.queue.try_enqueue(EmbeddingJob::new(entity.name)) {
                Ok(()) => queued += 1,
                Err(QueueError::Full(capacity)) => {
                    tracing::debug!("Embedding queue full at {} jobs", capacity);
                    break;
                }
            }
        }
        Ok(queued)
    }

    /// Process at most `max_jobs` queued jobs.
    ///
    /// Embedder failures and rejected vectors are counted and logged, not
    /// returned; database errors abort the pass.
    pub fn drain(&self, engine: &mut GraphEngine, max_jobs: usize) -> Result<DrainReport> {
        let mut report = DrainReport::default();

        for _ in 0..max_jobs {
            if self.queue.is_empty() {
                break;
            }
            if !self.limiter.try_acquire() {
                report.rate_limited = true;
                break;
            }
            let Some(job) = self.queue.try_dequeue() else {
                break;
            };

            let Some(entity) = engine.get_entity(&job.entity_name)? else {
                tracing::debug!("Skipping embedding for {}: no live entity", job.entity_name);
                report.skipped += 1;
                continue;
            };

            let vector = match self.embedder.embed(&entity.embedding_text()) {
                Ok(vector) => vector,
                Err(e) => {
                    tracing::warn!("Embedding {} failed: {:#}", entity.name, e);
                    report.failed += 1;
                    continue;
                }
            };

            match engine.update_entity_embedding(&entity.name, &vector, self.embedder.model(), None) {
                Ok(()) => report.processed += 1,
                Err(e) if e.code() == ErrorCode::InvalidInput => {
                    tracing::warn!("Embedding for {} rejected: {}", entity.name, e);
                    report.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if report.processed + report.failed + report.skipped > 0 {
            tracing::info!(
                "Embedding pass: {} stored, {} failed, {} skipped, {} still queued",
                report.processed,
                report.failed,
                report.skipped,
                self.queue.len()
            );
        }
        Ok(report)
    }
}
