use crossbeam::channel::{Receiver, Sender, bounded};

use super::EmbeddingJob;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("embedding queue is full ({0} jobs)")]
    Full(usize),
}

/// Bounded FIFO of embedding jobs. Producers never block.
#[derive(Debug, Clone)]
pub struct EmbeddingQueue {
    tx: Sender<EmbeddingJob>,
    rx: Receiver<EmbeddingJob>,
    capacity: usize,
}

impl EmbeddingQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self { tx, rx, capacity }
    }

    /// Enqueue a job, failing fast when the queue is full
    pub fn try_enqueue(&self, job: EmbeddingJob) -> Result<(), QueueError> {
        // The queue owns a receiver, so the channel is never disconnected
        self.tx.try_send(job).map_err(|_| QueueError::Full(self.capacity))
    }

    /// A sender other threads can enqueue through
    pub fn handle(&self) -> Sender<EmbeddingJob> {
        self.tx.clone()
    }

    pub fn try_dequeue(&self) -> Option<EmbeddingJob> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_and_capacity() {
        let queue = EmbeddingQueue::new(2);
        queue.try_enqueue(EmbeddingJob::new("A")).unwrap();
        queue.handle().try_send(EmbeddingJob::new("B")).unwrap();

        assert_eq!(queue.try_enqueue(EmbeddingJob::new("C")), Err(QueueError::Full(2)));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.try_dequeue(), Some(EmbeddingJob::new("A")));
        assert_eq!(queue.try_dequeue(), Some(EmbeddingJob::new("B")));
        assert_eq!(queue.try_dequeue(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_clones_share_one_channel() {
        let queue = EmbeddingQueue::new(1);
        let producer = queue.clone();
        drop(queue.handle());
        producer.try_enqueue(EmbeddingJob::new("A")).unwrap();
        assert_eq!(queue.try_enqueue(EmbeddingJob::new("B")), Err(QueueError::Full(1)));
        drop(producer);
        assert_eq!(queue.try_dequeue(), Some(EmbeddingJob::new("A")));
    }
}
