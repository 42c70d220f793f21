//! Bounded priority queue feeding the single background mutation worker.
//!
//! Items drain in ascending priority, FIFO within a priority level, which
//! gives callers enqueue-order guarantees for same-priority mutations (a
//! delete queued after an upsert for the same ids applies after it).

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Notify};

use crate::document::VectorRecord;
use crate::error::{Result, ZeroRagError};
use crate::store::BatchReport;

/// Priority of a queued mutation; lower drains first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High = 1,
    Normal = 2,
    Low = 3,
}

/// A queued index mutation.
#[derive(Debug)]
pub enum QueuedOp {
    UpsertBatch(Vec<VectorRecord>),
    DeleteBatch(Vec<String>),
}

impl QueuedOp {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UpsertBatch(_) => "insert_batch",
            Self::DeleteBatch(_) => "delete_batch",
        }
    }
}

/// Completion channel for a queued item. Dropping the receiver is fine; the
/// worker logs and moves on.
pub type Completion = oneshot::Sender<Result<BatchReport>>;

pub(crate) struct QueueItem {
    pub priority: Priority,
    pub sequence: u64,
    pub enqueued_at: DateTime<Utc>,
    pub op: QueuedOp,
    pub completion: Option<Completion>,
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for QueueItem {}

impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: invert so low priority values and low
        // sequence numbers surface first.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The bounded operation queue.
pub struct OperationQueue {
    heap: Mutex<BinaryHeap<QueueItem>>,
    notify: Notify,
    capacity: usize,
    len: AtomicUsize,
    sequence: AtomicU64,
    closed: AtomicBool,
}

impl OperationQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            capacity,
            len: AtomicUsize::new(0),
            sequence: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.len.load(AtomicOrdering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue a mutation.
    ///
    /// # Errors
    ///
    /// [`ZeroRagError::QueueFull`] at capacity; [`ZeroRagError::Cancelled`]
    /// after [`close`](Self::close).
    pub fn push(
        &self,
        op: QueuedOp,
        priority: Priority,
        completion: Option<Completion>,
    ) -> Result<()> {
        if self.closed.load(AtomicOrdering::Acquire) {
            return Err(ZeroRagError::Cancelled("operation queue is shut down".into()));
        }
        let mut heap = self.heap.lock().unwrap_or_else(|e| e.into_inner());
        if heap.len() >= self.capacity {
            return Err(ZeroRagError::QueueFull);
        }
        let item = QueueItem {
            priority,
            sequence: self.sequence.fetch_add(1, AtomicOrdering::Relaxed),
            enqueued_at: Utc::now(),
            op,
            completion,
        };
        heap.push(item);
        self.len.store(heap.len(), AtomicOrdering::Relaxed);
        drop(heap);
        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the next item. Returns `None` once the queue is closed and
    /// fully drained.
    pub(crate) async fn pop_wait(&self) -> Option<QueueItem> {
        loop {
            {
                let mut heap = self.heap.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(item) = heap.pop() {
                    self.len.store(heap.len(), AtomicOrdering::Relaxed);
                    return Some(item);
                }
                if self.closed.load(AtomicOrdering::Acquire) {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Stop accepting new items and wake the worker so it can drain and exit.
    pub fn close(&self) {
        self.closed.store(true, AtomicOrdering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::document::Chunk;

    fn op(tag: &str) -> QueuedOp {
        QueuedOp::DeleteBatch(vec![tag.to_string()])
    }

    fn op_tag(item: &QueueItem) -> String {
        match &item.op {
            QueuedOp::DeleteBatch(ids) => ids[0].clone(),
            QueuedOp::UpsertBatch(records) => records[0].id().to_string(),
        }
    }

    #[tokio::test]
    async fn drains_priority_then_fifo() {
        let queue = OperationQueue::new(10);
        queue.push(op("normal-1"), Priority::Normal, None).unwrap();
        queue.push(op("low-1"), Priority::Low, None).unwrap();
        queue.push(op("high-1"), Priority::High, None).unwrap();
        queue.push(op("normal-2"), Priority::Normal, None).unwrap();
        queue.push(op("high-2"), Priority::High, None).unwrap();
        queue.close();

        let mut order = Vec::new();
        while let Some(item) = queue.pop_wait().await {
            order.push(op_tag(&item));
        }
        assert_eq!(order, vec!["high-1", "high-2", "normal-1", "normal-2", "low-1"]);
    }

    #[tokio::test]
    async fn rejects_when_full() {
        let queue = OperationQueue::new(2);
        queue.push(op("a"), Priority::Normal, None).unwrap();
        queue.push(op("b"), Priority::Normal, None).unwrap();
        assert!(matches!(
            queue.push(op("c"), Priority::Normal, None),
            Err(ZeroRagError::QueueFull)
        ));

        // Draining frees capacity again.
        let _ = queue.pop_wait().await;
        queue.push(op("c"), Priority::Normal, None).unwrap();
    }

    #[tokio::test]
    async fn upsert_then_delete_same_priority_keeps_order() {
        let queue = OperationQueue::new(10);
        let chunk = Chunk::new("doc", 0, "text".into(), 0, 4, HashMap::new());
        let record = VectorRecord::new(chunk, vec![1.0]);
        queue
            .push(QueuedOp::UpsertBatch(vec![record]), Priority::Normal, None)
            .unwrap();
        queue.push(op("same-id"), Priority::Normal, None).unwrap();
        queue.close();

        let first = queue.pop_wait().await.unwrap();
        let second = queue.pop_wait().await.unwrap();
        assert_eq!(first.op.kind(), "insert_batch");
        assert_eq!(second.op.kind(), "delete_batch");
    }

    #[tokio::test]
    async fn closed_queue_rejects_pushes() {
        let queue = OperationQueue::new(4);
        queue.close();
        assert!(matches!(
            queue.push(op("late"), Priority::Normal, None),
            Err(ZeroRagError::Cancelled(_))
        ));
        assert!(queue.pop_wait().await.is_none());
    }
}
