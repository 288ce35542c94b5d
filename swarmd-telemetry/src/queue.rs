//! Bounded span queue
//!
//! Multi-producer, single-consumer. Producers never block: when the queue
//! is full the oldest span is dropped and a counter incremented. The
//! consumer parks on a condvar with a timeout so shutdown stays prompt.

use crate::span::SpanRecord;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub struct SpanQueue {
    inner: Mutex<VecDeque<SpanRecord>>,
    available: Condvar,
    capacity: usize,
    dropped: AtomicU64,
    pushed: AtomicU64,
}

impl SpanQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            available: Condvar::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
            pushed: AtomicU64::new(0),
        }
    }

    /// Enqueue one span. Never blocks; drops the oldest entry when full.
    pub fn push(&self, span: SpanRecord) {
        let mut queue = self.inner.lock();
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(span);
        self.pushed.fetch_add(1, Ordering::Release);
        drop(queue);
        self.available.notify_one();
    }

    /// Drain up to `max` spans, waiting up to `timeout` for the first one.
    pub fn pop_batch(&self, max: usize, timeout: Duration) -> Vec<SpanRecord> {
        let mut queue = self.inner.lock();
        if queue.is_empty() {
            self.available.wait_for(&mut queue, timeout);
        }
        let take = queue.len().min(max);
        queue.drain(..take).collect()
    }

    pub fn wake_consumer(&self) {
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Spans discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Total spans ever enqueued (including later-dropped ones).
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{Resource, SpanStatus};
    use std::collections::BTreeMap;

    fn span(name: &str) -> SpanRecord {
        SpanRecord {
            trace_id: "0".repeat(31) + "1",
            span_id: "0".repeat(15) + "1",
            parent_span_id: None,
            operation_name: name.to_string(),
            start_ns: 1,
            end_ns: 2,
            status: SpanStatus::Ok,
            attributes: BTreeMap::new(),
            resource: Resource::default(),
        }
    }

    #[test]
    fn test_fifo_order() {
        let queue = SpanQueue::new(8);
        queue.push(span("a"));
        queue.push(span("b"));
        let batch = queue.pop_batch(10, Duration::from_millis(1));
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].operation_name, "a");
        assert_eq!(batch[1].operation_name, "b");
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let queue = SpanQueue::new(2);
        queue.push(span("a"));
        queue.push(span("b"));
        queue.push(span("c"));
        assert_eq!(queue.dropped(), 1);
        let batch = queue.pop_batch(10, Duration::from_millis(1));
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].operation_name, "b");
        assert_eq!(batch[1].operation_name, "c");
    }

    #[test]
    fn test_pop_batch_respects_max() {
        let queue = SpanQueue::new(8);
        for i in 0..5 {
            queue.push(span(&format!("s{}", i)));
        }
        assert_eq!(queue.pop_batch(3, Duration::from_millis(1)).len(), 3);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_producers_never_block() {
        let queue = std::sync::Arc::new(SpanQueue::new(4));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..1_000 {
                    queue.push(span(&format!("s{}", i)));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(queue.len() <= 4);
        assert_eq!(queue.dropped() + queue.len() as u64, 4_000);
    }
}
