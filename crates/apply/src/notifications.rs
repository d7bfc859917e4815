//! Commit notification queue between the sequencer and the apply workers.
//!
//! Multi-consumer, at-least-once: duplicates and cross-table reordering are
//! expected and harmless — the apply job dedups against its watermark and
//! the per-table lock serializes actual application.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;
use tessera_wal::{TxnNotification, TxnNotifier};

/// Shared queue of `(table_id, table_name, txn)` commit notifications.
pub struct NotificationQueue {
    inner: Mutex<VecDeque<TxnNotification>>,
    not_empty: Condvar,
}

impl Default for NotificationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationQueue {
    /// Empty queue.
    pub fn new() -> Self {
        NotificationQueue {
            inner: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
        }
    }

    /// Enqueue a notification and wake one worker.
    pub fn publish(&self, notification: TxnNotification) {
        self.inner.lock().push_back(notification);
        self.not_empty.notify_one();
    }

    /// Dequeue, waiting up to `timeout` for a notification to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<TxnNotification> {
        let mut queue = self.inner.lock();
        if queue.is_empty() {
            self.not_empty.wait_for(&mut queue, timeout);
        }
        queue.pop_front()
    }

    /// Dequeue without waiting.
    pub fn try_pop(&self) -> Option<TxnNotification> {
        self.inner.lock().pop_front()
    }

    /// Number of queued notifications.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// True when no notification is queued.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl TxnNotifier for NotificationQueue {
    fn txn_committed(&self, notification: TxnNotification) {
        self.publish(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn notification(txn: u64) -> TxnNotification {
        TxnNotification {
            table_id: 1,
            table_name: "trades".to_string(),
            txn,
        }
    }

    #[test]
    fn test_fifo_order() {
        let queue = NotificationQueue::new();
        queue.publish(notification(1));
        queue.publish(notification(2));
        assert_eq!(queue.try_pop().unwrap().txn, 1);
        assert_eq!(queue.try_pop().unwrap().txn, 2);
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_pop_timeout_wakes_on_publish() {
        let queue = Arc::new(NotificationQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.pop_timeout(Duration::from_secs(5)))
        };
        queue.publish(notification(7));
        assert_eq!(consumer.join().unwrap().unwrap().txn, 7);
    }

    #[test]
    fn test_pop_timeout_expires_empty() {
        let queue = NotificationQueue::new();
        assert!(queue.pop_timeout(Duration::from_millis(10)).is_none());
    }
}
