// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;

struct Inner<T> {
    items: VecDeque<T>,
    waiters: VecDeque<oneshot::Sender<T>>,
    closed: bool,
}

/// Unbounded queue with suspending consumers.
///
/// A produced value goes straight to the longest waiting consumer if there
/// is one, otherwise it is buffered. Consumers take buffered values oldest
/// first and wait when the buffer is empty.
pub struct Producer<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Producer {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for Producer<T> {
    fn default() -> Self {
        Producer {
            inner: Arc::new(Mutex::new(Inner {
                items: VecDeque::new(),
                waiters: VecDeque::new(),
                closed: false,
            })),
        }
    }
}

impl<T: Send> Producer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn produce(&self, value: T) {
        let mut inner = self.inner.lock();
        if inner.closed {
            trace!("producer closed, value dropped");
            return;
        }

        let mut value = value;
        while let Some(waiter) = inner.waiters.pop_front() {
            // a consumer that gave up returns the value
            match waiter.send(value) {
                Ok(()) => return,
                Err(v) => value = v,
            }
        }
        inner.items.push_back(value);
    }

    /// Oldest buffered value, or the next produced one. `None` once the
    /// producer is closed and drained.
    pub async fn consume(&self) -> Option<T> {
        let rx = {
            let mut inner = self.inner.lock();
            if let Some(value) = inner.items.pop_front() {
                return Some(value);
            }
            if inner.closed {
                return None;
            }
            let (tx, rx) = oneshot::channel();
            inner.waiters.push_back(tx);
            rx
        };
        rx.await.ok()
    }

    /// Stop accepting values and wake every waiting consumer with `None`.
    /// Buffered values can still be consumed.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.waiters.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of consumers waiting for a value.
    pub fn waiting(&self) -> usize {
        self.inner.lock().waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_buffered_in_order() {
        let producer = Producer::new();
        producer.produce(1);
        producer.produce(2);
        producer.produce(3);
        assert_eq!(producer.len(), 3);

        assert_eq!(producer.consume().await, Some(1));
        assert_eq!(producer.consume().await, Some(2));
        assert_eq!(producer.consume().await, Some(3));
        assert!(producer.is_empty());
    }

    #[tokio::test]
    async fn test_waiting_consumers_first_come_first_served() {
        let producer = Producer::new();

        let first = tokio::spawn({
            let p = producer.clone();
            async move { p.consume().await }
        });
        while producer.waiting() < 1 {
            tokio::task::yield_now().await;
        }
        let second = tokio::spawn({
            let p = producer.clone();
            async move { p.consume().await }
        });
        while producer.waiting() < 2 {
            tokio::task::yield_now().await;
        }

        producer.produce("a");
        producer.produce("b");
        // handed off directly, never buffered
        assert!(producer.is_empty());

        assert_eq!(first.await.unwrap(), Some("a"));
        assert_eq!(second.await.unwrap(), Some("b"));
    }

    #[tokio::test]
    async fn test_abandoned_consumer_does_not_lose_values() {
        let producer = Producer::new();
        let res = tokio::time::timeout(Duration::from_millis(10), producer.consume()).await;
        assert!(res.is_err());

        producer.produce(7);
        assert_eq!(producer.len(), 1);
        assert_eq!(producer.consume().await, Some(7));
    }

    #[tokio::test]
    async fn test_close() {
        let producer = Producer::new();
        producer.produce(1);

        let waiter = tokio::spawn({
            let p: Producer<i32> = Producer::new();
            let q = p.clone();
            async move {
                let res = tokio::spawn(async move { q.consume().await });
                while p.waiting() < 1 {
                    tokio::task::yield_now().await;
                }
                p.close();
                res.await.unwrap()
            }
        });
        assert_eq!(waiter.await.unwrap(), None);

        producer.close();
        producer.produce(2);
        assert_eq!(producer.consume().await, Some(1));
        assert_eq!(producer.consume().await, None);
    }
}
