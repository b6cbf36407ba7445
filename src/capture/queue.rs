//! Bounded hand-off queue between the image-arrival context and the
//! capture task.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Fixed capacity of the pending-capture image queue.
pub const IMAGE_BUFFER_SIZE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("image queue closed")]
pub struct QueueClosed;

struct QueueInner<T> {
    items: VecDeque<T>,
    capacity: usize,
    closed: bool,
}

/// Bounded FIFO that evicts its oldest entry when full.
///
/// Evicted and rejected items are handed back to the producer instead of
/// being dropped here, so buffers that need an explicit release can be
/// released by whoever owns that duty.
pub struct ImageQueue<T> {
    inner: Mutex<QueueInner<T>>,
    notify: Notify,
}

impl<T> ImageQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity.max(1)),
                capacity: capacity.max(1),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue `item`. Returns the evicted oldest item when full, or
    /// `item` itself when the queue is closed.
    pub fn push(&self, item: T) -> Option<T> {
        let mut g = self.lock();
        if g.closed {
            return Some(item);
        }

        let evicted = if g.items.len() >= g.capacity {
            g.items.pop_front()
        } else {
            None
        };
        g.items.push_back(item);
        drop(g);

        self.notify.notify_one();
        evicted
    }

    /// Pop bounded by a tokio deadline. `Ok(None)` when the deadline
    /// passes first; `Err` once closed and empty.
    pub async fn pop_until(&self, deadline: tokio::time::Instant) -> Result<Option<T>, QueueClosed> {
        loop {
            // notify_one leaves a permit, so a push after the check still wakes us
            let notified = self.notify.notified();
            {
                let mut g = self.lock();
                if let Some(item) = g.items.pop_front() {
                    return Ok(Some(item));
                }
                if g.closed {
                    return Err(QueueClosed);
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    /// Remove and return everything queued.
    pub fn drain(&self) -> Vec<T> {
        self.lock().items.drain(..).collect()
    }

    /// Refuse further pushes and wake any waiter.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_evicts_oldest_when_full() {
        let queue = ImageQueue::new(3);
        assert_eq!(queue.push(5), None);
        assert_eq!(queue.push(7), None);
        assert_eq!(queue.push(9), None);
        assert_eq!(queue.push(12), Some(5));
        assert_eq!(queue.drain(), vec![7, 9, 12]);
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let queue = ImageQueue::new(0);
        assert_eq!(queue.push(1), None);
        assert_eq!(queue.push(2), Some(1));
    }

    #[tokio::test]
    async fn test_closed_queue_hands_item_back() {
        let queue = ImageQueue::new(3);
        queue.push(1);
        queue.close();
        assert_eq!(queue.push(2), Some(2));

        // Items queued before close are still handed out
        let deadline = tokio::time::Instant::now() + Duration::from_millis(10);
        assert_eq!(queue.pop_until(deadline).await, Ok(Some(1)));
        assert_eq!(queue.pop_until(deadline).await, Err(QueueClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_until_deadline() {
        let queue: ImageQueue<u32> = ImageQueue::new(3);
        let deadline = tokio::time::Instant::now() + Duration::from_millis(5000);
        assert_eq!(queue.pop_until(deadline).await, Ok(None));
        assert!(tokio::time::Instant::now() >= deadline);
    }

    #[tokio::test]
    async fn test_pop_until_sees_push_from_thread() {
        let queue = Arc::new(ImageQueue::new(3));
        let producer = queue.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            producer.push(7u32);
        });
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        assert_eq!(queue.pop_until(deadline).await, Ok(Some(7)));
    }

    #[tokio::test]
    async fn test_close_wakes_async_waiter() {
        let queue = Arc::new(ImageQueue::<u32>::new(3));
        let closer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            closer.close();
        });
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        assert_eq!(queue.pop_until(deadline).await, Err(QueueClosed));
    }
}
