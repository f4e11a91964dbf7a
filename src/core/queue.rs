//! Component G (Work Queue) — spec §4.G.
//!
//! Safe for concurrent producers (the Scheduler, on requeue) and
//! consumers (Workers, on pop). Built on a `Semaphore` whose permit count
//! tracks queue depth: `close()` uses the semaphore's own close semantics
//! so every blocked and future `pop()` resolves to `None` without a
//! lost-wakeup race.

use std::collections::VecDeque;
use tokio::sync::{Mutex, Semaphore};

pub struct WorkQueue {
    items: Mutex<VecDeque<usize>>,
    permits: Semaphore,
}

impl WorkQueue {
    pub fn new(indices: impl IntoIterator<Item = usize>) -> Self {
        let items: VecDeque<usize> = indices.into_iter().collect();
        let permits = Semaphore::new(items.len());
        Self {
            items: Mutex::new(items),
            permits,
        }
    }

    /// Blocks until an index is available or the queue is closed.
    pub async fn pop(&self) -> Option<usize> {
        match self.permits.acquire().await {
            Ok(permit) => {
                permit.forget();
                let mut items = self.items.lock().await;
                items.pop_front()
            }
            Err(_) => None,
        }
    }

    /// Requeues a failed chunk at the back of the FIFO.
    pub async fn push_back(&self, index: usize) {
        let mut items = self.items.lock().await;
        items.push_back(index);
        drop(items);
        self.permits.add_permits(1);
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    /// Closes the queue: every blocked and future `pop()` returns `None`.
    /// Called by the Scheduler once on job success or give-up.
    pub fn close(&self) {
        self.permits.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let queue = WorkQueue::new(vec![0, 1, 2]);
        assert_eq!(queue.pop().await, Some(0));
        assert_eq!(queue.pop().await, Some(1));
        assert_eq!(queue.pop().await, Some(2));
    }

    #[tokio::test]
    async fn push_back_requeues_at_the_tail() {
        let queue = WorkQueue::new(vec![0, 1]);
        assert_eq!(queue.pop().await, Some(0));
        queue.push_back(0).await;
        assert_eq!(queue.pop().await, Some(1));
        assert_eq!(queue.pop().await, Some(0));
    }

    #[tokio::test]
    async fn close_wakes_blocked_pop_with_none() {
        let queue = Arc::new(WorkQueue::new(Vec::<usize>::new()));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("pop should resolve promptly after close")
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn pop_after_close_with_remaining_items_returns_none() {
        let queue = WorkQueue::new(vec![0]);
        queue.close();
        assert_eq!(queue.pop().await, None);
    }
}
