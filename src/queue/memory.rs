//! In-process dispatch queue

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{DispatchQueue, QueueError};
use crate::data::ScheduledTask;

#[derive(Default)]
pub struct InMemoryQueue {
    topics: Mutex<HashMap<String, VecDeque<ScheduledTask>>>,
    notify: Notify,
    unavailable: AtomicBool,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a queue outage
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self, topic: &str) -> usize {
        self.topics.lock().get(topic).map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }

    fn take(&self, topic: &str, max: usize) -> Vec<ScheduledTask> {
        let mut topics = self.topics.lock();
        match topics.get_mut(topic) {
            Some(queue) => {
                let n = max.min(queue.len());
                queue.drain(..n).collect()
            }
            None => Vec::new(),
        }
    }

    fn check_available(&self) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(QueueError::Unavailable("in-memory queue offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DispatchQueue for InMemoryQueue {
    async fn publish(&self, topic: &str, tasks: Vec<ScheduledTask>) -> Result<usize, QueueError> {
        self.check_available()?;
        let count = tasks.len();
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .extend(tasks);
        self.notify.notify_waiters();
        Ok(count)
    }

    async fn dequeue(
        &self,
        topic: &str,
        timeout: Duration,
        max: usize,
    ) -> Result<Vec<ScheduledTask>, QueueError> {
        self.check_available()?;
        if max == 0 {
            return Ok(Vec::new());
        }

        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let tasks = self.take(topic, max);
            if !tasks.is_empty() {
                return Ok(tasks);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fifo_and_max_count() {
        let queue = InMemoryQueue::new();
        let tasks: Vec<_> = (1..=5).map(|id| ScheduledTask::new(id, 60_000)).collect();
        assert_eq!(queue.publish("t", tasks).await.unwrap(), 5);

        let first = queue.dequeue("t", Duration::from_millis(10), 3).await.unwrap();
        assert_eq!(first.iter().map(|t| t.alert_id).collect::<Vec<_>>(), vec![1, 2, 3]);
        let rest = queue.dequeue("t", Duration::from_millis(10), 10).await.unwrap();
        assert_eq!(rest.len(), 2);
        assert!(queue.is_empty("t"));
    }

    #[tokio::test]
    async fn test_dequeue_times_out_empty() {
        let queue = InMemoryQueue::new();
        let start = Instant::now();
        let tasks = queue.dequeue("t", Duration::from_millis(30), 10).await.unwrap();
        assert!(tasks.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_publish() {
        let queue = Arc::new(InMemoryQueue::new());
        let consumer = Arc::clone(&queue);
        let waiter = tokio::spawn(async move {
            consumer.dequeue("t", Duration::from_secs(5), 10).await.unwrap()
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue
            .publish("t", vec![ScheduledTask::new(9, 0)])
            .await
            .unwrap();

        let tasks = waiter.await.unwrap();
        assert_eq!(tasks, vec![ScheduledTask::new(9, 0)]);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let queue = InMemoryQueue::new();
        queue.publish("a", vec![ScheduledTask::new(1, 0)]).await.unwrap();
        assert!(queue
            .dequeue("b", Duration::from_millis(5), 10)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(queue.len("a"), 1);
    }
}
