//! Build task admission queue.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::QueueError;
use crate::task::BuildTask;

/// Unbounded FIFO of submitted build tasks.
///
/// `enqueue` never waits. `dequeue` waits for a task or for [`shutdown`],
/// whichever comes first; any number of consumers may wait at once.
///
/// [`shutdown`]: BuildQueue::shutdown
pub struct BuildQueue {
    tx: mpsc::UnboundedSender<BuildTask>,
    rx: Mutex<mpsc::UnboundedReceiver<BuildTask>>,
    shutdown: CancellationToken,
    len: AtomicUsize,
}

impl BuildQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            shutdown: CancellationToken::new(),
            len: AtomicUsize::new(0),
        }
    }

    /// Append a task. Fails only once the queue has been shut down.
    pub fn enqueue(&self, task: BuildTask) -> Result<(), QueueError> {
        if self.shutdown.is_cancelled() {
            return Err(QueueError::Shutdown);
        }
        let task_id = task.id.clone();
        // Count first so a fast consumer never sees the counter go negative.
        self.len.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(task).is_err() {
            self.len.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::Shutdown);
        }
        debug!(task_id = %task_id, "Task enqueued");
        Ok(())
    }

    /// Wait for the next task.
    pub async fn dequeue(&self) -> Result<BuildTask, QueueError> {
        let mut rx = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(QueueError::Shutdown),
            guard = self.rx.lock() => guard,
        };

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(QueueError::Shutdown),
            task = rx.recv() => {
                let task = task.ok_or(QueueError::Shutdown)?;
                self.len.fetch_sub(1, Ordering::SeqCst);
                Ok(task)
            }
        }
    }

    /// Release every waiting consumer and refuse further tasks.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!(pending = self.len(), "Shutting down build queue");
        }
        self.shutdown.cancel();
    }

    /// Take every task still queued. Only meaningful after [`shutdown`](Self::shutdown).
    pub async fn drain(&self) -> Vec<BuildTask> {
        let mut rx = self.rx.lock().await;
        rx.close();

        let mut drained = Vec::new();
        while let Ok(task) = rx.try_recv() {
            self.len.fetch_sub(1, Ordering::SeqCst);
            drained.push(task);
        }
        drained
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Number of tasks waiting to be dequeued.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BuildQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::testing::{noop_task, task_for};

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = BuildQueue::new();
        for name in ["a", "b", "c"] {
            queue.enqueue(task_for(name)).unwrap();
        }
        assert_eq!(queue.len(), 3);

        let mut order = Vec::new();
        for _ in 0..3 {
            order.push(queue.dequeue().await.unwrap().config.project_name);
        }
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_enqueue() {
        let queue = Arc::new(BuildQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        queue.enqueue(task_for("late")).unwrap();
        let task = tokio::time::timeout(Duration::from_secs(5), consumer)
            .await
            .expect("consumer should receive the task")
            .unwrap()
            .unwrap();
        assert_eq!(task.config.project_name, "late");
    }

    #[tokio::test]
    async fn test_shutdown_releases_all_waiters() {
        let queue = Arc::new(BuildQueue::new());
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.dequeue().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.shutdown();

        for consumer in consumers {
            let result = tokio::time::timeout(Duration::from_secs(5), consumer)
                .await
                .expect("blocked consumer should exit on shutdown")
                .unwrap();
            assert_eq!(result.unwrap_err(), QueueError::Shutdown);
        }
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_fails_and_drain_returns_leftovers() {
        let queue = BuildQueue::new();
        queue.enqueue(noop_task()).unwrap();
        queue.enqueue(noop_task()).unwrap();
        queue.shutdown();

        assert!(queue.is_shutdown());
        assert_eq!(queue.enqueue(noop_task()).unwrap_err(), QueueError::Shutdown);
        assert_eq!(queue.dequeue().await.unwrap_err(), QueueError::Shutdown);

        let drained = queue.drain().await;
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty());
    }
}
