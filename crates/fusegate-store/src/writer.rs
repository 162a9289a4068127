use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use fusegate_common::types::ExecStatus;

use crate::telemetry::TelemetryStore;

/// One deferred telemetry write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteTask {
    Event {
        command_key: String,
        exec_time_ms: i64,
        status: ExecStatus,
    },
    DeviceHit {
        device_key: String,
        command_key: String,
    },
}

/// Bounded queue between the request path and the write workers.
///
/// Telemetry is best-effort: when the queue is full the OLDEST task is
/// dropped so request latency never rises with backend pressure. Drops are
/// counted and surfaced on the admin health endpoint.
pub struct WriteQueue {
    tasks: Mutex<VecDeque<WriteTask>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl WriteQueue {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            tasks: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            notify: Notify::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        })
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<WriteTask>> {
        // A poisoned queue of fire-and-forget writes is still usable.
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueues a task, evicting the oldest one when full. Never blocks.
    pub fn push(&self, task: WriteTask) {
        {
            let mut tasks = self.lock();
            if tasks.len() >= self.capacity {
                tasks.pop_front();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    tracing::warn!(dropped, "Telemetry write queue saturated, dropping oldest");
                }
            }
            tasks.push_back(task);
        }
        self.notify.notify_one();
    }

    /// Waits for and removes the next task.
    pub async fn pop(&self) -> WriteTask {
        loop {
            if let Some(task) = self.lock().pop_front() {
                return task;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Total writes evicted because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Spawns the worker pool that drains the queue into the store.
///
/// Write failures are logged and the task is dropped; nothing is retried
/// and nothing reaches the request path.
pub fn spawn_writers(
    queue: Arc<WriteQueue>,
    store: TelemetryStore,
    workers: usize,
) -> Vec<JoinHandle<()>> {
    (0..workers.max(1))
        .map(|worker| {
            let queue = queue.clone();
            let store = store.clone();
            tokio::spawn(async move {
                loop {
                    let task = queue.pop().await;
                    let result = match &task {
                        WriteTask::Event {
                            command_key,
                            exec_time_ms,
                            status,
                        } => store.record_event(command_key, *exec_time_ms, *status).await,
                        WriteTask::DeviceHit {
                            device_key,
                            command_key,
                        } => store.record_device_hit(device_key, command_key).await,
                    };
                    if let Err(e) = result {
                        tracing::warn!(worker, error = %e, "Telemetry write failed, record dropped");
                    }
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(command_key: &str) -> WriteTask {
        WriteTask::Event {
            command_key: command_key.to_string(),
            exec_time_ms: 10,
            status: ExecStatus::Success,
        }
    }

    #[tokio::test]
    async fn push_then_pop_is_fifo() {
        let queue = WriteQueue::new(8);
        queue.push(event("a"));
        queue.push(event("b"));

        assert_eq!(queue.pop().await, event("a"));
        assert_eq!(queue.pop().await, event("b"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn overflow_drops_oldest() {
        let queue = WriteQueue::new(2);
        queue.push(event("a"));
        queue.push(event("b"));
        queue.push(event("c"));

        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop().await, event("b"));
        assert_eq!(queue.pop().await, event("c"));
    }

    #[tokio::test]
    async fn pop_wakes_on_push() {
        let queue = WriteQueue::new(4);
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;
        queue.push(event("late"));

        assert_eq!(waiter.await.unwrap(), event("late"));
    }
}
