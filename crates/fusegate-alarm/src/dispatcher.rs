use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;

use fusegate_common::types::AlarmPayload;

use crate::error::{AlarmError, Result};

/// Request-path handle for enqueueing alarms. Enqueueing never blocks;
/// when the queue is full the alarm is dropped and counted.
pub struct AlarmDispatcher {
    tx: mpsc::Sender<AlarmPayload>,
    dropped: AtomicU64,
}

impl AlarmDispatcher {
    /// Builds the dispatcher and its worker; the caller spawns
    /// [`AlarmWorker::run`]. The hard per-request timeout is baked into the
    /// client so a slow alarm endpoint cannot back the queue up for long.
    pub fn new(
        url: String,
        timeout: Duration,
        queue_capacity: usize,
    ) -> Result<(Self, AlarmWorker)> {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let dispatcher = Self {
            tx,
            dropped: AtomicU64::new(0),
        };
        let worker = AlarmWorker {
            rx,
            url,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        };
        Ok((dispatcher, worker))
    }

    pub fn enqueue(&self, payload: AlarmPayload) {
        if let Err(e) = self.tx.try_send(payload) {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(dropped, error = %e, "Alarm queue full, alarm dropped");
        }
    }

    /// Total alarms dropped due to backpressure.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Drains the alarm queue into `POST <url>` with a form body `msg=<json>`.
/// Delivery failures are logged and dropped; there are no retries.
pub struct AlarmWorker {
    rx: mpsc::Receiver<AlarmPayload>,
    url: String,
    client: reqwest::Client,
}

impl AlarmWorker {
    pub async fn run(mut self) {
        while let Some(payload) = self.rx.recv().await {
            match self.deliver(&payload).await {
                Ok(()) => {
                    tracing::debug!(
                        feature = %payload.feature,
                        command = %payload.command,
                        "Alarm delivered"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        feature = %payload.feature,
                        command = %payload.command,
                        error = %e,
                        "Alarm delivery failed, dropped"
                    );
                }
            }
        }
    }

    async fn deliver(&self, payload: &AlarmPayload) -> Result<()> {
        let msg = serde_json::to_string(payload)?;
        let response = self
            .client
            .post(&self.url)
            .form(&[("msg", msg.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AlarmError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}
