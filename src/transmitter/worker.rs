//! Worker loop and the pluggable processing step.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::cancel::CancelToken;
use super::tracker::WorkerGuard;
use crate::types::TenantId;

/// Receiving end of a generation's task buffer, shared by its workers.
pub type SharedReceiver = Arc<Mutex<mpsc::Receiver<Vec<u8>>>>;

/// Processing step applied to each payload a worker takes off the buffer.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    /// Handle one payload. Errors are logged by the worker, never retried.
    async fn process(&self, tenant_id: TenantId, worker: usize, payload: &[u8])
        -> anyhow::Result<()>;
}

/// Reference processor: logs the payload and simulates a fixed latency.
#[derive(Debug, Clone)]
pub struct SimulatedProcessor {
    delay: Duration,
}

impl SimulatedProcessor {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for SimulatedProcessor {
    fn default() -> Self {
        Self::new(Duration::from_millis(crate::DEFAULT_PROCESSING_DELAY_MS))
    }
}

#[async_trait]
impl TaskProcessor for SimulatedProcessor {
    async fn process(
        &self,
        tenant_id: TenantId,
        worker: usize,
        payload: &[u8],
    ) -> anyhow::Result<()> {
        info!(
            tenant_id = %tenant_id,
            worker,
            payload = %String::from_utf8_lossy(payload),
            "Processing payload"
        );
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

/// One executor bound to a single generation's buffer and cancellation.
pub(crate) struct Worker {
    pub tenant_id: TenantId,
    pub ordinal: usize,
    pub generation: u64,
    pub tasks: SharedReceiver,
    pub cancel: CancelToken,
    pub processor: Arc<dyn TaskProcessor>,
}

impl Worker {
    /// Run until cancelled. Cancellation is observed only between payloads;
    /// the guard releases the shutdown barrier on every exit path.
    pub async fn run(mut self, _guard: WorkerGuard) {
        debug!(
            tenant_id = %self.tenant_id,
            worker = self.ordinal,
            generation = self.generation,
            "Worker started"
        );

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                payload = Self::next_payload(&self.tasks) => payload,
            };

            let Some(payload) = next else { break };

            if let Err(e) = self
                .processor
                .process(self.tenant_id, self.ordinal, &payload)
                .await
            {
                warn!(
                    tenant_id = %self.tenant_id,
                    worker = self.ordinal,
                    error = %e,
                    "Failed to process payload, dropping it"
                );
            }
        }

        debug!(
            tenant_id = %self.tenant_id,
            worker = self.ordinal,
            generation = self.generation,
            "Worker exiting"
        );
    }

    async fn next_payload(tasks: &SharedReceiver) -> Option<Vec<u8>> {
        tasks.lock().await.recv().await
    }
}
