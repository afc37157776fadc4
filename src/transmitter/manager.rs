//! Registry of per-tenant transmitters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use super::cancel::CancelHandle;
use super::tracker::WorkerTracker;
use super::worker::{SharedReceiver, TaskProcessor, Worker};
use super::TransmitterError;
use crate::types::TenantId;
use crate::TASK_BUFFER_CAPACITY;

/// Result of handing a payload to a tenant's transmitter.
///
/// Informational only: none of these outcomes is an error for the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The payload is in the current generation's buffer.
    Accepted,
    /// The buffer was full; the payload was discarded.
    Dropped,
    /// No transmitter is registered for the tenant.
    NoTransmitter,
}

/// One version of a transmitter's buffer, cancellation and worker set.
struct Generation {
    number: u64,
    sender: mpsc::Sender<Vec<u8>>,
    // Keeps the buffer open while the generation has no workers.
    _tasks: SharedReceiver,
    cancel: CancelHandle,
    worker_count: usize,
}

/// Per-tenant handle owning the current generation.
struct Transmitter {
    instance: u64,
    generation: Generation,
}

/// Owns every tenant's bounded task buffer and worker pool.
///
/// At most one transmitter exists per tenant. Every worker spawned through
/// this manager, in any generation, is tracked by a shared join barrier that
/// `shutdown_and_wait` blocks on.
pub struct TransmitterManager {
    transmitters: RwLock<HashMap<TenantId, Transmitter>>,
    tracker: Arc<WorkerTracker>,
    processor: Arc<dyn TaskProcessor>,
    capacity: usize,
    next_instance: AtomicU64,
}

impl TransmitterManager {
    /// Create a manager with the default buffer capacity.
    pub fn new(processor: Arc<dyn TaskProcessor>) -> Self {
        Self::with_capacity(processor, TASK_BUFFER_CAPACITY)
    }

    /// Create a manager whose task buffers hold `capacity` payloads.
    pub fn with_capacity(processor: Arc<dyn TaskProcessor>, capacity: usize) -> Self {
        Self {
            transmitters: RwLock::new(HashMap::new()),
            tracker: WorkerTracker::new(),
            processor,
            capacity: capacity.max(1),
            next_instance: AtomicU64::new(1),
        }
    }

    /// Register a transmitter for `tenant_id` and spawn `workers` workers.
    ///
    /// Returns the instance number of the new transmitter. A later
    /// [`stop_transmitter_instance`](Self::stop_transmitter_instance) with that
    /// number only stops this transmitter, never one started after it.
    #[instrument(skip(self))]
    pub async fn start_transmitter(
        &self,
        tenant_id: TenantId,
        workers: usize,
    ) -> Result<u64, TransmitterError> {
        let mut transmitters = self.transmitters.write().await;

        if transmitters.contains_key(&tenant_id) {
            warn!(tenant_id = %tenant_id, "Transmitter already exists");
            return Err(TransmitterError::AlreadyExists { tenant_id });
        }

        let instance = self.next_instance.fetch_add(1, Ordering::Relaxed);
        let generation = self.spawn_generation(tenant_id, 0, workers);
        transmitters.insert(
            tenant_id,
            Transmitter {
                instance,
                generation,
            },
        );

        info!(tenant_id = %tenant_id, workers, instance, "Started transmitter");
        Ok(instance)
    }

    /// Offer a payload to the tenant's current buffer without waiting.
    pub async fn enqueue(&self, tenant_id: TenantId, payload: Vec<u8>) -> EnqueueOutcome {
        let transmitters = self.transmitters.read().await;

        let Some(transmitter) = transmitters.get(&tenant_id) else {
            warn!(tenant_id = %tenant_id, "No transmitter found, discarding payload");
            return EnqueueOutcome::NoTransmitter;
        };

        match transmitter.generation.sender.try_send(payload) {
            Ok(()) => EnqueueOutcome::Accepted,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(tenant_id = %tenant_id, "Task queue full, dropping message");
                EnqueueOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(tenant_id = %tenant_id, "Task queue closed, dropping message");
                EnqueueOutcome::Dropped
            }
        }
    }

    /// Replace the tenant's generation with a fresh one running `workers` workers.
    ///
    /// Payloads still buffered in the old generation are abandoned.
    #[instrument(skip(self))]
    pub async fn update_worker_count(&self, tenant_id: TenantId, workers: usize) {
        let mut transmitters = self.transmitters.write().await;

        let Some(transmitter) = transmitters.get_mut(&tenant_id) else {
            warn!(tenant_id = %tenant_id, "No transmitter found, ignoring resize");
            return;
        };

        transmitter.generation.cancel.cancel();

        let next = transmitter.generation.number + 1;
        let retired = std::mem::replace(
            &mut transmitter.generation,
            self.spawn_generation(tenant_id, next, workers),
        );

        info!(
            tenant_id = %tenant_id,
            workers,
            generation = next,
            abandoned = self.capacity - retired.sender.capacity(),
            "Updated worker count"
        );
    }

    /// Cancel the tenant's workers and forget the transmitter. Does not wait.
    #[instrument(skip(self))]
    pub async fn stop_transmitter(&self, tenant_id: TenantId) {
        let removed = self.transmitters.write().await.remove(&tenant_id);

        match removed {
            Some(transmitter) => {
                transmitter.generation.cancel.cancel();
                info!(tenant_id = %tenant_id, "Stopped transmitter");
            }
            None => warn!(tenant_id = %tenant_id, "No transmitter found, nothing to stop"),
        }
    }

    /// Stop the tenant's transmitter only if it is still `instance`.
    ///
    /// Returns whether a transmitter was stopped.
    #[instrument(skip(self))]
    pub async fn stop_transmitter_instance(&self, tenant_id: TenantId, instance: u64) -> bool {
        let mut transmitters = self.transmitters.write().await;

        match transmitters.get(&tenant_id) {
            Some(current) if current.instance == instance => {}
            Some(current) => {
                debug!(
                    tenant_id = %tenant_id,
                    current = current.instance,
                    "Transmitter was replaced, leaving it running"
                );
                return false;
            }
            None => return false,
        }

        if let Some(transmitter) = transmitters.remove(&tenant_id) {
            transmitter.generation.cancel.cancel();
            info!(tenant_id = %tenant_id, "Stopped transmitter");
        }
        true
    }

    /// Cancel every transmitter and block until every worker ever spawned has exited.
    pub async fn shutdown_and_wait(&self) {
        info!("Shutting down all transmitters");

        let drained: Vec<(TenantId, Transmitter)> =
            self.transmitters.write().await.drain().collect();

        for (tenant_id, transmitter) in &drained {
            info!(tenant_id = %tenant_id, "Stopping transmitter");
            transmitter.generation.cancel.cancel();
        }
        drop(drained);

        self.tracker.wait_idle().await;
        info!(spawned = self.tracker.spawned_total(), "All workers stopped");
    }

    /// Worker count of the tenant's current generation.
    pub async fn worker_count(&self, tenant_id: TenantId) -> Option<usize> {
        self.transmitters
            .read()
            .await
            .get(&tenant_id)
            .map(|t| t.generation.worker_count)
    }

    /// Generation number of the tenant's transmitter; 0 until the first resize.
    pub async fn generation(&self, tenant_id: TenantId) -> Option<u64> {
        self.transmitters
            .read()
            .await
            .get(&tenant_id)
            .map(|t| t.generation.number)
    }

    /// Payloads waiting in the tenant's current buffer.
    pub async fn pending(&self, tenant_id: TenantId) -> Option<usize> {
        self.transmitters
            .read()
            .await
            .get(&tenant_id)
            .map(|t| self.capacity - t.generation.sender.capacity())
    }

    pub async fn contains(&self, tenant_id: TenantId) -> bool {
        self.transmitters.read().await.contains_key(&tenant_id)
    }

    pub async fn tenants(&self) -> Vec<TenantId> {
        let mut tenants: Vec<TenantId> = self.transmitters.read().await.keys().copied().collect();
        tenants.sort();
        tenants
    }

    /// Workers still running across all tenants and generations.
    pub fn live_workers(&self) -> usize {
        self.tracker.live()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn spawn_generation(&self, tenant_id: TenantId, number: u64, workers: usize) -> Generation {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let (cancel, token) = CancelHandle::new();
        let tasks = Arc::new(Mutex::new(receiver));

        for ordinal in 0..workers {
            let worker = Worker {
                tenant_id,
                ordinal,
                generation: number,
                tasks: Arc::clone(&tasks),
                cancel: token.clone(),
                processor: Arc::clone(&self.processor),
            };
            let guard = self.tracker.register();
            tokio::spawn(worker.run(guard));
        }

        Generation {
            number,
            sender,
            _tasks: tasks,
            cancel,
            worker_count: workers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{eventually, RecordingProcessor};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn manager(processor: &Arc<RecordingProcessor>) -> TransmitterManager {
        TransmitterManager::new(Arc::clone(processor) as Arc<dyn TaskProcessor>)
    }

    #[tokio::test]
    async fn test_start_twice_reports_already_exists() {
        let processor = RecordingProcessor::new();
        let manager = manager(&processor);
        let tenant = TenantId::new();

        manager.start_transmitter(tenant, 3).await.unwrap();
        let err = manager.start_transmitter(tenant, 7).await.unwrap_err();

        assert!(matches!(err, TransmitterError::AlreadyExists { tenant_id } if tenant_id == tenant));
        assert_eq!(manager.worker_count(tenant).await, Some(3));
        assert_eq!(manager.generation(tenant).await, Some(0));
        eventually(|| manager.live_workers() == 3).await;

        manager.shutdown_and_wait().await;
    }

    #[tokio::test]
    async fn test_enqueue_past_capacity_drops_without_blocking() {
        let processor = RecordingProcessor::new();
        let manager = manager(&processor);
        let tenant = TenantId::new();
        manager.start_transmitter(tenant, 0).await.unwrap();

        let mut accepted = 0;
        let mut dropped = 0;
        let outcome = tokio::time::timeout(Duration::from_secs(1), async {
            for i in 0..150u32 {
                match manager.enqueue(tenant, i.to_be_bytes().to_vec()).await {
                    EnqueueOutcome::Accepted => accepted += 1,
                    EnqueueOutcome::Dropped => dropped += 1,
                    EnqueueOutcome::NoTransmitter => unreachable!(),
                }
            }
        })
        .await;

        assert!(outcome.is_ok(), "enqueue blocked");
        assert_eq!(accepted, TASK_BUFFER_CAPACITY);
        assert_eq!(dropped, 50);
        assert_eq!(manager.pending(tenant).await, Some(TASK_BUFFER_CAPACITY));

        manager.shutdown_and_wait().await;
    }

    #[tokio::test]
    async fn test_enqueue_unknown_tenant_is_noop() {
        let processor = RecordingProcessor::new();
        let manager = manager(&processor);
        let outcome = manager.enqueue(TenantId::new(), b"x".to_vec()).await;
        assert_eq!(outcome, EnqueueOutcome::NoTransmitter);
        assert!(manager.tenants().await.is_empty());
    }

    #[tokio::test]
    async fn test_workers_process_enqueued_payloads() {
        let processor = RecordingProcessor::new();
        let manager = manager(&processor);
        let tenant = TenantId::new();
        manager.start_transmitter(tenant, 2).await.unwrap();

        for body in ["a", "b", "c", "d"] {
            manager.enqueue(tenant, body.as_bytes().to_vec()).await;
        }

        eventually(|| processor.processed() == 4).await;
        let mut seen = processor.payloads();
        seen.sort();
        assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);

        manager.shutdown_and_wait().await;
    }

    #[tokio::test]
    async fn test_resize_replaces_generation_and_abandons_buffer() {
        let processor = RecordingProcessor::gated();
        let manager = manager(&processor);
        let tenant = TenantId::new();
        manager.start_transmitter(tenant, 3).await.unwrap();

        for i in 0..10u8 {
            manager.enqueue(tenant, vec![i]).await;
        }
        // Each worker holds one payload at the gate; the rest stay buffered.
        eventually(|| processor.started() == 3).await;
        assert_eq!(manager.pending(tenant).await, Some(7));

        manager.update_worker_count(tenant, 1).await;
        assert_eq!(manager.worker_count(tenant).await, Some(1));
        assert_eq!(manager.generation(tenant).await, Some(1));
        assert_eq!(manager.pending(tenant).await, Some(0));

        processor.release(3);
        eventually(|| manager.live_workers() == 1).await;

        // Nothing from the abandoned buffer reaches a worker.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(processor.processed(), 3);

        manager.shutdown_and_wait().await;
        assert_eq!(manager.live_workers(), 0);
    }

    #[tokio::test]
    async fn test_resize_new_generation_accepts_work() {
        let processor = RecordingProcessor::new();
        let manager = manager(&processor);
        let tenant = TenantId::new();
        manager.start_transmitter(tenant, 3).await.unwrap();

        manager.update_worker_count(tenant, 4).await;
        eventually(|| manager.live_workers() == 4).await;

        manager.enqueue(tenant, b"after".to_vec()).await;
        eventually(|| processor.processed() == 1).await;

        manager.shutdown_and_wait().await;
    }

    #[tokio::test]
    async fn test_unknown_tenant_operations_do_not_mutate() {
        let processor = RecordingProcessor::new();
        let manager = manager(&processor);
        let known = TenantId::new();
        manager.start_transmitter(known, 1).await.unwrap();

        let unknown = TenantId::new();
        manager.update_worker_count(unknown, 4).await;
        manager.stop_transmitter(unknown).await;

        assert_eq!(manager.tenants().await, vec![known]);
        assert_eq!(manager.worker_count(known).await, Some(1));
        assert!(!manager.contains(unknown).await);

        manager.shutdown_and_wait().await;
    }

    #[tokio::test]
    async fn test_stale_instance_does_not_stop_replacement() {
        let processor = RecordingProcessor::new();
        let manager = manager(&processor);
        let tenant = TenantId::new();

        let first = manager.start_transmitter(tenant, 1).await.unwrap();
        manager.stop_transmitter(tenant).await;
        let second = manager.start_transmitter(tenant, 2).await.unwrap();
        assert_ne!(first, second);

        assert!(!manager.stop_transmitter_instance(tenant, first).await);
        assert_eq!(manager.worker_count(tenant).await, Some(2));

        assert!(manager.stop_transmitter_instance(tenant, second).await);
        assert!(!manager.contains(tenant).await);

        manager.shutdown_and_wait().await;
    }

    #[tokio::test]
    async fn test_stop_then_shutdown_leaves_no_workers() {
        let processor = RecordingProcessor::new();
        let manager = manager(&processor);
        let tenant = TenantId::new();
        manager.start_transmitter(tenant, 5).await.unwrap();

        for body in ["one", "two", "three"] {
            manager.enqueue(tenant, body.as_bytes().to_vec()).await;
        }
        manager.stop_transmitter(tenant).await;
        assert!(!manager.contains(tenant).await);

        tokio::time::timeout(Duration::from_secs(2), manager.shutdown_and_wait())
            .await
            .expect("shutdown did not complete");
        assert_eq!(manager.live_workers(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_work() {
        let processor = RecordingProcessor::gated();
        let manager = Arc::new(manager(&processor));
        let tenants = [TenantId::new(), TenantId::new()];
        manager.start_transmitter(tenants[0], 2).await.unwrap();
        manager.start_transmitter(tenants[1], 3).await.unwrap();
        manager.enqueue(tenants[0], b"busy".to_vec()).await;
        eventually(|| processor.started() == 1).await;

        let shutdown = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.shutdown_and_wait().await })
        };

        eventually(|| manager.live_workers() == 1).await;
        assert!(!shutdown.is_finished());
        assert!(manager.tenants().await.is_empty());

        processor.release(1);
        tokio::time::timeout(Duration::from_secs(2), shutdown)
            .await
            .expect("shutdown did not complete")
            .unwrap();
        assert_eq!(manager.live_workers(), 0);
        assert_eq!(processor.processed(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_with_zero_tenants() {
        let processor = RecordingProcessor::new();
        let manager = manager(&processor);
        tokio::time::timeout(Duration::from_millis(200), async {
            manager.shutdown_and_wait().await;
            manager.shutdown_and_wait().await;
        })
        .await
        .expect("shutdown with no tenants blocked");
    }
}
