//! Registry of per-tenant consumer loops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use super::ConsumerError;
use crate::messaging::{queue_name, Broker, BrokerChannel};
use crate::transmitter::{CancelHandle, CancelToken, TransmitterManager};
use crate::types::TenantId;

/// Registry entry for one tenant.
enum Slot {
    /// Queue setup is in flight. The ticket identifies the start call that owns it.
    Starting(u64),
    Running(RunningConsumer),
}

struct RunningConsumer {
    cancel: CancelHandle,
    transmitter: u64,
}

/// Binds each tenant's broker queue to its transmitter.
///
/// Holds one cancellation handle per running consumer loop. Task ingestion and
/// worker lifecycle are delegated to the [`TransmitterManager`].
pub struct ConsumerManager {
    broker: Arc<dyn Broker>,
    transmitters: Arc<TransmitterManager>,
    consumers: RwLock<HashMap<TenantId, Slot>>,
    default_workers: usize,
    next_ticket: AtomicU64,
}

impl ConsumerManager {
    /// Create a manager that starts each tenant with `default_workers` workers.
    pub fn new(
        broker: Arc<dyn Broker>,
        transmitters: Arc<TransmitterManager>,
        default_workers: usize,
    ) -> Self {
        Self {
            broker,
            transmitters,
            consumers: RwLock::new(HashMap::new()),
            default_workers,
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Declare the tenant's queue, start its transmitter and spawn its consumer loop.
    ///
    /// Starting a tenant that is already running or starting is a no-op. The
    /// registry lock is released while the broker round-trips run; a
    /// `Starting` entry keeps other starts for the same tenant out.
    #[instrument(skip(self))]
    pub async fn start_consumer(&self, tenant_id: TenantId) -> Result<(), ConsumerError> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        {
            let mut consumers = self.consumers.write().await;
            if consumers.contains_key(&tenant_id) {
                info!(tenant_id = %tenant_id, "Consumer already running");
                return Ok(());
            }
            consumers.insert(tenant_id, Slot::Starting(ticket));
        }

        let queue = queue_name(tenant_id);
        let channel = match self.open_and_declare(&queue).await {
            Ok(channel) => channel,
            Err(e) => {
                self.release_ticket(tenant_id, ticket).await;
                return Err(e);
            }
        };

        let mut consumers = self.consumers.write().await;

        if !matches!(consumers.get(&tenant_id), Some(Slot::Starting(t)) if *t == ticket) {
            drop(consumers);
            warn!(tenant_id = %tenant_id, "Consumer stopped during startup, removing queue");
            if let Err(e) = channel.delete_queue(&queue).await {
                warn!(tenant_id = %tenant_id, queue = %queue, error = %e, "Failed to delete queue");
            }
            channel.close().await;
            return Ok(());
        }

        let transmitter = match self
            .transmitters
            .start_transmitter(tenant_id, self.default_workers)
            .await
        {
            Ok(instance) => instance,
            Err(e) => {
                consumers.remove(&tenant_id);
                drop(consumers);
                // The queue stays declared; a later start or stop addresses it by name.
                channel.close().await;
                return Err(ConsumerError::TransmitterStart(e));
            }
        };

        let (cancel, token) = CancelHandle::new();
        consumers.insert(
            tenant_id,
            Slot::Running(RunningConsumer {
                cancel,
                transmitter,
            }),
        );
        drop(consumers);

        tokio::spawn(consume_loop(
            tenant_id,
            queue,
            channel,
            Arc::clone(&self.transmitters),
            transmitter,
            token,
        ));

        info!(tenant_id = %tenant_id, "Started consumer and transmitter");
        Ok(())
    }

    async fn open_and_declare(&self, queue: &str) -> Result<Box<dyn BrokerChannel>, ConsumerError> {
        let channel = self
            .broker
            .open_channel()
            .await
            .map_err(ConsumerError::Channel)?;

        if let Err(e) = channel.declare_durable_queue(queue).await {
            channel.close().await;
            return Err(ConsumerError::Declare(e));
        }
        Ok(channel)
    }

    async fn release_ticket(&self, tenant_id: TenantId, ticket: u64) {
        let mut consumers = self.consumers.write().await;
        if matches!(consumers.get(&tenant_id), Some(Slot::Starting(t)) if *t == ticket) {
            consumers.remove(&tenant_id);
        }
    }

    /// Cancel the tenant's consumer loop, stop its transmitter and delete its queue.
    ///
    /// Unknown tenants are a no-op. The transmitter is gone when this returns,
    /// so the tenant can be started again right away. The consumer counts as
    /// stopped even when queue deletion fails.
    #[instrument(skip(self))]
    pub async fn stop_consumer(&self, tenant_id: TenantId) -> Result<(), ConsumerError> {
        let Some(slot) = self.consumers.write().await.remove(&tenant_id) else {
            warn!(tenant_id = %tenant_id, "No consumer found for tenant");
            return Ok(());
        };

        match slot {
            Slot::Running(running) => {
                running.cancel.cancel();
                self.transmitters
                    .stop_transmitter_instance(tenant_id, running.transmitter)
                    .await;
            }
            // The pending start notices the missing entry and tears down its own setup.
            Slot::Starting(_) => debug!(tenant_id = %tenant_id, "Stopping consumer during startup"),
        }

        let channel = self
            .broker
            .open_channel()
            .await
            .map_err(ConsumerError::Channel)?;

        let queue = queue_name(tenant_id);
        let deleted = channel.delete_queue(&queue).await;
        channel.close().await;
        deleted.map_err(ConsumerError::Delete)?;

        info!(tenant_id = %tenant_id, queue = %queue, "Stopped and cleaned up consumer");
        Ok(())
    }

    /// Resize the tenant's worker pool. Never fails; unknown tenants are ignored.
    pub async fn update_concurrency(
        &self,
        tenant_id: TenantId,
        workers: usize,
    ) -> Result<(), ConsumerError> {
        self.transmitters.update_worker_count(tenant_id, workers).await;
        Ok(())
    }

    /// Cancel every consumer loop without waiting and without touching queues.
    pub async fn stop_all_consumers(&self) {
        let mut consumers = self.consumers.write().await;
        for (tenant_id, slot) in consumers.drain() {
            info!(tenant_id = %tenant_id, "Stopping consumer");
            if let Slot::Running(running) = slot {
                running.cancel.cancel();
            }
        }
    }

    pub async fn is_running(&self, tenant_id: TenantId) -> bool {
        matches!(
            self.consumers.read().await.get(&tenant_id),
            Some(Slot::Running(_))
        )
    }

    pub async fn tenants(&self) -> Vec<TenantId> {
        let mut tenants: Vec<TenantId> = self
            .consumers
            .read()
            .await
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Running(_)))
            .map(|(tenant_id, _)| *tenant_id)
            .collect();
        tenants.sort();
        tenants
    }

    pub fn default_workers(&self) -> usize {
        self.default_workers
    }

    pub fn transmitters(&self) -> &Arc<TransmitterManager> {
        &self.transmitters
    }
}

/// Forward deliveries from the tenant's queue into its transmitter until cancelled.
///
/// On cancellation the loop stops the transmitter it was started with; a
/// transmitter started later for the same tenant is left alone.
async fn consume_loop(
    tenant_id: TenantId,
    queue: String,
    channel: Box<dyn BrokerChannel>,
    transmitters: Arc<TransmitterManager>,
    transmitter: u64,
    mut cancel: CancelToken,
) {
    let consumed = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        consumed = channel.consume(&queue) => Some(consumed),
    };

    let mut deliveries = match consumed {
        Some(Ok(deliveries)) => deliveries,
        Some(Err(e)) => {
            error!(tenant_id = %tenant_id, queue = %queue, error = %e, "Failed to consume queue");
            channel.close().await;
            return;
        }
        None => {
            debug!(tenant_id = %tenant_id, "Cancelled before consuming");
            transmitters
                .stop_transmitter_instance(tenant_id, transmitter)
                .await;
            channel.close().await;
            return;
        }
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            delivery = deliveries.next() => match delivery {
                Some(Ok(delivery)) => {
                    if delivery.body.is_empty() {
                        continue;
                    }
                    debug!(tenant_id = %tenant_id, bytes = delivery.body.len(), "Delivery received");
                    transmitters.enqueue(tenant_id, delivery.body).await;
                }
                Some(Err(e)) => {
                    warn!(tenant_id = %tenant_id, queue = %queue, error = %e, "Delivery error");
                }
                None => {
                    warn!(tenant_id = %tenant_id, queue = %queue, "Delivery stream closed, waiting for stop");
                    cancel.cancelled().await;
                    break;
                }
            }
        }
    }

    info!(tenant_id = %tenant_id, "Stopping consumer");
    transmitters
        .stop_transmitter_instance(tenant_id, transmitter)
        .await;

    drop(deliveries);
    channel.close().await;
}
