//! In-process broker.
//!
//! Queues are unbounded channels keyed by name. Each queue admits a single
//! consumer, deliveries are auto-acknowledged (handed over exactly once), and
//! deleting a queue ends its delivery stream. Individual operations can be
//! made to fail or stall once, so callers can exercise their error paths and
//! slow-broker interleavings without a live RabbitMQ.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use super::{Broker, BrokerChannel, BrokerError, Delivery, DeliveryStream};

/// Broker operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrokerOp {
    OpenChannel,
    Declare,
    Consume,
    Delete,
}

struct Queue {
    sender: mpsc::UnboundedSender<Vec<u8>>,
    receiver: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl Queue {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Some(receiver),
        }
    }
}

#[derive(Default)]
struct Inner {
    queues: Mutex<HashMap<String, Queue>>,
    failures: Mutex<HashSet<BrokerOp>>,
    delays: Mutex<HashMap<BrokerOp, Duration>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl Inner {
    async fn take_failure(&self, op: BrokerOp) -> Result<(), BrokerError> {
        let delay = self.delays.lock().await.remove(&op);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failures.lock().await.remove(&op) {
            return Err(BrokerError::Unavailable(format!("injected {:?} failure", op)));
        }
        Ok(())
    }
}

/// In-memory broker. Cheap to clone; clones share the same queues.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a message to a declared queue.
    pub async fn publish(&self, queue: &str, body: impl Into<Vec<u8>>) -> Result<(), BrokerError> {
        let queues = self.inner.queues.lock().await;
        let entry = queues
            .get(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
        entry
            .sender
            .send(body.into())
            .map_err(|_| BrokerError::QueueNotFound(queue.to_string()))
    }

    /// Whether a queue with this name is currently declared.
    pub async fn has_queue(&self, queue: &str) -> bool {
        self.inner.queues.lock().await.contains_key(queue)
    }

    /// Make the next call of `op` fail.
    pub async fn fail_next(&self, op: BrokerOp) {
        self.inner.failures.lock().await.insert(op);
    }

    /// Make the next call of `op` take `delay` before it runs.
    pub async fn delay_next(&self, op: BrokerOp, delay: Duration) {
        self.inner.delays.lock().await.insert(op, delay);
    }

    /// Channels opened but not yet closed.
    pub fn open_channels(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst) - self.inner.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        self.inner.take_failure(BrokerOp::OpenChannel).await?;
        self.inner.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryChannel {
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MemoryChannel {
    inner: Arc<Inner>,
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_durable_queue(&self, name: &str) -> Result<(), BrokerError> {
        self.inner.take_failure(BrokerOp::Declare).await?;
        let mut queues = self.inner.queues.lock().await;
        queues.entry(name.to_string()).or_insert_with(Queue::new);
        debug!(queue = %name, "Queue declared");
        Ok(())
    }

    async fn consume(&self, name: &str) -> Result<DeliveryStream, BrokerError> {
        self.inner.take_failure(BrokerOp::Consume).await?;
        let mut queues = self.inner.queues.lock().await;
        let queue = queues
            .get_mut(name)
            .ok_or_else(|| BrokerError::QueueNotFound(name.to_string()))?;
        let receiver = queue
            .receiver
            .take()
            .ok_or_else(|| BrokerError::AlreadyConsuming(name.to_string()))?;

        Ok(futures::stream::unfold(receiver, |mut receiver| async move {
            receiver
                .recv()
                .await
                .map(|body| (Ok::<_, BrokerError>(Delivery { body }), receiver))
        })
        .boxed())
    }

    async fn delete_queue(&self, name: &str) -> Result<(), BrokerError> {
        self.inner.take_failure(BrokerOp::Delete).await?;
        self.inner.queues.lock().await.remove(name);
        debug!(queue = %name, "Queue deleted");
        Ok(())
    }

    async fn close(self: Box<Self>) {
        self.inner.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_requires_declared_queue() {
        let broker = MemoryBroker::new();
        let err = broker.publish("tenant_x", b"hi".to_vec()).await.unwrap_err();
        assert!(matches!(err, BrokerError::QueueNotFound(_)));
    }

    #[tokio::test]
    async fn test_consume_receives_in_order_and_ends_on_delete() {
        let broker = MemoryBroker::new();
        let channel = broker.open_channel().await.unwrap();
        channel.declare_durable_queue("q").await.unwrap();
        broker.publish("q", b"one".to_vec()).await.unwrap();
        broker.publish("q", b"two".to_vec()).await.unwrap();

        let mut stream = channel.consume("q").await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().body, b"one".to_vec());
        assert_eq!(stream.next().await.unwrap().unwrap().body, b"two".to_vec());

        channel.delete_queue("q").await.unwrap();
        assert!(stream.next().await.is_none());
        channel.close().await;
        assert_eq!(broker.open_channels(), 0);
    }

    #[tokio::test]
    async fn test_single_consumer_per_queue() {
        let broker = MemoryBroker::new();
        let channel = broker.open_channel().await.unwrap();
        channel.declare_durable_queue("q").await.unwrap();
        let _stream = channel.consume("q").await.unwrap();
        assert!(matches!(
            channel.consume("q").await,
            Err(BrokerError::AlreadyConsuming(_))
        ));
        channel.close().await;
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let broker = MemoryBroker::new();
        broker.fail_next(BrokerOp::OpenChannel).await;
        assert!(broker.open_channel().await.is_err());
        let channel = broker.open_channel().await.unwrap();
        channel.close().await;
    }
}
