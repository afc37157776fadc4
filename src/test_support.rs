//! Test doubles shared by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::transmitter::TaskProcessor;
use crate::types::TenantId;

/// Records every payload it processes. A gated processor holds each payload
/// until `release` hands out a permit.
pub struct RecordingProcessor {
    started: AtomicUsize,
    processed: AtomicUsize,
    payloads: Mutex<Vec<Vec<u8>>>,
    gate: Option<Semaphore>,
}

impl RecordingProcessor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started: AtomicUsize::new(0),
            processed: AtomicUsize::new(0),
            payloads: Mutex::new(Vec::new()),
            gate: None,
        })
    }

    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            started: AtomicUsize::new(0),
            processed: AtomicUsize::new(0),
            payloads: Mutex::new(Vec::new()),
            gate: Some(Semaphore::new(0)),
        })
    }

    pub fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskProcessor for RecordingProcessor {
    async fn process(
        &self,
        _tenant_id: TenantId,
        _worker: usize,
        payload: &[u8],
    ) -> anyhow::Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }
        self.payloads.lock().unwrap().push(payload.to_vec());
        self.processed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn eventually<F: FnMut() -> bool>(mut condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within 2s");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
