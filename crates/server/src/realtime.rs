//! In-process realtime fan-out.
//!
//! Topics are keyed by vault. Each subscriber owns a bounded channel; the
//! publisher never waits. A subscriber whose buffer is full is dropped on
//! the spot, which closes its channel and terminates its socket. The
//! client then reconnects and reconciles via pull.

use obsync_core::op::OpType;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

/// One committed operation, as fanned out to subscribers.
#[derive(Clone, Debug)]
pub struct OpEvent {
    pub vault_id: Uuid,
    pub seq: i64,
    pub op_type: OpType,
    pub payload: Value,
    pub created_at: OffsetDateTime,
}

struct SubscriberHandle {
    id: Uuid,
    tx: mpsc::Sender<Arc<OpEvent>>,
}

struct BusInner {
    buffer: usize,
    topics: Mutex<HashMap<Uuid, Vec<SubscriberHandle>>>,
}

impl BusInner {
    fn unsubscribe(&self, vault_id: Uuid, id: Uuid) {
        let mut topics = self.topics.lock().expect("realtime bus lock poisoned");
        if let Some(subs) = topics.get_mut(&vault_id) {
            subs.retain(|sub| sub.id != id);
            if subs.is_empty() {
                topics.remove(&vault_id);
            }
        }
    }
}

/// Process-local pub/sub broker for post-commit op events.
///
/// Cheap to clone; all clones share the same subscriber registry.
#[derive(Clone)]
pub struct RealtimeBus {
    inner: Arc<BusInner>,
}

impl RealtimeBus {
    /// Create a bus whose subscribers buffer up to `buffer` events.
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                buffer: buffer.max(1),
                topics: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register a subscriber for a vault's events.
    pub fn subscribe(&self, vault_id: Uuid) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        let id = Uuid::new_v4();

        self.inner
            .topics
            .lock()
            .expect("realtime bus lock poisoned")
            .entry(vault_id)
            .or_default()
            .push(SubscriberHandle { id, tx });

        Subscription {
            bus: Arc::clone(&self.inner),
            vault_id,
            id,
            rx,
        }
    }

    /// Publish an event to every live subscriber of its vault.
    ///
    /// Delivery is at-most-once and best-effort: `try_send` never blocks,
    /// and a full buffer unregisters the subscriber immediately.
    pub fn publish(&self, event: OpEvent) {
        let vault_id = event.vault_id;
        let event = Arc::new(event);

        let mut topics = self
            .inner
            .topics
            .lock()
            .expect("realtime bus lock poisoned");
        let Some(subs) = topics.get_mut(&vault_id) else {
            return;
        };

        subs.retain(|sub| match sub.tx.try_send(Arc::clone(&event)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    vault_id = %vault_id,
                    subscriber = %sub.id,
                    "subscriber buffer full, dropping subscription"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });

        if subs.is_empty() {
            topics.remove(&vault_id);
        }
    }

    /// Number of live subscribers for a vault.
    pub fn subscriber_count(&self, vault_id: Uuid) -> usize {
        self.inner
            .topics
            .lock()
            .expect("realtime bus lock poisoned")
            .get(&vault_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

/// A live subscription. Deregisters itself when dropped.
pub struct Subscription {
    bus: Arc<BusInner>,
    vault_id: Uuid,
    id: Uuid,
    rx: mpsc::Receiver<Arc<OpEvent>>,
}

impl Subscription {
    /// Receive the next event. `None` means the bus dropped this
    /// subscriber (buffer overflow) and the connection should close.
    pub async fn recv(&mut self) -> Option<Arc<OpEvent>> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.vault_id, self.id);
    }
}
