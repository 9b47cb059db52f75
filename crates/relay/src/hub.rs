//! Broadcast hub: latest-point cache plus subscriber fan-out.
//!
//! Each subscriber owns a bounded channel drained by its connection task. The
//! registry and the cached point share one lock so `publish`, `subscribe` and
//! `unsubscribe` are mutually exclusive: a new subscriber gets the cached point
//! before any later publish reaches it, and no publish is lost between the two.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, trace};

use crate::metrics;
use crate::point::Point;

/// Outbound buffer per subscriber. A subscriber that falls this far behind
/// misses points until it catches up.
const SUBSCRIBER_BUFFER: usize = 64;

/// Identity of a registered subscriber
pub type SubscriberId = u64;

/// Serialized point, shared by every subscriber of one publish
pub type Payload = Arc<str>;

/// Anything the upstream client can hand decoded points to
pub trait PointSink: Send + Sync {
    fn publish(&self, point: Point);
}

#[derive(Default)]
struct HubInner {
    latest: Option<(Point, Payload)>,
    subscribers: HashMap<SubscriberId, mpsc::Sender<Payload>>,
    next_id: SubscriberId,
}

/// Cloneable handle to the hub; clones share state.
#[derive(Clone, Default)]
pub struct BroadcastHub {
    inner: Arc<Mutex<HubInner>>,
}

/// Receiving side of one registration
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<Payload>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next serialized point, or `None` once the hub dropped this subscriber
    pub async fn recv(&mut self) -> Option<Payload> {
        self.rx.recv().await
    }

    #[cfg(test)]
    fn try_recv(&mut self) -> Option<Payload> {
        self.rx.try_recv().ok()
    }
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        // No hub operation panics while holding the lock half-way through an update.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cache `point` as the latest and push it to every open subscriber.
    pub fn publish(&self, point: Point) {
        let payload: Payload = match point.to_json() {
            Ok(json) => json.into(),
            Err(e) => {
                error!(error = %e, ?point, "Failed to serialize point");
                return;
            }
        };

        let mut inner = self.lock();
        inner.latest = Some((point, Arc::clone(&payload)));

        let mut closed = Vec::new();
        for (id, tx) in inner.subscribers.iter() {
            match tx.try_send(Arc::clone(&payload)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!(subscriber = id, "Subscriber buffer full, skipping point");
                    metrics::inc_delivery_skipped("full");
                }
                Err(TrySendError::Closed(_)) => {
                    closed.push(*id);
                }
            }
        }

        for id in closed {
            if inner.subscribers.remove(&id).is_some() {
                debug!(subscriber = id, "Pruned closed subscriber");
                metrics::inc_delivery_skipped("closed");
                metrics::add_subscribers(-1);
            }
        }

        metrics::inc_points_published();
        trace!(subscribers = inner.subscribers.len(), %payload, "Published point");
    }

    /// Register a new subscriber, priming it with the latest point if any.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);

        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;

        if let Some((_, payload)) = &inner.latest {
            // Fresh channel with spare capacity; cannot be full or closed.
            let _ = tx.try_send(Arc::clone(payload));
        }

        inner.subscribers.insert(id, tx);
        metrics::add_subscribers(1);
        debug!(subscriber = id, total = inner.subscribers.len(), "Subscriber registered");

        Subscription { id, rx }
    }

    /// Remove a subscriber. Unknown ids (already pruned) are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let mut inner = self.lock();
        if inner.subscribers.remove(&id).is_some() {
            metrics::add_subscribers(-1);
            debug!(subscriber = id, total = inner.subscribers.len(), "Subscriber removed");
        }
    }

    pub fn latest(&self) -> Option<Point> {
        self.lock().latest.as_ref().map(|(point, _)| *point)
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

impl PointSink for BroadcastHub {
    fn publish(&self, point: Point) {
        BroadcastHub::publish(self, point);
    }
}
