//! Bounded snapshot subscriptions.
//!
//! Consumers (exporters, dashboards) subscribe to the snapshot stream via a
//! bounded queue. When a subscriber falls behind, the oldest queued snapshot
//! is dropped to make room — the engine never blocks on a slow consumer.

use cellsim_common::SimulationSnapshot;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::{Arc, Weak};

/// Receiving end of a snapshot subscription.
///
/// Dropping the subscription detaches it from the engine; the bus prunes
/// detached subscribers on the next publish.
pub struct SnapshotSubscription {
    rx: Receiver<SimulationSnapshot>,
    _alive: Arc<()>,
}

impl SnapshotSubscription {
    /// The next queued snapshot, if any.
    pub fn try_next(&self) -> Option<SimulationSnapshot> {
        self.rx.try_recv().ok()
    }

    /// Drains everything currently queued.
    pub fn drain(&self) -> Vec<SimulationSnapshot> {
        self.rx.try_iter().collect()
    }
}

struct Subscriber {
    tx: Sender<SimulationSnapshot>,
    // Drain handle used to implement drop-oldest on overflow.
    overflow: Receiver<SimulationSnapshot>,
    alive: Weak<()>,
}

/// Engine-owned fan-out of the snapshot stream.
#[derive(Default)]
pub(crate) struct SnapshotBus {
    subscribers: Vec<Subscriber>,
}

impl SnapshotBus {
    pub fn subscribe(&mut self, capacity: usize) -> SnapshotSubscription {
        let (tx, rx) = bounded(capacity.max(1));
        let alive = Arc::new(());
        self.subscribers.push(Subscriber {
            tx,
            overflow: rx.clone(),
            alive: Arc::downgrade(&alive),
        });
        SnapshotSubscription { rx, _alive: alive }
    }

    /// Publishes one snapshot to every live subscriber without blocking.
    pub fn publish(&mut self, snapshot: &SimulationSnapshot) {
        self.subscribers.retain(|subscriber| {
            if subscriber.alive.strong_count() == 0 {
                return false;
            }
            match subscriber.tx.try_send(snapshot.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(snapshot)) => {
                    // Drop the oldest queued snapshot, then retry once.
                    let _ = subscriber.overflow.try_recv();
                    !matches!(
                        subscriber.tx.try_send(snapshot),
                        Err(TrySendError::Disconnected(_))
                    )
                }
                Err(TrySendError::Disconnected(_)) => false,
            }
        });
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
