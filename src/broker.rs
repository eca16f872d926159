use std::sync::mpsc::{sync_channel, Receiver, SyncSender};

use log::debug;

use crate::Update;

/// Identifies a parked observer so the HTTP waiter can cancel it after a
/// timeout without holding any other reference to the broker.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct ObserverId(u64);

/// Handed to the HTTP waiter thread: block on `payload` until the broker
/// resolves the observer, or give up and call expire with `id`.
pub struct ObserverHandle {
    pub id: ObserverId,
    pub payload: Receiver<Vec<Update>>,
}

/// Outcome of asking for updates past a watermark.
pub enum LongPoll {
    /// Updates already exist; respond immediately.
    Ready(Vec<Update>),
    /// Nothing yet; park until the broker resolves the handle.
    Pending(ObserverHandle),
}

struct Observer {
    id: ObserverId,
    resolve: SyncSender<Vec<Update>>,
}

/// Registry of parked long-poll observers. Registration and publication
/// both happen under the controller lock, so an update can never slip in
/// between the caller's emptiness check and the observer being parked.
pub struct NotificationBroker {
    pending: Vec<Observer>,
    next_id: u64,
}

impl NotificationBroker {
    pub fn new() -> NotificationBroker {
        NotificationBroker {
            pending: Vec::new(),
            next_id: 0,
        }
    }

    pub fn register(&mut self) -> ObserverHandle {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        // Capacity one: publish never blocks, and an observer is resolved
        // at most once.
        let (resolve, payload) = sync_channel(1);
        self.pending.push(Observer { id, resolve });
        debug!("broker: parked observer {:?}", id);
        ObserverHandle { id, payload }
    }

    /// Resolve every parked observer with `updates`. An observer whose
    /// waiter already gave up just drops out of the registry.
    pub fn publish(&mut self, updates: &[Update]) {
        if self.pending.is_empty() {
            return;
        }
        debug!("broker: resolving {} observer(s)", self.pending.len());
        for observer in self.pending.drain(..) {
            let _ = observer.resolve.try_send(updates.to_vec());
        }
    }

    /// Remove a timed-out observer. Returns false when the observer was
    /// already resolved, in which case its payload channel holds the
    /// updates and the waiter must deliver them instead of an empty reply.
    pub fn expire(&mut self, id: ObserverId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|observer| observer.id != id);
        self.pending.len() < before
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
