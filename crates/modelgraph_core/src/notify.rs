//! Change feed fan-out over message channels.
//!
//! # Responsibility
//! - Deliver registry change events to any number of subscribers.
//! - Collapse bulk loads into one `ModelLoaded` event.
//!
//! # Invariants
//! - Publishing never blocks and never calls back into collaborators.
//! - Dropped receivers are pruned on the next publish.
//! - While suspended, events are discarded, not queued.

use crate::model::ids::{BaseId, TypeTag};
use std::sync::mpsc::{channel, Receiver, Sender};

/// One observable registry mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Connected { id: BaseId, type_tag: TypeTag },
    Disconnected { id: BaseId },
    FieldChanged { id: BaseId, keyword: &'static str },
    ReferenceChanged { id: BaseId, keyword: &'static str },
    Erased { id: BaseId },
    /// Emitted once after a bulk load instead of per-object events.
    ModelLoaded { objects: usize },
    Purged,
}

/// Subscriber list owned by one registry.
#[derive(Debug, Default)]
pub struct ChangeFeed {
    subscribers: Vec<Sender<ChangeEvent>>,
    suspended: usize,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new subscription; drain the receiver at a convenient point.
    pub fn subscribe(&mut self) -> Receiver<ChangeEvent> {
        let (sender, receiver) = channel();
        self.subscribers.push(sender);
        receiver
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn publish(&mut self, event: ChangeEvent) {
        if self.suspended > 0 || self.subscribers.is_empty() {
            return;
        }
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    /// Suspends delivery; calls nest.
    pub fn suspend(&mut self) {
        self.suspended += 1;
    }

    pub fn resume(&mut self) {
        self.suspended = self.suspended.saturating_sub(1);
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended > 0
    }
}
