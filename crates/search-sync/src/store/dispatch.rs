//! After-commit notification.

use std::sync::Weak;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::types::CommitEvent;

/// Receives primary-store commits.
///
/// Called only after the transaction is durable; implementations must not
/// fail the commit, so the hook returns nothing.
#[async_trait]
pub trait CommitObserver: Send + Sync {
    /// Handles one committed change.
    async fn on_committed(&self, event: &CommitEvent);
}

/// Fan-out of commit events to subscribed observers.
///
/// Observers are held weakly so a store and a sync layer that references the
/// store do not keep each other alive. Dropped observers are pruned.
#[derive(Default)]
pub struct CommitDispatcher {
    observers: RwLock<Vec<Weak<dyn CommitObserver>>>,
}

impl std::fmt::Debug for CommitDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitDispatcher")
            .field("observers", &self.observers.read().len())
            .finish()
    }
}

impl CommitDispatcher {
    /// Creates a dispatcher with no observers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an observer.
    pub fn subscribe(&self, observer: Weak<dyn CommitObserver>) {
        self.observers.write().push(observer);
    }

    /// Number of live observers.
    pub fn observer_count(&self) -> usize {
        self.observers
            .read()
            .iter()
            .filter(|o| o.strong_count() > 0)
            .count()
    }

    /// Delivers events in order, awaiting every observer for each event.
    pub async fn dispatch(&self, events: &[CommitEvent]) {
        let observers: Vec<_> = {
            let mut guard = self.observers.write();
            guard.retain(|o| o.strong_count() > 0);
            guard.iter().filter_map(Weak::upgrade).collect()
        };

        for event in events {
            for observer in &observers {
                observer.on_committed(event).await;
            }
        }
    }
}
