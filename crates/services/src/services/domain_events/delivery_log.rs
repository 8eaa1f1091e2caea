use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// A delivery the dispatcher gave up on.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DeliveryFailure {
    pub delivery_id: Uuid,
    pub handler: String,
    pub topic: String,
    pub event_kind: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Bounded in-memory history of dropped deliveries, with a broadcast channel
/// for live subscribers. Oldest entries are evicted first.
pub struct DeliveryFailureStore {
    history: RwLock<VecDeque<DeliveryFailure>>,
    capacity: usize,
    sender: broadcast::Sender<DeliveryFailure>,
}

impl Default for DeliveryFailureStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl DeliveryFailureStore {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            history: RwLock::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            sender,
        }
    }

    pub fn push(&self, failure: DeliveryFailure) {
        let _ = self.sender.send(failure.clone());
        if self.capacity == 0 {
            return;
        }

        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        while history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(failure);
    }

    /// Snapshot, oldest first.
    pub fn get_history(&self) -> Vec<DeliveryFailure> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryFailure> {
        self.sender.subscribe()
    }
}
