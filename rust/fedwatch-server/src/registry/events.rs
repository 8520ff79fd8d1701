//! This module provides the registry [`RegistryEvent`]s along with the [`EventPublisher`] and
//! [`EventListener`] types to emit and consume them.

use tokio::sync::broadcast::{self, RecvError, TryRecvError};
use tracing::warn;

use fedwatch_core::{Identity, RecordId};

/// An event emitted by the registry after a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    MetadataCreated {
        id: RecordId,
        owner: Identity,
        title: String,
    },
    FileHashUpdated {
        id: RecordId,
        file_hash: String,
    },
    CustomFieldAdded {
        id: RecordId,
        key: String,
        value: String,
    },
}

/// Emits registry events to every listener.
#[derive(Debug)]
pub struct EventPublisher(broadcast::Sender<RegistryEvent>);

impl EventPublisher {
    /// Creates a publisher and a first listener. Listeners that fall more than `capacity` events
    /// behind miss the oldest ones.
    pub fn new(capacity: usize) -> (Self, EventListener) {
        let (tx, rx) = broadcast::channel(capacity);
        (Self(tx), EventListener(rx))
    }

    /// Hands out a new listener that receives the events emitted from now on.
    pub fn subscribe(&self) -> EventListener {
        EventListener(self.0.subscribe())
    }

    /// Emits an event. Having no listener is fine.
    pub fn publish(&self, event: RegistryEvent) {
        let _ = self.0.send(event);
    }
}

/// Receives registry events.
#[derive(Debug)]
pub struct EventListener(broadcast::Receiver<RegistryEvent>);

impl EventListener {
    /// Waits for the next event. Returns `None` once the publisher is gone.
    pub async fn recv(&mut self) -> Option<RegistryEvent> {
        loop {
            match self.0.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(missed)) => {
                    warn!("registry event listener missed {} events", missed)
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Takes the next pending event without waiting.
    pub fn try_recv(&mut self) -> Option<RegistryEvent> {
        loop {
            match self.0.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(missed)) => {
                    warn!("registry event listener missed {} events", missed)
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}
