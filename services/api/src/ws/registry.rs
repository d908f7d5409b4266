//! Live relay connections, owned by the application state.

use super::flight::SingleFlight;
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};
use uuid::Uuid;

/// Maps connection ids to their single-flight guards. Entries are removed on close.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<Uuid, SingleFlight>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, SingleFlight>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a connection and returns its single-flight guard.
    pub fn register(&self, id: Uuid) -> SingleFlight {
        let flight = SingleFlight::new();
        self.lock().insert(id, flight.clone());
        flight
    }

    /// Drops a connection, cancelling its in-flight request.
    ///
    /// Returns whether a request was cancelled.
    pub fn remove(&self, id: Uuid) -> bool {
        let flight = self.lock().remove(&id);
        flight.is_some_and(|flight| flight.cancel())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of connections currently streaming a response.
    pub fn streaming(&self) -> usize {
        self.lock().values().filter(|f| f.is_busy()).count()
    }
}
