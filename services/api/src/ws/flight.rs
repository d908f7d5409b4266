//! Per-connection single-flight guard.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// Allows at most one in-flight generation per connection.
///
/// The slot holds the cancellation token of the running request; the
/// connection is busy exactly while the slot is occupied.
#[derive(Clone, Default, Debug)]
pub struct SingleFlight {
    slot: Arc<Mutex<Slot>>,
}

#[derive(Default, Debug)]
struct Slot {
    next_id: u64,
    current: Option<(u64, CancellationToken)>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims the slot with a fresh cancellation token.
    ///
    /// Returns `None` while another request is in flight. A slot whose token
    /// was already cancelled is stale and gets superseded.
    pub fn try_enter(&self) -> Option<FlightGuard> {
        let mut slot = self.lock();
        if slot
            .current
            .as_ref()
            .is_some_and(|(_, token)| !token.is_cancelled())
        {
            return None;
        }
        slot.next_id += 1;
        let id = slot.next_id;
        let token = CancellationToken::new();
        slot.current = Some((id, token.clone()));
        Some(FlightGuard {
            slot: Arc::clone(&self.slot),
            id,
            token,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.lock().current.is_some()
    }

    /// Cancels the in-flight request, if any. Returns whether one was running.
    pub fn cancel(&self) -> bool {
        match self.lock().current.as_ref() {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Proof of holding the slot. Dropping it frees the connection for the next prompt.
#[derive(Debug)]
pub struct FlightGuard {
    slot: Arc<Mutex<Slot>>,
    id: u64,
    token: CancellationToken,
}

impl FlightGuard {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        // A superseding flight may own the slot by now.
        if slot.current.as_ref().is_some_and(|(id, _)| *id == self.id) {
            slot.current = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_enter_is_rejected_while_busy() {
        let flight = SingleFlight::new();
        let guard = flight.try_enter().expect("first enter");
        assert!(flight.is_busy());
        assert!(flight.try_enter().is_none());
        drop(guard);
        assert!(!flight.is_busy());
        assert!(flight.try_enter().is_some());
    }

    #[test]
    fn test_cancel_fires_the_guard_token() {
        let flight = SingleFlight::new();
        assert!(!flight.cancel());

        let guard = flight.try_enter().unwrap();
        let token = guard.token();
        assert!(flight.cancel());
        assert!(token.is_cancelled());
        drop(guard);
        assert!(!flight.is_busy());
    }

    #[test]
    fn test_stale_cancelled_slot_is_superseded() {
        let flight = SingleFlight::new();
        let stale = flight.try_enter().unwrap();
        flight.cancel();

        let fresh = flight.try_enter().expect("stale slot should be superseded");
        assert!(!fresh.token().is_cancelled());

        // The stale guard unwinding late must not free the new flight.
        drop(stale);
        assert!(flight.is_busy());
        drop(fresh);
        assert!(!flight.is_busy());
    }

    #[test]
    fn test_guard_released_on_panic() {
        let flight = SingleFlight::new();
        let inner = flight.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = inner.try_enter().unwrap();
            panic!("stream blew up");
        }));
        assert!(result.is_err());
        assert!(!flight.is_busy());
    }
}
