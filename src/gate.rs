use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Default number of ingestion batches allowed to run at once.
pub const DEFAULT_GATE_PERMITS: usize = 4;

/// Default wait for a permit before the caller is told to back off.
pub const DEFAULT_GATE_TIMEOUT: Duration = Duration::from_millis(200);

/// Fixed-capacity admission gate in front of the ingestion path.
///
/// A permit is held for as long as the returned [`GatePermit`] lives, so it
/// goes back to the pool on every exit path: normal return, error, panic
/// unwinding, or the owning future being dropped on cancellation. Because a
/// permit can only be released by the value that acquired it, over-releasing
/// is not representable.
#[derive(Clone, Debug)]
pub struct IngestionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// One acquired slot. Dropping it (or calling [`GatePermit::exit`]) frees it.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl GatePermit {
    pub fn exit(self) {}
}

impl IngestionGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Waits up to `timeout` for a permit. `None` means the gate stayed full
    /// and nothing was acquired.
    pub async fn try_enter(&self, timeout: Duration) -> Option<GatePermit> {
        match tokio::time::timeout(timeout, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Some(GatePermit { _permit: permit }),
            Ok(Err(_closed)) => None,
            Err(_elapsed) => {
                debug!(
                    capacity = self.capacity,
                    timeout_ms = timeout.as_millis() as u64,
                    "Ingestion gate full"
                );
                None
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl Default for IngestionGate {
    fn default() -> Self {
        Self::new(DEFAULT_GATE_PERMITS)
    }
}
