use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Single-slot gate allowing one collection cycle at a time
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    slot: Arc<Semaphore>,
}

/// Proof of holding the gate. The slot frees up when this is dropped.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl GatePermit {
    /// Hand the slot back explicitly
    pub fn release(self) {}
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Semaphore::new(1)),
        }
    }

    /// Take the slot without waiting. `None` means a cycle is already running.
    pub fn try_acquire(&self) -> Option<GatePermit> {
        Arc::clone(&self.slot)
            .try_acquire_owned()
            .ok()
            .map(|permit| GatePermit { _permit: permit })
    }

    pub fn is_available(&self) -> bool {
        self.slot.available_permits() > 0
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let gate = ReadinessGate::new();
        let permit = gate.try_acquire().expect("gate starts open");
        assert!(gate.try_acquire().is_none());
        assert!(!gate.is_available());

        permit.release();
        assert!(gate.is_available());
        assert!(gate.try_acquire().is_some());
    }
}
