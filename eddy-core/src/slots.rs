//! Upload slot accounting.

use std::sync::Arc;

use parking_lot::Mutex;

/// Bounded counter of concurrent uploads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSlotGate {
    capacity: usize,
    in_use: usize,
}

impl UploadSlotGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            in_use: 0,
        }
    }

    /// Takes a slot if one is free.
    pub fn try_acquire(&mut self) -> bool {
        if self.in_use < self.capacity {
            self.in_use += 1;
            true
        } else {
            false
        }
    }

    pub fn release(&mut self) {
        self.in_use = self.in_use.saturating_sub(1);
    }

    pub fn available(&self) -> usize {
        self.capacity - self.in_use
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Slot gate shared by every peer connection.
pub type SharedSlotGate = Arc<Mutex<UploadSlotGate>>;

pub fn shared_gate(capacity: usize) -> SharedSlotGate {
    Arc::new(Mutex::new(UploadSlotGate::new(capacity)))
}

/// A held upload slot, released when dropped.
#[derive(Debug)]
pub struct UploadSlotPermit {
    gate: SharedSlotGate,
}

impl UploadSlotPermit {
    /// Acquires a slot from `gate`, or `None` when all are taken.
    pub fn try_acquire(gate: &SharedSlotGate) -> Option<Self> {
        gate.lock().try_acquire().then(|| Self {
            gate: Arc::clone(gate),
        })
    }
}

impl Drop for UploadSlotPermit {
    fn drop(&mut self) {
        self.gate.lock().release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_respects_capacity() {
        let mut gate = UploadSlotGate::new(2);
        assert!(gate.try_acquire());
        assert!(gate.try_acquire());
        assert!(!gate.try_acquire());
        assert_eq!(gate.available(), 0);

        gate.release();
        assert_eq!(gate.available(), 1);
        assert!(gate.try_acquire());
    }

    #[test]
    fn test_release_never_underflows() {
        let mut gate = UploadSlotGate::new(1);
        gate.release();
        assert_eq!(gate.in_use(), 0);
        assert_eq!(gate.available(), 1);
    }

    #[test]
    fn test_permit_releases_on_drop() {
        let gate = shared_gate(1);
        let permit = UploadSlotPermit::try_acquire(&gate);
        assert!(permit.is_some());
        assert!(UploadSlotPermit::try_acquire(&gate).is_none());

        drop(permit);
        assert_eq!(gate.lock().available(), 1);
        assert!(UploadSlotPermit::try_acquire(&gate).is_some());
    }

    #[test]
    fn test_zero_capacity_gate() {
        let gate = shared_gate(0);
        assert!(UploadSlotPermit::try_acquire(&gate).is_none());
    }
}
