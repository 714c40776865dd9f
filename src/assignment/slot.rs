//! The work slot pool.
//!
//! Caps the number of profiling assignments a backend runs at once. Slots are
//! held through RAII reservations so an abandoned assignment can never leak
//! capacity.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A bounded pool of concurrent work slots.
pub struct WorkSlotPool {
    capacity: usize,
    in_use: AtomicUsize,
}

impl WorkSlotPool {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self { capacity, in_use: AtomicUsize::new(0) })
    }

    /// Reserve `slots` slots, or `None` if that would exceed capacity.
    pub fn try_acquire(self: &Arc<Self>, slots: usize) -> Option<SlotReservation> {
        let acquired = self.in_use.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            let next = current.checked_add(slots)?;
            if next > self.capacity {
                return None;
            }
            Some(next)
        });
        match acquired {
            Ok(_) => Some(SlotReservation { pool: self.clone(), slots }),
            Err(_) => None,
        }
    }

    /// Number of slots currently reserved.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    /// Total slot capacity of this pool.
    #[allow(dead_code)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The fraction of capacity currently in use, in `[0.0, 1.0]`.
    pub fn load_factor(&self) -> f32 {
        if self.capacity == 0 {
            return 1.0;
        }
        self.in_use() as f32 / self.capacity as f32
    }

    fn release(&self, slots: usize) {
        self.in_use.fetch_sub(slots, Ordering::AcqRel);
    }
}

/// A held reservation of work slots, released on drop.
pub struct SlotReservation {
    pool: Arc<WorkSlotPool>,
    slots: usize,
}

impl SlotReservation {
    #[allow(dead_code)]
    pub fn slots(&self) -> usize {
        self.slots
    }
}

impl Drop for SlotReservation {
    fn drop(&mut self) {
        self.pool.release(self.slots);
    }
}
