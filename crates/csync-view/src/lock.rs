//! Non-blocking lock with a single pending-value slot.
//!
//! A caller either takes the lock or parks its value in the slot, replacing
//! whatever was parked before. The holder drains the slot through
//! [`SlotGuard::handoff`] before letting go, so a parked value is never
//! stranded. Lock state and slot share one mutex, which closes the window
//! between "holder found the slot empty" and "parker filled it".

use parking_lot::Mutex;
use std::sync::Arc;

struct SlotState<T> {
    locked: bool,
    pending: Option<T>,
}

/// Lock plus one last-writer-wins pending slot.
pub struct MutexWithPendingSlot<T> {
    state: Arc<Mutex<SlotState<T>>>,
}

impl<T> Clone for MutexWithPendingSlot<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> Default for MutexWithPendingSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MutexWithPendingSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SlotState {
                locked: false,
                pending: None,
            })),
        }
    }

    /// Take the lock if free.
    pub fn try_acquire(&self) -> Option<SlotGuard<T>> {
        let mut state = self.state.lock();
        if state.locked {
            return None;
        }
        state.locked = true;
        Some(SlotGuard {
            state: Arc::clone(&self.state),
            released: false,
        })
    }

    /// Take the lock and get `value` back, or park `value` and return `None`.
    pub fn try_acquire_or_park(&self, value: T) -> Option<(SlotGuard<T>, T)> {
        let mut state = self.state.lock();
        if state.locked {
            state.pending = Some(value);
            return None;
        }
        state.locked = true;
        Some((
            SlotGuard {
                state: Arc::clone(&self.state),
                released: false,
            },
            value,
        ))
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    pub fn has_pending(&self) -> bool {
        self.state.lock().pending.is_some()
    }
}

/// Proof of holding the lock. Dropping it releases the lock.
pub struct SlotGuard<T> {
    state: Arc<Mutex<SlotState<T>>>,
    released: bool,
}

impl<T> SlotGuard<T> {
    /// Keep the lock and take the parked value, or release the lock when
    /// the slot is empty.
    pub fn handoff(mut self) -> Option<(Self, T)> {
        let mut state = self.state.lock();
        match state.pending.take() {
            Some(value) => {
                drop(state);
                Some((self, value))
            }
            None => {
                state.locked = false;
                drop(state);
                self.released = true;
                None
            }
        }
    }
}

impl<T> Drop for SlotGuard<T> {
    fn drop(&mut self) {
        if !self.released {
            self.state.lock().locked = false;
        }
    }
}
