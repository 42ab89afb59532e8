//! Fixed-size pool of per-worker scratch contexts.
//!
//! `acquire` blocks while every context is checked out; the pool never
//! grows.

use std::ops::{Deref, DerefMut};

use parking_lot::{Condvar, Mutex};

/// A bounded pool of reusable values.
#[derive(Debug)]
pub struct ScratchPool<S> {
    slots: Mutex<Vec<S>>,
    returned: Condvar,
    capacity: usize,
}

impl<S> ScratchPool<S> {
    /// Fill a pool with `capacity` values from `make`.
    pub fn new(capacity: usize, mut make: impl FnMut() -> S) -> Self {
        Self {
            slots: Mutex::new((0..capacity).map(|_| make()).collect()),
            returned: Condvar::new(),
            capacity,
        }
    }

    /// Check out a value, waiting for one to be returned if none is free.
    pub fn acquire(&self) -> ScratchGuard<'_, S> {
        let mut slots = self.slots.lock();
        loop {
            if let Some(value) = slots.pop() {
                return ScratchGuard {
                    pool: self,
                    value: Some(value),
                };
            }
            self.returned.wait(&mut slots);
        }
    }

    /// Check out a value without waiting.
    pub fn try_acquire(&self) -> Option<ScratchGuard<'_, S>> {
        let value = self.slots.lock().pop()?;
        Some(ScratchGuard {
            pool: self,
            value: Some(value),
        })
    }

    /// Values currently free.
    pub fn available(&self) -> usize {
        self.slots.lock().len()
    }

    /// Total values owned by the pool.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn release(&self, value: S) {
        self.slots.lock().push(value);
        self.returned.notify_one();
    }
}

/// A checked-out value; returns itself to the pool on drop.
#[derive(Debug)]
pub struct ScratchGuard<'a, S> {
    pool: &'a ScratchPool<S>,
    value: Option<S>,
}

impl<S> Deref for ScratchGuard<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        // Only `Drop` takes the value.
        self.value.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<S> DerefMut for ScratchGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.value.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<S> Drop for ScratchGuard<'_, S> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.pool.release(value);
        }
    }
}
