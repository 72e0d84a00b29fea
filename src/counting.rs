//! Instrumented allocator.
//!
//! [`CountingAllocator`] wraps another allocator and records every call
//! made through it. It keeps the set of live blocks, so a block freed twice
//! or a pointer it never handed out is counted (and not forwarded) instead
//! of corrupting the inner allocator. It can also refuse allocations after
//! a budget is spent, to exercise out-of-memory paths.

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::warn;

use crate::allocator::{DecoderAllocator, ResizerAllocator, SystemAllocator};

/// Snapshot of a [`CountingAllocator`]'s counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocationStats {
    pub allocations: usize,
    pub reallocations: usize,
    pub frees: usize,
    pub failed_allocations: usize,
    pub invalid_frees: usize,
    pub outstanding_blocks: usize,
    pub outstanding_bytes: usize,
    pub peak_bytes: usize,
}

#[derive(Debug, Default)]
struct Ledger {
    live: HashMap<usize, usize>,
    bytes: usize,
    peak: usize,
}

impl Ledger {
    fn insert(&mut self, block: NonNull<u8>, size: usize) {
        self.live.insert(block.as_ptr() as usize, size);
        self.bytes += size;
        self.peak = self.peak.max(self.bytes);
    }

    fn remove(&mut self, block: NonNull<u8>) -> Option<usize> {
        let size = self.live.remove(&(block.as_ptr() as usize))?;
        self.bytes -= size;
        Some(size)
    }
}

#[derive(Debug)]
pub struct CountingAllocator<A = SystemAllocator> {
    inner: A,
    ledger: Mutex<Ledger>,
    allocations: AtomicUsize,
    reallocations: AtomicUsize,
    frees: AtomicUsize,
    failed: AtomicUsize,
    invalid_frees: AtomicUsize,
    requests: AtomicUsize,
    budget: AtomicUsize,
}

impl CountingAllocator<SystemAllocator> {
    pub fn new() -> Self {
        Self::wrap(SystemAllocator)
    }
}

impl Default for CountingAllocator<SystemAllocator> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> CountingAllocator<A> {
    pub fn wrap(inner: A) -> Self {
        Self {
            inner,
            ledger: Mutex::new(Ledger::default()),
            allocations: AtomicUsize::new(0),
            reallocations: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            invalid_frees: AtomicUsize::new(0),
            requests: AtomicUsize::new(0),
            budget: AtomicUsize::new(usize::MAX),
        }
    }

    /// Lets the next `requests` allocate/reallocate calls through and
    /// refuses every call after that.
    pub fn fail_after(self, requests: usize) -> Self {
        self.set_fail_after(Some(requests));
        self
    }

    /// Re-arms (or with `None`, disarms) the failure budget, counting from now.
    pub fn set_fail_after(&self, requests: Option<usize>) {
        self.requests.store(0, Ordering::SeqCst);
        self.budget.store(requests.unwrap_or(usize::MAX), Ordering::SeqCst);
    }

    pub fn stats(&self) -> AllocationStats {
        let ledger = self.ledger();
        AllocationStats {
            allocations: self.allocations.load(Ordering::SeqCst),
            reallocations: self.reallocations.load(Ordering::SeqCst),
            frees: self.frees.load(Ordering::SeqCst),
            failed_allocations: self.failed.load(Ordering::SeqCst),
            invalid_frees: self.invalid_frees.load(Ordering::SeqCst),
            outstanding_blocks: ledger.live.len(),
            outstanding_bytes: ledger.bytes,
            peak_bytes: ledger.peak,
        }
    }

    pub fn outstanding_blocks(&self) -> usize {
        self.ledger().live.len()
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(&self, size: usize) -> bool {
        let granted = self.requests.fetch_add(1, Ordering::SeqCst) < self.budget.load(Ordering::SeqCst);
        if !granted {
            self.failed.fetch_add(1, Ordering::SeqCst);
            warn!(size, "simulated out-of-memory");
        }
        granted
    }

    fn record_allocation(&self, block: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
        match block {
            Some(block) => {
                self.allocations.fetch_add(1, Ordering::SeqCst);
                self.ledger().insert(block, size);
            }
            None => {
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
        block
    }

    /// Removes `block` from the live set; `false` means the free must not
    /// be forwarded.
    fn record_free(&self, block: NonNull<u8>) -> bool {
        if self.ledger().remove(block).is_none() {
            self.invalid_frees.fetch_add(1, Ordering::SeqCst);
            warn!("free of a block that is not live");
            return false;
        }
        self.frees.fetch_add(1, Ordering::SeqCst);
        true
    }
}

unsafe impl<A: DecoderAllocator> DecoderAllocator for CountingAllocator<A> {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        if !self.admit(size) {
            return None;
        }
        self.record_allocation(self.inner.allocate(size), size)
    }

    unsafe fn reallocate(&self, block: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>> {
        let Some(old_size) = self.ledger().remove(block) else {
            self.invalid_frees.fetch_add(1, Ordering::SeqCst);
            warn!("reallocate of a block that is not live");
            return None;
        };
        if !self.admit(new_size) {
            self.ledger().insert(block, old_size);
            return None;
        }
        match unsafe { self.inner.reallocate(block, new_size) } {
            Some(moved) => {
                self.reallocations.fetch_add(1, Ordering::SeqCst);
                self.ledger().insert(moved, new_size);
                Some(moved)
            }
            None => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                self.ledger().insert(block, old_size);
                None
            }
        }
    }

    unsafe fn free(&self, block: NonNull<u8>) {
        if self.record_free(block) {
            unsafe { self.inner.free(block) }
        }
    }
}

unsafe impl<C: ?Sized, A: ResizerAllocator<C>> ResizerAllocator<C> for CountingAllocator<A> {
    fn allocate(&self, size: usize, context: &C) -> Option<NonNull<u8>> {
        if !self.admit(size) {
            return None;
        }
        self.record_allocation(self.inner.allocate(size, context), size)
    }

    unsafe fn free(&self, block: NonNull<u8>, context: &C) {
        if self.record_free(block) {
            unsafe { self.inner.free(block, context) }
        }
    }
}
