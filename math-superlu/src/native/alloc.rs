//! Tracked allocator of the solver layer
//!
//! Every buffer the solver allocates is a [`NativeBuf`]. Allocations are
//! counted per thread so callers can verify that a failed call released all
//! of its memory, and an optional per-thread byte budget plays the role of a
//! fixed-size solver workspace: growing past it aborts with an allocation
//! failure. Graphs, factors and per-column scratch all live in `NativeBuf`s;
//! only the priority queues of the ordering and of the column sweep are
//! plain std collections outside the count.
//!
//! A buffer stays charged to the ledger of the thread that allocated it, so a
//! factorization moved to another thread and freed there is still returned to
//! the counters it was taken from.

use super::{AbortKind, abort};
use std::mem::size_of;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

const UNLIMITED: usize = usize::MAX;

/// Counters of the solver buffers allocated on one thread
#[derive(Debug)]
struct Ledger {
    live: AtomicUsize,
    bytes: AtomicUsize,
    peak: AtomicUsize,
    budget: AtomicUsize,
}

impl Ledger {
    fn new() -> Self {
        Self {
            live: AtomicUsize::new(0),
            bytes: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            budget: AtomicUsize::new(UNLIMITED),
        }
    }

    fn charge(&self, bytes: usize) {
        if bytes == 0 {
            return;
        }
        let in_use = self.bytes.load(Ordering::Relaxed);
        let budget = self.budget.load(Ordering::Relaxed);
        if budget != UNLIMITED && in_use.saturating_add(bytes) > budget {
            abort(
                AbortKind::Allocation,
                format!(
                    "request of {bytes} bytes exceeds the memory budget \
                     ({in_use} of {budget} bytes in use)"
                ),
            );
        }
        self.add_bytes(bytes);
    }

    fn add_bytes(&self, bytes: usize) {
        let before = self
            .bytes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |b| {
                Some(b.saturating_add(bytes))
            })
            .unwrap_or_else(|b| b);
        self.peak
            .fetch_max(before.saturating_add(bytes), Ordering::Relaxed);
    }

    fn uncharge(&self, bytes: usize) {
        let _ = self
            .bytes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |b| {
                Some(b.saturating_sub(bytes))
            });
    }
}

thread_local! {
    static LEDGER: Arc<Ledger> = Arc::new(Ledger::new());
}

fn current() -> Arc<Ledger> {
    LEDGER.with(Arc::clone)
}

/// Number of solver buffers currently alive that were allocated on this thread
pub fn live_allocations() -> usize {
    LEDGER.with(|l| l.live.load(Ordering::Relaxed))
}

/// Bytes currently held by solver buffers allocated on this thread
pub fn live_bytes() -> usize {
    LEDGER.with(|l| l.bytes.load(Ordering::Relaxed))
}

/// Highest value [`live_bytes`] has reached on this thread
pub fn peak_bytes() -> usize {
    LEDGER.with(|l| l.peak.load(Ordering::Relaxed))
}

/// Cap the bytes solver buffers may hold on this thread (`None` removes the
/// cap). Returns the previous budget.
pub fn set_memory_budget(budget: Option<usize>) -> Option<usize> {
    let previous = LEDGER.with(|l| {
        l.budget
            .swap(budget.unwrap_or(UNLIMITED), Ordering::Relaxed)
    });
    (previous != UNLIMITED).then_some(previous)
}

/// Current per-thread memory budget
pub fn memory_budget() -> Option<usize> {
    let budget = LEDGER.with(|l| l.budget.load(Ordering::Relaxed));
    (budget != UNLIMITED).then_some(budget)
}

/// Growable buffer allocated by the solver layer.
///
/// Only `Copy` element types are stored, matching the plain numeric and index
/// arrays of the solver's data structures.
#[derive(Debug)]
pub struct NativeBuf<T: Copy + Default> {
    data: Vec<T>,
    charged: usize,
    ledger: Arc<Ledger>,
}

impl<T: Copy + Default> NativeBuf<T> {
    /// Empty buffer able to hold `capacity` elements without growing
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let ledger = current();
        ledger.live.fetch_add(1, Ordering::Relaxed);
        let mut buf = NativeBuf {
            data: Vec::new(),
            charged: 0,
            ledger,
        };
        buf.reserve(capacity);
        buf
    }

    /// `len` copies of `value`
    pub(crate) fn filled(len: usize, value: T) -> Self {
        let mut buf = Self::with_capacity(len);
        buf.data.resize(len, value);
        buf
    }

    /// `len` default (zero) elements
    pub(crate) fn zeroed(len: usize) -> Self {
        Self::filled(len, T::default())
    }

    pub(crate) fn from_slice(values: &[T]) -> Self {
        let mut buf = Self::with_capacity(values.len());
        buf.data.extend_from_slice(values);
        buf
    }

    fn reserve(&mut self, additional: usize) {
        let needed = self.data.len().saturating_add(additional);
        if needed <= self.data.capacity() {
            return;
        }
        let target = needed.max(self.data.capacity().saturating_mul(2)).max(4);
        let before = self.data.capacity();
        let requested = (target - before).saturating_mul(size_of::<T>());
        self.ledger.charge(requested);
        if let Err(e) = self.data.try_reserve_exact(target - self.data.len()) {
            self.ledger.uncharge(requested);
            abort(
                AbortKind::Allocation,
                format!("cannot allocate {target} elements: {e}"),
            );
        }
        // the allocator may hand back more than requested
        let granted = self.data.capacity().saturating_mul(size_of::<T>());
        let expected = target.saturating_mul(size_of::<T>());
        if granted > expected {
            self.ledger.add_bytes(granted - expected);
        }
        self.charged = granted;
    }

    pub(crate) fn push(&mut self, value: T) {
        self.reserve(1);
        self.data.push(value);
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    pub(crate) fn clear(&mut self) {
        self.data.clear();
    }

    pub(crate) fn retain(&mut self, keep: impl FnMut(&T) -> bool) {
        self.data.retain(keep);
    }

    /// Remove element `index`, moving the last element into its place
    pub(crate) fn swap_remove(&mut self, index: usize) -> T {
        self.data.swap_remove(index)
    }

    pub(crate) fn dedup(&mut self)
    where
        T: PartialEq,
    {
        self.data.dedup();
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Bytes charged against the allocating thread's counters
    pub fn allocated_bytes(&self) -> usize {
        self.charged
    }
}

impl<T: Copy + Default> std::ops::Deref for NativeBuf<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.data
    }
}

impl<T: Copy + Default> std::ops::DerefMut for NativeBuf<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T: Copy + Default> Drop for NativeBuf<T> {
    fn drop(&mut self) {
        self.ledger.live.fetch_sub(1, Ordering::Relaxed);
        self.ledger.uncharge(self.charged);
    }
}
