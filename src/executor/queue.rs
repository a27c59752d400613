//! # Per-worker work queue (Chase–Lev deque + owner parking).
//!
//! [`WorkQueue`] is the double-ended task container under each worker:
//! the bottom end serves pushes from submitters and pops by the owning
//! worker, the top end serves lock-free steals by every other worker.
//!
//! ## What it guarantees
//! - The multiset of items returned by owner pops and successful steals
//!   equals the multiset of pushed items; no duplicates, no drops.
//! - `try_steal` on an empty queue returns `None` without mutating `top`.
//! - A queue that reaches 75% utilization doubles its capacity without
//!   losing live elements; stealers holding the previous buffer stay valid
//!   because replaced buffers are retired until the queue is dropped.
//! - A failed growth allocation rejects only the offending push; the queue
//!   keeps serving at its current capacity.
//!
//! ## Locking discipline
//! Bottom-end operations (`push`, `pop`, `pop_blocking`) are serialized by
//! the queue's single mutex, which is also the mutex the owner parks on.
//! The steal path never takes it: thieves race the owner for the last
//! element through the `top` CAS alone.
//!
//! ```text
//!   submitters ──push──► [bottom ... top] ◄──try_steal── other workers
//!                           ▲
//!                owner ──pop/pop_blocking (parks when empty)
//! ```

use std::cell::UnsafeCell;
use std::mem::{ManuallyDrop, MaybeUninit};
use std::ptr;
use std::sync::atomic::{fence, AtomicPtr, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;

/// A push that could not be accepted because queue growth failed.
///
/// Carries the rejected item back to the caller; the queue itself remains
/// usable at its current capacity.
pub(crate) struct PushError<T>(pub T);

/// Ring storage shared between the owner and in-flight stealers.
///
/// Slots hold bitwise copies; ownership of a value is decided by the
/// `top`/`bottom` index protocol, never by the buffer itself.
struct Buffer<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
}

impl<T> Buffer<T> {
    /// Fallibly allocates a buffer with power-of-two `capacity`.
    fn alloc(capacity: usize) -> Result<Box<Self>, ()> {
        debug_assert!(capacity.is_power_of_two());
        let mut slots = Vec::new();
        if slots.try_reserve_exact(capacity).is_err() {
            return Err(());
        }
        slots.resize_with(capacity, || UnsafeCell::new(MaybeUninit::uninit()));
        Ok(Box::new(Self {
            slots: slots.into_boxed_slice(),
            mask: capacity - 1,
        }))
    }

    fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Bitwise-reads the slot for `index`.
    ///
    /// SAFETY: the caller must hold a claim on `index` through the index
    /// protocol, or discard the copy without using it (see `try_steal`).
    unsafe fn read(&self, index: usize) -> T {
        ptr::read((*self.slots[index & self.mask].get()).as_ptr())
    }

    /// Writes `value` into the slot for `index`.
    ///
    /// SAFETY: the caller must be the bottom-end writer and `index` must lie
    /// outside every live window observed through `top`.
    unsafe fn write(&self, index: usize, value: T) {
        ptr::write((*self.slots[index & self.mask].get()).as_mut_ptr(), value);
    }
}

/// State guarded by the bottom-end mutex.
struct BottomSide<T> {
    /// Buffers replaced by growth; freed when the queue is dropped so that
    /// stealers holding an old pointer never read freed memory.
    retired: Vec<*mut Buffer<T>>,
}

/// Work-stealing deque with a blocking-pop interface for its owner.
pub(crate) struct WorkQueue<T> {
    /// Steal end. Monotonically increasing; advanced only by CAS.
    top: AtomicUsize,
    /// Push/pop end. Written only under the bottom-end mutex.
    bottom: AtomicUsize,
    /// Current ring buffer; swapped with a release store on growth.
    buffer: AtomicPtr<Buffer<T>>,
    /// Serializes bottom-end operations and hosts the owner's park.
    bottom_side: Mutex<BottomSide<T>>,
    /// Signalled by `push` and `wake_all`.
    available: Condvar,
    /// Number of growths performed. Hint only.
    grow_count: AtomicUsize,
}

// SAFETY: all shared mutation goes through atomics, the bottom-end mutex,
// or slots claimed through the index protocol.
unsafe impl<T: Send> Send for WorkQueue<T> {}
unsafe impl<T: Send> Sync for WorkQueue<T> {}

impl<T> WorkQueue<T> {
    /// Creates a queue with `capacity` rounded up to a power of two.
    ///
    /// The initial allocation is infallible by design; only growth is
    /// allowed to fail.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let buffer = Buffer::alloc(capacity).expect("initial queue allocation");
        Self {
            top: AtomicUsize::new(0),
            bottom: AtomicUsize::new(0),
            buffer: AtomicPtr::new(Box::into_raw(buffer)),
            bottom_side: Mutex::new(BottomSide { retired: Vec::new() }),
            available: Condvar::new(),
            grow_count: AtomicUsize::new(0),
        }
    }

    /// Pushes `value` onto the bottom end and wakes the owner if it parks.
    ///
    /// Grows the ring when utilization reaches 75%. If growth fails the push
    /// is still accepted while spare slots remain; only a push into a full,
    /// ungrowable ring is rejected.
    pub fn push(&self, value: T) -> Result<(), PushError<T>> {
        {
            let mut side = self.bottom_side.lock();
            self.push_locked(&mut side, value)?;
        }
        self.available.notify_one();
        Ok(())
    }

    fn push_locked(&self, side: &mut BottomSide<T>, value: T) -> Result<(), PushError<T>> {
        let bottom = self.bottom.load(Ordering::Relaxed);
        let top = self.top.load(Ordering::Acquire);
        let mut buf = self.buffer.load(Ordering::Relaxed);

        let len = bottom.wrapping_sub(top);
        let capacity = unsafe { (*buf).capacity() };
        if len >= capacity / 4 * 3 {
            match self.grow(side, buf, top, bottom) {
                Ok(new_buf) => buf = new_buf,
                // Keep filling the current ring; reject only when truly full.
                Err(()) if len >= capacity => return Err(PushError(value)),
                Err(()) => {}
            }
        }

        // SAFETY: bottom is outside [top, bottom), and len < capacity, so no
        // live slot aliases this index.
        unsafe { (*buf).write(bottom, value) };
        fence(Ordering::Release);
        self.bottom.store(bottom.wrapping_add(1), Ordering::Relaxed);
        Ok(())
    }

    /// Doubles the ring, copying the live window `[top, bottom)`.
    ///
    /// The old buffer is retired, not freed: a stealer that loaded it before
    /// the swap keeps reading valid memory.
    fn grow(
        &self,
        side: &mut BottomSide<T>,
        old: *mut Buffer<T>,
        top: usize,
        bottom: usize,
    ) -> Result<*mut Buffer<T>, ()> {
        let new = Buffer::alloc(unsafe { (*old).capacity() } * 2)?;
        let mut i = top;
        while i != bottom {
            // SAFETY: bitwise copy of the live window. Exactly one consumer
            // will claim each index, from whichever buffer it observed.
            unsafe { new.write(i, (*old).read(i)) };
            i = i.wrapping_add(1);
        }
        let new = Box::into_raw(new);
        self.buffer.store(new, Ordering::Release);
        side.retired.push(old);
        self.grow_count.fetch_add(1, Ordering::Relaxed);
        Ok(new)
    }

    /// Owner-side pop from the bottom end.
    #[allow(dead_code)]
    pub fn pop(&self) -> Option<T> {
        let mut side = self.bottom_side.lock();
        self.pop_locked(&mut side)
    }

    fn pop_locked(&self, _side: &mut BottomSide<T>) -> Option<T> {
        let b = self.bottom.load(Ordering::Relaxed).wrapping_sub(1);
        self.bottom.store(b, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        let top = self.top.load(Ordering::Relaxed);

        if (top as isize) > (b as isize) {
            // Empty: restore bottom.
            self.bottom.store(b.wrapping_add(1), Ordering::Relaxed);
            return None;
        }

        let buf = self.buffer.load(Ordering::Relaxed);
        if top == b {
            // Last element: race in-flight stealers through the top CAS.
            // SAFETY: the copy is returned only if the CAS wins; a losing
            // copy is dropped via ManuallyDrop without running Drop.
            let value = ManuallyDrop::new(unsafe { (*buf).read(b) });
            let won = self
                .top
                .compare_exchange(top, top.wrapping_add(1), Ordering::SeqCst, Ordering::Relaxed)
                .is_ok();
            self.bottom.store(b.wrapping_add(1), Ordering::Relaxed);
            return won.then(|| ManuallyDrop::into_inner(value));
        }

        // SAFETY: top < b, so index b cannot be claimed by any stealer.
        Some(unsafe { (*buf).read(b) })
    }

    /// Owner-side blocking pop.
    ///
    /// Returns `Some` as soon as an item is available. Returns `None` when
    /// the queue is empty and either `cancel` is cancelled or `park_timeout`
    /// elapsed; a timed-out owner is expected to scan its peers for steals
    /// before parking again.
    pub fn pop_blocking(&self, cancel: &CancellationToken, park_timeout: Duration) -> Option<T> {
        let mut side = self.bottom_side.lock();
        loop {
            if let Some(value) = self.pop_locked(&mut side) {
                return Some(value);
            }
            if cancel.is_cancelled() {
                return None;
            }
            // Pushes mutate under this mutex, so the empty observation above
            // cannot race a missed notify.
            if self
                .available
                .wait_for(&mut side, park_timeout)
                .timed_out()
            {
                return None;
            }
        }
    }

    /// Steals one item from the top end. Any thread.
    ///
    /// Single attempt: a lost race reports `None` and the caller moves on to
    /// the next victim.
    pub fn try_steal(&self) -> Option<T> {
        let top = self.top.load(Ordering::Acquire);
        fence(Ordering::SeqCst);
        let bottom = self.bottom.load(Ordering::Acquire);

        if (top as isize) >= (bottom as isize) {
            return None;
        }

        // The buffer is loaded after bottom: the release fence in push
        // guarantees a buffer swap is visible before the pushed index is.
        let buf = self.buffer.load(Ordering::Acquire);
        // SAFETY: the copy is made visible to the caller only if the CAS
        // claims index `top`; otherwise it is forgotten unread.
        let value = ManuallyDrop::new(unsafe { (*buf).read(top) });
        if self
            .top
            .compare_exchange(top, top.wrapping_add(1), Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }
        Some(ManuallyDrop::into_inner(value))
    }

    /// Wakes every parked owner wait. Callers flip their stop signal first.
    pub fn wake_all(&self) {
        drop(self.bottom_side.lock());
        self.available.notify_all();
    }

    /// Approximate number of queued items. Hint only.
    pub fn len(&self) -> usize {
        let top = self.top.load(Ordering::Relaxed);
        let bottom = self.bottom.load(Ordering::Relaxed);
        (bottom.wrapping_sub(top) as isize).max(0) as usize
    }

    /// Whether the queue looks empty. Hint only.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current ring capacity. Hint only.
    pub fn capacity(&self) -> usize {
        let buf = self.buffer.load(Ordering::Acquire);
        unsafe { (*buf).capacity() }
    }

    /// Number of growths performed so far. Hint only.
    #[allow(dead_code)]
    pub fn grow_count(&self) -> usize {
        self.grow_count.load(Ordering::Relaxed)
    }
}

impl<T> Drop for WorkQueue<T> {
    fn drop(&mut self) {
        // Drain remaining items so their destructors run.
        let mut side = self.bottom_side.lock();
        while self.pop_locked(&mut side).is_some() {}
        let retired = std::mem::take(&mut side.retired);
        drop(side);

        // SAFETY: drop has exclusive access; every pointer here came from
        // Box::into_raw and is freed exactly once.
        unsafe {
            drop(Box::from_raw(self.buffer.load(Ordering::Relaxed)));
            for old in retired {
                drop(Box::from_raw(old));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn owner_pop_is_lifo() {
        let queue = WorkQueue::with_capacity(8);
        queue.push(1_u32).ok().unwrap();
        queue.push(2).ok().unwrap();
        queue.push(3).ok().unwrap();

        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn thief_steal_is_fifo() {
        let queue = WorkQueue::with_capacity(8);
        queue.push(1_u32).ok().unwrap();
        queue.push(2).ok().unwrap();
        queue.push(3).ok().unwrap();

        assert_eq!(queue.try_steal(), Some(1));
        assert_eq!(queue.try_steal(), Some(2));
        assert_eq!(queue.try_steal(), Some(3));
        assert_eq!(queue.try_steal(), None);
    }

    #[test]
    fn steal_on_empty_does_not_disturb_the_queue() {
        let queue = WorkQueue::with_capacity(8);
        assert_eq!(queue.try_steal(), None::<u32>);
        assert_eq!(queue.try_steal(), None);

        // A failed steal must not have consumed an index.
        queue.push(7).ok().unwrap();
        assert_eq!(queue.try_steal(), Some(7));
    }

    #[test]
    fn growth_preserves_live_elements() {
        let queue = WorkQueue::with_capacity(8);
        for i in 0..200_u32 {
            queue.push(i).ok().unwrap();
        }
        assert!(queue.grow_count() > 0);
        assert!(queue.capacity() >= 256);

        let mut seen = HashSet::new();
        while let Some(v) = queue.pop() {
            assert!(seen.insert(v), "duplicate element {v}");
        }
        assert_eq!(seen.len(), 200);
    }

    #[test]
    fn growth_triggers_at_three_quarters() {
        let queue = WorkQueue::with_capacity(8);
        for i in 0..6_u32 {
            queue.push(i).ok().unwrap();
            assert_eq!(queue.grow_count(), 0);
        }
        // Seventh push observes 6 >= 8 * 3/4 live elements and grows.
        queue.push(6).ok().unwrap();
        assert_eq!(queue.grow_count(), 1);
        assert_eq!(queue.capacity(), 16);
    }

    #[test]
    fn pop_blocking_returns_pushed_item() {
        let queue = Arc::new(WorkQueue::with_capacity(8));
        let cancel = CancellationToken::new();

        let popper = {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            thread::spawn(move || {
                loop {
                    if let Some(v) = queue.pop_blocking(&cancel, Duration::from_millis(50)) {
                        return v;
                    }
                    if cancel.is_cancelled() {
                        panic!("cancelled before an item arrived");
                    }
                }
            })
        };

        thread::sleep(Duration::from_millis(10));
        queue.push(41_u32).ok().unwrap();
        assert_eq!(popper.join().unwrap(), 41);
    }

    #[test]
    fn pop_blocking_observes_cancellation() {
        let queue: Arc<WorkQueue<u32>> = Arc::new(WorkQueue::with_capacity(8));
        let cancel = CancellationToken::new();

        let popper = {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            thread::spawn(move || queue.pop_blocking(&cancel, Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(10));
        cancel.cancel();
        queue.wake_all();
        assert_eq!(popper.join().unwrap(), None);
    }

    #[test]
    fn concurrent_owner_and_thieves_preserve_the_multiset() {
        let total: usize = 512;
        let queue = Arc::new(WorkQueue::with_capacity(64));
        for i in 0..total {
            queue.push(i).ok().unwrap();
        }

        let counts: Arc<Vec<AtomicUsize>> =
            Arc::new((0..total).map(|_| AtomicUsize::new(0)).collect());
        let thief_count = 4;
        let barrier = Arc::new(Barrier::new(thief_count + 1));

        let mut handles = Vec::new();
        for _ in 0..thief_count {
            let queue = Arc::clone(&queue);
            let counts = Arc::clone(&counts);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                let mut misses = 0;
                while misses < 1000 {
                    match queue.try_steal() {
                        Some(i) => {
                            misses = 0;
                            counts[i].fetch_add(1, Ordering::SeqCst);
                            thread::yield_now();
                        }
                        None => misses += 1,
                    }
                }
            }));
        }

        barrier.wait();
        while let Some(i) = queue.pop() {
            counts[i].fetch_add(1, Ordering::SeqCst);
            thread::yield_now();
        }
        for handle in handles {
            handle.join().unwrap();
        }

        for (i, count) in counts.iter().enumerate() {
            assert_eq!(count.load(Ordering::SeqCst), 1, "element {i} miscounted");
        }
    }

    #[test]
    fn drop_releases_remaining_items() {
        let dropped = Arc::new(AtomicUsize::new(0));
        struct Counted(Arc<AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let queue = WorkQueue::with_capacity(8);
        for _ in 0..20 {
            queue.push(Counted(Arc::clone(&dropped))).ok().unwrap();
        }
        drop(queue);
        assert_eq!(dropped.load(Ordering::SeqCst), 20);
    }
}
