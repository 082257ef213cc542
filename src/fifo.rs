//! Fixed-capacity, lock-free FIFO shared between one producer and one consumer
//!
//! [`FifoBuffer`] is the buffer the serial driver places between application code and its
//! interrupt handlers. It never allocates and never takes a lock: each side only ever writes its
//! own cursor, and the cursors are atomics, so a push from thread mode and a pop from an interrupt
//! handler (or the other way around) can preempt each other at any point.
//!
//! A full buffer rejects new elements and keeps the ones it already holds; an empty buffer
//! reports `None` without side effects.
//!
//! # Usage
//!
//! With exclusive access the buffer is used directly:
//!
//! ```
//! use stm32h5xx_usart_fifo::fifo::FifoBuffer;
//!
//! let mut fifo: FifoBuffer<u8, 4> = FifoBuffer::new();
//! assert!(fifo.push(1).is_ok());
//! assert_eq!(fifo.pop(), Some(1));
//! ```
//!
//! To share it between two execution contexts, split it into a [`Producer`] and a [`Consumer`]
//! and move each handle to the context that owns that side:
//!
//! ```
//! use stm32h5xx_usart_fifo::fifo::FifoBuffer;
//!
//! let mut fifo: FifoBuffer<u8, 4> = FifoBuffer::new();
//! let (mut producer, mut consumer) = fifo.split();
//! producer.push(0x55).unwrap();
//! assert_eq!(consumer.pop(), Some(0x55));
//! ```

use core::cell::UnsafeCell;
use core::fmt;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicUsize, Ordering};

/// Ring buffer of `N` elements of `T`
///
/// The read and write cursors count over `0..2N` rather than `0..N`. That keeps "full" (cursors
/// `N` apart) distinguishable from "empty" (cursors equal) without sacrificing a slot, so all `N`
/// slots hold data.
pub struct FifoBuffer<T, const N: usize> {
    read: AtomicUsize,
    write: AtomicUsize,
    slots: UnsafeCell<MaybeUninit<[T; N]>>,
}

// Safety: slots are only reached through the cursor protocol below. A slot is written by the
// producer before the write cursor publishes it, and read by the consumer before the read cursor
// releases it, so no slot is ever accessed from two contexts at once.
unsafe impl<T: Send, const N: usize> Sync for FifoBuffer<T, N> {}

impl<T, const N: usize> FifoBuffer<T, N> {
    const VALID_CAPACITY: () = assert!(
        N > 0 && N <= usize::MAX / 2,
        "FifoBuffer capacity must be non-zero and leave room for the cursor range"
    );

    /// Create an empty buffer
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID_CAPACITY;

        FifoBuffer {
            read: AtomicUsize::new(0),
            write: AtomicUsize::new(0),
            slots: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Maximum number of elements the buffer can hold
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of elements currently buffered
    ///
    /// Never blocks and may be called from either side. The value is a snapshot: the other side
    /// may change it immediately afterwards.
    pub fn len(&self) -> usize {
        let read = self.read.load(Ordering::Acquire);
        let write = self.write.load(Ordering::Acquire);
        Self::distance(read, write)
    }

    /// Returns `true` if no elements are buffered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if a push would be rejected
    pub fn is_full(&self) -> bool {
        self.len() == N
    }

    /// Append `value` at the tail
    ///
    /// Returns the value back if the buffer is full; the buffered elements are left untouched.
    pub fn push(&mut self, value: T) -> Result<(), T> {
        // Safety: `&mut self` excludes every other producer and consumer
        unsafe { self.enqueue(value) }
    }

    /// Remove and return the element at the head, or `None` if the buffer is empty
    pub fn pop(&mut self) -> Option<T> {
        // Safety: `&mut self` excludes every other producer and consumer
        unsafe { self.dequeue() }
    }

    /// Split the buffer into its producer and consumer halves
    pub fn split(&mut self) -> (Producer<'_, T, N>, Consumer<'_, T, N>) {
        (Producer { fifo: self }, Consumer { fifo: self })
    }

    /// Append `value` through a shared reference
    ///
    /// # Safety
    ///
    /// At any point in time at most one context may act as the producer of this buffer. Handing
    /// the producer role to another context requires a release/acquire synchronisation between
    /// the two.
    pub(crate) unsafe fn enqueue(&self, value: T) -> Result<(), T> {
        // Only the producer stores the write cursor
        let write = self.write.load(Ordering::Relaxed);
        let read = self.read.load(Ordering::Acquire);

        if Self::distance(read, write) == N {
            return Err(value);
        }

        self.slot(write).write(value);
        self.write.store(Self::advance(write), Ordering::Release);
        Ok(())
    }

    /// Remove the head element through a shared reference
    ///
    /// # Safety
    ///
    /// At any point in time at most one context may act as the consumer of this buffer. Handing
    /// the consumer role to another context requires a release/acquire synchronisation between
    /// the two.
    pub(crate) unsafe fn dequeue(&self) -> Option<T> {
        // Only the consumer stores the read cursor
        let read = self.read.load(Ordering::Relaxed);
        let write = self.write.load(Ordering::Acquire);

        if read == write {
            return None;
        }

        let value = self.slot(read).read();
        self.read.store(Self::advance(read), Ordering::Release);
        Some(value)
    }

    #[inline(always)]
    fn slot(&self, cursor: usize) -> *mut T {
        // Raw pointer arithmetic so that no reference to the whole array is ever formed while the
        // other side is touching a different slot
        self.slots.get().cast::<T>().wrapping_add(cursor % N)
    }

    #[inline(always)]
    const fn advance(cursor: usize) -> usize {
        if cursor + 1 == 2 * N {
            0
        } else {
            cursor + 1
        }
    }

    #[inline(always)]
    const fn distance(read: usize, write: usize) -> usize {
        if write >= read {
            write - read
        } else {
            write + 2 * N - read
        }
    }
}

impl<T, const N: usize> Default for FifoBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Drop for FifoBuffer<T, N> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

impl<T, const N: usize> fmt::Debug for FifoBuffer<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FifoBuffer")
            .field("len", &self.len())
            .field("capacity", &N)
            .finish()
    }
}

/// Pushing half of a split [`FifoBuffer`]
pub struct Producer<'a, T, const N: usize> {
    fifo: &'a FifoBuffer<T, N>,
}

impl<T, const N: usize> Producer<'_, T, N> {
    /// Append `value` at the tail, handing it back if the buffer is full
    pub fn push(&mut self, value: T) -> Result<(), T> {
        // Safety: the producer half is unique for the lifetime of the split borrow
        unsafe { self.fifo.enqueue(value) }
    }

    /// Number of elements currently buffered
    pub fn len(&self) -> usize {
        self.fifo.len()
    }

    /// Returns `true` if no elements are buffered
    pub fn is_empty(&self) -> bool {
        self.fifo.is_empty()
    }

    /// Returns `true` if a push would be rejected
    pub fn is_full(&self) -> bool {
        self.fifo.is_full()
    }

    /// Maximum number of elements the buffer can hold
    pub const fn capacity(&self) -> usize {
        N
    }
}

/// Popping half of a split [`FifoBuffer`]
pub struct Consumer<'a, T, const N: usize> {
    fifo: &'a FifoBuffer<T, N>,
}

impl<T, const N: usize> Consumer<'_, T, N> {
    /// Remove and return the head element, or `None` if the buffer is empty
    pub fn pop(&mut self) -> Option<T> {
        // Safety: the consumer half is unique for the lifetime of the split borrow
        unsafe { self.fifo.dequeue() }
    }

    /// Number of elements currently buffered
    pub fn len(&self) -> usize {
        self.fifo.len()
    }

    /// Returns `true` if no elements are buffered
    pub fn is_empty(&self) -> bool {
        self.fifo.is_empty()
    }

    /// Maximum number of elements the buffer can hold
    pub const fn capacity(&self) -> usize {
        N
    }
}
