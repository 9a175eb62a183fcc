/*! Statically sized circular buffer with blocking and non-blocking
push and pop.

Used as the hand-off point between the codec side and the modem side:
the producer can overwrite the oldest element when the consumer falls
behind, so the newest audio always wins.

Blocking callers wait on a condition variable and re-test the
predicate in a loop, so spurious wakeups are harmless. A poisoned lock
is treated as still-valid data: every slot holds a plain value and
there is no invariant a panicking peer could have broken halfway.
*/
use std::sync::{Condvar, Mutex, MutexGuard};

struct Inner<T, const N: usize> {
    data: [T; N],
    read_pos: usize,
    write_pos: usize,
    num_elements: usize,
}

/// Fixed-capacity ring buffer, shareable between threads.
pub struct RingBuffer<T, const N: usize> {
    inner: Mutex<Inner<T, N>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T: Copy + Default, const N: usize> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + Default, const N: usize> RingBuffer<T, N> {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                data: [T::default(); N],
                read_pos: 0,
                write_pos: 0,
                num_elements: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T, N>> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Push an element.
    ///
    /// When the buffer is full a non-blocking call returns `false`; a
    /// blocking call waits for a free slot.
    pub fn push(&self, elem: T, blocking: bool) -> bool {
        let mut g = self.lock();

        if g.num_elements >= N && !blocking {
            return false;
        }
        while g.num_elements >= N {
            g = self.not_full.wait(g).unwrap_or_else(|p| p.into_inner());
        }

        let pos = g.write_pos;
        g.data[pos] = elem;
        g.write_pos = (g.write_pos + 1) % N;
        g.num_elements += 1;
        self.not_empty.notify_one();
        true
    }

    /// Push an element, discarding the oldest one when full.
    ///
    /// Never blocks. Returns `true` if an old element was dropped.
    pub fn push_overwrite(&self, elem: T) -> bool {
        let mut g = self.lock();

        let mut dropped = false;
        if g.num_elements >= N {
            g.read_pos = (g.read_pos + 1) % N;
            g.num_elements -= 1;
            dropped = true;
        }
        let pos = g.write_pos;
        g.data[pos] = elem;
        g.write_pos = (g.write_pos + 1) % N;
        g.num_elements += 1;
        self.not_empty.notify_one();
        dropped
    }

    /// Pop an element.
    ///
    /// When the buffer is empty a non-blocking call returns `None`; a
    /// blocking call waits for data.
    pub fn pop(&self, blocking: bool) -> Option<T> {
        let mut g = self.lock();

        if g.num_elements == 0 && !blocking {
            return None;
        }
        while g.num_elements == 0 {
            g = self.not_empty.wait(g).unwrap_or_else(|p| p.into_inner());
        }

        let elem = g.data[g.read_pos];
        g.read_pos = (g.read_pos + 1) % N;
        g.num_elements -= 1;
        self.not_full.notify_one();
        Some(elem)
    }

    /// Discard one element from the tail, freeing a slot. Unblocks an
    /// eventual waiting producer.
    pub fn erase_element(&self) {
        let mut g = self.lock();
        if g.num_elements == 0 {
            return;
        }
        g.read_pos = (g.read_pos + 1) % N;
        g.num_elements -= 1;
        self.not_full.notify_one();
    }

    /// True if no elements are stored.
    pub fn is_empty(&self) -> bool {
        self.lock().num_elements == 0
    }

    /// True if all slots are occupied.
    pub fn is_full(&self) -> bool {
        self.lock().num_elements >= N
    }

    /// Number of elements currently stored.
    pub fn len(&self) -> usize {
        self.lock().num_elements
    }

    /// Drop all stored elements.
    pub fn reset(&self) {
        let mut g = self.lock();
        g.read_pos = 0;
        g.write_pos = 0;
        g.num_elements = 0;
        self.not_full.notify_all();
    }
}
