//! Fixed-capacity FIFO for audio samples moving from the input callback to
//! the output callback.
//!
//! When the FIFO is full, new samples **overwrite** the oldest ones, so a
//! slow output stream hears the most recent audio instead of drifting
//! further and further behind the microphone.
//!
//! # Example
//!
//! ```rust
//! use capture_session::engine::SampleFifo;
//!
//! let mut fifo = SampleFifo::new(4);
//! for sample in [1.0, 2.0, 3.0, 4.0, 5.0] {
//!     fifo.push(sample); // 5 items → capacity 4 → oldest dropped
//! }
//! assert_eq!(fifo.pop(), Some(2.0));
//! assert_eq!(fifo.len(), 3);
//! ```

/// A fixed-capacity circular FIFO.
///
/// ## Overflow behaviour
///
/// When a push would exceed `capacity`, the oldest sample is silently
/// dropped.  The FIFO never allocates beyond its initial capacity, which
/// keeps the audio callbacks allocation-free.
pub struct SampleFifo<T> {
    buf: Vec<T>,
    capacity: usize,
    /// Index of the *next* write position (wraps around `capacity`).
    write_pos: usize,
    /// Number of valid samples currently stored (≤ `capacity`).
    len: usize,
}

impl<T: Copy + Default> SampleFifo<T> {
    /// Create a new FIFO with the given `capacity`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "SampleFifo capacity must be > 0");
        Self {
            buf: vec![T::default(); capacity],
            capacity,
            write_pos: 0,
            len: 0,
        }
    }

    /// Append one sample, dropping the oldest when full.
    pub fn push(&mut self, item: T) {
        self.buf[self.write_pos] = item;
        self.write_pos = (self.write_pos + 1) % self.capacity;
        if self.len < self.capacity {
            self.len += 1;
        }
    }

    /// Remove and return the oldest sample.
    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let read_pos = (self.write_pos + self.capacity - self.len) % self.capacity;
        self.len -= 1;
        Some(self.buf[read_pos])
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
