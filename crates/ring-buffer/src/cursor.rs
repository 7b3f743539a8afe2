//! Wrapping Cursor Model
//!
//! Byte-mode cursor arithmetic for the ring buffer, kept free of storage so
//! every wrap transition can be tested in isolation. The free/read/write
//! cursors are all derived from a `head` offset and two lengths, which makes
//! the empty/full ambiguity of coinciding cursors impossible to express.

use serde::{Deserialize, Serialize};

/// Snapshot of the cursor offsets, relative to the start of storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RingInfo {
    /// Oldest byte not yet returned to the buffer
    pub free: usize,
    /// Next byte to hand out to a reader
    pub read: usize,
    /// Next byte to receive new data
    pub write: usize,
    /// Same as `write` in byte mode
    pub acquire: usize,
    /// Bytes written but not yet handed out
    pub items_waiting: usize,
}

/// Cursor state of a byte ring of fixed capacity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursors {
    capacity: usize,
    /// Free cursor
    head: usize,
    /// Bytes between the free cursor and the write cursor
    len: usize,
    /// Bytes handed out to the reader but not yet returned
    outstanding: usize,
}

/// Destination of a write, split at the physical end of storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSpan {
    pub offset: usize,
    pub first: usize,
    pub second: usize,
}

impl Cursors {
    /// Create an empty cursor set; `capacity` must be non-zero
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0);
        Self {
            capacity,
            head: 0,
            len: 0,
            outstanding: 0,
        }
    }

    /// Bytes held by the buffer, outstanding reads included
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    /// Bytes written but not yet handed out
    pub fn waiting(&self) -> usize {
        self.len - self.outstanding
    }

    pub fn free_offset(&self) -> usize {
        self.head
    }

    pub fn read_offset(&self) -> usize {
        (self.head + self.outstanding) % self.capacity
    }

    pub fn write_offset(&self) -> usize {
        (self.head + self.len) % self.capacity
    }

    /// Total free bytes, possibly split across the physical end
    pub fn free_size(&self) -> usize {
        self.capacity - self.len
    }

    /// Free bytes reachable from the write cursor without wrapping
    pub fn contiguous_free(&self) -> usize {
        if self.is_full() {
            return 0;
        }
        let write = self.write_offset();
        if self.len == 0 || self.head < write {
            self.capacity - write
        } else {
            self.head - write
        }
    }

    pub fn fits(&self, size: usize) -> bool {
        size <= self.free_size()
    }

    /// Claim `size` free bytes at the write cursor.
    ///
    /// The caller must have checked [`fits`](Self::fits).
    pub fn reserve(&mut self, size: usize) -> WriteSpan {
        debug_assert!(self.fits(size));
        let offset = self.write_offset();
        let first = size.min(self.capacity - offset);
        self.len += size;
        WriteSpan {
            offset,
            first,
            second: size - first,
        }
    }

    /// Whether a read may be handed out right now
    pub fn can_take(&self) -> bool {
        self.outstanding == 0 && self.waiting() > 0
    }

    /// Hand out the contiguous run at the read cursor, capped at `max` when
    /// `max` is non-zero. Returns `(offset, size)`.
    pub fn take(&mut self, max: usize) -> Option<(usize, usize)> {
        if !self.can_take() {
            return None;
        }
        let offset = self.read_offset();
        let mut size = self.waiting().min(self.capacity - offset);
        if max > 0 {
            size = size.min(max);
        }
        self.outstanding += size;
        Some((offset, size))
    }

    /// Return the first `used` bytes of the outstanding read and make the rest
    /// readable again. Returns the number of bytes actually freed.
    pub fn release(&mut self, used: usize) -> usize {
        let used = used.min(self.outstanding);
        self.head = (self.head + used) % self.capacity;
        self.len -= used;
        self.outstanding = 0;
        used
    }

    /// Whether a read has been handed out and not yet released
    pub fn read_outstanding(&self) -> bool {
        self.outstanding > 0
    }

    /// Move the free cursor to the start of storage, keeping the live length.
    ///
    /// Returns the old free cursor; the caller must rotate the storage left
    /// by that many bytes. No read may be outstanding.
    pub fn rewind(&mut self) -> usize {
        debug_assert_eq!(self.outstanding, 0);
        std::mem::take(&mut self.head)
    }

    pub fn info(&self) -> RingInfo {
        let write = self.write_offset();
        RingInfo {
            free: self.free_offset(),
            read: self.read_offset(),
            write,
            acquire: write,
            items_waiting: self.waiting(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_state() {
        let cursors = Cursors::new(10);
        assert!(cursors.is_empty());
        assert_eq!(cursors.free_size(), 10);
        assert_eq!(cursors.contiguous_free(), 10);
        assert_eq!(cursors.info(), RingInfo::default());
    }

    #[test]
    fn test_reserve_splits_at_end() {
        let mut cursors = Cursors::new(10);
        cursors.reserve(7);
        cursors.take(0);
        cursors.release(7);

        let span = cursors.reserve(5);
        assert_eq!(span, WriteSpan { offset: 7, first: 3, second: 2 });
        assert_eq!(cursors.write_offset(), 2);
    }

    #[test]
    fn test_full_is_not_empty() {
        let mut cursors = Cursors::new(4);
        cursors.reserve(4);
        assert!(cursors.is_full());
        assert_eq!(cursors.write_offset(), cursors.free_offset());
        assert_eq!(cursors.contiguous_free(), 0);
        assert_eq!(cursors.take(0), Some((0, 4)));
    }

    #[test]
    fn test_take_clips_at_physical_end() {
        let mut cursors = Cursors::new(10);
        cursors.reserve(8);
        cursors.take(6);
        cursors.release(6);
        cursors.reserve(6);

        // live region is [6, 10) + [0, 4)
        assert_eq!(cursors.take(0), Some((6, 4)));
        cursors.release(4);
        assert_eq!(cursors.take(0), Some((0, 4)));
    }

    #[test]
    fn test_single_outstanding_read() {
        let mut cursors = Cursors::new(8);
        cursors.reserve(6);
        assert_eq!(cursors.take(2), Some((0, 2)));
        assert_eq!(cursors.take(2), None);
        cursors.release(2);
        assert_eq!(cursors.take(2), Some((2, 2)));
    }

    #[test]
    fn test_partial_release_rewinds_read() {
        let mut cursors = Cursors::new(8);
        cursors.reserve(6);
        cursors.take(0);
        assert_eq!(cursors.release(2), 2);
        assert_eq!(cursors.read_offset(), 2);
        assert_eq!(cursors.waiting(), 4);
    }

    #[test]
    fn test_contiguous_free_when_wrapped() {
        let mut cursors = Cursors::new(10);
        cursors.reserve(10);
        cursors.take(4);
        cursors.release(4);
        // live [4, 10), free [0, 4)
        assert_eq!(cursors.contiguous_free(), 4);
        cursors.reserve(1);
        assert_eq!(cursors.contiguous_free(), 3);
    }

    #[test]
    fn test_rewind_makes_free_space_contiguous() {
        let mut cursors = Cursors::new(10);
        cursors.reserve(8);
        cursors.take(6);
        cursors.release(6);
        cursors.reserve(4);
        // live [6, 10) + [0, 2)
        assert_eq!(cursors.contiguous_free(), 4);

        assert_eq!(cursors.rewind(), 6);
        assert_eq!(cursors.len(), 6);
        assert_eq!(cursors.write_offset(), 6);
        assert_eq!(cursors.contiguous_free(), 4);
        assert_eq!(cursors.contiguous_free(), cursors.free_size());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Send(usize),
        Take(usize),
        Release(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..24).prop_map(Op::Send),
            (0usize..24).prop_map(Op::Take),
            (0usize..24).prop_map(Op::Release),
        ]
    }

    proptest! {
        #[test]
        fn prop_waiting_is_sent_minus_released(
            capacity in 1usize..32,
            ops in proptest::collection::vec(op(), 0..200),
        ) {
            let mut cursors = Cursors::new(capacity);
            let mut sent = 0usize;
            let mut released = 0usize;

            for op in ops {
                match op {
                    Op::Send(n) => {
                        if cursors.fits(n) {
                            let span = cursors.reserve(n);
                            prop_assert_eq!(span.first + span.second, n);
                            prop_assert!(span.offset < capacity);
                            prop_assert!(span.offset + span.first <= capacity);
                            sent += n;
                        }
                    }
                    Op::Take(max) => {
                        if let Some((offset, size)) = cursors.take(max) {
                            prop_assert!(size > 0);
                            prop_assert!(offset + size <= capacity);
                        }
                    }
                    Op::Release(n) => {
                        released += cursors.release(n);
                    }
                }

                prop_assert_eq!(cursors.len(), sent - released);
                prop_assert!(cursors.len() <= capacity);
                prop_assert!(cursors.waiting() <= cursors.len());
                let info = cursors.info();
                prop_assert!(info.free < capacity);
                prop_assert!(info.read < capacity);
                prop_assert!(info.write < capacity);
                prop_assert!(cursors.contiguous_free() <= cursors.free_size());
            }
        }

        #[test]
        fn prop_contiguous_free_reaches_free_after_write_cursor(
            capacity in 1usize..32,
            fill in 0usize..32,
            drain in 0usize..32,
        ) {
            let mut cursors = Cursors::new(capacity);
            let fill = fill.min(capacity);
            cursors.reserve(fill);
            cursors.take(drain);
            cursors.release(drain);

            let write = cursors.write_offset();
            let contiguous = cursors.contiguous_free();
            prop_assert!(write + contiguous <= capacity);
            if contiguous < cursors.free_size() {
                // the remainder sits at the start of storage, before the free cursor
                prop_assert_eq!(write + contiguous, capacity);
                prop_assert_eq!(cursors.free_size() - contiguous, cursors.free_offset());
            }
        }
    }
}
