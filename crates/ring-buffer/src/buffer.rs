//! Blocking Byte Ring Buffer Implementation

use crate::cursor::{Cursors, RingInfo};
use crate::error::RingBufferError;
use crate::signal::{Signal, Timeout};
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::{self, NonNull};
use std::slice;
use std::time::Instant;

/// Bounded byte ring over caller-owned storage.
///
/// Writers block on a "space available" signal and readers on a "data
/// available" signal. Cursor updates and copies happen under a short spin
/// lock, so a call with [`Timeout::Immediate`] never suspends the caller.
///
/// Reads are zero-copy: [`receive`](Self::receive) hands out a [`ReadGrant`]
/// pointing into the storage, and the bytes stay reserved until the grant is
/// returned. Only one grant may be outstanding at a time.
pub struct RingBuffer<'a> {
    /// Start of the borrowed storage
    storage: NonNull<u8>,
    /// Length of the borrowed storage
    capacity: usize,
    /// Cursor state, only touched under the spin lock
    cursors: spin::Mutex<Cursors>,
    /// Raised when free space may have become available
    space: Signal,
    /// Raised when data may have become available
    data: Signal,
    _storage: PhantomData<&'a mut [u8]>,
}

// SAFETY: the storage is exclusively borrowed for 'a. Writers only copy into
// the free region and grants only expose the outstanding region; both regions
// are carved out under the spin lock and never overlap.
unsafe impl Send for RingBuffer<'_> {}
unsafe impl Sync for RingBuffer<'_> {}

impl<'a> RingBuffer<'a> {
    /// Create an empty ring buffer over `storage`
    pub fn create(storage: &'a mut [u8]) -> Result<Self, RingBufferError> {
        if storage.is_empty() {
            return Err(RingBufferError::ZeroCapacity);
        }
        let capacity = storage.len();
        Ok(Self {
            storage: NonNull::from(storage).cast(),
            capacity,
            cursors: spin::Mutex::new(Cursors::new(capacity)),
            space: Signal::new(true),
            data: Signal::new(false),
            _storage: PhantomData,
        })
    }

    /// Get the buffer capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert `item`, waiting up to `timeout` for enough free space.
    ///
    /// The item may wrap around the physical end of storage.
    pub fn send(&self, item: &[u8], timeout: Timeout) -> Result<(), RingBufferError> {
        if item.len() > self.capacity {
            return Err(RingBufferError::Oversize {
                len: item.len(),
                capacity: self.capacity,
            });
        }
        if item.is_empty() {
            return Ok(());
        }

        let deadline = timeout.deadline(Instant::now());
        loop {
            if !self.space.take(deadline) {
                return Err(self.send_timed_out());
            }

            let sent = {
                let mut cursors = self.cursors.lock();
                if cursors.fits(item.len()) {
                    let span = cursors.reserve(item.len());
                    // SAFETY: the reserved span was free space, so no grant
                    // can observe it, and it lies within the storage bounds.
                    unsafe {
                        let base = self.storage.as_ptr();
                        ptr::copy_nonoverlapping(item.as_ptr(), base.add(span.offset), span.first);
                        ptr::copy_nonoverlapping(item.as_ptr().add(span.first), base, span.second);
                    }
                    Some(cursors.free_size() > 0)
                } else {
                    None
                }
            };

            match sent {
                Some(room_left) => {
                    self.data.give();
                    if room_left {
                        // let the next writer in
                        self.space.give();
                    }
                    return Ok(());
                }
                None => {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return Err(self.send_timed_out());
                    }
                }
            }
        }
    }

    /// Give up on a send. An earlier wakeup may have consumed the space
    /// signal without fitting, so raise it again while room remains for a
    /// smaller item.
    fn send_timed_out(&self) -> RingBufferError {
        if self.cursors.lock().free_size() > 0 {
            self.space.give();
        }
        RingBufferError::Timeout
    }

    /// Rotate the storage so that the live bytes start at offset zero, which
    /// makes all free space contiguous after them. Works in place.
    ///
    /// Fails with [`RingBufferError::ReadOutstanding`] while a grant is held.
    pub fn realign(&self) -> Result<(), RingBufferError> {
        let mut cursors = self.cursors.lock();
        if cursors.read_outstanding() {
            return Err(RingBufferError::ReadOutstanding);
        }
        let head = cursors.rewind();
        if head > 0 {
            // SAFETY: no grant is outstanding and senders only copy under the
            // spin lock held here, so nothing else touches the storage.
            let storage = unsafe { slice::from_raw_parts_mut(self.storage.as_ptr(), self.capacity) };
            storage.rotate_left(head);
        }
        Ok(())
    }

    /// Retrieve the contiguous run of bytes at the read cursor.
    ///
    /// If the data wraps around the physical end only the part up to the end
    /// is returned; a second call retrieves the rest.
    pub fn receive(&self, timeout: Timeout) -> Option<ReadGrant<'_>> {
        self.receive_generic(timeout, 0)
    }

    /// Like [`receive`](Self::receive) but hands out at most `max_size` bytes.
    pub fn receive_upto(&self, timeout: Timeout, max_size: usize) -> Option<ReadGrant<'_>> {
        if max_size == 0 {
            return None;
        }
        self.receive_generic(timeout, max_size)
    }

    fn receive_generic(&self, timeout: Timeout, max_size: usize) -> Option<ReadGrant<'_>> {
        let deadline = timeout.deadline(Instant::now());
        loop {
            if !self.data.take(deadline) {
                return None;
            }

            let taken = {
                let mut cursors = self.cursors.lock();
                cursors
                    .take(max_size)
                    .map(|(offset, len)| (offset, len, cursors.waiting() > 0))
            };

            if let Some((offset, len, more)) = taken {
                if more {
                    self.data.give();
                }
                return Some(ReadGrant {
                    ring: self,
                    offset,
                    len,
                    done: false,
                });
            }

            if deadline.is_some_and(|d| Instant::now() >= d) {
                return None;
            }
        }
    }

    /// Free the first `used` bytes of the outstanding grant
    fn release(&self, used: usize) -> usize {
        let (freed, waiting) = {
            let mut cursors = self.cursors.lock();
            let freed = cursors.release(used);
            (freed, cursors.waiting())
        };
        self.space.give();
        if waiting > 0 {
            self.data.give();
        }
        freed
    }

    /// Get the total free space, possibly split across the physical end
    pub fn get_cur_free_size(&self) -> usize {
        self.cursors.lock().free_size()
    }

    /// Get the free space reachable from the write cursor without wrapping
    pub fn contiguous_free_size(&self) -> usize {
        self.cursors.lock().contiguous_free()
    }

    /// Snapshot of all cursor offsets and the waiting byte count
    pub fn get_info(&self) -> RingInfo {
        self.cursors.lock().info()
    }

    /// Bytes held by the buffer, outstanding reads included
    pub fn len(&self) -> usize {
        self.cursors.lock().len()
    }

    /// Check if no bytes are held, outstanding reads included
    pub fn is_empty(&self) -> bool {
        self.cursors.lock().is_empty()
    }

    /// Delete the ring buffer and hand the storage back
    pub fn delete(self) -> &'a mut [u8] {
        // SAFETY: self owned the exclusive borrow for 'a, and no grant can
        // outlive the consumed ring buffer.
        unsafe { slice::from_raw_parts_mut(self.storage.as_ptr(), self.capacity) }
    }
}

impl std::fmt::Debug for RingBuffer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("info", &self.get_info())
            .finish()
    }
}

/// Zero-copy view of bytes handed out by [`RingBuffer::receive`].
///
/// The bytes stay reserved until the grant is returned. Dropping a grant
/// without returning it puts the bytes back as unread.
pub struct ReadGrant<'r> {
    ring: &'r RingBuffer<'r>,
    offset: usize,
    len: usize,
    done: bool,
}

impl ReadGrant<'_> {
    /// Offset of the first byte from the start of storage
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Return every byte of the grant to the ring buffer
    pub fn return_item(mut self) {
        self.ring.release(self.len);
        self.done = true;
    }

    /// Return the first `used` bytes; the rest become readable again.
    /// Returns the number of bytes freed.
    pub fn release(mut self, used: usize) -> usize {
        self.done = true;
        self.ring.release(used)
    }
}

impl Deref for ReadGrant<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: [offset, offset + len) is the outstanding region, within
        // bounds and not writable by senders until this grant is released.
        unsafe { slice::from_raw_parts(self.ring.storage.as_ptr().add(self.offset), self.len) }
    }
}

impl Drop for ReadGrant<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.ring.release(0);
        }
    }
}

impl std::fmt::Debug for ReadGrant<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadGrant")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_create_rejects_empty_storage() {
        let mut storage: [u8; 0] = [];
        assert_eq!(
            RingBuffer::create(&mut storage).unwrap_err(),
            RingBufferError::ZeroCapacity
        );
    }

    #[test]
    fn test_send_and_receive() {
        let mut storage = [0u8; 16];
        let ring = RingBuffer::create(&mut storage).unwrap();
        let before = ring.get_cur_free_size();

        ring.send(b"hello", Timeout::Immediate).unwrap();
        assert_eq!(ring.get_cur_free_size(), before - 5);

        let grant = ring.receive_upto(Timeout::Immediate, 5).unwrap();
        assert_eq!(&*grant, b"hello");
        // not freed until returned
        assert_eq!(ring.get_cur_free_size(), before - 5);
        grant.return_item();

        assert_eq!(ring.get_cur_free_size(), before);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_oversize_rejected() {
        let mut storage = [0u8; 4];
        let ring = RingBuffer::create(&mut storage).unwrap();
        assert_eq!(
            ring.send(b"too long", Timeout::Forever).unwrap_err(),
            RingBufferError::Oversize { len: 8, capacity: 4 }
        );
    }

    #[test]
    fn test_zero_length_send_is_noop() {
        let mut storage = [0u8; 4];
        let ring = RingBuffer::create(&mut storage).unwrap();
        ring.send(&[], Timeout::Immediate).unwrap();
        assert!(ring.receive(Timeout::Immediate).is_none());
    }

    #[test]
    fn test_send_times_out_when_full() {
        let mut storage = [0u8; 4];
        let ring = RingBuffer::create(&mut storage).unwrap();
        ring.send(b"abcd", Timeout::Immediate).unwrap();
        assert_eq!(
            ring.send(b"e", Timeout::After(Duration::from_millis(10))).unwrap_err(),
            RingBufferError::Timeout
        );
    }

    #[test]
    fn test_signalled_writer_keeps_waiting_until_it_fits() {
        let mut storage = [0u8; 4];
        let ring = RingBuffer::create(&mut storage).unwrap();
        ring.send(b"abc", Timeout::Immediate).unwrap();

        thread::scope(|s| {
            // space is signalled but 2 bytes do not fit yet
            let writer = s.spawn(|| ring.send(b"de", Timeout::After(Duration::from_secs(2))));
            thread::sleep(Duration::from_millis(50));
            ring.receive_upto(Timeout::Immediate, 2).unwrap().return_item();
            writer.join().unwrap().unwrap();
        });

        let mut out = Vec::new();
        while let Some(grant) = ring.receive(Timeout::Immediate) {
            out.extend_from_slice(&grant);
            grant.return_item();
        }
        assert_eq!(out, b"cde");
    }

    #[test]
    fn test_timed_out_writer_leaves_space_signalled() {
        let mut storage = [0u8; 4];
        let ring = RingBuffer::create(&mut storage).unwrap();
        ring.send(b"abc", Timeout::Immediate).unwrap();

        assert_eq!(
            ring.send(b"de", Timeout::After(Duration::from_millis(30))).unwrap_err(),
            RingBufferError::Timeout
        );
        // the remaining byte is still reachable without waiting
        ring.send(b"d", Timeout::Immediate).unwrap();
        assert_eq!(ring.get_cur_free_size(), 0);
    }

    #[test]
    fn test_realign_rotates_live_bytes_to_start() {
        let mut storage = [0u8; 10];
        let ring = RingBuffer::create(&mut storage).unwrap();
        ring.send(b"xxxxxxab", Timeout::Immediate).unwrap();
        ring.receive_upto(Timeout::Immediate, 6).unwrap().return_item();
        ring.send(b"cdef", Timeout::Immediate).unwrap();
        // live bytes wrap: [6, 10) + [0, 2)
        assert_eq!(ring.contiguous_free_size(), 4);

        ring.realign().unwrap();
        let info = ring.get_info();
        assert_eq!(info.free, 0);
        assert_eq!(info.write, 6);
        assert_eq!(ring.contiguous_free_size(), 4);
        ring.send(b"ghij", Timeout::Immediate).unwrap();

        let grant = ring.receive(Timeout::Immediate).unwrap();
        assert_eq!(&*grant, b"abcdefghij");
        grant.return_item();
    }

    #[test]
    fn test_realign_refused_while_reading() {
        let mut storage = [0u8; 8];
        let ring = RingBuffer::create(&mut storage).unwrap();
        ring.send(b"abcd", Timeout::Immediate).unwrap();
        ring.receive_upto(Timeout::Immediate, 2).unwrap().return_item();

        let grant = ring.receive(Timeout::Immediate).unwrap();
        assert_eq!(ring.realign().unwrap_err(), RingBufferError::ReadOutstanding);
        grant.release(0);

        ring.realign().unwrap();
        assert_eq!(ring.get_info().free, 0);
        assert_eq!(&*ring.receive(Timeout::Immediate).unwrap(), b"cd");
    }

    #[test]
    fn test_receive_times_out_when_empty() {
        let mut storage = [0u8; 4];
        let ring = RingBuffer::create(&mut storage).unwrap();
        assert!(ring.receive(Timeout::After(Duration::from_millis(10))).is_none());
        assert!(ring.receive_upto(Timeout::Immediate, 0).is_none());
    }

    #[test]
    fn test_wrapped_data_needs_two_receives() {
        let mut storage = [0u8; 10];
        let ring = RingBuffer::create(&mut storage).unwrap();
        ring.send(b"xxxxxx", Timeout::Immediate).unwrap();
        ring.receive(Timeout::Immediate).unwrap().return_item();

        ring.send(b"0123456789", Timeout::Immediate).unwrap();
        let first = ring.receive(Timeout::Immediate).unwrap();
        assert_eq!(first.offset(), 6);
        assert_eq!(&*first, b"0123");
        first.return_item();

        let second = ring.receive(Timeout::Immediate).unwrap();
        assert_eq!(second.offset(), 0);
        assert_eq!(&*second, b"456789");
    }

    #[test]
    fn test_only_one_grant_outstanding() {
        let mut storage = [0u8; 8];
        let ring = RingBuffer::create(&mut storage).unwrap();
        ring.send(b"abcdef", Timeout::Immediate).unwrap();

        let grant = ring.receive_upto(Timeout::Immediate, 2).unwrap();
        assert!(ring.receive(Timeout::Immediate).is_none());
        grant.return_item();

        let rest = ring.receive(Timeout::Immediate).unwrap();
        assert_eq!(&*rest, b"cdef");
    }

    #[test]
    fn test_partial_release_and_drop() {
        let mut storage = [0u8; 8];
        let ring = RingBuffer::create(&mut storage).unwrap();
        ring.send(b"abcdef", Timeout::Immediate).unwrap();

        let grant = ring.receive(Timeout::Immediate).unwrap();
        assert_eq!(grant.release(2), 2);
        assert_eq!(ring.get_info().items_waiting, 4);

        // dropping puts the bytes back
        drop(ring.receive(Timeout::Immediate).unwrap());
        let grant = ring.receive(Timeout::Immediate).unwrap();
        assert_eq!(&*grant, b"cdef");
    }

    #[test]
    fn test_info_tracks_cursors() {
        let mut storage = [0u8; 8];
        let ring = RingBuffer::create(&mut storage).unwrap();
        ring.send(b"abcde", Timeout::Immediate).unwrap();
        let grant = ring.receive_upto(Timeout::Immediate, 3).unwrap();

        let info = ring.get_info();
        assert_eq!(info.free, 0);
        assert_eq!(info.read, 3);
        assert_eq!(info.write, 5);
        assert_eq!(info.acquire, 5);
        assert_eq!(info.items_waiting, 2);
        grant.return_item();
        assert_eq!(ring.get_info().free, 3);
        assert_eq!(ring.contiguous_free_size(), 3);
    }

    #[test]
    fn test_blocked_writer_resumes_after_return() {
        let mut storage = [0u8; 4];
        let ring = RingBuffer::create(&mut storage).unwrap();
        ring.send(b"abcd", Timeout::Immediate).unwrap();

        thread::scope(|s| {
            let writer = s.spawn(|| ring.send(b"ef", Timeout::Forever));
            thread::sleep(Duration::from_millis(20));
            ring.receive_upto(Timeout::Immediate, 2).unwrap().return_item();
            writer.join().unwrap().unwrap();
        });

        let mut out = Vec::new();
        while let Some(grant) = ring.receive(Timeout::Immediate) {
            out.extend_from_slice(&grant);
            grant.return_item();
        }
        assert_eq!(out, b"cdef");
    }

    #[test]
    fn test_blocked_reader_wakes_on_send() {
        let mut storage = [0u8; 4];
        let ring = RingBuffer::create(&mut storage).unwrap();

        thread::scope(|s| {
            let reader = s.spawn(|| {
                let grant = ring.receive(Timeout::After(Duration::from_secs(5)))?;
                let bytes = grant.to_vec();
                grant.return_item();
                Some(bytes)
            });
            thread::sleep(Duration::from_millis(20));
            ring.send(b"hi", Timeout::Immediate).unwrap();
            assert_eq!(reader.join().unwrap().unwrap(), b"hi");
        });
    }

    #[test]
    fn test_delete_returns_storage() {
        let mut storage = [0u8; 4];
        let ring = RingBuffer::create(&mut storage).unwrap();
        ring.send(b"ab", Timeout::Immediate).unwrap();
        let storage = ring.delete();
        assert_eq!(&storage[..2], b"ab");
    }

    proptest! {
        #[test]
        fn prop_fifo_and_conservation(
            capacity in 1usize..24,
            chunks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..12), 1..40),
            reads in proptest::collection::vec(0usize..12, 1..40),
        ) {
            let mut storage = vec![0u8; capacity];
            let ring = RingBuffer::create(&mut storage).unwrap();
            let mut expected = std::collections::VecDeque::new();
            let mut sent = 0usize;
            let mut released = 0usize;
            let mut reads = reads.into_iter().cycle();

            for chunk in &chunks {
                match ring.send(chunk, Timeout::Immediate) {
                    Ok(()) => {
                        expected.extend(chunk.iter().copied());
                        sent += chunk.len();
                    }
                    Err(RingBufferError::Oversize { .. }) => prop_assert!(chunk.len() > capacity),
                    Err(RingBufferError::Timeout) => prop_assert!(chunk.len() > ring.get_cur_free_size()),
                    Err(e) => prop_assert!(false, "unexpected error {e}"),
                }

                let max = reads.next().unwrap_or(0);
                let grant = if max == 0 {
                    ring.receive(Timeout::Immediate)
                } else {
                    ring.receive_upto(Timeout::Immediate, max)
                };
                if let Some(grant) = grant {
                    for byte in grant.iter() {
                        prop_assert_eq!(Some(*byte), expected.pop_front());
                    }
                    released += grant.len();
                    grant.return_item();
                }

                let info = ring.get_info();
                prop_assert_eq!(capacity - ring.get_cur_free_size(), sent - released);
                prop_assert_eq!(info.items_waiting, sent - released);
                prop_assert!(info.items_waiting <= capacity);
            }
        }
    }
}
