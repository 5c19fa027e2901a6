//! Fixed-capacity single-producer/single-consumer ring of chunks, built on
//! `ringbuf`.
//!
//! The writer half lives on the decode thread and only ever pushes whole
//! items. The reader half lives on the output thread; besides consuming
//! items in FIFO order it may inspect and edit any buffered item in place,
//! and it can roll the read cursor back after a cancelled flush.

use std::sync::Arc;

use ringbuf::traits::{Consumer as _, Observer as _, Producer as _, Split as _};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Create a ring holding up to `capacity` items and split it into a
/// monitor plus its writer and reader halves
pub fn split<T>(capacity: usize) -> (RingMonitor<T>, RingWriter<T>, RingReader<T>) {
    assert!(capacity > 0, "ring capacity must be non-zero");
    let ring = Arc::new(HeapRb::<T>::new(capacity));
    let (producer, consumer) = Arc::clone(&ring).split();
    (
        RingMonitor { ring },
        RingWriter { inner: producer },
        RingReader { inner: consumer },
    )
}

/// Read-only view of a ring's fill level, usable from any thread
pub struct RingMonitor<T> {
    ring: Arc<HeapRb<T>>,
}

impl<T> RingMonitor<T> {
    pub fn capacity(&self) -> usize {
        self.ring.capacity().get()
    }

    /// Items pushed and not yet consumed
    pub fn occupied(&self) -> usize {
        self.ring.occupied_len()
    }

    pub fn free(&self) -> usize {
        self.ring.vacant_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.ring.is_full()
    }
}

impl<T> std::fmt::Debug for RingMonitor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingMonitor")
            .field("capacity", &self.capacity())
            .field("occupied", &self.occupied())
            .finish()
    }
}

/// Cursor positions, used to snapshot and restore the reader side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingCursors {
    pub read: usize,
    pub write: usize,
}

/// Producer half
pub struct RingWriter<T> {
    inner: HeapProd<T>,
}

impl<T> RingWriter<T> {
    pub fn write_space(&self) -> usize {
        self.inner.vacant_len()
    }

    /// Publish `item` to the reader, handing it back when the ring is full
    pub fn push(&mut self, item: T) -> Result<(), T> {
        self.inner.try_push(item)
    }
}

/// Consumer half
pub struct RingReader<T> {
    inner: HeapCons<T>,
}

impl<T> RingReader<T> {
    pub fn read_space(&self) -> usize {
        self.inner.occupied_len()
    }

    /// The buffered item `offset` places after the read cursor
    pub fn read_peek(&self, offset: usize) -> Option<&T> {
        let (head, tail) = self.inner.as_slices();
        match head.get(offset) {
            Some(item) => Some(item),
            None => tail.get(offset - head.len()),
        }
    }

    pub fn read_peek_mut(&mut self, offset: usize) -> Option<&mut T> {
        let (head, tail) = self.inner.as_mut_slices();
        if offset < head.len() {
            head.get_mut(offset)
        } else {
            tail.get_mut(offset - head.len())
        }
    }

    /// Two distinct buffered items at once
    pub fn read_pair_mut(&mut self, a: usize, b: usize) -> Option<(&mut T, &mut T)> {
        if a == b {
            return None;
        }
        let (head, tail) = self.inner.as_mut_slices();
        let mut first = None;
        let mut second = None;
        for (index, item) in head.iter_mut().chain(tail.iter_mut()).enumerate().take(a.max(b) + 1) {
            if index == a {
                first = Some(item);
            } else if index == b {
                second = Some(item);
            }
        }
        first.zip(second)
    }

    /// Buffered items in FIFO order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let (head, tail) = self.inner.as_slices();
        head.iter().chain(tail.iter())
    }

    /// Consume `count` items from the front
    pub fn read_advance(&mut self, count: usize) {
        assert!(count <= self.read_space(), "read_advance past buffered data");
        self.inner.skip(count);
    }

    /// Consume everything buffered so far, returning how many items were skipped
    pub fn clear(&mut self) -> usize {
        self.inner.clear()
    }

    pub fn snapshot(&self) -> RingCursors {
        RingCursors {
            read: self.inner.read_index(),
            write: self.inner.write_index(),
        }
    }
}

impl<T: Copy> RingReader<T> {
    /// Move the read cursor back to a previous snapshot.
    ///
    /// Returns `false` (and changes nothing) if the writer has pushed
    /// anything since the snapshot was taken. Consuming a `Copy` item leaves
    /// its slot untouched, so the restored items are exactly the ones that
    /// were buffered at snapshot time.
    ///
    /// # Safety
    /// The writer must not push concurrently: rewinding hands slots the
    /// writer considers free back to the reader.
    pub unsafe fn rewind(&mut self, snapshot: RingCursors) -> bool {
        if self.inner.write_index() != snapshot.write {
            return false;
        }
        self.inner.set_read_index(snapshot.read);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_ring_creation() {
        let (monitor, writer, reader) = split::<u32>(8);
        assert_eq!(monitor.capacity(), 8);
        assert!(monitor.is_empty());
        assert_eq!(writer.write_space(), 8);
        assert_eq!(reader.read_space(), 0);
        assert!(reader.read_peek(0).is_none());
    }

    #[test]
    fn test_pushed_items_are_visible_in_order() {
        let (monitor, mut writer, reader) = split(4);
        writer.push(7u32).unwrap();
        writer.push(8).unwrap();

        assert_eq!(monitor.occupied(), 2);
        assert_eq!(reader.read_peek(0), Some(&7));
        assert_eq!(reader.read_peek(1), Some(&8));
        assert!(reader.read_peek(2).is_none());
        assert_eq!(reader.iter().copied().collect::<Vec<_>>(), vec![7, 8]);
    }

    #[test]
    fn test_full_ring_hands_item_back() {
        let (monitor, mut writer, mut reader) = split(3);
        for value in 0..3u8 {
            writer.push(value).unwrap();
        }
        assert!(monitor.is_full());
        assert_eq!(writer.push(9), Err(9));

        reader.read_advance(1);
        assert_eq!(writer.write_space(), 1);
        writer.push(9).unwrap();
        assert_eq!(reader.iter().copied().collect::<Vec<_>>(), vec![1, 2, 9]);
    }

    #[test]
    fn test_wraparound_keeps_offsets() {
        let (_monitor, mut writer, mut reader) = split(4);
        for value in 0..3u32 {
            writer.push(value).unwrap();
        }
        reader.read_advance(3);

        for value in 10..14u32 {
            writer.push(value).unwrap();
        }
        let values: Vec<u32> = (0..4).filter_map(|i| reader.read_peek(i).copied()).collect();
        assert_eq!(values, vec![10, 11, 12, 13]);

        *reader.read_peek_mut(3).unwrap() += 100;
        assert_eq!(reader.read_peek(3), Some(&113));
    }

    #[test]
    fn test_pair_access_requires_distinct_buffered_items() {
        let (_monitor, mut writer, mut reader) = split(4);
        writer.push(0u32).unwrap();
        writer.push(0).unwrap();

        assert!(reader.read_pair_mut(0, 0).is_none());
        assert!(reader.read_pair_mut(0, 2).is_none());

        let (a, b) = reader.read_pair_mut(0, 1).unwrap();
        *a = 1;
        *b = 2;
        assert_eq!(reader.read_peek(0), Some(&1));
        assert_eq!(reader.read_peek(1), Some(&2));

        let (b, a) = reader.read_pair_mut(1, 0).unwrap();
        assert_eq!((*a, *b), (1, 2));
    }

    #[test]
    fn test_clear_and_rewind() {
        let (monitor, mut writer, mut reader) = split(8);
        for value in 0..5u32 {
            writer.push(value).unwrap();
        }
        reader.read_advance(1);

        let snapshot = reader.snapshot();
        assert_eq!(reader.clear(), 4);
        assert!(monitor.is_empty());

        assert!(unsafe { reader.rewind(snapshot) });
        assert_eq!(reader.snapshot(), snapshot);
        assert_eq!(reader.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_rewind_refused_after_new_writes() {
        let (_monitor, mut writer, mut reader) = split(8);
        writer.push(1u32).unwrap();
        writer.push(2).unwrap();
        let snapshot = reader.snapshot();
        reader.clear();
        writer.push(3).unwrap();

        assert!(!unsafe { reader.rewind(snapshot) });
        assert_eq!(reader.iter().copied().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_fifo_across_threads() {
        let (_monitor, mut writer, mut reader) = split(16);
        let total = 10_000u64;

        let producer = thread::spawn(move || {
            let mut next = 0u64;
            while next < total {
                match writer.push(next) {
                    Ok(()) => next += 1,
                    Err(_) => thread::yield_now(),
                }
            }
        });

        let mut expected = 0u64;
        while expected < total {
            match reader.read_peek(0).copied() {
                Some(value) => {
                    assert_eq!(value, expected);
                    reader.read_advance(1);
                    expected += 1;
                }
                None => thread::yield_now(),
            }
        }

        producer.join().unwrap();
    }
}
