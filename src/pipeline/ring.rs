//! Bounded ring buffer
//!
//! Fixed-capacity circular buffer doing index math only. Both queue types of
//! the pipeline (`PacketQueue`, `FrameQueue`) are built on top of this.
//!
//! # Design
//!
//! The capacity `N` is a compile-time power of two. Read and write cursors
//! increase monotonically and are only ever masked with `N - 1` for slot
//! indexing, never wrapped or compared to each other: the live `len` count is
//! authoritative for full/empty, which stays unambiguous when `len == 0` and
//! `len == N` would map to equal cursor indices.
//!
//! # Thread Safety
//!
//! None. This type performs no locking; callers hold an external lock around
//! every call. All operations are O(1) and allocation-free.

/// Fixed-capacity circular buffer over `N` pre-constructed slots.
pub struct Ring<T, const N: usize> {
    slots: [T; N],
    rd: usize,
    wr: usize,
    len: usize,
}

impl<T, const N: usize> Ring<T, N> {
    const MASK: usize = N - 1;

    /// Create a ring with every slot initialized by `init`.
    pub fn new<F>(mut init: F) -> Self
    where
        F: FnMut() -> T,
    {
        const {
            assert!(N.is_power_of_two(), "ring capacity must be a power of two");
        }
        Self {
            slots: std::array::from_fn(|_| init()),
            rd: 0,
            wr: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        N
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == N
    }

    /// Slot the next write will land in, or `None` when full.
    ///
    /// The caller fills the slot in place and then calls [`commit_write`]
    /// to publish it.
    ///
    /// [`commit_write`]: Ring::commit_write
    pub fn peek_write(&mut self) -> Option<&mut T> {
        if self.is_full() {
            None
        } else {
            Some(&mut self.slots[self.wr & Self::MASK])
        }
    }

    /// Publish the slot previously returned by [`peek_write`].
    ///
    /// [`peek_write`]: Ring::peek_write
    pub fn commit_write(&mut self) {
        debug_assert!(self.len < N);
        self.wr = self.wr.wrapping_add(1);
        self.len += 1;
    }

    /// Slot at the read cursor, or `None` when empty.
    pub fn peek_read(&self) -> Option<&T> {
        self.peek_read_at(0)
    }

    /// Lookahead at `offset` slots past the read cursor without consuming.
    pub fn peek_read_at(&self, offset: usize) -> Option<&T> {
        if offset >= self.len {
            None
        } else {
            Some(&self.slots[self.rd.wrapping_add(offset) & Self::MASK])
        }
    }

    /// Consume the slot previously returned by [`peek_read`].
    ///
    /// [`peek_read`]: Ring::peek_read
    pub fn commit_read(&mut self) {
        debug_assert!(self.len > 0);
        self.rd = self.rd.wrapping_add(1);
        self.len -= 1;
    }
}

impl<T: Default, const N: usize> Ring<T, N> {
    /// Value-transfer insert. Returns the rejected value when full.
    pub fn put(&mut self, value: T) -> Result<(), T> {
        if self.is_full() {
            return Err(value);
        }
        self.slots[self.wr & Self::MASK] = value;
        self.commit_write();
        Ok(())
    }

    /// Value-transfer remove, leaving a default value in the slot.
    pub fn get(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let value = std::mem::take(&mut self.slots[self.rd & Self::MASK]);
        self.commit_read();
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut ring: Ring<u32, 8> = Ring::new(u32::default);
        for i in 0..5 {
            ring.put(i).unwrap();
        }
        for i in 0..5 {
            assert_eq!(ring.get(), Some(i));
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn test_fill_drain_refill_reuses_slots() {
        let mut ring: Ring<u32, 4> = Ring::new(u32::default);
        for i in 0..4 {
            ring.put(i).unwrap();
        }
        assert!(ring.is_full());
        for i in 0..4 {
            assert_eq!(ring.get(), Some(i));
        }
        // Second cycle with different values must not see stale slots.
        for i in 10..14 {
            ring.put(i).unwrap();
        }
        assert_eq!(ring.get(), Some(10));
        assert_eq!(ring.get(), Some(11));
        assert_eq!(ring.get(), Some(12));
        assert_eq!(ring.get(), Some(13));
        assert_eq!(ring.get(), None);
    }

    #[test]
    fn test_capacity_enforced_without_corruption() {
        let mut ring: Ring<u32, 4> = Ring::new(u32::default);
        for i in 0..4 {
            ring.put(i).unwrap();
        }
        assert_eq!(ring.put(99), Err(99));
        assert_eq!(ring.len(), 4);
        assert!(ring.peek_write().is_none());
        for i in 0..4 {
            assert_eq!(ring.get(), Some(i));
        }
    }

    #[test]
    fn test_lookahead_does_not_consume() {
        let mut ring: Ring<u32, 8> = Ring::new(u32::default);
        ring.put(1).unwrap();
        ring.put(2).unwrap();
        assert_eq!(ring.peek_read(), Some(&1));
        assert_eq!(ring.peek_read_at(1), Some(&2));
        assert_eq!(ring.peek_read_at(2), None);
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.get(), Some(1));
    }

    #[test]
    fn test_cursors_survive_many_wraps() {
        let mut ring: Ring<u64, 4> = Ring::new(u64::default);
        for i in 0..1000u64 {
            ring.put(i).unwrap();
            assert_eq!(ring.get(), Some(i));
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn test_in_place_write_and_read() {
        let mut ring: Ring<Vec<u8>, 4> = Ring::new(Vec::new);
        {
            let slot = ring.peek_write().unwrap();
            slot.clear();
            slot.extend_from_slice(&[7, 8, 9]);
        }
        ring.commit_write();
        assert_eq!(ring.peek_read().map(Vec::as_slice), Some(&[7, 8, 9][..]));
        ring.commit_read();
        assert!(ring.is_empty());
    }
}
