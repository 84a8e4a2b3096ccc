//! A fixed-capacity map from 16-bit sequence numbers to entries, backed by a ring of
//!  `capacity` slots. Each slot carries a 32-bit occupancy tag that is either the sequence
//!  number currently stored in it or the sentinel [`EMPTY_SLOT`], so a slot left behind by
//!  a dropped packet can never be mistaken for a live entry after the sequence space wraps
//!  into it again.

use crate::sequence::{seq_gt, seq_lt};

pub const EMPTY_SLOT: u32 = u32::MAX;

pub struct SequenceBuffer<T> {
    /// exclusive upper bound of all sequence numbers ever inserted
    latest: u16,
    tags: Vec<u32>,
    entries: Vec<T>,
}

impl<T: Default> SequenceBuffer<T> {
    pub fn new(capacity: u16) -> SequenceBuffer<T> {
        assert!(capacity >= 1 && capacity <= 32767,
                "capacity must be in 1..=32767 to keep outdated and future sequence numbers apart");

        let mut entries = Vec::new();
        entries.resize_with(capacity as usize, T::default);

        SequenceBuffer {
            latest: 0,
            tags: vec![EMPTY_SLOT; capacity as usize],
            entries,
        }
    }

    pub fn capacity(&self) -> u16 {
        self.tags.len() as u16
    }

    pub fn latest(&self) -> u16 {
        self.latest
    }

    fn index_of(&self, seq: u16) -> usize {
        (seq % self.capacity()) as usize
    }

    /// a sequence number is outdated once `latest` has moved more than a full buffer
    ///  capacity past it
    pub fn is_outdated(&self, seq: u16) -> bool {
        seq_lt(seq, self.latest.wrapping_sub(self.capacity()))
    }

    /// Claims the slot for `seq` and returns it for the caller to initialize, or `None` if
    ///  `seq` is outdated. Inserting beyond `latest` invalidates all slots for the skipped
    ///  sequence numbers first, so holes left by dropped packets do not resurface as stale
    ///  entries.
    pub fn insert(&mut self, seq: u16) -> Option<&mut T> {
        if self.is_outdated(seq) {
            return None;
        }

        if seq_gt(seq.wrapping_add(1), self.latest) {
            self.remove_range(self.latest, seq);
            self.latest = seq.wrapping_add(1);
        }

        let i = self.index_of(seq);
        self.tags[i] = seq as u32;
        Some(&mut self.entries[i])
    }

    pub fn find(&self, seq: u16) -> Option<&T> {
        let i = self.index_of(seq);
        if self.tags[i] == seq as u32 {
            Some(&self.entries[i])
        }
        else {
            None
        }
    }

    pub fn find_mut(&mut self, seq: u16) -> Option<&mut T> {
        let i = self.index_of(seq);
        if self.tags[i] == seq as u32 {
            Some(&mut self.entries[i])
        }
        else {
            None
        }
    }

    /// clears the slot for `seq` unconditionally
    pub fn remove(&mut self, seq: u16) {
        let i = self.index_of(seq);
        self.tags[i] = EMPTY_SLOT;
    }

    /// Clears the slots of all sequence numbers in the cyclic half-open range
    ///  `[start, end)`. The range maps to one or two contiguous tag ranges; a range
    ///  spanning at least `capacity` sequence numbers clears every slot.
    pub fn remove_range(&mut self, start: u16, end: u16) {
        let span = end.wrapping_sub(start) as usize;
        if span >= self.tags.len() {
            self.tags.fill(EMPTY_SLOT);
            return;
        }

        let s = self.index_of(start);
        let e = self.index_of(end);

        if e < s {
            self.tags[s..].fill(EMPTY_SLOT);
            self.tags[..e].fill(EMPTY_SLOT);
        }
        else {
            self.tags[s..e].fill(EMPTY_SLOT);
        }
    }

    pub fn reset(&mut self) {
        self.latest = 0;
        self.tags.fill(EMPTY_SLOT);
    }

    /// Snapshot of the acknowledgement state for the next outgoing packet header: the most
    ///  recently inserted sequence number, and a bitset whose bit `k` is set iff the buffer
    ///  holds an entry for `ack - k`.
    pub fn next_ack(&self) -> (u16, u32) {
        let ack = self.latest.wrapping_sub(1);

        let mut acks = 0u32;
        for k in 0..32u16 {
            let seq = ack.wrapping_sub(k);
            if self.tags[self.index_of(seq)] == seq as u32 {
                acks |= 1 << k;
            }
        }

        (ack, acks)
    }

    #[cfg(test)]
    pub(crate) fn tag(&self, slot: usize) -> u32 {
        self.tags[slot]
    }
}
