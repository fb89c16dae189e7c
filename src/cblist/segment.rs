//! Segmented callback list
//!
//! One queue split into four consecutive segments:
//!
//! ```text
//! | DONE | WAIT | NEXT_READY | NEXT |
//! ```
//!
//! DONE holds callbacks whose grace period has ended. WAIT and NEXT_READY
//! hold callbacks waiting for the grace period stamped on the segment. NEXT
//! holds callbacks not yet assigned a grace period. Segment `i` occupies
//! `list[tails[i - 1]..tails[i]]`, so moving a boundary is O(1).

use std::collections::VecDeque;

use crate::seq::{cmp_lt, INITIAL_SEQ};

/// Callbacks ready to invoke
pub const DONE: usize = 0;
/// Callbacks waiting for the current grace period
pub const WAIT: usize = 1;
/// Callbacks waiting for a later grace period
pub const NEXT_READY: usize = 2;
/// Callbacks with no grace period assigned
pub const NEXT: usize = 3;
/// Number of segments
pub const NSEGS: usize = 4;

/// Segmented list of pending items
#[derive(Debug)]
pub struct SegCbList<T> {
    list: VecDeque<T>,
    /// End index (exclusive) of each segment
    tails: [usize; NSEGS],
    /// Grace period each WAIT/NEXT_READY segment is waiting for
    gp_seq: [u64; NSEGS],
}

impl<T> Default for SegCbList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SegCbList<T> {
    /// Create an empty list
    pub fn new() -> Self {
        Self {
            list: VecDeque::new(),
            tails: [0; NSEGS],
            gp_seq: [INITIAL_SEQ; NSEGS],
        }
    }

    /// Total number of items
    #[inline]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Whether the list holds nothing
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Number of items in segment `seg`
    pub fn seg_len(&self, seg: usize) -> usize {
        let start = if seg == DONE { 0 } else { self.tails[seg - 1] };
        self.tails[seg] - start
    }

    /// Whether segment `seg` is empty
    #[inline]
    pub fn seg_empty(&self, seg: usize) -> bool {
        self.seg_len(seg) == 0
    }

    /// Whether every segment after `seg` is empty
    #[inline]
    pub fn rest_empty(&self, seg: usize) -> bool {
        self.tails[seg] == self.tails[NEXT]
    }

    /// Whether DONE holds anything
    #[inline]
    pub fn ready(&self) -> bool {
        self.tails[DONE] > 0
    }

    /// Items not yet in DONE
    #[inline]
    pub fn pending(&self) -> usize {
        self.list.len() - self.tails[DONE]
    }

    /// Whether any item has no grace period assigned yet
    #[inline]
    pub fn has_unassigned(&self) -> bool {
        !self.seg_empty(NEXT)
    }

    /// Grace period stamped on segment `seg`
    pub fn seg_gp_seq(&self, seg: usize) -> u64 {
        self.gp_seq[seg]
    }

    /// Earliest grace period any pending item waits for, if any is assigned
    pub fn next_gp(&self) -> Option<u64> {
        (WAIT..NEXT)
            .find(|&seg| !self.seg_empty(seg))
            .map(|seg| self.gp_seq[seg])
    }

    /// Append an item to NEXT
    pub fn enqueue(&mut self, item: T) {
        self.list.push_back(item);
        self.tails[NEXT] += 1;
    }

    /// Append an item after every existing item, in the last non-empty
    /// segment so it completes no earlier than any of them.
    ///
    /// Hands the item back when the list is empty.
    pub fn entrain(&mut self, item: T) -> Result<(), T> {
        if self.list.is_empty() {
            return Err(item);
        }
        let mut seg = NEXT;
        while seg > DONE && self.seg_empty(seg) {
            seg -= 1;
        }
        self.list.push_back(item);
        for tail in &mut self.tails[seg..] {
            *tail += 1;
        }
        Ok(())
    }

    /// Move every segment whose grace period is complete at `completed` into
    /// DONE, then close the gaps this leaves.
    pub fn advance(&mut self, completed: u64) {
        if self.rest_empty(DONE) {
            return;
        }
        let mut i = WAIT;
        while i < NEXT {
            if cmp_lt(completed, self.gp_seq[i]) {
                break;
            }
            self.tails[DONE] = self.tails[i];
            i += 1;
        }
        if i == WAIT {
            return;
        }
        for j in WAIT..i {
            self.tails[j] = self.tails[DONE];
        }
        // Slide later segments down over the emptied ones.
        let mut j = WAIT;
        while i < NEXT {
            if self.tails[j] == self.tails[NEXT] {
                break;
            }
            self.tails[j] = self.tails[i];
            self.gp_seq[j] = self.gp_seq[i];
            i += 1;
            j += 1;
        }
    }

    /// Assign grace period `seq` to every item in NEXT, merging into any
    /// segment already waiting for `seq` or later.
    ///
    /// Returns true when items were newly assigned, in which case the caller
    /// must make sure `seq` is requested.
    pub fn accelerate(&mut self, seq: u64) -> bool {
        if self.rest_empty(DONE) {
            return false;
        }
        let mut i = NEXT_READY;
        while i > DONE {
            if !self.seg_empty(i) && cmp_lt(self.gp_seq[i], seq) {
                break;
            }
            i -= 1;
        }
        // Segment i waits for an earlier grace period: start after it.
        if self.rest_empty(i) {
            return false;
        }
        i += 1;
        if i >= NEXT {
            return false;
        }
        let changed =
            self.has_unassigned() || (i..NEXT).any(|seg| !self.seg_empty(seg) && self.gp_seq[seg] != seq);
        for seg in i..NEXT {
            self.tails[seg] = self.tails[NEXT];
            self.gp_seq[seg] = seq;
        }
        changed
    }

    /// Remove up to `limit` items from the front of DONE
    pub fn extract_done(&mut self, limit: usize) -> Vec<T> {
        let n = self.tails[DONE].min(limit);
        for tail in &mut self.tails {
            *tail -= n;
        }
        self.list.drain(..n).collect()
    }

    /// Remove every item, returning (done, pending) in order
    pub fn take_all(&mut self) -> (Vec<T>, Vec<T>) {
        let done_len = self.tails[DONE];
        self.tails = [0; NSEGS];
        let mut all: Vec<T> = self.list.drain(..).collect();
        let pending = all.split_off(done_len);
        (all, pending)
    }

    /// Move all of `other` into this list: its DONE items join the end of
    /// DONE, everything else joins NEXT to be re-assigned by the next
    /// acceleration.
    pub fn merge(&mut self, other: &mut SegCbList<T>) {
        let (done, pending) = other.take_all();
        if !done.is_empty() {
            let n = done.len();
            let at = self.tails[DONE];
            // Rotate the new items into place right after the existing DONE items.
            let tail: Vec<T> = self.list.drain(at..).collect();
            self.list.extend(done);
            self.list.extend(tail);
            for t in &mut self.tails {
                *t += n;
            }
        }
        for item in pending {
            self.enqueue(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seq::{seq_end_val, seq_snap, seq_start_val};

    fn items<T: Copy>(list: &SegCbList<T>) -> Vec<T> {
        list.list.iter().copied().collect()
    }

    #[test]
    fn test_enqueue_lands_in_next() {
        let mut list = SegCbList::new();
        list.enqueue(1);
        list.enqueue(2);
        assert_eq!(list.len(), 2);
        assert_eq!(list.seg_len(NEXT), 2);
        assert!(!list.ready());
        assert!(list.has_unassigned());
        assert_eq!(list.next_gp(), None);
    }

    #[test]
    fn test_accelerate_then_advance() {
        let s0 = INITIAL_SEQ;
        let target = seq_snap(s0);
        let mut list = SegCbList::new();
        list.enqueue(1);
        list.enqueue(2);
        assert!(list.accelerate(target));
        assert_eq!(list.seg_len(WAIT), 2);
        assert_eq!(list.next_gp(), Some(target));
        // Same target again: nothing new to assign.
        assert!(!list.accelerate(target));

        // Not yet complete: grace period started but not ended.
        list.advance(seq_start_val(s0));
        assert!(!list.ready());

        list.advance(seq_end_val(seq_start_val(s0)));
        assert_eq!(list.seg_len(DONE), 2);
        assert!(list.rest_empty(DONE));
        assert_eq!(list.extract_done(10), vec![1, 2]);
        assert!(list.is_empty());
    }

    #[test]
    fn test_accelerate_keeps_earlier_segment() {
        let g1 = seq_snap(INITIAL_SEQ);
        let g2 = g1.wrapping_add(4);
        let mut list = SegCbList::new();
        list.enqueue(1);
        list.accelerate(g1);
        list.enqueue(2);
        assert!(list.accelerate(g2));
        assert_eq!(list.seg_len(WAIT), 1);
        assert_eq!(list.seg_len(NEXT_READY), 1);
        assert_eq!(list.seg_gp_seq(NEXT_READY), g2);

        // g1 done: item 1 moves to DONE, item 2 slides into WAIT.
        list.advance(g1);
        assert_eq!(list.seg_len(DONE), 1);
        assert_eq!(list.seg_len(WAIT), 1);
        assert_eq!(list.seg_gp_seq(WAIT), g2);
        assert!(list.seg_empty(NEXT_READY));

        // A later request for g2 merges into WAIT rather than a new segment.
        list.enqueue(3);
        assert!(list.accelerate(g2));
        assert_eq!(list.seg_len(WAIT), 2);
        list.advance(g2);
        assert_eq!(list.extract_done(usize::MAX), vec![1, 2, 3]);
    }

    #[test]
    fn test_advance_across_wrap() {
        let near_wrap = u64::MAX - 3;
        let target = seq_snap(near_wrap);
        assert!(target < near_wrap);
        let mut list = SegCbList::new();
        list.enqueue(7);
        list.accelerate(target);
        list.advance(near_wrap);
        assert!(!list.ready());
        list.advance(target);
        assert!(list.ready());
    }

    #[test]
    fn test_extract_done_respects_limit() {
        let g = seq_snap(INITIAL_SEQ);
        let mut list = SegCbList::new();
        for i in 0..5 {
            list.enqueue(i);
        }
        list.accelerate(g);
        list.advance(g);
        list.enqueue(9);
        assert_eq!(list.extract_done(2), vec![0, 1]);
        assert_eq!(list.seg_len(DONE), 3);
        assert_eq!(list.seg_len(NEXT), 1);
        assert_eq!(list.extract_done(10), vec![2, 3, 4]);
        assert_eq!(items(&list), vec![9]);
    }

    #[test]
    fn test_entrain_goes_last() {
        let g = seq_snap(INITIAL_SEQ);
        let mut list = SegCbList::new();
        assert_eq!(list.entrain(0), Err(0));

        list.enqueue(1);
        list.accelerate(g);
        assert!(list.entrain(2).is_ok());
        // Joined WAIT, the last non-empty segment.
        assert_eq!(list.seg_len(WAIT), 2);
        assert!(list.seg_empty(NEXT));

        list.enqueue(3);
        assert!(list.entrain(4).is_ok());
        assert_eq!(list.seg_len(NEXT), 2);
        assert_eq!(items(&list), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_merge_preserves_done_order() {
        let g = seq_snap(INITIAL_SEQ);
        let mut dst = SegCbList::new();
        dst.enqueue(1);
        dst.accelerate(g);
        dst.advance(g);
        dst.enqueue(2);
        dst.accelerate(g.wrapping_add(4));

        let mut src = SegCbList::new();
        src.enqueue(10);
        src.accelerate(g);
        src.advance(g);
        src.enqueue(11);

        dst.merge(&mut src);
        assert!(src.is_empty());
        assert_eq!(dst.seg_len(DONE), 2);
        assert_eq!(dst.seg_len(WAIT), 1);
        assert_eq!(dst.seg_len(NEXT), 1);
        assert_eq!(items(&dst), vec![1, 10, 2, 11]);
    }
}
