//! Indexed binary min-heap
//!
//! Items are dense `u32` ids (grid cell indices in practice). A parallel
//! position table maps each id to its slot so a score can be lowered in
//! O(log n) without scanning. `clear` only touches slots that are in use,
//! so reusing one heap across many searches stays cheap.

const NOT_IN_HEAP: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
struct Entry {
    item: u32,
    score: u64,
}

#[derive(Debug, Default)]
pub struct IndexedHeap {
    data: Vec<Entry>,
    positions: Vec<u32>,
}

impl IndexedHeap {
    /// Heap able to hold ids in `0..capacity`
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity.min(1 << 16)),
            positions: vec![NOT_IN_HEAP; capacity],
        }
    }

    /// Grow the id range; existing entries are kept
    pub fn ensure_capacity(&mut self, capacity: usize) {
        if self.positions.len() < capacity {
            self.positions.resize(capacity, NOT_IN_HEAP);
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn contains(&self, item: u32) -> bool {
        self.positions
            .get(item as usize)
            .is_some_and(|&pos| pos != NOT_IN_HEAP)
    }

    pub fn score_of(&self, item: u32) -> Option<u64> {
        let pos = *self.positions.get(item as usize)?;
        (pos != NOT_IN_HEAP).then(|| self.data[pos as usize].score)
    }

    pub fn peek(&self) -> Option<(u32, u64)> {
        self.data.first().map(|e| (e.item, e.score))
    }

    /// Insert an item, or lower its score if it is already queued
    ///
    /// Ids outside the capacity grow the position table.
    pub fn push(&mut self, item: u32, score: u64) {
        if self.contains(item) {
            self.decrease_score(item, score);
            return;
        }
        self.ensure_capacity(item as usize + 1);

        let slot = self.data.len();
        self.data.push(Entry { item, score });
        self.positions[item as usize] = slot as u32;
        self.sift_up(slot);
    }

    /// Remove and return the entry with the lowest score
    pub fn pop(&mut self) -> Option<(u32, u64)> {
        if self.data.is_empty() {
            return None;
        }
        let last = self.data.len() - 1;
        self.swap(0, last);
        let top = self.data.pop()?;
        self.positions[top.item as usize] = NOT_IN_HEAP;
        if !self.data.is_empty() {
            self.sift_down(0);
        }
        Some((top.item, top.score))
    }

    /// Lower an item's score; returns false if absent or the score is not lower
    pub fn decrease_score(&mut self, item: u32, score: u64) -> bool {
        let Some(&pos) = self.positions.get(item as usize) else {
            return false;
        };
        if pos == NOT_IN_HEAP || self.data[pos as usize].score <= score {
            return false;
        }
        self.data[pos as usize].score = score;
        self.sift_up(pos as usize);
        true
    }

    pub fn clear(&mut self) {
        for entry in self.data.drain(..) {
            self.positions[entry.item as usize] = NOT_IN_HEAP;
        }
    }

    #[inline]
    fn swap(&mut self, a: usize, b: usize) {
        self.data.swap(a, b);
        self.positions[self.data[a].item as usize] = a as u32;
        self.positions[self.data[b].item as usize] = b as u32;
    }

    fn sift_up(&mut self, mut slot: usize) {
        while slot > 0 {
            let parent = (slot - 1) / 2;
            if self.data[parent].score <= self.data[slot].score {
                break;
            }
            self.swap(parent, slot);
            slot = parent;
        }
    }

    fn sift_down(&mut self, mut slot: usize) {
        let len = self.data.len();
        loop {
            let left = slot * 2 + 1;
            let right = left + 1;
            let mut smallest = slot;
            if left < len && self.data[left].score < self.data[smallest].score {
                smallest = left;
            }
            if right < len && self.data[right].score < self.data[smallest].score {
                smallest = right;
            }
            if smallest == slot {
                break;
            }
            self.swap(slot, smallest);
            slot = smallest;
        }
    }

    #[cfg(test)]
    fn check_positions(&self) {
        for (slot, entry) in self.data.iter().enumerate() {
            assert_eq!(self.positions[entry.item as usize], slot as u32);
        }
        let queued = self.positions.iter().filter(|&&p| p != NOT_IN_HEAP).count();
        assert_eq!(queued, self.data.len());
    }
}
