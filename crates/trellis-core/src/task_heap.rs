//! Min-heap of scheduled tasks with O(1) access to the most urgent task and
//! O(log N) removal by handle.
//!
//! Tasks are ordered by expiration time, then by insertion sequence so tasks
//! that expire together run in the order they were scheduled. Cancelling a
//! task removes it through the slot handle returned by [`TaskHeap::push`],
//! so the scheduler never has to search the heap.

/// Ordering key of a queued task.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct TaskKey {
    pub expiration: u64,
    pub sequence: u64,
}

#[derive(Debug, Default)]
pub(crate) struct TaskHeap {
    /// Heap-ordered keys. Invariant: `keys[i] <= keys[2i+1]` and `keys[i] <= keys[2i+2]`.
    keys: Vec<TaskKey>,
    /// Slot handle stored at each heap position.
    slots_at: Vec<usize>,
    /// Heap position of each slot handle; free slots chain to the next free slot.
    positions: Vec<usize>,
    first_free_slot: usize,
}

impl TaskHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The most urgent entry without removing it.
    pub fn peek(&self) -> Option<(TaskKey, usize)> {
        Some((*self.keys.first()?, self.slots_at[0]))
    }

    pub fn push(&mut self, key: TaskKey) -> usize {
        let slot = self.allocate_slot();
        let position = self.keys.len();
        self.keys.push(key);
        self.slots_at.push(slot);
        self.positions[slot] = position;
        self.shift_up(position);
        slot
    }

    pub fn pop(&mut self) -> Option<(TaskKey, usize)> {
        let (key, slot) = self.peek()?;
        self.remove(slot);
        Some((key, slot))
    }

    pub fn remove(&mut self, slot: usize) {
        let position = self.positions[slot];
        let last = self.keys.len() - 1;
        self.swap(position, last);
        self.keys.pop();
        self.slots_at.pop();
        if position < self.keys.len() {
            self.shift_up(position);
            self.shift_down(position);
        }
        self.free_slot(slot);
    }

    fn allocate_slot(&mut self) -> usize {
        let slot = self.first_free_slot;
        if slot == self.positions.len() {
            self.positions.push(slot + 1);
        }
        self.first_free_slot = self.positions[slot];
        slot
    }

    fn free_slot(&mut self, slot: usize) {
        self.positions[slot] = self.first_free_slot;
        self.first_free_slot = slot;
    }

    fn swap(&mut self, i: usize, j: usize) {
        if i == j {
            return;
        }
        self.keys.swap(i, j);
        self.slots_at.swap(i, j);
        self.positions[self.slots_at[i]] = i;
        self.positions[self.slots_at[j]] = j;
    }

    fn shift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.keys[parent] <= self.keys[i] {
                break;
            }
            self.swap(i, parent);
            i = parent;
        }
    }

    fn shift_down(&mut self, mut i: usize) {
        let len = self.keys.len();
        loop {
            let left = 2 * i + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let child = if right < len && self.keys[right] < self.keys[left] {
                right
            } else {
                left
            };
            if self.keys[i] <= self.keys[child] {
                break;
            }
            self.swap(i, child);
            i = child;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(expiration: u64, sequence: u64) -> TaskKey {
        TaskKey {
            expiration,
            sequence,
        }
    }

    fn assert_heap_ordered(heap: &TaskHeap) {
        for i in 0..heap.keys.len() {
            for child in [2 * i + 1, 2 * i + 2] {
                if child < heap.keys.len() {
                    assert!(heap.keys[i] <= heap.keys[child], "heap order broken at {i}");
                }
            }
        }
    }

    #[test]
    fn pops_in_expiration_then_sequence_order() {
        let mut heap = TaskHeap::new();
        heap.push(key(50, 0));
        heap.push(key(10, 1));
        heap.push(key(10, 2));
        heap.push(key(30, 3));

        let order: Vec<_> = std::iter::from_fn(|| heap.pop().map(|(k, _)| k)).collect();
        assert_eq!(order, vec![key(10, 1), key(10, 2), key(30, 3), key(50, 0)]);
        assert!(heap.is_empty());
    }

    #[test]
    fn remove_by_slot_keeps_order() {
        let mut heap = TaskHeap::new();
        let slots: Vec<_> = [100, 20, 80, 5, 60, 15, 90, 3, 40]
            .into_iter()
            .enumerate()
            .map(|(seq, exp)| heap.push(key(exp, seq as u64)))
            .collect();

        heap.remove(slots[7]);
        assert_heap_ordered(&heap);
        assert_eq!(heap.peek().map(|(k, _)| k.expiration), Some(5));

        heap.remove(slots[3]);
        heap.remove(slots[1]);
        assert_heap_ordered(&heap);
        assert_eq!(heap.peek().map(|(k, _)| k.expiration), Some(15));
        assert_eq!(heap.len(), 6);
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut heap = TaskHeap::new();
        let a = heap.push(key(1, 0));
        let b = heap.push(key(2, 1));
        heap.remove(a);
        let c = heap.push(key(3, 2));
        assert_eq!(c, a);
        assert_eq!(heap.pop().map(|(_, slot)| slot), Some(b));
        assert_eq!(heap.pop().map(|(_, slot)| slot), Some(c));
    }
}
