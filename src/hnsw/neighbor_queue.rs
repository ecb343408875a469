//! Priority queues of graph candidates, ordered by f32 distance for BinaryHeap.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A graph slot paired with its distance to the current query.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub distance: f32,
    pub slot: usize,
}

impl Candidate {
    pub fn new(slot: usize, distance: f32) -> Self {
        Self { distance, slot }
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Larger distance orders greater, so a plain BinaryHeap keeps the furthest on top.
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.slot.cmp(&other.slot))
    }
}

/// Max-heap of candidates (furthest on top). Used as the result set bounded by ef.
#[derive(Default)]
pub struct MaxHeap {
    heap: BinaryHeap<Candidate>,
}

impl MaxHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, c: Candidate) {
        self.heap.push(c);
    }

    pub fn peek(&self) -> Option<&Candidate> {
        self.heap.peek()
    }

    pub fn pop(&mut self) -> Option<Candidate> {
        self.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drain into a Vec sorted closest first.
    pub fn into_sorted_vec(self) -> Vec<Candidate> {
        self.heap.into_sorted_vec()
    }
}

/// Min-heap of candidates (closest on top). Used as the exploration frontier.
#[derive(Default)]
pub struct MinHeap {
    heap: BinaryHeap<std::cmp::Reverse<Candidate>>,
}

impl MinHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, c: Candidate) {
        self.heap.push(std::cmp::Reverse(c));
    }

    pub fn pop(&mut self) -> Option<Candidate> {
        self.heap.pop().map(|r| r.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_heap_ordering() {
        let mut heap = MaxHeap::new();
        heap.push(Candidate::new(0, 3.0));
        heap.push(Candidate::new(1, 1.0));
        heap.push(Candidate::new(2, 2.0));

        assert_eq!(heap.pop().unwrap().distance, 3.0);
        assert_eq!(heap.pop().unwrap().distance, 2.0);
        assert_eq!(heap.pop().unwrap().distance, 1.0);
        assert!(heap.is_empty());
    }

    #[test]
    fn test_min_heap_ordering() {
        let mut heap = MinHeap::new();
        heap.push(Candidate::new(0, 3.0));
        heap.push(Candidate::new(1, 1.0));
        heap.push(Candidate::new(2, 2.0));

        assert_eq!(heap.pop().unwrap().distance, 1.0);
        assert_eq!(heap.pop().unwrap().distance, 2.0);
        assert_eq!(heap.pop().unwrap().distance, 3.0);
    }

    #[test]
    fn test_into_sorted_vec_ties_by_slot() {
        let mut heap = MaxHeap::new();
        heap.push(Candidate::new(4, 2.0));
        heap.push(Candidate::new(1, 5.0));
        heap.push(Candidate::new(3, 2.0));

        let sorted: Vec<usize> = heap.into_sorted_vec().iter().map(|c| c.slot).collect();
        assert_eq!(sorted, vec![3, 4, 1]);
    }
}
