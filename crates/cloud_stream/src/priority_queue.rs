//! PriorityQueue - binary heap keyed by an `f64` score.
//!
//! The traversal pushes nodes with their screen-space priority and always
//! expands the most important one first. Scores compare with
//! [`f64::total_cmp`], so NaN never breaks the heap order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Which end of the score range is served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapOrder {
  /// Lowest score first.
  Min,
  /// Highest score first.
  Max,
}

#[derive(Debug)]
struct Entry<T> {
  key: f64,
  item: T,
}

impl<T> PartialEq for Entry<T> {
  fn eq(&self, other: &Self) -> bool {
    self.key.total_cmp(&other.key) == Ordering::Equal
  }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl<T> Ord for Entry<T> {
  fn cmp(&self, other: &Self) -> Ordering {
    self.key.total_cmp(&other.key)
  }
}

/// Priority queue of `T` ordered by an `f64` score.
///
/// Equal scores dequeue in unspecified order.
#[derive(Debug)]
pub struct PriorityQueue<T> {
  heap: BinaryHeap<Entry<T>>,
  order: HeapOrder,
}

impl<T> PriorityQueue<T> {
  /// Create an empty queue.
  pub fn new(order: HeapOrder) -> Self {
    Self {
      heap: BinaryHeap::new(),
      order,
    }
  }

  /// Highest score first.
  pub fn max() -> Self {
    Self::new(HeapOrder::Max)
  }

  /// Lowest score first.
  pub fn min() -> Self {
    Self::new(HeapOrder::Min)
  }

  pub fn order(&self) -> HeapOrder {
    self.order
  }

  /// Insert `item` with `priority`.
  pub fn push(&mut self, item: T, priority: f64) {
    // BinaryHeap is a max-heap; a min-heap stores negated keys.
    let key = match self.order {
      HeapOrder::Max => priority,
      HeapOrder::Min => -priority,
    };
    self.heap.push(Entry { key, item });
  }

  /// Remove and return the next item and its priority.
  pub fn pop(&mut self) -> Option<(T, f64)> {
    self.heap.pop().map(|entry| (entry.item, self.score(entry.key)))
  }

  /// Priority of the next item without removing it.
  pub fn peek_priority(&self) -> Option<f64> {
    self.heap.peek().map(|entry| self.score(entry.key))
  }

  pub fn len(&self) -> usize {
    self.heap.len()
  }

  pub fn is_empty(&self) -> bool {
    self.heap.is_empty()
  }

  /// Remove all items, keeping the allocation.
  pub fn clear(&mut self) {
    self.heap.clear();
  }

  fn score(&self, key: f64) -> f64 {
    match self.order {
      HeapOrder::Max => key,
      HeapOrder::Min => -key,
    }
  }
}
