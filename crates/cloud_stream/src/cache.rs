//! PointCache - point-budgeted LRU of loaded but unrendered nodes.
//!
//! Holds nodes whose point data is resident while no visual uses it. When
//! the resident total exceeds the capacity, the least recently inserted
//! nodes forget their point data (structure and point count stay).
//!
//! Lock order: the cache lock is taken before any node lock, never after.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::octree::{NodeId, OctreeNode, PointData};

struct CacheEntry {
  id: NodeId,
  node: Arc<OctreeNode>,
  points: u64,
}

#[derive(Default)]
struct CacheState {
  /// Recency order: smallest sequence number is the oldest entry.
  by_age: BTreeMap<u64, CacheEntry>,
  /// Node -> sequence number.
  index: HashMap<NodeId, u64>,
  next_seq: u64,
  resident_points: u64,
}

impl CacheState {
  fn remove(&mut self, id: NodeId) -> Option<CacheEntry> {
    let seq = self.index.remove(&id)?;
    let entry = self.by_age.remove(&seq)?;
    self.resident_points -= entry.points;
    Some(entry)
  }
}

/// Bounded store of loaded but unrendered nodes.
pub struct PointCache {
  capacity_points: u64,
  state: Mutex<CacheState>,
}

impl std::fmt::Debug for PointCache {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PointCache")
      .field("capacity_points", &self.capacity_points)
      .field("len", &self.len())
      .field("resident_points", &self.resident_points())
      .finish()
  }
}

impl PointCache {
  /// Create an empty cache holding at most `capacity_points` points.
  pub fn new(capacity_points: u64) -> Self {
    Self {
      capacity_points,
      state: Mutex::new(CacheState::default()),
    }
  }

  fn state(&self) -> MutexGuard<'_, CacheState> {
    self.state.lock().expect("cache lock poisoned")
  }

  /// Add `node` as the most recent entry, then evict the oldest entries
  /// until the resident total fits the capacity.
  ///
  /// No-op when the node has no point data or has a visual. Inserting a
  /// node that is already cached refreshes its recency. Returns the number
  /// of evicted nodes.
  #[cfg_attr(feature = "profiling", tracing::instrument(skip_all, name = "cache::insert"))]
  pub fn insert(&self, id: NodeId, node: Arc<OctreeNode>) -> usize {
    let mut state = self.state();
    self.insert_locked(&mut state, id, node)
  }

  /// Attach freshly loaded `points` to `node` and insert it, as one step
  /// with respect to [`withdraw`](Self::withdraw).
  ///
  /// A traversal that sees the data and withdraws the node therefore always
  /// finds it cached. Nodes that gained a visual meanwhile are left alone.
  pub fn insert_loaded(&self, id: NodeId, node: Arc<OctreeNode>, points: PointData) -> usize {
    let mut state = self.state();
    if node.has_visual() {
      return 0;
    }
    node.set_point_data(points);
    self.insert_locked(&mut state, id, node)
  }

  fn insert_locked(&self, state: &mut CacheState, id: NodeId, node: Arc<OctreeNode>) -> usize {
    let residency = node.residency();
    if !residency.has_point_data || residency.has_visual {
      return 0;
    }
    state.remove(id);

    let points = residency.point_count.unwrap_or(0);
    let seq = state.next_seq;
    state.next_seq += 1;
    state.by_age.insert(seq, CacheEntry { id, node, points });
    state.index.insert(id, seq);
    state.resident_points += points;

    let mut evicted = 0;
    while state.resident_points > self.capacity_points {
      let Some((_, entry)) = state.by_age.pop_first() else {
        break;
      };
      state.index.remove(&entry.id);
      state.resident_points -= entry.points;
      if !entry.node.forget_point_data() && entry.node.has_visual() {
        tracing::warn!(path = entry.node.path(), "evicted cache entry has a visual, data kept");
      }
      evicted += 1;
    }

    if evicted > 0 {
      tracing::debug!(
        evicted,
        resident_points = state.resident_points,
        capacity = self.capacity_points,
        "cache eviction"
      );
    }
    evicted
  }

  /// Remove `id` from the cache without forgetting its data.
  ///
  /// Called right before the node is rendered. Returns false when the node
  /// was not cached.
  pub fn withdraw(&self, id: NodeId) -> bool {
    self.state().remove(id).is_some()
  }

  /// True when `id` is cached.
  pub fn contains(&self, id: NodeId) -> bool {
    self.state().index.contains_key(&id)
  }

  /// Number of cached nodes.
  pub fn len(&self) -> usize {
    self.state().index.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Sum of the point counts of all cached nodes.
  pub fn resident_points(&self) -> u64 {
    self.state().resident_points
  }

  /// Configured capacity in points.
  pub fn capacity_points(&self) -> u64 {
    self.capacity_points
  }
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod cache_test;
