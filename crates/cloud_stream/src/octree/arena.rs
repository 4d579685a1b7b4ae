//! Octree - arena of nodes addressed by generational [`NodeId`]s.
//!
//! Parent/child links are stored as ids, never as owning pointers, so the
//! tree has no reference cycles. Structure changes (hierarchy discovery,
//! cloud removal) take the arena write lock briefly; everything else only
//! needs a read lock long enough to clone a node's `Arc`.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use smallvec::SmallVec;

use super::{DAabb3, NodeId, OctreeNode};
use crate::source::VisualOwner;

/// Child list of one node, octant ascending.
pub type ChildIds = SmallVec<[NodeId; 8]>;

struct Entry {
  node: Arc<OctreeNode>,
  children: [Option<NodeId>; 8],
}

struct Slot {
  generation: u32,
  entry: Option<Entry>,
}

#[derive(Default)]
struct Slots {
  slots: Vec<Slot>,
  free: Vec<u32>,
  live: usize,
}

impl Slots {
  fn entry(&self, id: NodeId) -> Option<&Entry> {
    let slot = self.slots.get(id.index() as usize)?;
    if slot.generation != id.generation() {
      return None;
    }
    slot.entry.as_ref()
  }

  fn entry_mut(&mut self, id: NodeId) -> Option<&mut Entry> {
    let slot = self.slots.get_mut(id.index() as usize)?;
    if slot.generation != id.generation() {
      return None;
    }
    slot.entry.as_mut()
  }

  fn insert(&mut self, node: OctreeNode) -> NodeId {
    let entry = Entry {
      node: Arc::new(node),
      children: [None; 8],
    };
    self.live += 1;
    if let Some(index) = self.free.pop() {
      let slot = &mut self.slots[index as usize];
      slot.entry = Some(entry);
      return NodeId::new(index, slot.generation);
    }
    let index = self.slots.len() as u32;
    self.slots.push(Slot {
      generation: 0,
      entry: Some(entry),
    });
    NodeId::new(index, 0)
  }

  fn free(&mut self, id: NodeId) -> bool {
    let Some(slot) = self.slots.get_mut(id.index() as usize) else {
      return false;
    };
    if slot.generation != id.generation() || slot.entry.is_none() {
      return false;
    }
    slot.entry = None;
    slot.generation = slot.generation.wrapping_add(1);
    self.free.push(id.index());
    self.live -= 1;
    true
  }

  fn children(&self, id: NodeId) -> ChildIds {
    self
      .entry(id)
      .map(|entry| entry.children.iter().flatten().copied().collect())
      .unwrap_or_default()
  }

  fn subtree(&self, root: NodeId) -> Vec<NodeId> {
    let mut order = Vec::new();
    let mut queue = VecDeque::new();
    if self.entry(root).is_some() {
      queue.push_back(root);
    }
    while let Some(id) = queue.pop_front() {
      order.push(id);
      queue.extend(self.children(id));
    }
    order
  }
}

/// Arena holding every node of every registered cloud.
#[derive(Default)]
pub struct Octree {
  slots: RwLock<Slots>,
}

impl std::fmt::Debug for Octree {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "Octree({} nodes)", self.len())
  }
}

impl Octree {
  /// Create an empty arena.
  pub fn new() -> Self {
    Self::default()
  }

  fn read(&self) -> RwLockReadGuard<'_, Slots> {
    self.slots.read().expect("octree arena lock poisoned")
  }

  fn write(&self) -> RwLockWriteGuard<'_, Slots> {
    self.slots.write().expect("octree arena lock poisoned")
  }

  /// Number of live nodes.
  pub fn len(&self) -> usize {
    self.read().live
  }

  /// True when no node is live.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Create the root node (path `""`) of a new cloud.
  pub fn create_root(&self, bounds: DAabb3) -> NodeId {
    self.write().insert(OctreeNode::new("", bounds, None))
  }

  /// Get or create the child of `parent` in `octant`.
  ///
  /// Path and bounds are derived from the parent. Returns `None` when the
  /// parent is not live.
  pub fn create_child(&self, parent: NodeId, octant: u8) -> Option<NodeId> {
    debug_assert!(octant < 8, "octant must be in 0..8");
    let mut slots = self.write();
    let entry = slots.entry(parent)?;
    if let Some(existing) = entry.children[octant as usize] {
      return Some(existing);
    }
    let path = format!("{}{}", entry.node.path(), octant);
    let bounds = entry.node.bounds().octant(octant);

    let child = slots.insert(OctreeNode::new(path, bounds, Some(parent)));
    slots.entry_mut(parent)?.children[octant as usize] = Some(child);
    Some(child)
  }

  /// Link `child` under `parent` in `octant`.
  ///
  /// Only a node created for that position may be linked there: `child`
  /// must name `parent` as its parent and `octant` as its own octant, and
  /// the slot must be empty or already hold `child`. Returns false (and
  /// changes nothing) otherwise, or when either node is not live.
  pub fn set_child(&self, parent: NodeId, octant: u8, child: NodeId) -> bool {
    debug_assert!(octant < 8, "octant must be in 0..8");
    let mut slots = self.write();
    let Some(entry) = slots.entry(child) else {
      return false;
    };
    if entry.node.parent() != Some(parent) || entry.node.octant() != Some(octant) {
      return false;
    }
    let Some(parent_entry) = slots.entry_mut(parent) else {
      return false;
    };
    match parent_entry.children[octant as usize] {
      Some(existing) => existing == child,
      None => {
        parent_entry.children[octant as usize] = Some(child);
        true
      }
    }
  }

  /// Shared handle to a live node.
  pub fn get(&self, id: NodeId) -> Option<Arc<OctreeNode>> {
    self.read().entry(id).map(|entry| Arc::clone(&entry.node))
  }

  /// True when `id` refers to a live node.
  pub fn contains(&self, id: NodeId) -> bool {
    self.read().entry(id).is_some()
  }

  /// Child in `octant`, if present.
  pub fn child(&self, id: NodeId, octant: u8) -> Option<NodeId> {
    self.read().entry(id)?.children.get(octant as usize).copied().flatten()
  }

  /// Present children of `id`, octant ascending.
  ///
  /// A snapshot: children discovered afterwards are not included.
  pub fn children(&self, id: NodeId) -> smallvec::IntoIter<[NodeId; 8]> {
    self.read().children(id).into_iter()
  }

  /// `root` and all its descendants in breadth-first order.
  pub fn subtree(&self, root: NodeId) -> Vec<NodeId> {
    self.read().subtree(root)
  }

  /// Free `root` and all its descendants. Returns the number freed.
  ///
  /// Does not touch residency: callers release visuals, cache entries and
  /// point data first.
  pub fn remove_subtree(&self, root: NodeId) -> usize {
    let mut slots = self.write();
    let Some(entry) = slots.entry(root) else {
      return 0;
    };
    let parent = entry.node.parent();
    let octant = entry.node.octant();

    let ids = slots.subtree(root);
    let freed = ids.iter().filter(|id| slots.free(**id)).count();

    if let (Some(parent), Some(octant)) = (parent, octant) {
      if let Some(parent_entry) = slots.entry_mut(parent) {
        parent_entry.children[octant as usize] = None;
      }
    }
    freed
  }

  /// Destroy every visual in the subtree. Returns how many were destroyed.
  pub fn remove_all_visuals<V: VisualOwner + ?Sized>(&self, root: NodeId, owner: &mut V) -> usize {
    self
      .subtree(root)
      .into_iter()
      .filter_map(|id| self.get(id))
      .filter(|node| node.remove_visual(owner))
      .count()
  }

  /// Hide every visual in the subtree.
  pub fn deactivate_all_visuals<V: VisualOwner + ?Sized>(&self, root: NodeId, owner: &mut V) -> usize {
    self
      .subtree(root)
      .into_iter()
      .filter_map(|id| self.get(id))
      .filter(|node| node.deactivate_visual(owner))
      .count()
  }

  /// Show every hidden visual in the subtree.
  pub fn reactivate_all_visuals<V: VisualOwner + ?Sized>(&self, root: NodeId, owner: &mut V) -> usize {
    self
      .subtree(root)
      .into_iter()
      .filter_map(|id| self.get(id))
      .filter(|node| node.reactivate_visual(owner))
      .count()
  }
}

#[cfg(test)]
#[path = "arena_test.rs"]
mod arena_test;
