//! OctreeNode - one spatial region of a point cloud and its residency state.
//!
//! Identity and geometry are immutable. Residency (point count, point data,
//! visual) sits behind a per-node lock so the traversal, the loader and the
//! frame synchronizer can work on different nodes without contention.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use glam::Vec3;

use super::DAabb3;
use crate::source::VisualOwner;

/// Stable identifier of a node in the [`Octree`](super::Octree) arena.
///
/// Generational: an id stays invalid after its node was freed, even if the
/// slot is reused by a later cloud.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct NodeId {
  index: u32,
  generation: u32,
}

impl NodeId {
  pub(crate) fn new(index: u32, generation: u32) -> Self {
    Self { index, generation }
  }

  /// Arena slot index.
  pub fn index(&self) -> u32 {
    self.index
  }

  /// Slot generation this id was issued for.
  pub fn generation(&self) -> u32 {
    self.generation
  }
}

/// Opaque handle to a materialized visual, issued by a [`VisualOwner`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct VisualHandle(pub u64);

/// Decoded point data of one node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointData {
  /// Point positions.
  pub positions: Vec<Vec3>,
  /// RGBA colors, one per position.
  pub colors: Vec<[u8; 4]>,
}

impl PointData {
  /// Create point data from parallel position and color arrays.
  pub fn new(positions: Vec<Vec3>, colors: Vec<[u8; 4]>) -> Self {
    debug_assert_eq!(
      positions.len(),
      colors.len(),
      "positions and colors must have the same length"
    );
    Self { positions, colors }
  }

  /// Number of points.
  pub fn len(&self) -> usize {
    self.positions.len()
  }

  /// True when there are no points.
  pub fn is_empty(&self) -> bool {
    self.positions.is_empty()
  }
}

/// Mutable residency fields, guarded by the node lock.
#[derive(Debug, Default)]
struct Residency {
  point_count: Option<u64>,
  points: Option<Arc<PointData>>,
  visual: Option<VisualHandle>,
  visual_active: bool,
}

/// Consistent copy of a node's residency, taken under its lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResidencySnapshot {
  /// `None` until point data was loaded once.
  pub point_count: Option<u64>,
  /// Point data is resident in memory.
  pub has_point_data: bool,
  /// A visual is materialized.
  pub has_visual: bool,
}

/// Whether the children of a node are known.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum HierarchyState {
  /// Children are known (possibly none).
  Resolved = 0,
  /// A hierarchy chunk fetch is queued or running.
  Queued = 1,
  /// The last chunk fetch failed; the traversal re-queues it on demand.
  Failed = 2,
}

impl HierarchyState {
  fn from_u8(value: u8) -> Self {
    match value {
      1 => HierarchyState::Queued,
      2 => HierarchyState::Failed,
      _ => HierarchyState::Resolved,
    }
  }
}

/// A node of a point cloud octree.
#[derive(Debug)]
pub struct OctreeNode {
  path: String,
  bounds: DAabb3,
  parent: Option<NodeId>,
  hierarchy: AtomicU8,
  residency: Mutex<Residency>,
}

impl OctreeNode {
  /// Create a node with unknown point count and nothing resident.
  pub fn new(path: impl Into<String>, bounds: DAabb3, parent: Option<NodeId>) -> Self {
    Self {
      path: path.into(),
      bounds,
      parent,
      hierarchy: AtomicU8::new(HierarchyState::Resolved as u8),
      residency: Mutex::new(Residency::default()),
    }
  }

  /// Discovery state of the children below this node.
  pub fn hierarchy_state(&self) -> HierarchyState {
    HierarchyState::from_u8(self.hierarchy.load(Ordering::Acquire))
  }

  pub(crate) fn set_hierarchy_state(&self, state: HierarchyState) {
    self.hierarchy.store(state as u8, Ordering::Release);
  }

  /// Move a failed node back to [`HierarchyState::Queued`]. Returns true
  /// for exactly one caller per failure; that caller re-queues the fetch.
  pub fn retry_hierarchy(&self) -> bool {
    self
      .hierarchy
      .compare_exchange(
        HierarchyState::Failed as u8,
        HierarchyState::Queued as u8,
        Ordering::AcqRel,
        Ordering::Acquire,
      )
      .is_ok()
  }

  /// Path from the root: one octant digit per level, `""` for the root.
  pub fn path(&self) -> &str {
    &self.path
  }

  /// Depth below the root (root = 0).
  pub fn depth(&self) -> usize {
    self.path.len()
  }

  /// Octant of this node within its parent, `None` for roots.
  pub fn octant(&self) -> Option<u8> {
    self.path.bytes().last().map(|digit| digit - b'0')
  }

  /// Axis-aligned bounds.
  pub fn bounds(&self) -> &DAabb3 {
    &self.bounds
  }

  /// Parent id, `None` for roots.
  pub fn parent(&self) -> Option<NodeId> {
    self.parent
  }

  /// True for the root of a cloud.
  pub fn is_root(&self) -> bool {
    self.parent.is_none()
  }

  fn state(&self) -> MutexGuard<'_, Residency> {
    self.residency.lock().expect("node residency lock poisoned")
  }

  /// Read all residency fields at once.
  pub fn residency(&self) -> ResidencySnapshot {
    let state = self.state();
    ResidencySnapshot {
      point_count: state.point_count,
      has_point_data: state.points.is_some(),
      has_visual: state.visual.is_some(),
    }
  }

  /// Known point count, `None` while unknown.
  pub fn point_count(&self) -> Option<u64> {
    self.state().point_count
  }

  /// True when point data is resident.
  pub fn has_point_data(&self) -> bool {
    self.state().points.is_some()
  }

  /// True when a visual is materialized.
  pub fn has_visual(&self) -> bool {
    self.state().visual.is_some()
  }

  /// Handle of the materialized visual, if any.
  pub fn visual(&self) -> Option<VisualHandle> {
    self.state().visual
  }

  /// True when the visual exists and is not deactivated.
  pub fn is_visual_active(&self) -> bool {
    let state = self.state();
    state.visual.is_some() && state.visual_active
  }

  /// Shared reference to the resident point data.
  pub fn point_data(&self) -> Option<Arc<PointData>> {
    self.state().points.clone()
  }

  /// Attach point data. The point count becomes known.
  ///
  /// Replaces any data already attached, so a duplicate load never leaves
  /// two arrays behind.
  pub fn set_point_data(&self, points: PointData) {
    let mut state = self.state();
    state.point_count = Some(points.len() as u64);
    state.points = Some(Arc::new(points));
  }

  /// Free the point data. The point count stays known.
  ///
  /// Refused while a visual exists (a visual always needs its data); returns
  /// whether data was dropped.
  pub fn forget_point_data(&self) -> bool {
    let mut state = self.state();
    if state.visual.is_some() {
      return false;
    }
    state.points.take().is_some()
  }

  /// Materialize a visual from the resident point data.
  ///
  /// Returns false when a visual already exists or no data is resident,
  /// including data forgotten while the owner was building the visual (the
  /// fresh handle is destroyed again).
  pub fn create_visual<V: VisualOwner + ?Sized>(&self, owner: &mut V) -> bool {
    let points = {
      let state = self.state();
      if state.visual.is_some() {
        return false;
      }
      match &state.points {
        Some(points) => Arc::clone(points),
        None => return false,
      }
    };

    // Owner code runs without the node lock held.
    let handle = owner.create_visual(self, &points);

    let mut state = self.state();
    // Evicted (or materialized elsewhere) while the owner was busy: a visual
    // never outlives its data.
    if state.points.is_none() || state.visual.is_some() {
      drop(state);
      owner.destroy_visual(handle);
      return false;
    }
    state.visual = Some(handle);
    state.visual_active = true;
    true
  }

  /// Destroy the visual, keeping the point data. Returns whether one existed.
  pub fn remove_visual<V: VisualOwner + ?Sized>(&self, owner: &mut V) -> bool {
    let handle = {
      let mut state = self.state();
      state.visual_active = false;
      state.visual.take()
    };
    match handle {
      Some(handle) => {
        owner.destroy_visual(handle);
        true
      }
      None => false,
    }
  }

  /// Hide the visual without destroying it.
  pub fn deactivate_visual<V: VisualOwner + ?Sized>(&self, owner: &mut V) -> bool {
    let handle = {
      let mut state = self.state();
      if !state.visual_active {
        return false;
      }
      state.visual_active = false;
      state.visual
    };
    match handle {
      Some(handle) => {
        owner.deactivate_visual(handle);
        true
      }
      None => false,
    }
  }

  /// Show a previously deactivated visual.
  pub fn reactivate_visual<V: VisualOwner + ?Sized>(&self, owner: &mut V) -> bool {
    let handle = {
      let mut state = self.state();
      match state.visual {
        Some(handle) if !state.visual_active => {
          state.visual_active = true;
          handle
        }
        _ => return false,
      }
    };
    owner.reactivate_visual(handle);
    true
  }
}

#[cfg(test)]
#[path = "node_test.rs"]
mod node_test;
