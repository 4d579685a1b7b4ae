//! Traversal engine: decides which nodes to load, render and demolish.
//!
//! One pass walks every registered root in priority order (largest on
//! screen, closest to the view direction first) and produces a
//! [`TraversalOutput`] for the frame synchronizer.
//!
//! # Per-node decision
//!
//! ```text
//! outside frustum ───────────────────────────────► demolish subtree
//! point count unknown ──────────── (load budget) ► schedule load, expand
//! fits point budget ─┬─ has visual ──────────────► keep, expand
//!                    ├─ has data ── (render bud.) ► withdraw, toRender, expand
//!                    └─ no data ─── (load budget) ► schedule load, expand
//! exceeds point budget ─── zero both budgets ────► demolish if visual
//! ```
//!
//! Budgets are checked per branch: once they run out the walk continues so
//! nodes that already have visuals are still marked visible.
//!
//! Expanding a node whose hierarchy chunk failed to load re-queues the
//! chunk fetch.
//!
//! # Demolition order
//!
//! Demolishing a node collects it and every descendant with a visual in
//! breadth-first order, then emits them reversed so children are destroyed
//! before their parents. A node appears at most once in `to_delete`.

use std::collections::{HashSet, VecDeque};

use glam::DVec3;
use web_time::Instant;

use crate::cache::PointCache;
use crate::camera::CameraSnapshot;
use crate::config::StreamingConfig;
use crate::loading::LoadingQueue;
use crate::octree::{DAabb3, NodeId, Octree};
use crate::priority_queue::PriorityQueue;

/// Per-pass limits of the traversal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TraversalBudget {
  /// Nodes at or below this projected size (pixels) are not expanded.
  pub min_node_size: f64,
  /// Maximum points materialized at once.
  pub point_budget: u64,
  /// Maximum loads scheduled per pass.
  pub max_loads: u32,
  /// Maximum nodes queued for materialization per pass.
  pub max_renders: u32,
}

impl TraversalBudget {
  /// Budget matching [`StreamingConfig::DEFAULT`].
  pub const DEFAULT: Self = Self::from_config(&StreamingConfig::DEFAULT);

  /// No limits besides the size threshold. For testing.
  pub const UNLIMITED: Self = Self {
    min_node_size: 0.0,
    point_budget: u64::MAX,
    max_loads: u32::MAX,
    max_renders: u32::MAX,
  };

  pub const fn from_config(config: &StreamingConfig) -> Self {
    Self {
      min_node_size: config.min_node_size,
      point_budget: config.point_budget,
      max_loads: config.nodes_loaded_per_frame,
      max_renders: config.nodes_materialized_per_frame,
    }
  }
}

impl Default for TraversalBudget {
  fn default() -> Self {
    Self::DEFAULT
  }
}

/// Statistics from one traversal pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TraversalStats {
  /// Nodes dequeued from the priority queue.
  pub visited: u32,
  /// Nodes rejected by the frustum test.
  pub culled: u32,
  /// Loads scheduled.
  pub scheduled_loads: u32,
  /// Nodes queued for materialization.
  pub queued_renders: u32,
  /// Nodes that stayed visible from the previous pass.
  pub kept_visible: u32,
  /// The point budget was hit and the remaining budgets zeroed.
  pub budget_exhausted: bool,
  /// Pass duration in microseconds.
  pub elapsed_us: u64,
}

/// Result of a pass, consumed by the frame synchronizer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TraversalOutput {
  /// Nodes to materialize, in priority order.
  pub to_render: Vec<NodeId>,
  /// Nodes whose visual must be destroyed, children before parents.
  pub to_delete: Vec<NodeId>,
  /// Points of all visible nodes (kept plus newly queued).
  pub rendering_points: u64,
  pub stats: TraversalStats,
}

impl TraversalOutput {
  /// True when the pass requests no visual changes.
  pub fn is_empty(&self) -> bool {
    self.to_render.is_empty() && self.to_delete.is_empty()
  }
}

/// Estimated on-screen size in pixels of a box's bounding sphere.
///
/// `(screen_height / 2) * radius / (tan(fov / 2) * distance)`. Infinite
/// when the camera sits at the box center.
pub fn projected_size(bounds: &DAabb3, camera: &CameraSnapshot) -> f64 {
  let distance = bounds.center().distance(camera.position);
  let slope = (camera.field_of_view / 2.0).tan();
  (camera.screen_height / 2.0) * bounds.radius() / (slope * distance)
}

/// Screen-space priority: projected size divided by one plus the angle
/// between the view direction and the direction to the box center.
pub fn priority(bounds: &DAabb3, camera: &CameraSnapshot, projected_size: f64) -> f64 {
  let to_center: DVec3 = (bounds.center() - camera.position).normalize_or_zero();
  let cos = camera.forward.normalize_or_zero().dot(to_center).clamp(-1.0, 1.0);
  projected_size / (cos.acos().abs() + 1.0)
}

/// Mutable state of one pass.
struct Pass<'a> {
  tree: &'a Octree,
  camera: &'a CameraSnapshot,
  budget: TraversalBudget,
  queue: &'a mut PriorityQueue<NodeId>,
  output: TraversalOutput,
  deleted: HashSet<NodeId>,
  loads_left: u32,
  renders_left: u32,
}

impl Pass<'_> {
  /// Enqueue `id` when large enough on screen, demolish it otherwise.
  fn consider(&mut self, id: NodeId) {
    let Some(node) = self.tree.get(id) else {
      return;
    };
    let size = projected_size(node.bounds(), self.camera);
    if size > self.budget.min_node_size {
      let score = priority(node.bounds(), self.camera, size);
      self.queue.push(id, score);
    } else {
      self.demolish(id);
    }
  }

  /// Queue `id` and its descendants with visuals for destruction.
  fn demolish(&mut self, id: NodeId) {
    let mut walk = VecDeque::from([id]);
    let mut found = Vec::new();
    while let Some(current) = walk.pop_front() {
      let Some(node) = self.tree.get(current) else {
        continue;
      };
      if node.has_visual() {
        found.push(current);
        walk.extend(self.tree.children(current));
      }
    }
    for current in found.into_iter().rev() {
      if self.deleted.insert(current) {
        self.output.to_delete.push(current);
      }
    }
  }

  fn schedule_load(&mut self, id: NodeId, loads: &LoadingQueue) -> bool {
    if self.loads_left == 0 {
      return false;
    }
    loads.schedule_for_loading(id);
    self.loads_left -= 1;
    self.output.stats.scheduled_loads += 1;
    true
  }
}

/// Stateful traversal engine. Keeps the visible set between passes.
#[derive(Debug)]
pub struct Traverser {
  budget: TraversalBudget,
  visible: HashSet<NodeId>,
  queue: PriorityQueue<NodeId>,
}

impl Traverser {
  pub fn new(budget: TraversalBudget) -> Self {
    Self {
      budget,
      visible: HashSet::new(),
      queue: PriorityQueue::max(),
    }
  }

  pub fn budget(&self) -> &TraversalBudget {
    &self.budget
  }

  /// Nodes marked visible by the last pass.
  pub fn visible(&self) -> &HashSet<NodeId> {
    &self.visible
  }

  /// Forget the visible set (after all visuals were removed externally).
  pub fn reset(&mut self) {
    self.visible.clear();
  }

  /// Run one pass.
  ///
  /// Without camera data the pass publishes empty queues and keeps the
  /// visible set untouched.
  #[cfg_attr(feature = "profiling", tracing::instrument(skip_all, name = "traversal::traverse"))]
  pub fn traverse(
    &mut self,
    tree: &Octree,
    roots: &[NodeId],
    camera: Option<&CameraSnapshot>,
    cache: &PointCache,
    loads: &LoadingQueue,
  ) -> TraversalOutput {
    let Some(camera) = camera else {
      return TraversalOutput::default();
    };
    let started = Instant::now();

    self.queue.clear();
    let mut previous = std::mem::take(&mut self.visible);
    let mut visible = HashSet::with_capacity(previous.len());

    let mut pass = Pass {
      tree,
      camera,
      budget: self.budget,
      queue: &mut self.queue,
      output: TraversalOutput::default(),
      deleted: HashSet::new(),
      loads_left: self.budget.max_loads,
      renders_left: self.budget.max_renders,
    };

    for &root in roots {
      pass.consider(root);
    }

    while let Some((id, _)) = pass.queue.pop() {
      let Some(node) = tree.get(id) else {
        continue;
      };
      pass.output.stats.visited += 1;

      if !camera.frustum.intersects_aabb(node.bounds()) {
        pass.output.stats.culled += 1;
        pass.demolish(id);
        continue;
      }

      let residency = node.residency();
      let rendering = pass.output.rendering_points;
      let expand = match residency.point_count {
        None => pass.schedule_load(id, loads),
        Some(count) if rendering.saturating_add(count) <= pass.budget.point_budget => {
          if residency.has_visual {
            pass.output.rendering_points += count;
            previous.remove(&id);
            visible.insert(id);
            pass.output.stats.kept_visible += 1;
            true
          } else if residency.has_point_data {
            if pass.renders_left == 0 {
              false
            } else {
              // Cache lock is never taken while holding a node lock, so
              // withdraw first and re-check: eviction may have won.
              cache.withdraw(id);
              if node.has_point_data() {
                pass.output.to_render.push(id);
                pass.output.rendering_points += count;
                pass.renders_left -= 1;
                pass.output.stats.queued_renders += 1;
                visible.insert(id);
                true
              } else {
                pass.schedule_load(id, loads)
              }
            }
          } else {
            pass.schedule_load(id, loads)
          }
        }
        Some(_) => {
          pass.loads_left = 0;
          pass.renders_left = 0;
          pass.output.stats.budget_exhausted = true;
          if residency.has_visual {
            previous.remove(&id);
            pass.demolish(id);
          }
          false
        }
      };

      if expand {
        if node.retry_hierarchy() {
          tracing::debug!(path = node.path(), "retrying hierarchy chunk");
          loads.schedule_hierarchy(id);
        }
        for child in tree.children(id) {
          pass.consider(child);
        }
      }
    }

    // Visible last pass but not confirmed this pass.
    for id in previous {
      pass.demolish(id);
    }

    let mut output = pass.output;
    output.stats.elapsed_us = started.elapsed().as_micros() as u64;
    self.visible = visible;

    tracing::debug!(
      visited = output.stats.visited,
      render = output.to_render.len(),
      delete = output.to_delete.len(),
      points = output.rendering_points,
      loads = output.stats.scheduled_loads,
      "traversal pass"
    );
    output
  }
}

#[cfg(test)]
#[path = "traversal_test.rs"]
mod traversal_test;
