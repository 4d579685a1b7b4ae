use glam::{DVec3, Vec3};

use super::*;
use crate::octree::{DAabb3, Octree, PointData};
use crate::source::NullVisuals;

struct Fixture {
  tree: Octree,
  root: NodeId,
}

impl Fixture {
  fn new() -> Self {
    let tree = Octree::new();
    let root = tree.create_root(DAabb3::new(DVec3::ZERO, DVec3::splat(8.0)));
    Self { tree, root }
  }

  /// Child `octant` of the root loaded with `n` points.
  fn loaded(&self, octant: u8, n: usize) -> (NodeId, Arc<OctreeNode>) {
    let id = self.tree.create_child(self.root, octant).unwrap();
    let node = self.tree.get(id).unwrap();
    node.set_point_data(PointData::new(vec![Vec3::ZERO; n], vec![[0; 4]; n]));
    (id, node)
  }
}

#[test]
fn test_insert_tracks_points() {
  let fx = Fixture::new();
  let cache = PointCache::new(1000);
  let (a, node_a) = fx.loaded(0, 100);
  let (b, node_b) = fx.loaded(1, 200);

  assert_eq!(cache.insert(a, node_a), 0);
  assert_eq!(cache.insert(b, node_b), 0);
  assert_eq!(cache.len(), 2);
  assert_eq!(cache.resident_points(), 300);
  assert!(cache.contains(a));
}

#[test]
fn test_evicts_oldest_first() {
  let fx = Fixture::new();
  let cache = PointCache::new(500);
  let (a, node_a) = fx.loaded(0, 200);
  let (b, node_b) = fx.loaded(1, 200);
  let (c, node_c) = fx.loaded(2, 200);

  cache.insert(a, node_a.clone());
  cache.insert(b, node_b.clone());
  assert_eq!(cache.insert(c, node_c.clone()), 1);

  assert!(!cache.contains(a));
  assert!(!node_a.has_point_data());
  assert_eq!(node_a.point_count(), Some(200), "count survives eviction");
  assert!(node_b.has_point_data());
  assert!(node_c.has_point_data());
  assert_eq!(cache.resident_points(), 400);
}

#[test]
fn test_reinsert_refreshes_recency() {
  let fx = Fixture::new();
  let cache = PointCache::new(500);
  let (a, node_a) = fx.loaded(0, 200);
  let (b, node_b) = fx.loaded(1, 200);
  let (c, node_c) = fx.loaded(2, 200);

  cache.insert(a, node_a.clone());
  cache.insert(b, node_b.clone());
  cache.insert(a, node_a.clone());
  assert_eq!(cache.resident_points(), 400, "no double counting");

  cache.insert(c, node_c);
  assert!(cache.contains(a));
  assert!(!cache.contains(b));
  assert!(!node_b.has_point_data());
}

#[test]
fn test_insert_without_point_data_is_noop() {
  let fx = Fixture::new();
  let cache = PointCache::new(500);
  let id = fx.tree.create_child(fx.root, 3).unwrap();

  assert_eq!(cache.insert(id, fx.tree.get(id).unwrap()), 0);
  assert!(cache.is_empty());
}

#[test]
fn test_withdraw_protects_from_eviction() {
  let fx = Fixture::new();
  let cache = PointCache::new(300);
  let (a, node_a) = fx.loaded(0, 200);
  let (b, node_b) = fx.loaded(1, 200);

  cache.insert(a, node_a.clone());
  assert!(cache.withdraw(a));
  assert!(!cache.withdraw(a), "second withdraw is a no-op");
  cache.insert(b, node_b);

  assert!(node_a.has_point_data());
  assert_eq!(cache.resident_points(), 200);
}

#[test]
fn test_single_oversized_entry_is_evicted() {
  let fx = Fixture::new();
  let cache = PointCache::new(100);
  let (a, node_a) = fx.loaded(0, 150);

  assert_eq!(cache.insert(a, node_a.clone()), 1);
  assert!(cache.is_empty());
  assert!(!node_a.has_point_data());
}

#[test]
fn test_resident_points_never_exceed_capacity() {
  let fx = Fixture::new();
  let cache = PointCache::new(1000);
  for octant in 0..8u8 {
    let (id, node) = fx.loaded(octant, 100 + 70 * octant as usize);
    cache.insert(id, node);
    assert!(cache.resident_points() <= cache.capacity_points());
  }
}

#[test]
fn test_eviction_keeps_data_of_node_with_visual() {
  let fx = Fixture::new();
  let cache = PointCache::new(100);
  let mut visuals = NullVisuals::default();
  let (a, node_a) = fx.loaded(0, 80);
  let (b, node_b) = fx.loaded(1, 80);

  cache.insert(a, node_a.clone());
  // Rendering without withdrawing is a caller bug; the data must survive.
  node_a.create_visual(&mut visuals);
  assert_eq!(cache.insert(b, node_b), 1);

  assert!(!cache.contains(a));
  assert!(node_a.has_point_data());
}

#[test]
fn test_insert_skips_node_with_visual() {
  let fx = Fixture::new();
  let cache = PointCache::new(1000);
  let mut visuals = NullVisuals::default();
  let (a, node_a) = fx.loaded(0, 10);
  node_a.create_visual(&mut visuals);

  assert_eq!(cache.insert(a, node_a), 0);
  assert!(!cache.contains(a));
  assert_eq!(cache.resident_points(), 0);
}

#[test]
fn test_insert_loaded_attaches_data_and_caches() {
  let fx = Fixture::new();
  let cache = PointCache::new(1000);
  let id = fx.tree.create_child(fx.root, 4).unwrap();
  let node = fx.tree.get(id).unwrap();

  let points = PointData::new(vec![Vec3::ZERO; 30], vec![[0; 4]; 30]);
  assert_eq!(cache.insert_loaded(id, node.clone(), points), 0);
  assert!(node.has_point_data());
  assert!(cache.contains(id));
  assert_eq!(cache.resident_points(), 30);
}

#[test]
fn test_insert_loaded_leaves_rendered_node_alone() {
  let fx = Fixture::new();
  let cache = PointCache::new(1000);
  let mut visuals = NullVisuals::default();
  let (a, node_a) = fx.loaded(0, 10);
  node_a.create_visual(&mut visuals);

  let points = PointData::new(vec![Vec3::ONE; 40], vec![[0; 4]; 40]);
  assert_eq!(cache.insert_loaded(a, node_a.clone(), points), 0);
  assert_eq!(node_a.point_count(), Some(10));
  assert!(cache.is_empty());
}
