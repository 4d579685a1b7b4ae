//! Traversal pass benchmarks over synthetic complete octrees.
//!
//! - **warm**: every node loaded and materialized (steady state, the pass
//!   only confirms the visible set)
//! - **cold**: nothing loaded (every visited node schedules a load)
//! - **moving**: warm tree, camera alternating between two positions so
//!   each pass demolishes and re-queues part of the tree

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use cloud_stream::loading::LoadingQueue;
use cloud_stream::traversal::TraversalBudget;
use cloud_stream::{
  CameraSnapshot, DAabb3, NodeId, NullVisuals, Octree, PointCache, PointData, Traverser,
};
use glam::{DVec3, Vec3};

const POINTS_PER_NODE: usize = 64;

/// Complete octree of `depth` levels below one root, optionally loaded and
/// materialized.
fn build_tree(depth: u32, materialize: bool) -> (Octree, NodeId, NullVisuals) {
  let tree = Octree::new();
  let root = tree.create_root(DAabb3::new(DVec3::ZERO, DVec3::splat(1024.0)));
  let mut level = vec![root];
  for _ in 0..depth {
    level = level
      .iter()
      .flat_map(|&parent| (0..8u8).map(move |o| (parent, o)))
      .filter_map(|(parent, o)| tree.create_child(parent, o))
      .collect();
  }

  let mut visuals = NullVisuals::default();
  if materialize {
    for id in tree.subtree(root) {
      let node = tree.get(id).unwrap();
      node.set_point_data(PointData::new(
        vec![Vec3::ZERO; POINTS_PER_NODE],
        vec![[255; 4]; POINTS_PER_NODE],
      ));
      node.create_visual(&mut visuals);
    }
  }
  (tree, root, visuals)
}

fn camera(position: DVec3) -> CameraSnapshot {
  CameraSnapshot::look_at(
    position,
    DVec3::splat(512.0),
    std::f64::consts::FRAC_PI_3,
    1080.0,
    16.0 / 9.0,
    0.1,
    1.0e5,
  )
}

fn budget() -> TraversalBudget {
  TraversalBudget {
    min_node_size: 100.0,
    ..TraversalBudget::UNLIMITED
  }
}

fn bench_warm(c: &mut Criterion) {
  let mut group = c.benchmark_group("traversal_warm");
  for depth in [3u32, 4, 5] {
    let (tree, root, _visuals) = build_tree(depth, true);
    let cache = PointCache::new(u64::MAX);
    let loads = LoadingQueue::new();
    let cam = camera(DVec3::new(512.0, 512.0, 2048.0));
    let mut traverser = Traverser::new(budget());

    group.throughput(Throughput::Elements(tree.len() as u64));
    group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
      b.iter(|| black_box(traverser.traverse(&tree, &[root], Some(&cam), &cache, &loads)))
    });
  }
  group.finish();
}

fn bench_cold(c: &mut Criterion) {
  let mut group = c.benchmark_group("traversal_cold");
  for depth in [3u32, 4, 5] {
    let (tree, root, _visuals) = build_tree(depth, false);
    let cache = PointCache::new(u64::MAX);
    let cam = camera(DVec3::new(512.0, 512.0, 2048.0));

    group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
      b.iter_batched(
        || (Traverser::new(budget()), LoadingQueue::new()),
        |(mut traverser, loads)| {
          black_box(traverser.traverse(&tree, &[root], Some(&cam), &cache, &loads))
        },
        BatchSize::SmallInput,
      )
    });
  }
  group.finish();
}

fn bench_moving(c: &mut Criterion) {
  let (tree, root, _visuals) = build_tree(4, true);
  let cache = PointCache::new(u64::MAX);
  let loads = LoadingQueue::new();
  let near = camera(DVec3::new(512.0, 512.0, 1200.0));
  let far = camera(DVec3::new(512.0, 512.0, 8000.0));
  let mut traverser = Traverser::new(budget());
  let mut flip = false;

  c.bench_function("traversal_moving", |b| {
    b.iter(|| {
      flip = !flip;
      let cam = if flip { &near } else { &far };
      black_box(traverser.traverse(&tree, &[root], Some(cam), &cache, &loads))
    })
  });
}

criterion_group!(benches, bench_warm, bench_cold, bench_moving);
criterion_main!(benches);
