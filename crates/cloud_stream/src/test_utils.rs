//! Shared fixtures for unit tests.
//!
//! - [`MemorySource`]: in-memory hierarchy and point data with failure
//!   injection and fetch counters
//! - [`RecordingVisuals`]: visual owner that records create/destroy order
//! - camera helpers and a bounded polling helper for threaded tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use glam::{DVec3, Vec3};

use crate::cache::PointCache;
use crate::camera::{CameraSnapshot, Frustum};
use crate::error::SourceError;
use crate::loading::{LoadContext, LoadingQueue};
use crate::metrics::StreamMetrics;
use crate::octree::{DAabb3, Octree, OctreeNode, PointData, VisualHandle};
use crate::source::{CloudSource, VisualOwner};

// =============================================================================
// Sources
// =============================================================================

/// Cloud source backed by hash maps keyed by node path.
#[derive(Default)]
pub struct MemorySource {
  chunks: HashMap<String, Vec<u8>>,
  points: HashMap<String, usize>,
  default_points: usize,
  failing: HashSet<String>,
  /// Remaining injected failures per hierarchy chunk.
  failing_chunks: Mutex<HashMap<String, usize>>,
  delay: Duration,
  pub point_fetches: AtomicUsize,
  pub chunk_fetches: AtomicUsize,
}

impl MemorySource {
  /// Every node has `default_points` points; no hierarchy chunks.
  pub fn new(default_points: usize) -> Self {
    Self {
      default_points,
      ..Default::default()
    }
  }

  /// Complete octree of `depth` levels below the root, described by a
  /// single root chunk.
  pub fn full_tree(depth: u32, points_per_node: usize) -> Self {
    let inner: usize = (0..depth).map(|level| 8usize.pow(level)).sum();
    let leaves = 8usize.pow(depth);
    let mut masks = vec![0xFF; inner];
    masks.extend(std::iter::repeat(0).take(leaves));
    Self::new(points_per_node).with_chunk("", masks)
  }

  pub fn with_chunk(mut self, path: &str, masks: Vec<u8>) -> Self {
    self.chunks.insert(path.to_string(), masks);
    self
  }

  pub fn with_points(mut self, path: &str, count: usize) -> Self {
    self.points.insert(path.to_string(), count);
    self
  }

  /// Point fetches for `path` fail with an I/O error.
  pub fn failing(mut self, path: &str) -> Self {
    self.failing.insert(path.to_string());
    self
  }

  /// The next `times` chunk fetches for `path` fail with an I/O error.
  pub fn failing_chunk(self, path: &str, times: usize) -> Self {
    self.failing_chunks.lock().unwrap().insert(path.to_string(), times);
    self
  }

  /// Sleep this long in every fetch.
  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn point_fetches(&self) -> usize {
    self.point_fetches.load(Ordering::SeqCst)
  }

  pub fn chunk_fetches(&self) -> usize {
    self.chunk_fetches.load(Ordering::SeqCst)
  }
}

impl CloudSource for MemorySource {
  fn fetch_hierarchy_chunk(&self, node: &OctreeNode) -> Result<Vec<u8>, SourceError> {
    self.chunk_fetches.fetch_add(1, Ordering::SeqCst);
    if !self.delay.is_zero() {
      std::thread::sleep(self.delay);
    }
    if let Some(left) = self.failing_chunks.lock().unwrap().get_mut(node.path()) {
      if *left > 0 {
        *left -= 1;
        return Err(injected_failure());
      }
    }
    self
      .chunks
      .get(node.path())
      .cloned()
      .ok_or_else(|| SourceError::NotFound(format!("r{}.hrc", node.path())))
  }

  fn fetch_point_data(&self, node: &OctreeNode) -> Result<PointData, SourceError> {
    self.point_fetches.fetch_add(1, Ordering::SeqCst);
    if !self.delay.is_zero() {
      std::thread::sleep(self.delay);
    }
    if self.failing.contains(node.path()) {
      return Err(injected_failure());
    }
    let count = self.points.get(node.path()).copied().unwrap_or(self.default_points);
    let center = node.bounds().center().as_vec3();
    Ok(PointData::new(vec![center; count], vec![[255, 255, 255, 255]; count]))
  }
}

fn injected_failure() -> SourceError {
  SourceError::Io(std::io::Error::new(
    std::io::ErrorKind::ConnectionReset,
    "injected failure",
  ))
}

/// Load context over a fresh arena.
pub fn context<S: CloudSource>(source: S, cache_capacity: u64) -> LoadContext<S> {
  LoadContext {
    tree: Arc::new(Octree::new()),
    cache: Arc::new(PointCache::new(cache_capacity)),
    source: Arc::new(source),
    queue: LoadingQueue::new(),
    metrics: Arc::new(Mutex::new(StreamMetrics::new())),
  }
}

/// Give a node `n` points directly, bypassing any source.
pub fn load_points(node: &OctreeNode, n: usize) {
  node.set_point_data(PointData::new(vec![Vec3::ZERO; n], vec![[0; 4]; n]));
}

// =============================================================================
// Visuals
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VisualEvent {
  Created(String),
  Destroyed(String),
  Deactivated(String),
  Reactivated(String),
}

/// Visual owner that records every call, by node path.
#[derive(Debug, Default)]
pub struct RecordingVisuals {
  next_handle: u64,
  paths: HashMap<VisualHandle, String>,
  pub events: Vec<VisualEvent>,
}

impl RecordingVisuals {
  pub fn new() -> Self {
    Self::default()
  }

  /// Paths of the visuals alive right now.
  pub fn live(&self) -> usize {
    self.paths.len()
  }

  pub fn created(&self) -> Vec<String> {
    self
      .events
      .iter()
      .filter_map(|e| match e {
        VisualEvent::Created(path) => Some(path.clone()),
        _ => None,
      })
      .collect()
  }

  pub fn destroyed(&self) -> Vec<String> {
    self
      .events
      .iter()
      .filter_map(|e| match e {
        VisualEvent::Destroyed(path) => Some(path.clone()),
        _ => None,
      })
      .collect()
  }

  fn path(&self, handle: VisualHandle) -> String {
    self.paths.get(&handle).cloned().unwrap_or_default()
  }
}

impl VisualOwner for RecordingVisuals {
  fn create_visual(&mut self, node: &OctreeNode, points: &PointData) -> VisualHandle {
    assert!(!points.is_empty() || node.point_count() == Some(0));
    self.next_handle += 1;
    let handle = VisualHandle(self.next_handle);
    self.paths.insert(handle, node.path().to_string());
    self.events.push(VisualEvent::Created(node.path().to_string()));
    handle
  }

  fn destroy_visual(&mut self, handle: VisualHandle) {
    let path = self.path(handle);
    self.paths.remove(&handle);
    self.events.push(VisualEvent::Destroyed(path));
  }

  fn deactivate_visual(&mut self, handle: VisualHandle) {
    let path = self.path(handle);
    self.events.push(VisualEvent::Deactivated(path));
  }

  fn reactivate_visual(&mut self, handle: VisualHandle) {
    let path = self.path(handle);
    self.events.push(VisualEvent::Reactivated(path));
  }
}

// =============================================================================
// Cameras
// =============================================================================

/// Bounds of the test clouds: a 100 unit cube at the origin.
pub fn cloud_bounds() -> DAabb3 {
  DAabb3::new(DVec3::ZERO, DVec3::splat(100.0))
}

/// Camera at `position` looking at `target` with a frustum that accepts
/// everything (screen 1000 px, 90 degree field of view).
pub fn open_camera(position: DVec3, target: DVec3) -> CameraSnapshot {
  CameraSnapshot {
    position,
    forward: (target - position).normalize_or_zero(),
    frustum: Frustum::EVERYTHING,
    screen_height: 1000.0,
    field_of_view: std::f64::consts::FRAC_PI_2,
  }
}

/// Open camera looking at the center of [`cloud_bounds`] from `distance`
/// units in front of it (+Z).
pub fn camera_at_distance(distance: f64) -> CameraSnapshot {
  let center = cloud_bounds().center();
  open_camera(center + DVec3::Z * distance, center)
}

/// Perspective camera with a real frustum.
pub fn perspective_camera(position: DVec3, target: DVec3) -> CameraSnapshot {
  CameraSnapshot::look_at(
    position,
    target,
    std::f64::consts::FRAC_PI_2,
    1000.0,
    1.0,
    0.1,
    1.0e6,
  )
}

// =============================================================================
// Polling
// =============================================================================

/// Poll `condition` every millisecond until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
  let deadline = std::time::Instant::now() + timeout;
  while std::time::Instant::now() < deadline {
    if condition() {
      return true;
    }
    std::thread::sleep(Duration::from_millis(1));
  }
  condition()
}
