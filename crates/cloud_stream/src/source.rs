//! Interfaces to external collaborators.
//!
//! - [`CloudSource`]: hierarchy and point data provider (files, network)
//! - [`VisualOwner`]: engine bridge that turns point data into renderables
//!
//! The streaming core never parses on-disk formats and never touches a
//! graphics device; it only drives these two traits.

use crate::error::SourceError;
use crate::octree::{OctreeNode, PointData, VisualHandle};

/// Provider of hierarchy chunks and point data for one or more clouds.
///
/// Called from the loading worker (a rayon task or a background thread), so
/// implementations must be thread-safe. Calls may block; the loader has a
/// single slot and simply waits for the fetch to finish.
pub trait CloudSource: Send + Sync + 'static {
  /// Child bitmasks in breadth-first order, starting with `node`'s own mask.
  ///
  /// Bit `j` set means child octant `j` exists. Return
  /// [`SourceError::NotFound`] when `node` has no hierarchy chunk.
  fn fetch_hierarchy_chunk(&self, node: &OctreeNode) -> Result<Vec<u8>, SourceError>;

  /// Decoded positions and colors of `node`.
  fn fetch_point_data(&self, node: &OctreeNode) -> Result<PointData, SourceError>;
}

/// Callback interface for engine bridges (Bevy, Unity, Godot...).
///
/// Only ever invoked from the thread that drives
/// [`StreamingEngine::update`](crate::StreamingEngine::update).
pub trait VisualOwner {
  /// Build a renderable for `node` from its point data.
  fn create_visual(&mut self, node: &OctreeNode, points: &PointData) -> VisualHandle;

  /// Destroy a renderable.
  fn destroy_visual(&mut self, handle: VisualHandle);

  /// Hide a renderable without destroying it.
  fn deactivate_visual(&mut self, handle: VisualHandle);

  /// Show a hidden renderable again.
  fn reactivate_visual(&mut self, handle: VisualHandle);
}

/// No-op implementation for testing and headless operation.
#[derive(Debug, Default)]
pub struct NullVisuals {
  next_handle: u64,
  live: usize,
}

impl NullVisuals {
  /// Number of visuals created and not yet destroyed.
  pub fn live(&self) -> usize {
    self.live
  }
}

impl VisualOwner for NullVisuals {
  fn create_visual(&mut self, _node: &OctreeNode, _points: &PointData) -> VisualHandle {
    self.next_handle += 1;
    self.live += 1;
    VisualHandle(self.next_handle)
  }

  fn destroy_visual(&mut self, _handle: VisualHandle) {
    self.live = self.live.saturating_sub(1);
  }

  fn deactivate_visual(&mut self, _handle: VisualHandle) {
    // No-op
  }

  fn reactivate_visual(&mut self, _handle: VisualHandle) {
    // No-op
  }
}
