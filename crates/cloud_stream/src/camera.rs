//! Camera input for the traversal.
//!
//! The host pushes a [`CameraSnapshot`] every frame; the traversal reads the
//! latest one at the start of each pass. Snapshots are plain `Copy` values
//! swapped under a lock, so a reader never sees half an update.

use std::sync::Mutex;

use glam::{DMat4, DVec3, DVec4};

use crate::octree::DAabb3;

/// Six clip planes, `n · p + d >= 0` inside.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
  /// Left, right, bottom, top, near, far. `xyz` = normal, `w` = distance.
  pub planes: [DVec4; 6],
}

impl Frustum {
  /// Frustum that contains everything.
  pub const EVERYTHING: Self = Self {
    planes: [DVec4::W; 6],
  };

  /// Extract the planes of a view-projection matrix with a `[0, 1]` depth
  /// range (glam `perspective_rh` / `perspective_lh`).
  pub fn from_view_projection(view_proj: DMat4) -> Self {
    let r0 = view_proj.row(0);
    let r1 = view_proj.row(1);
    let r2 = view_proj.row(2);
    let r3 = view_proj.row(3);

    let normalize = |plane: DVec4| {
      let len = plane.truncate().length();
      if len > 0.0 {
        plane / len
      } else {
        plane
      }
    };

    Self {
      planes: [
        normalize(r3 + r0),
        normalize(r3 - r0),
        normalize(r3 + r1),
        normalize(r3 - r1),
        normalize(r2),
        normalize(r3 - r2),
      ],
    }
  }

  /// Signed distance of `point` to `plane` (positive inside).
  #[inline]
  fn distance(plane: DVec4, point: DVec3) -> f64 {
    plane.truncate().dot(point) + plane.w
  }

  /// True when `point` is inside or on every plane.
  pub fn contains_point(&self, point: DVec3) -> bool {
    self.planes.iter().all(|plane| Self::distance(*plane, point) >= 0.0)
  }

  /// Conservative box test: false only when the box is entirely outside
  /// one of the planes.
  pub fn intersects_aabb(&self, aabb: &DAabb3) -> bool {
    self.planes.iter().all(|plane| {
      let normal = plane.truncate();
      let positive = DVec3::select(normal.cmpge(DVec3::ZERO), aabb.max, aabb.min);
      Self::distance(*plane, positive) >= 0.0
    })
  }
}

/// Everything the traversal needs to know about the camera for one pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraSnapshot {
  /// World-space eye position.
  pub position: DVec3,
  /// View direction (normalized on use).
  pub forward: DVec3,
  pub frustum: Frustum,
  /// Viewport height in pixels.
  pub screen_height: f64,
  /// Vertical field of view in radians.
  pub field_of_view: f64,
}

impl CameraSnapshot {
  /// Right-handed perspective camera looking from `position` at `target`.
  pub fn look_at(
    position: DVec3,
    target: DVec3,
    field_of_view: f64,
    screen_height: f64,
    aspect: f64,
    near: f64,
    far: f64,
  ) -> Self {
    let view = DMat4::look_at_rh(position, target, DVec3::Y);
    let projection = DMat4::perspective_rh(field_of_view, aspect, near, far);
    Self {
      position,
      forward: (target - position).normalize_or_zero(),
      frustum: Frustum::from_view_projection(projection * view),
      screen_height,
      field_of_view,
    }
  }
}

/// Latest-snapshot cell shared between the host and the traversal.
#[derive(Debug, Default)]
pub struct CameraCell {
  latest: Mutex<Option<CameraSnapshot>>,
}

impl CameraCell {
  pub fn new() -> Self {
    Self::default()
  }

  /// Replace the snapshot.
  pub fn set(&self, snapshot: CameraSnapshot) {
    *self.latest.lock().expect("camera lock poisoned") = Some(snapshot);
  }

  /// Copy of the latest snapshot, `None` until the first `set`.
  pub fn latest(&self) -> Option<CameraSnapshot> {
    *self.latest.lock().expect("camera lock poisoned")
  }
}
