//! Double-precision bounds of octree nodes.
//!
//! Georeferenced clouds routinely sit millions of units from the origin,
//! so node boxes are kept in `f64` and only point positions drop to `f32`.

use glam::DVec3;

/// Axis-aligned box in world space.
///
/// Child boxes are never read from disk: they are derived by halving the
/// parent along the axes selected by the octant digit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DAabb3 {
	pub min: DVec3,
	pub max: DVec3,
}

impl DAabb3 {
	/// Box spanning `min..=max`. Debug builds reject inverted corners.
	pub fn new(min: DVec3, max: DVec3) -> Self {
		debug_assert!(min.cmple(max).all(), "inverted bounds: {min} > {max}");
		Self { min, max }
	}

	pub fn from_center_half_extents(center: DVec3, half_extents: DVec3) -> Self {
		Self::new(center - half_extents, center + half_extents)
	}

	/// Inclusive on every face.
	#[inline]
	pub fn contains(&self, point: DVec3) -> bool {
		point.cmpge(self.min).all() && point.cmple(self.max).all()
	}

	/// Edge lengths.
	#[inline]
	pub fn size(&self) -> DVec3 {
		self.max - self.min
	}

	#[inline]
	pub fn center(&self) -> DVec3 {
		(self.min + self.max) * 0.5
	}

	/// Radius of the enclosing sphere (half the diagonal). Used for the
	/// projected size of a node.
	#[inline]
	pub fn radius(&self) -> f64 {
		0.5 * self.min.distance(self.max)
	}

	/// Bounds of child `octant` (0-7).
	///
	/// Bit 4 picks the upper x half, bit 2 the upper y half and bit 1 the
	/// upper z half, so octant 0 is the corner at `min` and octant 7 the
	/// corner at `max`.
	pub fn octant(&self, octant: u8) -> Self {
		debug_assert!(octant < 8, "octant {octant} out of range");
		let mid = self.center();
		let upper = glam::BVec3::new(octant & 4 != 0, octant & 2 != 0, octant & 1 != 0);
		Self {
			min: DVec3::select(upper, mid, self.min),
			max: DVec3::select(upper, self.max, mid),
		}
	}
}
