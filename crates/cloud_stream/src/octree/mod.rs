//! Octree module for point cloud level-of-detail streaming.
//!
//! Nodes live in an arena ([`Octree`]) and are addressed by generational
//! [`NodeId`]s. Parent/child links are ids, so several clouds can share one
//! arena and a removed cloud never leaves dangling references behind.
//!
//! # Paths and octants
//!
//! The root path is `""`; a child appends its octant digit (0-7). Octant
//! bits select the upper half of the parent box along an axis:
//!
//! ```text
//! octant = (x_upper << 2) | (y_upper << 1) | z_upper
//! ```
//!
//! # Module Structure
//!
//! - [`bounds`]: `DAabb3` - double precision box and octant bisection
//! - [`node`]: `OctreeNode` - identity, geometry and residency of one node
//! - [`arena`]: `Octree` - node storage and structural operations
//! - [`hierarchy`]: lazy child discovery from bitmask chunks

pub mod arena;
pub mod bounds;
pub mod hierarchy;
pub mod node;

// Re-exports
pub use arena::{ChildIds, Octree};
pub use bounds::DAabb3;
pub use hierarchy::apply_chunk;
pub use node::{HierarchyState, NodeId, OctreeNode, PointData, ResidencySnapshot, VisualHandle};
