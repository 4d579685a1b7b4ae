//! cloud_stream - Framework/engine independent point cloud streaming
//!
//! Streams point clouds that are far too large to keep in memory by walking
//! an octree of spatial nodes every frame and deciding which nodes should
//! have resident point data and which should have a materialized visual.
//!
//! # Architecture
//!
//! ```text
//!  camera ──► CameraCell ──► Traverser ──► LoadingQueue ──► PointLoader ──► PointCache
//!                               │                                              ▲
//!                               │ (toRender, toDelete, pointCount)             │
//!                               ▼                                              │
//!                           FrameSync ──► VisualOwner (create / destroy) ──────┘
//! ```
//!
//! - **Traversal**: priority-driven walk from every registered root, bounded
//!   by a point budget and per-frame load/materialize budgets
//! - **Loading**: FIFO of nodes awaiting point data, served by one consumer
//! - **Cache**: point-budgeted LRU of loaded but unrendered nodes
//! - **Frame sync**: handshake between the traversal and the owner of the
//!   visuals, plus the external root-removal queue
//!
//! Both a cooperative (single thread, frame driven) and a threaded execution
//! mode are available, see [`ExecutionMode`].
//!
//! # Example
//!
//! ```ignore
//! use cloud_stream::{StreamingConfig, StreamingEngine};
//!
//! let mut engine = StreamingEngine::new(StreamingConfig::default(), my_source)?;
//! let root = engine.register_cloud(cloud_bounds)?;
//!
//! // Every frame, on the main thread:
//! engine.update(camera_snapshot, &mut my_visuals);
//! ```

pub mod camera;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod loading;
pub mod metrics;
pub mod octree;
pub mod priority_queue;
pub mod source;
pub mod sync;
pub mod threading;
pub mod traversal;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used items
pub use camera::{CameraCell, CameraSnapshot, Frustum};
pub use cache::PointCache;
pub use config::{ExecutionMode, StreamingConfig};
pub use engine::StreamingEngine;
pub use error::{SourceError, StreamError, StreamResult};
pub use octree::{DAabb3, HierarchyState, NodeId, Octree, OctreeNode, PointData, VisualHandle};
pub use source::{CloudSource, NullVisuals, VisualOwner};
pub use traversal::{TraversalOutput, TraversalStats, Traverser};
