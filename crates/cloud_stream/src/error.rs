//! Error types for the streaming engine and its external sources.

use thiserror::Error;

use crate::octree::NodeId;

/// Result alias used across the crate.
pub type StreamResult<T> = Result<T, StreamError>;

/// Failure reported by a [`CloudSource`](crate::CloudSource).
///
/// Never fatal: the affected node keeps its previous state and a later
/// traversal pass may schedule it again.
#[derive(Debug, Error)]
pub enum SourceError {
  /// The requested hierarchy chunk or point file does not exist.
  #[error("not found: {0}")]
  NotFound(String),
  /// Transport failure (file or network).
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
  /// The payload could not be decoded.
  #[error("malformed data: {0}")]
  Malformed(String),
}

/// Engine-level errors.
#[derive(Debug, Error)]
pub enum StreamError {
  /// Configuration rejected at construction time.
  #[error("invalid configuration: {0}")]
  InvalidConfig(String),
  /// `shutdown` was called from a thread other than the one driving `update`.
  #[error("shutdown must be called from the main thread")]
  NotMainThread,
  /// The node id does not refer to a live node (removed or never created).
  #[error("unknown node {0:?}")]
  UnknownNode(NodeId),
  /// A background worker panicked and its state could not be recovered.
  #[error("{0} worker panicked")]
  WorkerPanicked(&'static str),
  /// A background worker thread could not be spawned.
  #[error("failed to spawn worker thread: {0}")]
  Spawn(std::io::Error),
  /// A source failure that had to be surfaced (root chunk of a new cloud).
  #[error(transparent)]
  Source(#[from] SourceError),
}
