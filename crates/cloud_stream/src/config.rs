//! StreamingConfig - constructor-time budgets for traversal, loading and
//! caching.

use std::time::Duration;

use crate::error::{StreamError, StreamResult};

/// How the traversal and loading activities are scheduled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExecutionMode {
  /// Everything runs inside `StreamingEngine::update`, one step per frame.
  #[default]
  Cooperative,
  /// Traversal and loading run on dedicated background threads.
  Threaded,
}

/// Configuration for the streaming engine. Immutable once the engine is
/// built.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamingConfig {
  /// Minimum projected node size (pixels). Nodes at or below are not
  /// expanded and their visuals are demolished.
  pub min_node_size: f64,
  /// Maximum number of points materialized at once.
  pub point_budget: u64,
  /// Maximum nodes scheduled for loading per traversal pass.
  pub nodes_loaded_per_frame: u32,
  /// Maximum nodes queued for materialization per traversal pass.
  pub nodes_materialized_per_frame: u32,
  /// Cache capacity in points (loaded but not rendered data).
  pub cache_capacity_points: u64,
  /// Scheduling model.
  pub mode: ExecutionMode,
  /// How long threaded workers block before re-checking their stop flag.
  pub worker_poll_interval: Duration,
}

impl StreamingConfig {
  /// Default budgets.
  pub const DEFAULT: Self = Self {
    min_node_size: 10.0,
    point_budget: 1_000_000,
    nodes_loaded_per_frame: 15,
    nodes_materialized_per_frame: 30,
    cache_capacity_points: 1_000_000,
    mode: ExecutionMode::Cooperative,
    worker_poll_interval: Duration::from_millis(2),
  };

  /// Same budgets, traversal and loading on background threads.
  pub const THREADED: Self = Self {
    mode: ExecutionMode::Threaded,
    ..Self::DEFAULT
  };

  /// Check that the configuration can drive an engine.
  pub fn validate(&self) -> StreamResult<()> {
    if !self.min_node_size.is_finite() || self.min_node_size < 0.0 {
      return Err(StreamError::InvalidConfig(format!(
        "min_node_size must be finite and non-negative, got {}",
        self.min_node_size
      )));
    }
    if self.worker_poll_interval.is_zero() {
      return Err(StreamError::InvalidConfig(
        "worker_poll_interval must be non-zero".to_string(),
      ));
    }
    Ok(())
  }
}

impl Default for StreamingConfig {
  fn default() -> Self {
    Self::DEFAULT
  }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
