//! Frame synchronizer: hands traversal results to the owner of the visuals.
//!
//! # Handshake
//!
//! ```text
//! Traverser                          Main thread
//! ┌──────────────────┐   frames    ┌─────────────────────┐
//! │ ready()?         │   bounded(1)│ try_take()          │
//! │ traverse         │────────────►│ apply: toDelete,    │
//! │ publish(output)  │             │        toRender     │
//! │ wait for ack     │◄────────────│ acknowledge()       │
//! └──────────────────┘    acks     │ process removals    │
//!                                  └─────────────────────┘
//! ```
//!
//! The traverser never starts a pass while its previous output is
//! unconsumed, and the main thread only applies a frame when a new one was
//! published. `toDelete` is applied before `toRender` so demolished nodes
//! are back in the cache before newly rendered ones leave it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use crossbeam_channel::{self as channel, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::cache::PointCache;
use crate::octree::{NodeId, Octree};
use crate::source::VisualOwner;
use crate::traversal::TraversalOutput;

/// Create a connected publisher / receiver pair.
pub fn frame_channel() -> (FramePublisher, FrameReceiver) {
  let (frames_tx, frames_rx) = channel::bounded(1);
  let (acks_tx, acks_rx) = channel::bounded(1);
  (
    FramePublisher {
      frames: frames_tx,
      acks: acks_rx,
      awaiting_ack: false,
    },
    FrameReceiver {
      frames: frames_rx,
      acks: acks_tx,
    },
  )
}

/// Traversal side of the handshake.
#[derive(Debug)]
pub struct FramePublisher {
  frames: Sender<TraversalOutput>,
  acks: Receiver<()>,
  awaiting_ack: bool,
}

impl FramePublisher {
  /// True when the previous output was consumed and a new pass may run.
  pub fn ready(&mut self) -> bool {
    if self.awaiting_ack {
      match self.acks.try_recv() {
        Ok(()) => self.awaiting_ack = false,
        Err(TryRecvError::Empty) => {}
        // Receiver gone: nobody will ever consume a frame again.
        Err(TryRecvError::Disconnected) => return false,
      }
    }
    !self.awaiting_ack
  }

  /// Like [`ready`](Self::ready), but waits up to `timeout` for the ack.
  pub fn wait_ready(&mut self, timeout: Duration) -> bool {
    if self.awaiting_ack {
      match self.acks.recv_timeout(timeout) {
        Ok(()) => self.awaiting_ack = false,
        Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return false,
      }
    }
    true
  }

  /// Publish a pass. Returns false when not ready or the receiver is gone.
  pub fn publish(&mut self, output: TraversalOutput) -> bool {
    if !self.ready() {
      return false;
    }
    match self.frames.try_send(output) {
      Ok(()) => {
        self.awaiting_ack = true;
        true
      }
      Err(_) => false,
    }
  }
}

/// Main-thread side of the handshake.
#[derive(Debug)]
pub struct FrameReceiver {
  frames: Receiver<TraversalOutput>,
  acks: Sender<()>,
}

impl FrameReceiver {
  /// Latest published output, if a new one arrived.
  pub fn try_take(&self) -> Option<TraversalOutput> {
    self.frames.try_recv().ok()
  }

  /// Let the traversal start its next pass.
  pub fn acknowledge(&self) {
    // Full means an ack is already pending; disconnected means the
    // traversal is gone. Neither needs handling.
    let _ = self.acks.try_send(());
  }
}

/// External queue of roots to unregister. Cheap to clone.
///
/// A root is queued at most once until its removal is processed.
#[derive(Clone, Debug)]
pub struct RemovalQueue {
  tx: Sender<NodeId>,
  rx: Receiver<NodeId>,
  pending: Arc<Mutex<HashSet<NodeId>>>,
}

impl Default for RemovalQueue {
  fn default() -> Self {
    Self::new()
  }
}

impl RemovalQueue {
  pub fn new() -> Self {
    let (tx, rx) = channel::unbounded();
    Self {
      tx,
      rx,
      pending: Arc::default(),
    }
  }

  fn pending_set(&self) -> MutexGuard<'_, HashSet<NodeId>> {
    self.pending.lock().expect("removal queue lock poisoned")
  }

  /// Schedule `root` for removal at the next sync. Returns false when it is
  /// already scheduled.
  pub fn push(&self, root: NodeId) -> bool {
    if !self.pending_set().insert(root) {
      return false;
    }
    let _ = self.tx.send(root);
    true
  }

  /// Roots scheduled but not yet removed.
  pub fn pending(&self) -> usize {
    self.pending_set().len()
  }

  /// True when `root` is scheduled but not yet removed.
  pub fn is_pending(&self, root: NodeId) -> bool {
    self.pending_set().contains(&root)
  }

  fn try_pop(&self) -> Option<NodeId> {
    let root = self.rx.try_recv().ok()?;
    self.pending_set().remove(&root);
    Some(root)
  }
}

/// What one [`FrameSync::sync`] call did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
  /// A new traversal output was applied.
  pub applied: bool,
  pub created: usize,
  pub destroyed: usize,
  /// `toRender` nodes refused because their parent has no visual.
  pub declined: usize,
  /// Cache evictions caused by re-inserting demolished nodes.
  pub evicted: usize,
  pub removed_roots: usize,
}

/// Main-thread synchronizer. Owns the only code path that creates or
/// destroys visuals during streaming.
#[derive(Debug)]
pub struct FrameSync {
  frames: FrameReceiver,
  removals: RemovalQueue,
  point_count: u64,
}

impl FrameSync {
  pub fn new(frames: FrameReceiver, removals: RemovalQueue) -> Self {
    Self {
      frames,
      removals,
      point_count: 0,
    }
  }

  /// Rendering point count of the last applied frame.
  pub fn point_count(&self) -> u64 {
    self.point_count
  }

  /// Apply the latest frame (if any), acknowledge it, then process
  /// pending root removals.
  #[cfg_attr(feature = "profiling", tracing::instrument(skip_all, name = "sync::sync"))]
  pub fn sync<V: VisualOwner + ?Sized>(
    &mut self,
    tree: &Octree,
    cache: &PointCache,
    roots: &RwLock<Vec<NodeId>>,
    owner: &mut V,
  ) -> SyncReport {
    let mut report = SyncReport::default();
    if let Some(output) = self.frames.try_take() {
      report = apply_frame(&output, tree, cache, owner);
      self.point_count = output.rendering_points;
      self.frames.acknowledge();
    }
    report.removed_roots = self.process_removals(tree, cache, roots, owner);
    report
  }

  /// Process pending root removals only. Used while the engine is paused,
  /// when no frame may be applied. Returns the number of removed roots.
  pub fn process_removals<V: VisualOwner + ?Sized>(
    &mut self,
    tree: &Octree,
    cache: &PointCache,
    roots: &RwLock<Vec<NodeId>>,
    owner: &mut V,
  ) -> usize {
    let mut removed = 0;
    while let Some(root) = self.removals.try_pop() {
      remove_root(root, tree, cache, roots, owner);
      removed += 1;
    }
    removed
  }
}

/// Destroy the visuals of `to_delete`, then create those of `to_render`.
pub fn apply_frame<V: VisualOwner + ?Sized>(
  output: &TraversalOutput,
  tree: &Octree,
  cache: &PointCache,
  owner: &mut V,
) -> SyncReport {
  let mut report = SyncReport {
    applied: true,
    ..Default::default()
  };

  for &id in &output.to_delete {
    let Some(node) = tree.get(id) else {
      continue;
    };
    if node.remove_visual(owner) {
      report.destroyed += 1;
      report.evicted += cache.insert(id, node);
    }
  }

  for &id in &output.to_render {
    let Some(node) = tree.get(id) else {
      continue;
    };
    if !node.has_point_data() {
      continue;
    }
    // Parents are always materialized before their children.
    let parent_ready = node
      .parent()
      .map_or(true, |parent| tree.get(parent).is_some_and(|p| p.has_visual()));
    if parent_ready {
      // Out of the cache before the owner runs: its callbacks may insert
      // other nodes and evict this one mid-creation.
      cache.withdraw(id);
      if node.create_visual(owner) {
        report.created += 1;
        cache.withdraw(id);
      } else {
        report.evicted += cache.insert(id, node);
      }
    } else {
      report.declined += 1;
      report.evicted += cache.insert(id, node);
    }
  }

  report
}

/// Unregister `root`, then release everything below it.
///
/// Nodes leave the arena before their cache entries are withdrawn, so a
/// loader that inserts after the withdrawal sees the removal and cleans up
/// after itself.
fn remove_root<V: VisualOwner + ?Sized>(
  root: NodeId,
  tree: &Octree,
  cache: &PointCache,
  roots: &RwLock<Vec<NodeId>>,
  owner: &mut V,
) {
  let nodes: Vec<_> = tree
    .subtree(root)
    .into_iter()
    .filter_map(|id| tree.get(id).map(|node| (id, node)))
    .collect();
  roots
    .write()
    .expect("root list lock poisoned")
    .retain(|r| *r != root);
  let freed = tree.remove_subtree(root);

  for (id, node) in nodes {
    cache.withdraw(id);
    node.remove_visual(owner);
    node.forget_point_data();
  }
  tracing::info!(?root, nodes = freed, "point cloud removed");
}

#[cfg(test)]
#[path = "sync_test.rs"]
mod sync_test;
