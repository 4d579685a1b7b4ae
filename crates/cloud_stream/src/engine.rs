//! StreamingEngine - wires traversal, loading, cache and frame sync together.
//!
//! # Frame loop
//!
//! ```text
//! update(camera, owner)
//!   ├─ camera.set(snapshot)
//!   ├─ [cooperative] traversal pass, if the last one was consumed
//!   ├─ sync: apply toDelete / toRender, acknowledge, process removals
//!   └─ [cooperative] one loader step
//! ```
//!
//! In [`ExecutionMode::Threaded`] the traversal and the loader run on their
//! own [`Worker`] threads and `update` only feeds the camera and syncs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::ThreadId;
use std::time::Duration;

use crate::cache::PointCache;
use crate::camera::{CameraCell, CameraSnapshot};
use crate::config::{ExecutionMode, StreamingConfig};
use crate::error::{StreamError, StreamResult};
use crate::loading::{run_worker, LoadContext, LoadingQueue, PointLoader};
use crate::metrics::StreamMetrics;
use crate::octree::{apply_chunk, DAabb3, NodeId, Octree};
use crate::source::{CloudSource, VisualOwner};
use crate::sync::{frame_channel, FramePublisher, FrameSync, RemovalQueue, SyncReport};
use crate::threading::Worker;
use crate::traversal::{TraversalBudget, Traverser};

/// Shared state read by every traversal pass.
#[derive(Clone)]
struct TraversalInputs {
  tree: Arc<Octree>,
  roots: Arc<RwLock<Vec<NodeId>>>,
  camera: Arc<CameraCell>,
  cache: Arc<PointCache>,
  queue: LoadingQueue,
  metrics: Arc<Mutex<StreamMetrics>>,
}

/// Traverser plus its side of the frame handshake. Moves onto the worker
/// thread in threaded mode and comes back when paused.
struct TraversalTask {
  traverser: Traverser,
  publisher: FramePublisher,
}

impl TraversalTask {
  /// Run one pass and publish it.
  fn run_pass(&mut self, inputs: &TraversalInputs) {
    let roots = inputs.roots.read().expect("root list lock poisoned").clone();
    let camera = inputs.camera.latest();
    let output = self.traverser.traverse(
      &inputs.tree,
      &roots,
      camera.as_ref(),
      &inputs.cache,
      &inputs.queue,
    );
    inputs
      .metrics
      .lock()
      .expect("metrics lock poisoned")
      .record_traversal(output.stats.elapsed_us, output.rendering_points, output.stats.scheduled_loads);
    self.publisher.publish(output);
  }
}

fn run_traversal(
  mut task: TraversalTask,
  inputs: TraversalInputs,
  stop: &AtomicBool,
  poll_interval: Duration,
) -> TraversalTask {
  tracing::info!("traversal worker started");
  while !stop.load(Ordering::Acquire) {
    if task.publisher.wait_ready(poll_interval) {
      task.run_pass(&inputs);
    }
  }
  tracing::info!("traversal worker stopped");
  task
}

enum TraversalSlot {
  Local(TraversalTask),
  Thread(Worker<TraversalTask>),
  /// Only while switching between the two.
  Empty,
}

enum LoaderSlot<S: CloudSource> {
  Cooperative(PointLoader<S>),
  Threaded(Option<Worker<()>>),
}

/// Point cloud streaming engine.
///
/// Drive it from one thread (the "main" thread) by calling
/// [`update`](Self::update) once per frame.
pub struct StreamingEngine<S: CloudSource> {
  // Workers first: fields drop in order, so threads are joined while the
  // frame receiver is still connected.
  traversal: TraversalSlot,
  loader: LoaderSlot<S>,
  config: StreamingConfig,
  loading: LoadContext<S>,
  inputs: TraversalInputs,
  removals: RemovalQueue,
  sync: FrameSync,
  paused: bool,
  hidden: bool,
  shut_down: bool,
  main_thread: Option<ThreadId>,
}

impl<S: CloudSource> StreamingEngine<S> {
  /// Build an engine. In threaded mode the workers start immediately.
  pub fn new(config: StreamingConfig, source: S) -> StreamResult<Self> {
    config.validate()?;

    let tree = Arc::new(Octree::new());
    let cache = Arc::new(PointCache::new(config.cache_capacity_points));
    let queue = LoadingQueue::new();
    let metrics = Arc::new(Mutex::new(StreamMetrics::new()));

    let loading = LoadContext {
      tree: Arc::clone(&tree),
      cache: Arc::clone(&cache),
      source: Arc::new(source),
      queue: queue.clone(),
      metrics: Arc::clone(&metrics),
    };
    let inputs = TraversalInputs {
      tree,
      roots: Arc::new(RwLock::new(Vec::new())),
      camera: Arc::new(CameraCell::new()),
      cache,
      queue,
      metrics,
    };

    let (publisher, receiver) = frame_channel();
    let removals = RemovalQueue::new();
    let task = TraversalTask {
      traverser: Traverser::new(TraversalBudget::from_config(&config)),
      publisher,
    };
    let loader = match config.mode {
      ExecutionMode::Cooperative => LoaderSlot::Cooperative(PointLoader::new(loading.clone())),
      ExecutionMode::Threaded => LoaderSlot::Threaded(None),
    };

    let mut engine = Self {
      config,
      loading,
      inputs,
      sync: FrameSync::new(receiver, removals.clone()),
      removals,
      traversal: TraversalSlot::Local(task),
      loader,
      paused: false,
      hidden: false,
      shut_down: false,
      main_thread: None,
    };
    engine.start_workers()?;
    Ok(engine)
  }

  pub fn config(&self) -> &StreamingConfig {
    &self.config
  }

  /// The node arena shared by all registered clouds.
  pub fn tree(&self) -> &Octree {
    &self.inputs.tree
  }

  pub fn cache(&self) -> &PointCache {
    &self.inputs.cache
  }

  pub fn loading_queue(&self) -> &LoadingQueue {
    &self.inputs.queue
  }

  /// Copy of the current statistics.
  pub fn metrics(&self) -> StreamMetrics {
    self.inputs.metrics.lock().expect("metrics lock poisoned").clone()
  }

  // ===========================================================================
  // Clouds
  // ===========================================================================

  /// Register a point cloud with the given root bounds.
  ///
  /// Fetches the root hierarchy chunk on the calling thread and queues the
  /// rest of the hierarchy for the loader.
  pub fn register_cloud(&self, bounds: DAabb3) -> StreamResult<NodeId> {
    let tree = &self.inputs.tree;
    let root = tree.create_root(bounds);
    let node = tree.get(root).ok_or(StreamError::UnknownNode(root))?;

    let frontier = self
      .loading
      .source
      .fetch_hierarchy_chunk(&node)
      .map_err(StreamError::from)
      .and_then(|masks| apply_chunk(tree, root, &masks));
    let frontier = match frontier {
      Ok(frontier) => frontier,
      Err(err) => {
        tree.remove_subtree(root);
        return Err(err);
      }
    };

    for id in &frontier {
      self.inputs.queue.schedule_hierarchy(*id);
    }
    self.inputs.roots.write().expect("root list lock poisoned").push(root);
    tracing::info!(?root, nodes = tree.subtree(root).len(), "point cloud registered");
    Ok(root)
  }

  /// Schedule a registered root for removal at the next `update`.
  pub fn remove_root(&self, root: NodeId) -> StreamResult<()> {
    let registered = self
      .inputs
      .roots
      .read()
      .expect("root list lock poisoned")
      .contains(&root);
    if !registered {
      return Err(StreamError::UnknownNode(root));
    }
    if !self.removals.push(root) {
      tracing::debug!(?root, "root removal already pending");
    }
    Ok(())
  }

  /// Registered roots minus those waiting for removal.
  pub fn root_count(&self) -> usize {
    let registered = self.inputs.roots.read().expect("root list lock poisoned").len();
    registered.saturating_sub(self.removals.pending())
  }

  /// Snapshot of the registered roots.
  pub fn roots(&self) -> Vec<NodeId> {
    self.inputs.roots.read().expect("root list lock poisoned").clone()
  }

  /// Rendering point count of the last applied traversal pass.
  pub fn point_count(&self) -> u64 {
    self.sync.point_count()
  }

  // ===========================================================================
  // Frame
  // ===========================================================================

  /// Per-frame entry point. Call from the main thread.
  #[cfg_attr(feature = "profiling", tracing::instrument(skip_all, name = "engine::update"))]
  pub fn update<V: VisualOwner + ?Sized>(&mut self, camera: CameraSnapshot, owner: &mut V) -> SyncReport {
    self.main_thread.get_or_insert_with(|| std::thread::current().id());
    if self.shut_down {
      return SyncReport::default();
    }
    self.inputs.camera.set(camera);

    // A frame published before the pause stays queued until resume.
    if self.paused {
      let removed_roots = self.sync.process_removals(
        &self.inputs.tree,
        &self.inputs.cache,
        &self.inputs.roots,
        owner,
      );
      return SyncReport {
        removed_roots,
        ..Default::default()
      };
    }

    let cooperative = self.config.mode == ExecutionMode::Cooperative;
    if cooperative {
      if let TraversalSlot::Local(task) = &mut self.traversal {
        if task.publisher.ready() {
          task.run_pass(&self.inputs);
        }
      }
    }

    let report = self
      .sync
      .sync(&self.inputs.tree, &self.inputs.cache, &self.inputs.roots, owner);
    if report.applied {
      let mut metrics = self.inputs.metrics.lock().expect("metrics lock poisoned");
      metrics.record_visuals(report.created, report.destroyed);
      metrics.record_evictions(report.evicted);
    }

    if cooperative {
      if let LoaderSlot::Cooperative(loader) = &mut self.loader {
        loader.step();
      }
    }
    report
  }

  /// Push a camera snapshot without syncing (threaded hosts may feed the
  /// camera from another thread).
  pub fn set_camera(&self, camera: CameraSnapshot) {
    self.inputs.camera.set(camera);
  }

  // ===========================================================================
  // Lifecycle
  // ===========================================================================

  pub fn is_paused(&self) -> bool {
    self.paused
  }

  pub fn is_hidden(&self) -> bool {
    self.hidden
  }

  /// Stop traversal and loading. Visuals stay as they are; queued loads
  /// are kept.
  pub fn pause(&mut self) -> StreamResult<()> {
    if self.paused {
      return Ok(());
    }
    self.paused = true;
    self.stop_workers()?;
    tracing::info!("streaming paused");
    Ok(())
  }

  /// Restart traversal and loading after [`pause`](Self::pause).
  pub fn resume(&mut self) -> StreamResult<()> {
    if !self.paused || self.shut_down {
      return Ok(());
    }
    self.paused = false;
    self.start_workers()?;
    tracing::info!("streaming resumed");
    Ok(())
  }

  /// Pause and hide every visual without destroying it.
  pub fn hide<V: VisualOwner + ?Sized>(&mut self, owner: &mut V) -> StreamResult<()> {
    self.pause()?;
    for root in self.roots() {
      self.inputs.tree.deactivate_all_visuals(root, owner);
    }
    self.hidden = true;
    Ok(())
  }

  /// Show the visuals hidden by [`hide`](Self::hide) and resume.
  pub fn display<V: VisualOwner + ?Sized>(&mut self, owner: &mut V) -> StreamResult<()> {
    for root in self.roots() {
      self.inputs.tree.reactivate_all_visuals(root, owner);
    }
    self.hidden = false;
    self.resume()
  }

  /// Stop everything and destroy all visuals.
  ///
  /// Must be called from the thread that drives `update`; otherwise
  /// returns [`StreamError::NotMainThread`] without touching anything.
  pub fn shutdown<V: VisualOwner + ?Sized>(&mut self, owner: &mut V) -> StreamResult<()> {
    let current = std::thread::current().id();
    if self.main_thread.is_some_and(|main| main != current) {
      return Err(StreamError::NotMainThread);
    }
    self.pause()?;
    let destroyed: usize = self
      .roots()
      .into_iter()
      .map(|root| self.inputs.tree.remove_all_visuals(root, owner))
      .sum();
    if let TraversalSlot::Local(task) = &mut self.traversal {
      task.traverser.reset();
    }
    self.shut_down = true;
    tracing::info!(destroyed, "streaming shut down");
    Ok(())
  }

  fn start_workers(&mut self) -> StreamResult<()> {
    match &mut self.loader {
      LoaderSlot::Cooperative(loader) => loader.start(),
      LoaderSlot::Threaded(slot) => {
        if slot.is_none() {
          let ctx = self.loading.clone();
          let poll = self.config.worker_poll_interval;
          *slot = Some(Worker::spawn("loading", move |stop| run_worker(ctx, stop, poll))?);
        }
      }
    }

    if self.config.mode == ExecutionMode::Threaded {
      if let TraversalSlot::Local(_) = self.traversal {
        let TraversalSlot::Local(task) = std::mem::replace(&mut self.traversal, TraversalSlot::Empty) else {
          return Ok(());
        };
        let inputs = self.inputs.clone();
        let poll = self.config.worker_poll_interval;
        let worker = Worker::spawn("traversal", move |stop| run_traversal(task, inputs, &stop, poll))?;
        self.traversal = TraversalSlot::Thread(worker);
      }
    }
    Ok(())
  }

  fn stop_workers(&mut self) -> StreamResult<()> {
    match &mut self.loader {
      LoaderSlot::Cooperative(loader) => loader.stop(),
      LoaderSlot::Threaded(slot) => {
        if let Some(worker) = slot.take() {
          worker.join()?;
        }
      }
    }

    if let TraversalSlot::Thread(_) = self.traversal {
      let TraversalSlot::Thread(worker) = std::mem::replace(&mut self.traversal, TraversalSlot::Empty) else {
        return Ok(());
      };
      self.traversal = TraversalSlot::Local(worker.join()?);
    }
    Ok(())
  }
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod engine_test;
