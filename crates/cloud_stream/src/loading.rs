//! Loading pipeline: FIFO of nodes awaiting data, served by one consumer.
//!
//! Two queues feed the consumer. Hierarchy jobs (discover the children of a
//! frontier node) are always served before point jobs (fetch the point data
//! of a node the traversal wants to render).
//!
//! # Flow
//!
//! ```text
//! Traversal                 LoadingQueue              Consumer
//! ┌──────────────────┐     ┌──────────────┐     ┌────────────────────┐
//! │ schedule_for_    │────►│ points FIFO  │────►│ fetch_point_data   │
//! │ loading(node)    │     └──────────────┘     │ cache.insert_      │
//! └──────────────────┘     ┌──────────────┐     │ loaded             │
//!  register_cloud /   ────►│ hierarchy    │────►│ fetch_hierarchy_   │
//!  frontier nodes          │ FIFO         │     │ chunk, apply_chunk │
//!                          └──────────────┘     └────────────────────┘
//! ```
//!
//! The consumer is either a [`PointLoader`] stepped once per frame (one
//! fetch in flight on rayon's pool) or [`run_worker`] on a background
//! thread. Both keep the queue intact when stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{self as channel, Receiver, Sender, TryRecvError};
use web_time::Instant;

use crate::cache::PointCache;
use crate::error::{SourceError, StreamError};
use crate::metrics::StreamMetrics;
use crate::octree::{apply_chunk, HierarchyState, NodeId, Octree, OctreeNode, PointData};
use crate::source::CloudSource;

/// One unit of loading work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadJob {
	/// Fetch the hierarchy chunk below a frontier node.
	Hierarchy(NodeId),
	/// Fetch the point data of a node.
	Points(NodeId),
}

impl LoadJob {
	pub fn node(&self) -> NodeId {
		match self {
			LoadJob::Hierarchy(id) | LoadJob::Points(id) => *id,
		}
	}
}

/// What happened to a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
	/// Point data attached and the node inserted into the cache.
	Loaded { node: NodeId, points: u64 },
	/// Hierarchy chunk applied; `frontier` nodes were queued for their own chunk.
	Discovered { node: NodeId, frontier: usize },
	/// No hierarchy chunk exists below the node.
	Leaf(NodeId),
	/// Nothing to do: data already resident or a visual exists.
	Skipped(NodeId),
	/// The node was removed before the result could be applied.
	Dropped(NodeId),
	/// The source reported an error. The node keeps its residency; a failed
	/// hierarchy job leaves it [`HierarchyState::Failed`] for a later retry.
	Failed(NodeId),
}

/// FIFO queues between the traversal and the loading consumer.
///
/// Cheap to clone; all clones share the same queues.
#[derive(Clone, Debug)]
pub struct LoadingQueue {
	points_tx: Sender<NodeId>,
	points_rx: Receiver<NodeId>,
	hierarchy_tx: Sender<NodeId>,
	hierarchy_rx: Receiver<NodeId>,
}

impl Default for LoadingQueue {
	fn default() -> Self {
		Self::new()
	}
}

impl LoadingQueue {
	pub fn new() -> Self {
		let (points_tx, points_rx) = channel::unbounded();
		let (hierarchy_tx, hierarchy_rx) = channel::unbounded();
		Self {
			points_tx,
			points_rx,
			hierarchy_tx,
			hierarchy_rx,
		}
	}

	/// Queue a point fetch. Scheduling the same node twice is tolerated:
	/// the second job finds the data resident and is skipped.
	pub fn schedule_for_loading(&self, node: NodeId) {
		// Both ends live in self, the channel can't be disconnected.
		let _ = self.points_tx.send(node);
	}

	/// Queue a hierarchy chunk fetch.
	pub fn schedule_hierarchy(&self, node: NodeId) {
		let _ = self.hierarchy_tx.send(node);
	}

	/// Pending point jobs.
	pub fn pending_points(&self) -> usize {
		self.points_rx.len()
	}

	/// Pending hierarchy jobs.
	pub fn pending_hierarchy(&self) -> usize {
		self.hierarchy_rx.len()
	}

	pub fn is_empty(&self) -> bool {
		self.points_rx.is_empty() && self.hierarchy_rx.is_empty()
	}

	/// Next job without blocking, hierarchy first.
	pub fn try_next(&self) -> Option<LoadJob> {
		if let Ok(node) = self.hierarchy_rx.try_recv() {
			return Some(LoadJob::Hierarchy(node));
		}
		self.points_rx.try_recv().ok().map(LoadJob::Points)
	}

	/// Next job, waiting up to `timeout` for one to arrive.
	pub fn next_timeout(&self, timeout: Duration) -> Option<LoadJob> {
		if let Some(job) = self.try_next() {
			return Some(job);
		}
		channel::select! {
			recv(self.hierarchy_rx) -> node => node.ok().map(LoadJob::Hierarchy),
			recv(self.points_rx) -> node => node.ok().map(LoadJob::Points),
			default(timeout) => None,
		}
	}
}

/// Everything a loading consumer touches.
pub struct LoadContext<S: CloudSource> {
	pub tree: Arc<Octree>,
	pub cache: Arc<PointCache>,
	pub source: Arc<S>,
	pub queue: LoadingQueue,
	pub metrics: Arc<Mutex<StreamMetrics>>,
}

impl<S: CloudSource> Clone for LoadContext<S> {
	fn clone(&self) -> Self {
		Self {
			tree: Arc::clone(&self.tree),
			cache: Arc::clone(&self.cache),
			source: Arc::clone(&self.source),
			queue: self.queue.clone(),
			metrics: Arc::clone(&self.metrics),
		}
	}
}

/// Raw result of a fetch, before it is applied to the tree.
enum Fetched {
	Hierarchy(Result<Vec<u8>, SourceError>),
	Points(Result<PointData, SourceError>),
}

impl<S: CloudSource> LoadContext<S> {
	fn with_metrics(&self, f: impl FnOnce(&mut StreamMetrics)) {
		f(&mut self.metrics.lock().expect("metrics lock poisoned"));
	}

	/// Resolve the node of a job, or the outcome when there is nothing to
	/// fetch.
	fn prepare(&self, job: LoadJob) -> Result<Arc<OctreeNode>, LoadOutcome> {
		let id = job.node();
		let node = self.tree.get(id).ok_or(LoadOutcome::Dropped(id))?;
		if let LoadJob::Points(_) = job {
			let residency = node.residency();
			if residency.has_point_data || residency.has_visual {
				return Err(LoadOutcome::Skipped(id));
			}
		}
		Ok(node)
	}

	/// Run a job to completion on the calling thread.
	pub fn run_job(&self, job: LoadJob) -> LoadOutcome {
		let node = match self.prepare(job) {
			Ok(node) => node,
			Err(outcome) => return outcome,
		};
		let started = Instant::now();
		let fetched = fetch(self.source.as_ref(), job, &node);
		self.apply(job, node, fetched, started)
	}

	/// Apply a finished fetch to the tree and the cache.
	fn apply(&self, job: LoadJob, node: Arc<OctreeNode>, fetched: Fetched, started: Instant) -> LoadOutcome {
		let id = job.node();
		let elapsed_us = started.elapsed().as_micros() as u64;
		match fetched {
			Fetched::Points(Ok(points)) => {
				let count = points.len() as u64;
				let evicted = self.cache.insert_loaded(id, Arc::clone(&node), points);
				// Checked after inserting: root removal frees the nodes before
				// withdrawing them, so any removal that missed this entry is seen here.
				if !self.tree.contains(id) {
					self.cache.withdraw(id);
					node.forget_point_data();
					return LoadOutcome::Dropped(id);
				}
				self.with_metrics(|m| {
					m.record_load(elapsed_us);
					m.record_evictions(evicted);
				});
				LoadOutcome::Loaded { node: id, points: count }
			}
			Fetched::Points(Err(err)) => {
				tracing::warn!(path = node.path(), %err, "point fetch failed");
				self.with_metrics(|m| m.record_fetch_failure());
				LoadOutcome::Failed(id)
			}
			Fetched::Hierarchy(Ok(masks)) => match apply_chunk(&self.tree, id, &masks) {
				Ok(frontier) => {
					node.set_hierarchy_state(HierarchyState::Resolved);
					for next in &frontier {
						self.queue.schedule_hierarchy(*next);
					}
					self.with_metrics(|m| m.record_chunk(elapsed_us));
					LoadOutcome::Discovered {
						node: id,
						frontier: frontier.len(),
					}
				}
				Err(StreamError::UnknownNode(_)) => LoadOutcome::Dropped(id),
				Err(err) => {
					tracing::warn!(path = node.path(), %err, "hierarchy chunk rejected");
					node.set_hierarchy_state(HierarchyState::Failed);
					self.with_metrics(|m| m.record_fetch_failure());
					LoadOutcome::Failed(id)
				}
			},
			Fetched::Hierarchy(Err(SourceError::NotFound(what))) => {
				tracing::debug!(path = node.path(), %what, "no hierarchy chunk, node is a leaf");
				node.set_hierarchy_state(HierarchyState::Resolved);
				LoadOutcome::Leaf(id)
			}
			Fetched::Hierarchy(Err(err)) => {
				tracing::warn!(path = node.path(), %err, "hierarchy fetch failed");
				node.set_hierarchy_state(HierarchyState::Failed);
				self.with_metrics(|m| m.record_fetch_failure());
				LoadOutcome::Failed(id)
			}
		}
	}
}

fn fetch<S: CloudSource + ?Sized>(source: &S, job: LoadJob, node: &OctreeNode) -> Fetched {
	match job {
		LoadJob::Hierarchy(_) => Fetched::Hierarchy(source.fetch_hierarchy_chunk(node)),
		LoadJob::Points(_) => Fetched::Points(source.fetch_point_data(node)),
	}
}

struct InFlight {
	job: LoadJob,
	node: Arc<OctreeNode>,
	started: Instant,
	receiver: Receiver<Fetched>,
}

/// Cooperative loading consumer with a single fetch slot.
///
/// Each [`step`](Self::step) polls the in-flight fetch (running on rayon's
/// pool) and, once the slot is free, starts the next job.
pub struct PointLoader<S: CloudSource> {
	ctx: LoadContext<S>,
	in_flight: Option<InFlight>,
	running: bool,
}

impl<S: CloudSource> PointLoader<S> {
	pub fn new(ctx: LoadContext<S>) -> Self {
		Self {
			ctx,
			in_flight: None,
			running: true,
		}
	}

	/// Check if a fetch is in flight.
	pub fn is_busy(&self) -> bool {
		self.in_flight.is_some()
	}

	pub fn is_running(&self) -> bool {
		self.running
	}

	/// Stop taking new jobs. A fetch already in flight still completes
	/// and is applied by the next step after `start`.
	pub fn stop(&mut self) {
		self.running = false;
	}

	/// Resume taking jobs.
	pub fn start(&mut self) {
		self.running = true;
	}

	/// Poll the in-flight fetch and start the next job.
	///
	/// Returns the outcome of a fetch that completed during this step.
	#[cfg_attr(feature = "profiling", tracing::instrument(skip_all, name = "loading::step"))]
	pub fn step(&mut self) -> Option<LoadOutcome> {
		if !self.running {
			return None;
		}
		let completed = self.poll();
		if self.in_flight.is_none() {
			self.start_next();
		}
		completed
	}

	fn poll(&mut self) -> Option<LoadOutcome> {
		let in_flight = self.in_flight.as_ref()?;
		match in_flight.receiver.try_recv() {
			Ok(fetched) => {
				let InFlight { job, node, started, .. } = self.in_flight.take()?;
				Some(self.ctx.apply(job, node, fetched, started))
			}
			Err(TryRecvError::Empty) => None,
			Err(TryRecvError::Disconnected) => {
				// Fetch task panicked; the node keeps its residency.
				let job = in_flight.job;
				if let LoadJob::Hierarchy(_) = job {
					in_flight.node.set_hierarchy_state(HierarchyState::Failed);
				}
				self.in_flight = None;
				tracing::error!(?job, "fetch task dropped its result");
				self.ctx.with_metrics(|m| m.record_fetch_failure());
				Some(LoadOutcome::Failed(job.node()))
			}
		}
	}

	/// Start the first job that needs a fetch; jobs with nothing to do are
	/// consumed on the way.
	fn start_next(&mut self) {
		while let Some(job) = self.ctx.queue.try_next() {
			let node = match self.ctx.prepare(job) {
				Ok(node) => node,
				Err(outcome) => {
					tracing::trace!(?outcome, "load job needs no fetch");
					continue;
				}
			};

			let (sender, receiver) = channel::bounded(1);
			let source = Arc::clone(&self.ctx.source);
			let task_node = Arc::clone(&node);
			rayon::spawn(move || {
				// Ignore send error (loader dropped = cancelled)
				let _ = sender.send(fetch(source.as_ref(), job, &task_node));
			});

			self.in_flight = Some(InFlight {
				job,
				node,
				started: Instant::now(),
				receiver,
			});
			return;
		}
	}
}

/// Threaded loading consumer. Runs until `stop` is set, checking it at the
/// top of every iteration.
pub fn run_worker<S: CloudSource>(ctx: LoadContext<S>, stop: Arc<AtomicBool>, poll_interval: Duration) {
	tracing::info!("loading worker started");
	while !stop.load(Ordering::Acquire) {
		let Some(job) = ctx.queue.next_timeout(poll_interval) else {
			continue;
		};
		let outcome = ctx.run_job(job);
		tracing::trace!(?outcome, "load job finished");
	}
	tracing::info!("loading worker stopped");
}

#[cfg(test)]
#[path = "loading_test.rs"]
mod loading_test;
