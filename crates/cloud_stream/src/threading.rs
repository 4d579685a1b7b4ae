//! Background workers for the threaded execution mode.
//!
//! A [`Worker`] is a named OS thread with a shared stop flag. The work
//! closure checks the flag at the top of its loop and returns its state,
//! which [`Worker::join`] hands back so a paused activity can later resume
//! exactly where it stopped.
//!
//! # Usage
//!
//! ```ignore
//! let worker = Worker::spawn("traversal", move |stop| {
//!     while !stop.load(Ordering::Acquire) {
//!         traverser.step();
//!     }
//!     traverser
//! })?;
//!
//! // Later: stop and get the state back
//! let traverser = worker.join()?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::error::{StreamError, StreamResult};

/// Handle to a background thread that returns `T` when stopped.
#[derive(Debug)]
pub struct Worker<T> {
  name: &'static str,
  stop: Arc<AtomicBool>,
  handle: Option<JoinHandle<T>>,
}

impl<T: Send + 'static> Worker<T> {
  /// Spawn `work` on a new thread named `cloud_stream::<name>`.
  pub fn spawn<F>(name: &'static str, work: F) -> StreamResult<Self>
  where
    F: FnOnce(Arc<AtomicBool>) -> T + Send + 'static,
  {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    let handle = std::thread::Builder::new()
      .name(format!("cloud_stream::{name}"))
      .spawn(move || work(flag))
      .map_err(StreamError::Spawn)?;
    Ok(Self {
      name,
      stop,
      handle: Some(handle),
    })
  }
}

impl<T> Worker<T> {
  pub fn name(&self) -> &'static str {
    self.name
  }

  /// Ask the worker to stop at its next safe point.
  pub fn request_stop(&self) {
    self.stop.store(true, Ordering::Release);
  }

  /// True once the thread has returned.
  pub fn is_finished(&self) -> bool {
    self.handle.as_ref().map_or(true, |h| h.is_finished())
  }

  /// Stop the worker and wait for its state.
  pub fn join(mut self) -> StreamResult<T> {
    self.request_stop();
    let handle = self.handle.take().ok_or(StreamError::WorkerPanicked(self.name))?;
    handle.join().map_err(|_| StreamError::WorkerPanicked(self.name))
  }
}

impl<T> Drop for Worker<T> {
  fn drop(&mut self) {
    if let Some(handle) = self.handle.take() {
      self.stop.store(true, Ordering::Release);
      if handle.join().is_err() {
        tracing::error!(worker = self.name, "worker panicked");
      }
    }
  }
}
