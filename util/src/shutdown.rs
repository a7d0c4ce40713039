//! Cooperative shutdown, modeled on the teacher's `epattern.LoopMode`: a
//! broadcast "stop" signal (`D` in the Go source) plus task accounting so
//! `Stop()` can wait for every registered task to actually finish before
//! releasing resources.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};

/// Handle shared by every task spawned under one component. Clone it into
/// each task; call [`Shutdown::cancelled`] at every suspension point and
/// [`Shutdown::done`] exactly once when the task actually exits.
#[derive(Clone)]
pub struct Shutdown {
	inner: Arc<Inner>,
}

struct Inner {
	tx: watch::Sender<bool>,
	rx: watch::Receiver<bool>,
	outstanding: AtomicUsize,
	drained: Notify,
}

impl Shutdown {
	pub fn new() -> Self {
		let (tx, rx) = watch::channel(false);
		Shutdown {
			inner: Arc::new(Inner {
				tx,
				rx,
				outstanding: AtomicUsize::new(0),
			drained: Notify::new(),
			}),
		}
	}

	/// Register a task under this shutdown scope. Call before spawning.
	pub fn add(&self) {
		self.inner.outstanding.fetch_add(1, Ordering::SeqCst);
	}

	/// Mark a registered task as finished. Must be called exactly once per
	/// `add()`, typically in the task's cleanup path.
	pub fn done(&self) {
		let prev = self.inner.outstanding.fetch_sub(1, Ordering::SeqCst);
		if prev == 1 {
			self.inner.drained.notify_waiters();
		}
	}

	/// True once `signal()` has been called.
	pub fn is_cancelled(&self) -> bool {
		*self.inner.rx.borrow()
	}

	/// Resolves once `signal()` has been called. Use in a `select!` arm at
	/// every suspension point.
	pub async fn cancelled(&self) {
		let mut rx = self.inner.rx.clone();
		loop {
			if *rx.borrow() {
				return;
			}
			if rx.changed().await.is_err() {
				return;
			}
		}
	}

	/// Signal every clone's `cancelled()` future to resolve.
	pub fn signal(&self) {
		let _ = self.inner.tx.send(true);
	}

	/// Signal cancellation and wait until every outstanding `add()` has a
	/// matching `done()`. Mirrors `LoopMode.Stop()`.
	pub async fn stop(&self) {
		self.signal();
		while self.inner.outstanding.load(Ordering::SeqCst) > 0 {
			self.inner.drained.notified().await;
		}
	}
}

impl Default for Shutdown {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn signal_wakes_cancelled() {
		let sd = Shutdown::new();
		let sd2 = sd.clone();
		let task = tokio::spawn(async move {
			sd2.add();
			sd2.cancelled().await;
			sd2.done();
		});
		sd.stop().await;
		task.await.unwrap();
	}
}
