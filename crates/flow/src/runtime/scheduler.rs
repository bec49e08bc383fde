//! The scheduler seam and its worker-pool implementation

use std::panic::{catch_unwind, AssertUnwindSafe};
use threadpool::ThreadPool;
use tracing::error;

/// Something that can run thunks asynchronously.
///
/// The runtime submits everything it wants executed here and never
/// blocks on the result; workers report back by posting messages.
pub trait Scheduler: Send + Sync {
	/// Asynchronously invoke `thunk`, at most once.
	///
	/// Implementations must isolate thunk failures: one panicking
	/// thunk cannot be allowed to poison the scheduler.
	fn start(&self, thunk: Box<dyn FnOnce() + Send>);
}

/// A [`Scheduler`] backed by a bounded-concurrency worker pool
pub struct PoolScheduler {
	pool: ThreadPool,
}

impl PoolScheduler {
	/// Make a pool scheduler.
	///
	/// With `workers` absent, the pool uses one thread per CPU core.
	pub fn new(workers: Option<usize>) -> Self {
		let mut builder = threadpool::Builder::new().thread_name("rill worker".into());
		if let Some(n) = workers {
			builder = builder.num_threads(n);
		}
		Self {
			pool: builder.build(),
		}
	}

	/// Block until every queued and running thunk has finished
	pub fn join(&self) {
		self.pool.join();
	}
}

impl Scheduler for PoolScheduler {
	fn start(&self, thunk: Box<dyn FnOnce() + Send>) {
		self.pool.execute(move || {
			if catch_unwind(AssertUnwindSafe(thunk)).is_err() {
				error!(source = "scheduler", summary = "Worker thunk panicked");
			}
		});
	}
}

impl Drop for PoolScheduler {
	fn drop(&mut self) {
		self.pool.join();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crossbeam::channel::unbounded;

	#[test]
	fn runs_thunks() {
		let s = PoolScheduler::new(Some(2));
		let (tx, rx) = unbounded();
		for i in 0..4u32 {
			let tx = tx.clone();
			s.start(Box::new(move || {
				tx.send(i).unwrap();
			}));
		}
		s.join();
		let mut got: Vec<u32> = rx.try_iter().collect();
		got.sort();
		assert_eq!(got, vec![0, 1, 2, 3]);
	}

	#[test]
	fn a_panicking_thunk_does_not_poison_the_pool() {
		let s = PoolScheduler::new(Some(1));
		let (tx, rx) = unbounded();
		s.start(Box::new(|| panic!("boom")));
		s.start(Box::new(move || {
			tx.send(1u32).unwrap();
		}));
		s.join();
		assert_eq!(rx.recv().unwrap(), 1);
	}
}
