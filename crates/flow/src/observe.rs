//! Simple channel-backed observable streams

use crossbeam::channel::{unbounded, Receiver, Sender};
use std::sync::Mutex;

/// A fan-out point for a stream of values.
///
/// Each subscriber gets its own unbounded channel; emitting clones
/// the value once per live subscriber. Subscribers that have dropped
/// their receiver are forgotten on the next emit.
#[derive(Debug)]
pub struct Observable<T> {
	subscribers: Mutex<Vec<Sender<T>>>,
}

impl<T: Clone> Observable<T> {
	/// Make an observable with no subscribers
	pub fn new() -> Self {
		Self {
			subscribers: Mutex::new(Vec::new()),
		}
	}

	/// Open a new subscription to this stream
	pub fn subscribe(&self) -> Receiver<T> {
		let (tx, rx) = unbounded();
		self.subscribers.lock().unwrap().push(tx);
		rx
	}

	/// Send a value to every live subscriber
	pub fn emit(&self, value: T) {
		let mut subs = self.subscribers.lock().unwrap();
		subs.retain(|tx| tx.send(value.clone()).is_ok());
	}
}

impl<T: Clone> Default for Observable<T> {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn delivers_to_every_subscriber() {
		let obs = Observable::new();
		let a = obs.subscribe();
		let b = obs.subscribe();

		obs.emit(1u32);
		assert_eq!(a.recv().unwrap(), 1);
		assert_eq!(b.recv().unwrap(), 1);
	}

	#[test]
	fn dropped_subscribers_are_forgotten() {
		let obs = Observable::new();
		let a = obs.subscribe();
		drop(obs.subscribe());

		obs.emit(1u32);
		obs.emit(2u32);
		assert_eq!(a.try_iter().collect::<Vec<_>>(), vec![1, 2]);
	}
}
