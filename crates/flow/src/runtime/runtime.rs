//! Acting on analysis: scheduling, cancellation, progress

use crossbeam::channel::Sender;
use std::{
	any::Any,
	collections::HashMap,
	panic::{catch_unwind, AssertUnwindSafe},
	sync::Arc,
	time::Duration,
};
use tracing::{debug, warn};

use crate::{
	analyse::Action,
	api::{Artefact, CancelToken, Checkpoint, Method, MethodContext, Progress, ProgressReporter},
	errors::MethodError,
	labels::{VertexId, VertexIndex},
	message::{Message, SucceededResult},
	observe::Observable,
	state::{assemble, InputAssembly, State, TimeIndex},
};

use super::scheduler::Scheduler;

/// Owns the cancellation side of one slice's in-flight work
struct CancelSource {
	token: CancelToken,
}

impl CancelSource {
	fn new() -> Self {
		Self {
			token: CancelToken::new(),
		}
	}

	fn token(&self) -> CancelToken {
		self.token.clone()
	}

	fn cancel(&self) {
		self.token.cancel();
	}
}

/// Executes the analyser's actions.
///
/// Lives on the engine thread; initiates concurrent work but shares
/// no state with it. Workers talk back exclusively through the
/// message channel.
pub(crate) struct Runtime {
	scheduler: Arc<dyn Scheduler>,

	/// One cancellation handle per slice with work in flight
	handles: HashMap<(VertexId, VertexIndex), CancelSource>,

	/// Where workers post their results
	to_machine: Sender<Message>,

	/// Where progress reports fan out
	progress: Arc<Observable<Progress>>,

	/// Debounce between a slice becoming ready and its start
	start_delay: Duration,
}

impl Runtime {
	pub fn new(
		scheduler: Arc<dyn Scheduler>,
		to_machine: Sender<Message>,
		progress: Arc<Observable<Progress>>,
		start_delay: Duration,
	) -> Self {
		Self {
			scheduler,
			handles: HashMap::new(),
			to_machine,
			progress,
			start_delay,
		}
	}

	/// Perform every action of one transition, in order
	pub fn perform(&mut self, state: &State, actions: Vec<Action>) {
		for action in actions {
			match action {
				Action::Delay {
					vertex,
					index,
					time,
				} => self.delay(vertex, index, time),
				Action::Execute {
					vertex,
					index,
					time,
				} => self.execute(state, vertex, index, time),
				Action::Reproduce {
					vertex,
					index,
					time,
				} => self.reproduce(state, vertex, index, time),
				Action::StopMethod { vertex, index, .. } => {
					self.cancel(&(vertex, index));
				}
				Action::Remove { vertex } => self.remove(vertex),
			}
		}
	}

	/// Cancel everything still in flight. Called on engine teardown.
	pub fn teardown(&mut self) {
		for (_, handle) in self.handles.drain() {
			handle.cancel();
		}
	}

	fn cancel(&mut self, key: &(VertexId, VertexIndex)) {
		if let Some(handle) = self.handles.remove(key) {
			handle.cancel();
		}
	}

	fn remove(&mut self, vertex: VertexId) {
		let keys: Vec<_> = self
			.handles
			.keys()
			.filter(|(v, _)| *v == vertex)
			.cloned()
			.collect();
		for key in keys {
			self.cancel(&key);
		}
	}

	fn delay(&mut self, vertex: VertexId, index: VertexIndex, time: TimeIndex) {
		self.cancel(&(vertex, index.clone()));

		if self.start_delay.is_zero() {
			let _ = self.to_machine.send(Message::Start {
				vertex,
				index: Some(index),
				can_start_time: Some(time),
			});
			return;
		}

		let source = CancelSource::new();
		let token = source.token();
		self.handles.insert((vertex, index.clone()), source);

		let sender = self.to_machine.clone();
		let delay = self.start_delay;
		self.scheduler.start(Box::new(move || {
			std::thread::sleep(delay);
			if token.is_cancelled() {
				return;
			}
			let _ = sender.send(Message::Start {
				vertex,
				index: Some(index),
				can_start_time: Some(time),
			});
		}));
	}

	fn execute(&mut self, state: &State, vertex: VertexId, index: VertexIndex, time: TimeIndex) {
		let key = (vertex, index.clone());
		self.cancel(&key);

		let Some(v) = state.graph.vertex(vertex) else {
			return;
		};
		let method = v.method().clone();

		let InputAssembly::Ready(inputs) = assemble(&state.graph, &state.flow, vertex, &index)
		else {
			// The machine only schedules slices with available inputs
			warn!(
				source = "runtime",
				summary = "Inputs vanished before execution",
				vertex = v.name().to_string(),
				index = index.to_string()
			);
			return;
		};

		// A stored checkpoint means this run resumes an iteration
		let checkpoint = state
			.slice(vertex, &index)
			.and_then(|s| s.data.as_ref())
			.and_then(|d| d.checkpoint.clone());

		let source = CancelSource::new();
		let token = source.token();
		self.handles.insert(key, source);

		debug!(
			source = "runtime",
			summary = "Executing method",
			vertex = v.name().to_string(),
			index = index.to_string(),
			resuming = checkpoint.is_some()
		);

		let sender = self.to_machine.clone();
		let reporter = ProgressReporter::new(vertex, index.clone(), self.progress.clone());
		self.scheduler.start(Box::new(move || {
			run_method(
				method, inputs, checkpoint, token, reporter, sender, vertex, index, time,
			);
		}));
	}

	fn reproduce(&mut self, state: &State, vertex: VertexId, index: VertexIndex, time: TimeIndex) {
		let key = (vertex, index.clone());
		self.cancel(&key);

		let Some(v) = state.graph.vertex(vertex) else {
			return;
		};
		let method = v.method().clone();

		let InputAssembly::Ready(inputs) = assemble(&state.graph, &state.flow, vertex, &index)
		else {
			warn!(
				source = "runtime",
				summary = "Inputs vanished before reproduction",
				vertex = v.name().to_string(),
				index = index.to_string()
			);
			return;
		};
		let Some(checkpoint) = state
			.slice(vertex, &index)
			.and_then(|s| s.data.as_ref())
			.and_then(|d| d.checkpoint.clone())
		else {
			warn!(
				source = "runtime",
				summary = "No checkpoint to reproduce from",
				vertex = v.name().to_string(),
				index = index.to_string()
			);
			return;
		};

		let source = CancelSource::new();
		let token = source.token();
		self.handles.insert(key, source);

		debug!(
			source = "runtime",
			summary = "Reproducing outputs",
			vertex = v.name().to_string(),
			index = index.to_string()
		);

		let sender = self.to_machine.clone();
		self.scheduler.start(Box::new(move || {
			let outcome = catch_unwind(AssertUnwindSafe(|| {
				method.reproduce(inputs, checkpoint.clone())
			}));
			if token.is_cancelled() {
				return;
			}
			let message = match outcome {
				Ok(Ok(outputs)) => Message::Succeeded {
					vertex,
					index,
					start_time: time,
					result: SucceededResult::IterationResult((outputs, Some(checkpoint))),
				},
				Ok(Err(error)) => Message::Failed {
					vertex,
					index,
					start_time: time,
					error,
				},
				Err(payload) => Message::Failed {
					vertex,
					index,
					start_time: time,
					error: panic_error(payload),
				},
			};
			let _ = sender.send(message);
		}));
	}
}

/// The worker body for one execution: drive the method's lazy
/// sequence, posting a message per yield and one at the end.
#[allow(clippy::too_many_arguments)]
fn run_method(
	method: Arc<dyn Method>,
	inputs: Vec<Artefact>,
	checkpoint: Option<Checkpoint>,
	token: CancelToken,
	reporter: ProgressReporter,
	sender: Sender<Message>,
	vertex: VertexId,
	index: VertexIndex,
	time: TimeIndex,
) {
	let ctx = MethodContext::new(token.clone(), reporter);
	let mut iter = match catch_unwind(AssertUnwindSafe(|| method.execute(ctx, inputs, checkpoint)))
	{
		Ok(iter) => iter,
		Err(payload) => {
			let _ = sender.send(Message::Failed {
				vertex,
				index,
				start_time: time,
				error: panic_error(payload),
			});
			return;
		}
	};

	loop {
		let next = match catch_unwind(AssertUnwindSafe(|| iter.next())) {
			Ok(next) => next,
			Err(payload) => {
				if !token.is_cancelled() {
					let _ = sender.send(Message::Failed {
						vertex,
						index,
						start_time: time,
						error: panic_error(payload),
					});
				}
				return;
			}
		};

		// The iteration boundary is the suspension point: check the
		// token here, before anything is posted
		if token.is_cancelled() {
			return;
		}

		match next {
			None => {
				let _ = sender.send(Message::Succeeded {
					vertex,
					index,
					start_time: time,
					result: SucceededResult::NoMoreIterations,
				});
				return;
			}
			Some(Err(error)) => {
				let _ = sender.send(Message::Failed {
					vertex,
					index,
					start_time: time,
					error,
				});
				return;
			}
			Some(Ok(result)) => {
				let _ = sender.send(Message::Iteration {
					vertex,
					index: index.clone(),
					result,
					start_time: time,
				});
			}
		}
	}
}

/// Turn a panic payload into a method error
fn panic_error(payload: Box<dyn Any + Send>) -> MethodError {
	let message = payload
		.downcast_ref::<&str>()
		.map(|s| s.to_string())
		.or_else(|| payload.downcast_ref::<String>().cloned())
		.unwrap_or_else(|| "unknown panic".into());
	MethodError::Panicked { message }
}
