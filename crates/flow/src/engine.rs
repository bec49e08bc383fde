//! The engine façade: machine, analyser, and runtime in a loop

use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use std::{
	sync::{Arc, Mutex},
	thread::{self, JoinHandle},
	time::Duration,
};
use tracing::{debug, warn};

use crate::{
	analyse::analyse,
	api::Progress,
	graph::{AlterError, AlterRequest, FlowGraph},
	labels::{VertexId, VertexIndex},
	message::Message,
	observe::Observable,
	runtime::{PoolScheduler, Runtime, Scheduler},
	state::{FlowState, State, StateMachine, Step},
};

/// Engine tuning knobs
#[derive(Debug, Clone)]
pub struct EngineConfig {
	/// Worker threads for the default scheduler;
	/// `None` means one per CPU core
	pub workers: Option<usize>,

	/// Debounce between a slice becoming ready and its start.
	/// Zero starts slices immediately.
	pub start_delay: Duration,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			workers: None,
			start_delay: Duration::ZERO,
		}
	}
}

/// A pending alteration's reply
pub struct AlterReply {
	reply: Receiver<Result<(), AlterError>>,
}

impl AlterReply {
	/// Wait for the machine to accept or reject the batch
	pub fn wait(self) -> Result<(), AlterError> {
		self.reply.recv().unwrap_or(Err(AlterError::EngineStopped))
	}
}

/// A running dataflow engine.
///
/// Owns a dedicated thread that serialises every message (external
/// alterations and worker results alike) through the state machine,
/// analyses each step, and performs the resulting actions. Dropping
/// the engine shuts the loop down and cancels outstanding work.
pub struct FlowEngine {
	to_machine: Sender<Message>,
	snapshot: Arc<Mutex<State>>,
	changes: Arc<Observable<Step>>,
	progress: Arc<Observable<Progress>>,
	thread: Option<JoinHandle<()>>,
}

impl FlowEngine {
	/// Make an engine over a graph and a (possibly restored) flow
	/// state, using the given scheduler.
	///
	/// The machine starts suspended: nothing runs until
	/// [`FlowEngine::start`] is called.
	pub fn new(
		graph: FlowGraph,
		initial: FlowState,
		config: EngineConfig,
		scheduler: Arc<dyn Scheduler>,
	) -> Self {
		let (to_machine, from_anyone) = unbounded();

		let machine = StateMachine::new(Arc::new(graph), initial);
		let snapshot = Arc::new(Mutex::new(machine.state().clone()));
		let changes: Arc<Observable<Step>> = Arc::new(Observable::new());
		let progress: Arc<Observable<Progress>> = Arc::new(Observable::new());

		let runtime = Runtime::new(
			scheduler,
			to_machine.clone(),
			progress.clone(),
			config.start_delay,
		);

		let thread = {
			let snapshot = snapshot.clone();
			let changes = changes.clone();
			thread::spawn(move || engine_loop(machine, runtime, from_anyone, snapshot, changes))
		};

		Self {
			to_machine,
			snapshot,
			changes,
			progress,
			thread: Some(thread),
		}
	}

	/// Make an engine backed by the default worker-pool scheduler
	pub fn with_default_scheduler(graph: FlowGraph, initial: FlowState, config: EngineConfig) -> Self {
		let scheduler = Arc::new(PoolScheduler::new(config.workers));
		Self::new(graph, initial, config, scheduler)
	}

	/// The latest snapshot
	pub fn state(&self) -> State {
		self.snapshot.lock().unwrap().clone()
	}

	/// Subscribe to `(state, changes)` steps, one per transition
	pub fn subscribe(&self) -> Receiver<Step> {
		self.changes.subscribe()
	}

	/// Subscribe to per-slice progress reports
	pub fn subscribe_progress(&self) -> Receiver<Progress> {
		self.progress.subscribe()
	}

	/// Activate the suspended machine and begin evaluating
	pub fn start(&self) {
		let _ = self.to_machine.send(Message::Activate);
	}

	/// Post an atomic graph mutation; the reply resolves once the
	/// machine has accepted or rejected it
	pub fn alter(&self, request: AlterRequest) -> AlterReply {
		let (tx, rx) = bounded(1);
		let _ = self.to_machine.send(Message::Alter {
			request,
			reply: Some(tx),
		});
		AlterReply { reply: rx }
	}

	/// Cancel execution of a slice, or of a whole vertex
	pub fn stop(&self, vertex: VertexId, index: Option<VertexIndex>) {
		let _ = self.to_machine.send(Message::Stop { vertex, index });
	}

	/// Suspend iteration of a slice, or of a whole vertex
	pub fn pause(&self, vertex: VertexId, index: Option<VertexIndex>) {
		let _ = self.to_machine.send(Message::Pause { vertex, index });
	}

	/// Resume suspended slices
	pub fn resume(&self, vertex: VertexId, index: Option<VertexIndex>) {
		let _ = self.to_machine.send(Message::Resume { vertex, index });
	}

	/// Post a raw message onto the engine's channel
	pub fn post(&self, message: Message) {
		let _ = self.to_machine.send(message);
	}
}

impl Drop for FlowEngine {
	fn drop(&mut self) {
		let _ = self.to_machine.send(Message::Shutdown);
		if let Some(thread) = self.thread.take() {
			let _ = thread.join();
		}
	}
}

/// The engine thread: one message in, at most one step out
fn engine_loop(
	mut machine: StateMachine,
	mut runtime: Runtime,
	messages: Receiver<Message>,
	snapshot: Arc<Mutex<State>>,
	changes_hub: Arc<Observable<Step>>,
) {
	debug!(source = "engine", summary = "Engine loop running");

	while let Ok(message) = messages.recv() {
		let step = match message {
			Message::Shutdown => break,

			Message::Activate => machine.activate(),

			Message::Alter { request, reply } => match machine.alter(&request) {
				Ok(step) => {
					if let Some(reply) = reply {
						let _ = reply.send(Ok(()));
					}
					step
				}
				Err(error) => {
					warn!(
						source = "engine",
						summary = "Rejected alteration",
						error = error.to_string()
					);
					if let Some(reply) = reply {
						let _ = reply.send(Err(error));
					}
					None
				}
			},

			Message::Start {
				vertex,
				index,
				can_start_time,
			} => machine.start(vertex, index.as_ref(), can_start_time),

			Message::Iteration {
				vertex,
				index,
				result,
				start_time,
			} => machine.iteration(vertex, &index, result, start_time),

			Message::Succeeded {
				vertex,
				index,
				start_time,
				result,
			} => machine.succeeded(vertex, &index, start_time, result),

			Message::Failed {
				vertex,
				index,
				start_time,
				error,
			} => machine.failed(vertex, &index, start_time, error),

			Message::Stop { vertex, index } => machine.stop(vertex, index.as_ref()),

			Message::Pause { vertex, index } => machine.pause(vertex, index.as_ref()),

			Message::Resume { vertex, index } => machine.resume(vertex, index.as_ref()),
		};

		if let Some((state, changes)) = step {
			*snapshot.lock().unwrap() = state.clone();
			let actions = analyse(&state, &changes);
			runtime.perform(&state, actions);
			changes_hub.emit((state, changes));
		}
	}

	runtime.teardown();
	debug!(source = "engine", summary = "Engine loop stopped");
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeMap;
	use std::time::Instant;

	use rill_util::mdmap::MdMap;

	use super::*;
	use crate::api::{Artefact, Checkpoint, ExecuteIter, Method, MethodContext, TypeDesc};
	use crate::errors::MethodError;
	use crate::graph::{ConnectionKind, FlowEdge};
	use crate::labels::MethodId;
	use crate::state::{VertexData, VertexState, VertexStatus};
	use crate::testing::*;

	fn wait_until(engine: &FlowEngine, pred: impl Fn(&State) -> bool) -> State {
		let deadline = Instant::now() + Duration::from_secs(10);
		loop {
			let state = engine.state();
			if pred(&state) {
				return state;
			}
			if Instant::now() > deadline {
				panic!("timed out waiting for state; last was {state:#?}");
			}
			thread::sleep(Duration::from_millis(5));
		}
	}

	fn slice_complete(state: &State, v: VertexId, idx: &[usize]) -> bool {
		state
			.flow
			.get(&v)
			.and_then(|m| m.get(idx))
			.map(|s| matches!(s.status, VertexStatus::Complete))
			.unwrap_or(false)
	}

	#[test]
	fn two_vertex_chain_runs_to_completion() {
		let a = vertex("a", TestMethod::constant("a", 20));
		let b = vertex("b", TestMethod::map_int("b", |x| x + 1));
		let (ai, bi) = (a.id(), b.id());
		let g = graph(
			vec![a, b],
			vec![FlowEdge {
				source: ai,
				output_ref: 0,
				target: bi,
				input_ref: 0,
				kind: ConnectionKind::OneToOne(0),
			}],
		);

		let engine = FlowEngine::with_default_scheduler(
			g,
			BTreeMap::new(),
			EngineConfig {
				workers: Some(2),
				..Default::default()
			},
		);
		engine.start();

		let state = wait_until(&engine, |s| slice_complete(s, bi, &[]));
		let out = state.flow[&bi].get(&[]).unwrap();
		assert_eq!(get_int(out.data.as_ref().unwrap().output(0).unwrap()), 21);
	}

	#[test]
	fn scatter_reduce_fan_aggregates() {
		let a = vertex("a", TestMethod::constant_array("a", &[1, 2, 3]));
		let b = vertex("b", TestMethod::map_int("b", |x| x * 2));
		let c = vertex("c", TestMethod::sum("c"));
		let (ai, bi, ci) = (a.id(), b.id(), c.id());
		let g = graph(
			vec![a, b, c],
			vec![
				FlowEdge {
					source: ai,
					output_ref: 0,
					target: bi,
					input_ref: 0,
					kind: ConnectionKind::Scatter(0),
				},
				FlowEdge {
					source: bi,
					output_ref: 0,
					target: ci,
					input_ref: 0,
					kind: ConnectionKind::Reduce(0),
				},
			],
		);

		let engine = FlowEngine::with_default_scheduler(
			g,
			BTreeMap::new(),
			EngineConfig {
				workers: Some(4),
				..Default::default()
			},
		);
		engine.start();

		let state = wait_until(&engine, |s| slice_complete(s, ci, &[]));

		// Three slices of b appeared and completed
		assert_eq!(state.flow[&bi].len(), 3);
		let out = state.flow[&ci].get(&[]).unwrap();
		assert_eq!(get_int(out.data.as_ref().unwrap().output(0).unwrap()), 12);
	}

	#[test]
	fn collect_aggregates_in_claimed_order() {
		let x = vertex("x", TestMethod::constant("x", 5));
		let y = vertex("y", TestMethod::constant("y", 7));
		let z = vertex("z", TestMethod::sum("z"));
		let (xi, yi, zi) = (x.id(), y.id(), z.id());
		let g = graph(
			vec![x, y, z],
			vec![
				FlowEdge {
					source: xi,
					output_ref: 0,
					target: zi,
					input_ref: 0,
					kind: ConnectionKind::Collect { index: 0, rank: 0 },
				},
				FlowEdge {
					source: yi,
					output_ref: 0,
					target: zi,
					input_ref: 0,
					kind: ConnectionKind::Collect { index: 1, rank: 0 },
				},
			],
		);

		let engine = FlowEngine::with_default_scheduler(
			g,
			BTreeMap::new(),
			EngineConfig {
				workers: Some(2),
				..Default::default()
			},
		);
		engine.start();

		let state = wait_until(&engine, |s| slice_complete(s, zi, &[]));
		let out = state.flow[&zi].get(&[]).unwrap();
		assert_eq!(get_int(out.data.as_ref().unwrap().output(0).unwrap()), 12);
	}

	/// Yields forever, 10ms per element; used to test cancellation
	#[derive(Debug)]
	struct EndlessMethod {
		id: MethodId,
		outputs: Vec<TypeDesc>,
	}

	impl EndlessMethod {
		fn new() -> Arc<Self> {
			Arc::new(Self {
				id: MethodId::new(),
				outputs: vec![int_t()],
			})
		}
	}

	impl Method for EndlessMethod {
		fn id(&self) -> MethodId {
			self.id
		}

		fn name(&self) -> &str {
			"endless"
		}

		fn inputs(&self) -> &[TypeDesc] {
			&[]
		}

		fn outputs(&self) -> &[TypeDesc] {
			&self.outputs
		}

		fn execute(
			&self,
			_ctx: MethodContext,
			_inputs: Vec<Artefact>,
			_checkpoint: Option<Checkpoint>,
		) -> ExecuteIter {
			Box::new(std::iter::repeat_with(|| {
				thread::sleep(Duration::from_millis(10));
				Ok((vec![int(0)], None))
			}))
		}

		fn reproduce(
			&self,
			_inputs: Vec<Artefact>,
			_checkpoint: Checkpoint,
		) -> Result<Vec<Artefact>, MethodError> {
			Err(MethodError::failed("no reproduce"))
		}
	}

	fn graph_of(vertices: Vec<crate::graph::FlowVertex>) -> FlowGraph {
		FlowGraph::new(vertices, vec![]).unwrap()
	}

	#[test]
	fn removal_cancels_in_flight_work() {
		let a = crate::graph::FlowVertex::new("endless", EndlessMethod::new());
		let ai = a.id();
		let g = graph_of(vec![a]);

		let engine = FlowEngine::with_default_scheduler(
			g,
			BTreeMap::new(),
			EngineConfig {
				workers: Some(2),
				..Default::default()
			},
		);
		engine.start();

		// Wait for the endless method to be iterating
		wait_until(&engine, |s| {
			s.flow
				.get(&ai)
				.and_then(|m| m.get(&[]))
				.map(|x| matches!(x.status, VertexStatus::Continues { .. }))
				.unwrap_or(false)
		});

		engine.alter(AlterRequest::remove_one(ai)).wait().unwrap();

		let state = wait_until(&engine, |s| !s.flow.contains_key(&ai));
		assert!(!state.graph.contains_vertex(ai));

		// The cancelled worker's completions never resurrect the vertex
		thread::sleep(Duration::from_millis(100));
		assert!(!engine.state().flow.contains_key(&ai));
	}

	#[test]
	fn iterative_method_checkpoints_and_completes() {
		let m = TestMethod::new("iter", vec![], vec![int_t()], |_, _| {
			vec![
				Ok((vec![int(1)], Some(Arc::new(1u32) as Checkpoint))),
				Ok((vec![int(2)], Some(Arc::new(2u32) as Checkpoint))),
			]
		});
		let a = crate::graph::FlowVertex::new("a", m);
		let ai = a.id();
		let g = graph_of(vec![a]);

		let engine = FlowEngine::with_default_scheduler(
			g,
			BTreeMap::new(),
			EngineConfig {
				workers: Some(2),
				..Default::default()
			},
		);
		engine.start();

		let state = wait_until(&engine, |s| slice_complete(s, ai, &[]));
		let data = state.flow[&ai].get(&[]).unwrap().data.clone().unwrap();
		assert_eq!(get_int(data.output(0).unwrap()), 2);
		assert_eq!(
			*data
				.checkpoint
				.unwrap()
				.as_any()
				.downcast_ref::<u32>()
				.unwrap(),
			2
		);
	}

	#[test]
	fn partial_restore_reproduces_lost_outputs() {
		let m = TestMethod::with_reproduce(
			"repro",
			vec![],
			vec![int_t()],
			|_, _| vec![Ok((vec![int(42)], Some(Arc::new(9u32) as Checkpoint)))],
			|_, checkpoint| {
				assert_eq!(*checkpoint.as_any().downcast_ref::<u32>().unwrap(), 9);
				Ok(vec![int(42)])
			},
		);
		let a = crate::graph::FlowVertex::new("a", m);
		let ai = a.id();
		let g = graph_of(vec![a]);

		// Restored snapshot: complete, but the output value was lost
		let mut initial: FlowState = BTreeMap::new();
		initial.insert(
			ai,
			MdMap::scalar(VertexState {
				status: VertexStatus::Complete,
				data: Some(VertexData {
					outputs: vec![None],
					checkpoint: Some(Arc::new(9u32) as Checkpoint),
				}),
			}),
		);

		let engine = FlowEngine::with_default_scheduler(
			g,
			initial,
			EngineConfig {
				workers: Some(2),
				..Default::default()
			},
		);
		engine.start();

		let state = wait_until(&engine, |s| {
			s.flow
				.get(&ai)
				.and_then(|m| m.get(&[]))
				.map(|x| {
					matches!(x.status, VertexStatus::Complete)
						&& x.data.as_ref().map_or(false, |d| !d.is_partial())
				})
				.unwrap_or(false)
		});
		let data = state.flow[&ai].get(&[]).unwrap().data.clone().unwrap();
		assert_eq!(get_int(data.output(0).unwrap()), 42);
	}

	#[test]
	fn progress_reports_reach_subscribers() {
		#[derive(Debug)]
		struct Reporting {
			id: MethodId,
			outputs: Vec<TypeDesc>,
		}

		impl Method for Reporting {
			fn id(&self) -> MethodId {
				self.id
			}
			fn name(&self) -> &str {
				"reporting"
			}
			fn inputs(&self) -> &[TypeDesc] {
				&[]
			}
			fn outputs(&self) -> &[TypeDesc] {
				&self.outputs
			}
			fn execute(
				&self,
				ctx: MethodContext,
				_inputs: Vec<Artefact>,
				_checkpoint: Option<Checkpoint>,
			) -> ExecuteIter {
				ctx.progress().report(0.5);
				Box::new(std::iter::once(Ok((vec![int(1)], None))))
			}
			fn reproduce(
				&self,
				_inputs: Vec<Artefact>,
				_checkpoint: Checkpoint,
			) -> Result<Vec<Artefact>, MethodError> {
				Err(MethodError::failed("no reproduce"))
			}
		}

		let a = crate::graph::FlowVertex::new(
			"a",
			Arc::new(Reporting {
				id: MethodId::new(),
				outputs: vec![int_t()],
			}),
		);
		let ai = a.id();
		let g = graph_of(vec![a]);

		let engine = FlowEngine::with_default_scheduler(
			g,
			BTreeMap::new(),
			EngineConfig {
				workers: Some(2),
				..Default::default()
			},
		);
		let progress = engine.subscribe_progress();
		engine.start();

		wait_until(&engine, |s| slice_complete(s, ai, &[]));
		let report = progress.recv_timeout(Duration::from_secs(5)).unwrap();
		assert_eq!(report.vertex, ai);
		assert_eq!(report.index, VertexIndex::empty());
		assert!((report.fraction - 0.5).abs() < f32::EPSILON);
	}

	#[test]
	fn subscribers_see_one_step_per_transition() {
		let a = vertex("a", TestMethod::constant("a", 1));
		let ai = a.id();
		let g = graph(vec![a], vec![]);

		let engine = FlowEngine::with_default_scheduler(
			g,
			BTreeMap::new(),
			EngineConfig {
				workers: Some(1),
				..Default::default()
			},
		);
		let steps = engine.subscribe();
		engine.start();
		wait_until(&engine, |s| slice_complete(s, ai, &[]));

		// Activation, start, iteration, completion: the slice's
		// status history arrives in order without gaps
		let mut seen = Vec::new();
		while let Ok((state, _changes)) = steps.recv_timeout(Duration::from_millis(200)) {
			if let Some(s) = state.flow.get(&ai).and_then(|m| m.get(&[])) {
				seen.push(s.status.clone());
			}
		}
		assert!(matches!(seen.first(), Some(VertexStatus::CanStart(_))));
		assert!(matches!(seen.last(), Some(VertexStatus::Complete)));
		assert!(seen
			.iter()
			.any(|s| matches!(s, VertexStatus::Started(_) | VertexStatus::Continues { .. })));
	}

	#[test]
	fn invalid_alterations_are_rejected_and_harmless() {
		let a = vertex("a", TestMethod::constant("a", 1));
		let b = vertex("b", TestMethod::map_int("b", |x| x));
		let (ai, bi) = (a.id(), b.id());
		let e = FlowEdge {
			source: ai,
			output_ref: 0,
			target: bi,
			input_ref: 0,
			kind: ConnectionKind::OneToOne(0),
		};
		let g = graph(vec![a, b], vec![e.clone()]);

		let engine = FlowEngine::with_default_scheduler(
			g,
			BTreeMap::new(),
			EngineConfig {
				workers: Some(2),
				..Default::default()
			},
		);
		engine.start();
		wait_until(&engine, |s| slice_complete(s, bi, &[]));

		// A cycle-producing connect is rejected wholesale
		let back = FlowEdge {
			source: bi,
			output_ref: 0,
			target: ai,
			input_ref: 0,
			kind: ConnectionKind::OneToOne(0),
		};
		// `a` has no inputs, so the reject comes from the port check
		let err = engine
			.alter(AlterRequest::connect_one(back))
			.wait()
			.unwrap_err();
		assert!(matches!(err, AlterError::PortOutOfRange { .. }));

		// State unchanged
		assert!(slice_complete(&engine.state(), bi, &[]));
		assert_eq!(engine.state().graph.len_edges(), 1);
	}
}
