//! The deterministic state machine at the heart of the engine

use std::{
	collections::{BTreeMap, BTreeSet},
	sync::Arc,
};
use tracing::debug;

use rill_util::mdmap::MdMap;

use crate::{
	api::{Artefact, MethodYield},
	errors::MethodError,
	graph::{AlterError, AlterRequest, ConnectionKind, FlowGraph},
	labels::{VertexId, VertexIndex},
	message::SucceededResult,
};

use super::{
	assembly::{assemble, InputAssembly},
	changes::{Changes, VertexChanges},
	shape,
	state::{same_artefact, FlowState, State, VertexData, VertexState},
	status::{IncompleteReason, TimeIndex, VertexStatus},
};

/// What one accepted message produced: the new snapshot and
/// everything it changed
pub type Step = (State, Changes);

/// How a slice's visible outputs moved during a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dirty {
	/// Values changed or vanished: consumers are outdated
	Changed,

	/// Values appeared that are identical to anything consumers may
	/// already have used (a first completion, or a reproduction)
	Appeared,
}

/// The deterministic core: consumes messages, produces steps.
///
/// Created suspended. Until [`StateMachine::activate`] is called,
/// messages still update the state but no steps are emitted, so a
/// restored snapshot can be installed atomically before the runtime
/// begins acting on it.
pub struct StateMachine {
	state: State,
	active: bool,
}

impl StateMachine {
	/// Make a machine over a graph and a (possibly restored) flow state.
	///
	/// Restored in-flight statuses have no worker behind them any
	/// more, so they are normalised: started and scheduled slices
	/// drop back to incomplete, iterating slices become paused at
	/// their last checkpoint, and in-flight restorations fall back
	/// to their completed data.
	pub fn new(graph: Arc<FlowGraph>, initial: FlowState) -> Self {
		let mut flow: FlowState = initial
			.into_iter()
			.filter(|(v, _)| graph.contains_vertex(*v))
			.map(|(v, map)| (v, map.map(|_, s| normalize_restored(s))))
			.collect();

		// Give every vertex a map of the right shape, sources first,
		// so scatter extents can be derived from restored outputs.
		for v in graph.topo_order().to_vec() {
			let map = shape::reconcile(&graph, &flow, v);
			flow.insert(v, map);
		}

		Self {
			state: State {
				graph,
				flow,
				time: TimeIndex::zero(),
			},
			active: false,
		}
	}

	/// The current snapshot
	pub fn state(&self) -> &State {
		&self.state
	}

	/// Has [`StateMachine::activate`] been called?
	pub fn is_active(&self) -> bool {
		self.active
	}

	/// Leave the suspended construction state: classify every slice
	/// and emit the first step.
	pub fn activate(&mut self) -> Option<Step> {
		if self.active {
			return None;
		}
		self.active = true;
		debug!(source = "machine", summary = "Activating");
		self.run_transition(None, |tx| {
			tx.force = true;
			true
		})
	}

	/// Apply an atomic graph mutation batch.
	///
	/// On error the state is untouched. An empty batch is a no-op
	/// that produces no step.
	pub fn alter(&mut self, request: &AlterRequest) -> Result<Option<Step>, AlterError> {
		if request.is_empty() {
			return Ok(None);
		}

		let old_graph = self.state.graph.clone();
		let new_graph = Arc::new(old_graph.alter(request)?);
		debug!(
			source = "machine",
			summary = "Applying alteration",
			vertices = new_graph.len_vertices(),
			edges = new_graph.len_edges()
		);

		let step = self.run_transition(Some(new_graph.clone()), |tx| {
			for v in old_graph.vertices().map(|x| x.id()) {
				if !new_graph.contains_vertex(v) {
					tx.flow.remove(&v);
					tx.removed.insert(v);
				}
			}

			// Sources first, so a merged-in chain sees its upstream
			// maps while reconciling
			for v in new_graph.topo_order().to_vec() {
				if !old_graph.contains_vertex(v) {
					let map = shape::reconcile(&tx.graph, tx.flow, v);
					tx.flow.insert(v, map);
					tx.added.insert(v);
				}
			}

			// Vertices whose in-edges changed are reclassified as if
			// their inputs changed
			for v in new_graph.vertices().map(|x| x.id()) {
				if !old_graph.contains_vertex(v) {
					continue;
				}
				let before: Vec<_> = old_graph.edges_into(v).collect();
				let after: Vec<_> = new_graph.edges_into(v).collect();
				let same = before.len() == after.len()
					&& before.iter().all(|e| after.iter().any(|x| x == e))
					&& after.iter().all(|e| before.iter().any(|x| x == e));
				if !same {
					tx.conn_changed.insert(v);
				}
			}

			true
		});
		Ok(step)
	}

	/// Begin execution of slices scheduled to start.
	///
	/// With `can_start_time` given, a slice only starts if it is
	/// still scheduled at exactly that time; a debounced start that
	/// was superseded is dropped here.
	pub fn start(
		&mut self,
		vertex: VertexId,
		index: Option<&VertexIndex>,
		can_start_time: Option<TimeIndex>,
	) -> Option<Step> {
		self.run_transition(None, |tx| {
			let mut any = false;
			for idx in tx.target_indices(vertex, index) {
				let Some(slice) = tx.slice(vertex, &idx) else {
					continue;
				};
				if let VertexStatus::CanStart(t) = slice.status {
					if can_start_time.map_or(true, |c| c == t) {
						tx.set_slice(vertex, &idx, VertexState::new(VertexStatus::Started(t)));
						any = true;
					}
				}
			}
			any
		})
	}

	/// A worker produced one iteration.
	///
	/// Dropped as stale unless `start_time` matches the slice's
	/// current in-flight time.
	pub fn iteration(
		&mut self,
		vertex: VertexId,
		index: &VertexIndex,
		result: MethodYield,
		start_time: TimeIndex,
	) -> Option<Step> {
		self.run_transition(None, |tx| {
			let Some(slice) = tx.slice(vertex, index) else {
				return false;
			};
			let Some(t) = slice.status.start_time() else {
				return false;
			};
			if t != start_time {
				debug!(
					source = "machine",
					summary = "Dropping stale iteration",
					vertex = vertex.to_string(),
					index = index.to_string()
				);
				return false;
			}

			let iteration = match slice.status {
				VertexStatus::Continues { iteration, .. } => iteration + 1,
				_ => 1,
			};
			let (outputs, checkpoint) = result;
			tx.set_slice(
				vertex,
				index,
				VertexState {
					status: VertexStatus::Continues { iteration, time: t },
					data: Some(VertexData::full(outputs, checkpoint)),
				},
			);
			true
		})
	}

	/// A worker finished. Dropped as stale on a time mismatch.
	pub fn succeeded(
		&mut self,
		vertex: VertexId,
		index: &VertexIndex,
		start_time: TimeIndex,
		result: SucceededResult,
	) -> Option<Step> {
		self.run_transition(None, |tx| {
			let Some(slice) = tx.slice(vertex, index) else {
				return false;
			};
			let Some(t) = slice.status.start_time() else {
				return false;
			};
			if t != start_time {
				debug!(
					source = "machine",
					summary = "Dropping stale completion",
					vertex = vertex.to_string(),
					index = index.to_string()
				);
				return false;
			}

			let new = match result {
				SucceededResult::IterationResult((outputs, checkpoint)) => {
					let data = match (&slice.status, &slice.data) {
						// A restoration fills only the missing slots, so
						// untouched values keep their identity and
						// consumers stay valid
						(VertexStatus::CompleteStarted { .. }, Some(old)) => VertexData {
							outputs: old
								.outputs
								.iter()
								.cloned()
								.zip(outputs)
								.map(|(kept, fresh)| kept.or(Some(fresh)))
								.collect(),
							checkpoint: old.checkpoint.clone().or(checkpoint),
						},
						_ => VertexData::full(outputs, checkpoint),
					};
					VertexState {
						status: VertexStatus::Complete,
						data: Some(data),
					}
				}

				SucceededResult::NoMoreIterations => match (&slice.status, &slice.data) {
					(
						VertexStatus::Continues { .. } | VertexStatus::CompleteStarted { .. },
						Some(_),
					) => VertexState {
						status: VertexStatus::Complete,
						data: slice.data.clone(),
					},
					// The contract requires at least one element
					_ => VertexState::new(VertexStatus::Incomplete(
						IncompleteReason::ExecutionFailed(Arc::new(MethodError::failed(
							"method produced no iterations",
						))),
					)),
				},
			};
			tx.set_slice(vertex, index, new);
			true
		})
	}

	/// A worker failed. Dropped as stale on a time mismatch.
	pub fn failed(
		&mut self,
		vertex: VertexId,
		index: &VertexIndex,
		start_time: TimeIndex,
		error: MethodError,
	) -> Option<Step> {
		self.run_transition(None, |tx| {
			let Some(slice) = tx.slice(vertex, index) else {
				return false;
			};
			if slice.status.start_time() != Some(start_time) {
				return false;
			}
			tx.set_slice(
				vertex,
				index,
				VertexState::new(VertexStatus::Incomplete(IncompleteReason::ExecutionFailed(
					Arc::new(error),
				))),
			);
			true
		})
	}

	/// Cancel execution. Stopped slices stay stopped until their
	/// inputs change.
	pub fn stop(&mut self, vertex: VertexId, index: Option<&VertexIndex>) -> Option<Step> {
		self.run_transition(None, |tx| {
			let mut any = false;
			for idx in tx.target_indices(vertex, index) {
				let Some(slice) = tx.slice(vertex, &idx) else {
					continue;
				};
				let new = match slice.status {
					VertexStatus::CanStart(_)
					| VertexStatus::Started(_)
					| VertexStatus::Continues { .. } => Some(VertexState::new(
						VertexStatus::Incomplete(IncompleteReason::Stopped),
					)),
					// Stopping a restoration keeps the completed data
					VertexStatus::CompleteStarted { .. } => Some(VertexState {
						status: VertexStatus::Complete,
						data: slice.data.clone(),
					}),
					_ => None,
				};
				if let Some(new) = new {
					tx.set_slice(vertex, &idx, new);
					any = true;
				}
			}
			any
		})
	}

	/// Suspend iteration. Direct downstream slices that were running
	/// or scheduled inherit the suspension.
	pub fn pause(&mut self, vertex: VertexId, index: Option<&VertexIndex>) -> Option<Step> {
		self.run_transition(None, |tx| {
			let mut any = false;
			for idx in tx.target_indices(vertex, index) {
				let Some(slice) = tx.slice(vertex, &idx) else {
					continue;
				};
				let new = match slice.status {
					VertexStatus::CanStart(_) | VertexStatus::Started(_) => {
						Some(VertexState::new(VertexStatus::Paused))
					}
					VertexStatus::Continues { iteration, .. } => Some(VertexState {
						status: VertexStatus::PausedContinues { iteration },
						data: slice.data.clone(),
					}),
					_ => None,
				};
				if let Some(new) = new {
					tx.set_slice(vertex, &idx, new);
					any = true;
				}
			}
			if !any {
				return false;
			}

			// Direct downstream slices hold until the resume
			let downstream: Vec<VertexId> =
				tx.graph.edges_from(vertex).map(|e| e.target).collect();
			for v in downstream {
				for idx in tx.target_indices(v, None) {
					let Some(slice) = tx.slice(v, &idx) else {
						continue;
					};
					if matches!(
						slice.status,
						VertexStatus::CanStart(_)
							| VertexStatus::Started(_)
							| VertexStatus::Continues { .. }
					) {
						tx.set_slice(
							v,
							&idx,
							VertexState {
								status: VertexStatus::PausedInherited,
								data: slice.data.clone(),
							},
						);
					}
				}
			}
			true
		})
	}

	/// Resume suspended slices.
	///
	/// A paused iteration continues from its checkpoint; a completed
	/// slice with a checkpoint can be resumed to iterate further.
	pub fn resume(&mut self, vertex: VertexId, index: Option<&VertexIndex>) -> Option<Step> {
		self.run_transition(None, |tx| {
			let mut any = false;
			for idx in tx.target_indices(vertex, index) {
				let Some(slice) = tx.slice(vertex, &idx) else {
					continue;
				};
				if tx.resume_slice(vertex, &idx, &slice) {
					any = true;
				}
			}
			if !any {
				return false;
			}

			// Lift the inherited suspension off direct downstream
			let downstream: Vec<VertexId> =
				tx.graph.edges_from(vertex).map(|e| e.target).collect();
			for v in downstream {
				for idx in tx.target_indices(v, None) {
					let Some(slice) = tx.slice(v, &idx) else {
						continue;
					};
					if matches!(slice.status, VertexStatus::PausedInherited) {
						tx.resume_slice(v, &idx, &slice);
					}
				}
			}
			true
		})
	}

	/// Run one transition: apply `f`'s local update, then propagate
	/// shapes and reclassify downstream. Returns the step to emit,
	/// or `None` when nothing happened (or the machine is suspended).
	fn run_transition<F>(&mut self, new_graph: Option<Arc<FlowGraph>>, f: F) -> Option<Step>
	where
		F: FnOnce(&mut Tx) -> bool,
	{
		let swapped = new_graph.is_some();
		let graph = new_graph.unwrap_or_else(|| self.state.graph.clone());
		let next = self.state.time.next();

		let mut tx = Tx {
			graph: graph.clone(),
			flow: &mut self.state.flow,
			time: next,
			old: BTreeMap::new(),
			removed: BTreeSet::new(),
			added: BTreeSet::new(),
			conn_changed: BTreeSet::new(),
			force: false,
			dirty: BTreeMap::new(),
		};

		if !f(&mut tx) {
			return None;
		}
		tx.reclassify();
		let changes = tx.finish();

		if changes.is_empty() && !swapped {
			return None;
		}
		self.state.graph = graph;
		self.state.time = next;

		if !self.active {
			return None;
		}
		Some((self.state.clone(), changes))
	}
}

/// Working state of one transition
struct Tx<'a> {
	graph: Arc<FlowGraph>,
	flow: &'a mut FlowState,

	/// The time this transition will commit as
	time: TimeIndex,

	/// First-touch snapshots of every modified vertex map
	old: BTreeMap<VertexId, MdMap<VertexState>>,

	removed: BTreeSet<VertexId>,
	added: BTreeSet<VertexId>,

	/// Vertices whose in-edge set changed this transition
	conn_changed: BTreeSet<VertexId>,

	/// Reclassify everything (used by activation)
	force: bool,

	/// Slices whose visible outputs moved this transition
	dirty: BTreeMap<(VertexId, VertexIndex), Dirty>,
}

impl Tx<'_> {
	/// The indices this message addresses: one, or every slice
	fn target_indices(&self, vertex: VertexId, index: Option<&VertexIndex>) -> Vec<VertexIndex> {
		match index {
			Some(i) => vec![i.clone()],
			None => self
				.flow
				.get(&vertex)
				.map(|m| m.iter().map(|(i, _)| VertexIndex::new(i)).collect())
				.unwrap_or_default(),
		}
	}

	fn slice(&self, vertex: VertexId, index: &VertexIndex) -> Option<VertexState> {
		self.flow
			.get(&vertex)
			.and_then(|m| m.get(index.as_slice()))
			.cloned()
	}

	fn touch(&mut self, vertex: VertexId) {
		if !self.old.contains_key(&vertex) {
			if let Some(map) = self.flow.get(&vertex) {
				self.old.insert(vertex, map.clone());
			}
		}
	}

	/// Replace one slice's state, recording how its visible outputs
	/// moved so downstream can be reclassified.
	fn set_slice(&mut self, vertex: VertexId, index: &VertexIndex, new: VertexState) {
		self.touch(vertex);
		let old_slice = self
			.flow
			.get(&vertex)
			.and_then(|m| m.get(index.as_slice()))
			.cloned();
		if let Some(d) = dirty_between(old_slice.as_ref(), &new) {
			self.mark_dirty(vertex, index.clone(), d);
		}
		if let Some(map) = self.flow.get_mut(&vertex) {
			map.set(index.as_slice(), new);
		}
	}

	fn mark_dirty(&mut self, vertex: VertexId, index: VertexIndex, d: Dirty) {
		use std::collections::btree_map::Entry;
		match self.dirty.entry((vertex, index)) {
			Entry::Vacant(e) => {
				e.insert(d);
			}
			Entry::Occupied(mut e) => {
				if d == Dirty::Changed {
					e.insert(Dirty::Changed);
				}
			}
		}
	}

	/// Resume one slice; see [`StateMachine::resume`].
	fn resume_slice(&mut self, vertex: VertexId, index: &VertexIndex, slice: &VertexState) -> bool {
		let new = match &slice.status {
			VertexStatus::PausedContinues { iteration } => Some(VertexState {
				status: VertexStatus::Continues {
					iteration: *iteration,
					time: self.time,
				},
				data: slice.data.clone(),
			}),
			VertexStatus::Complete
				if slice.data.as_ref().map_or(false, |d| d.checkpoint.is_some()) =>
			{
				Some(VertexState {
					status: VertexStatus::Continues {
						iteration: 0,
						time: self.time,
					},
					data: slice.data.clone(),
				})
			}
			VertexStatus::Paused | VertexStatus::PausedInherited => {
				let avail = assemble(&self.graph, self.flow, vertex, index);
				let status = if avail.is_ready() {
					VertexStatus::CanStart(self.time)
				} else {
					VertexStatus::Incomplete(match avail {
						InputAssembly::Transient => IncompleteReason::TransientInputs,
						_ => IncompleteReason::OutdatedInputs,
					})
				};
				Some(VertexState::new(status))
			}
			_ => None,
		};
		match new {
			Some(new) => {
				self.set_slice(vertex, index, new);
				true
			}
			None => false,
		}
	}

	/// Does any in-edge source of `vertex` have a dirty slice?
	fn sources_dirty(&self, vertex: VertexId) -> bool {
		self.graph.edges_into(vertex).any(|e| {
			self.dirty
				.range((e.source, VertexIndex::empty())..)
				.take_while(|((v, _), _)| *v == e.source)
				.next()
				.is_some()
		})
	}

	/// Did the inputs feeding `(vertex, index)` change value this
	/// transition? (Outputs that merely appeared do not count.)
	fn slice_inputs_changed(&self, vertex: VertexId, index: &VertexIndex) -> bool {
		for e in self.graph.edges_into(vertex) {
			let changed = match e.kind {
				ConnectionKind::OneToOne(r) | ConnectionKind::Scatter(r) => self
					.dirty
					.get(&(e.source, VertexIndex::from(index.prefix(r))))
					.map_or(false, |d| *d == Dirty::Changed),

				ConnectionKind::Collect { .. } => self
					.dirty
					.get(&(e.source, index.clone()))
					.map_or(false, |d| *d == Dirty::Changed),

				ConnectionKind::Reduce(_) => self
					.dirty
					.range((e.source, VertexIndex::empty())..)
					.take_while(|((v, _), _)| *v == e.source)
					.any(|((_, i), d)| {
						*d == Dirty::Changed
							&& i.len() == index.len() + 1
							&& i.prefix(index.len()) == index.as_slice()
					}),
			};
			if changed {
				return true;
			}
		}
		false
	}

	/// Walk every vertex in topological order, reconciling shapes and
	/// reclassifying slices whose inputs may have moved.
	fn reclassify(&mut self) {
		let order: Vec<VertexId> = self.graph.topo_order().to_vec();
		for v in order {
			let triggered = self.force
				|| self.added.contains(&v)
				|| self.conn_changed.contains(&v)
				|| self.sources_dirty(v);
			if !triggered {
				continue;
			}

			// Shape propagation: scatter fanouts may have changed
			let new_map = shape::reconcile(&self.graph, self.flow, v);
			let replace = match self.flow.get(&v) {
				Some(cur) => !shape::same_shape(cur, &new_map),
				None => true,
			};
			if replace {
				self.touch(v);
				if let Some(cur) = self.flow.get(&v) {
					// Slices that vanish take their outputs with them
					let vanished: Vec<(VertexIndex, bool)> = cur
						.iter()
						.map(|(i, s)| {
							(
								VertexIndex::new(i.clone()),
								visible_slots(s).iter().any(|o| o.is_some()),
							)
						})
						.filter(|(i, _)| new_map.get(i.as_slice()).is_none())
						.collect();
					for (i, published) in vanished {
						if published {
							self.mark_dirty(v, i, Dirty::Changed);
						}
					}
				}
				self.flow.insert(v, new_map);
			}

			// Downstream reclassification of every slice
			let indices: Vec<VertexIndex> = self
				.flow
				.get(&v)
				.map(|m| m.iter().map(|(i, _)| VertexIndex::new(i)).collect())
				.unwrap_or_default();
			for idx in indices {
				let Some(slice) = self.slice(v, &idx) else {
					continue;
				};
				let changed = self.conn_changed.contains(&v) || self.slice_inputs_changed(v, &idx);
				let avail = assemble(&self.graph, self.flow, v, &idx);
				if let Some(new_slice) = classify(&slice, &avail, changed, self.time) {
					self.set_slice(v, &idx, new_slice);
				}
			}
		}
	}

	/// Turn the touch records into the transition's change set
	fn finish(self) -> Changes {
		let mut changes: Changes = BTreeMap::new();

		for v in &self.removed {
			changes.insert(*v, VertexChanges::Removed);
		}
		for v in &self.added {
			if let Some(map) = self.flow.get(v) {
				changes.insert(*v, VertexChanges::New(map.clone()));
			}
		}

		for (v, old_map) in self.old {
			if changes.contains_key(&v) {
				continue;
			}
			let Some(new_map) = self.flow.get(&v) else {
				continue;
			};
			let connection_changed = self.conn_changed.contains(&v);

			if !shape::same_shape(&old_map, new_map) {
				changes.insert(
					v,
					VertexChanges::ShapeChanged {
						old: old_map,
						new: new_map.clone(),
						connection_changed,
					},
				);
			} else {
				let mut indices = BTreeSet::new();
				for (i, s) in new_map.iter() {
					let moved = old_map
						.get(&i)
						.map(|o| o.status != s.status)
						.unwrap_or(true);
					if moved {
						indices.insert(VertexIndex::new(i));
					}
				}
				if !indices.is_empty() {
					changes.insert(
						v,
						VertexChanges::Modified {
							indices,
							old: old_map,
							new: new_map.clone(),
							connection_changed,
						},
					);
				}
			}
		}

		changes
	}
}

/// Normalise a restored slice whose worker no longer exists
fn normalize_restored(slice: &VertexState) -> VertexState {
	match &slice.status {
		VertexStatus::CanStart(_) | VertexStatus::Started(_) => VertexState::new(
			VertexStatus::Incomplete(IncompleteReason::OutdatedInputs),
		),
		VertexStatus::Continues { iteration, .. } => VertexState {
			status: VertexStatus::PausedContinues {
				iteration: *iteration,
			},
			data: slice.data.clone(),
		},
		VertexStatus::CompleteStarted { .. } => VertexState {
			status: VertexStatus::Complete,
			data: slice.data.clone(),
		},
		_ => slice.clone(),
	}
}

/// The output slots a slice exposes to downstream readers
fn visible_slots(slice: &VertexState) -> Vec<Option<&Artefact>> {
	if !slice.status.publishes_outputs() {
		return Vec::new();
	}
	match &slice.data {
		Some(d) => d.outputs.iter().map(|o| o.as_ref()).collect(),
		None => Vec::new(),
	}
}

/// How did a slice's visible outputs move between two states?
fn dirty_between(old: Option<&VertexState>, new: &VertexState) -> Option<Dirty> {
	let old_slots = old.map(visible_slots).unwrap_or_default();
	let new_slots = visible_slots(new);

	let n = old_slots.len().max(new_slots.len());
	let mut appeared = false;
	for i in 0..n {
		let o = old_slots.get(i).copied().flatten();
		let w = new_slots.get(i).copied().flatten();
		match (o, w) {
			(Some(a), Some(b)) => {
				if !same_artefact(a, b) {
					return Some(Dirty::Changed);
				}
			}
			(Some(_), None) => return Some(Dirty::Changed),
			(None, Some(_)) => appeared = true,
			(None, None) => {}
		}
	}
	appeared.then_some(Dirty::Appeared)
}

/// The downstream reclassification table: given a slice's current
/// state, its freshly assembled inputs, and whether those inputs
/// changed this transition, decide its next state.
///
/// Returns `None` when the slice stays as it is.
fn classify(
	slice: &VertexState,
	avail: &InputAssembly,
	changed: bool,
	time: TimeIndex,
) -> Option<VertexState> {
	use IncompleteReason as R;
	use VertexStatus as S;

	let ready = avail.is_ready();
	let blocked = |avail: &InputAssembly| match avail {
		InputAssembly::Transient => R::TransientInputs,
		_ => R::OutdatedInputs,
	};

	match &slice.status {
		S::Incomplete(reason) => match reason {
			R::UnassignedInputs | R::OutdatedInputs => {
				if ready {
					Some(VertexState::new(S::CanStart(time)))
				} else if matches!(avail, InputAssembly::Transient) {
					Some(VertexState::new(S::Incomplete(R::TransientInputs)))
				} else {
					None
				}
			}
			R::TransientInputs => {
				if ready {
					Some(VertexState::new(S::CanStart(time)))
				} else {
					None
				}
			}
			// Stable failure modes: only an input change revives them
			R::Stopped | R::ExecutionFailed(_) => {
				if !changed {
					None
				} else if ready {
					Some(VertexState::new(S::CanStart(time)))
				} else {
					Some(VertexState::new(S::Incomplete(blocked(avail))))
				}
			}
		},

		S::CanStart(_) => {
			if !ready {
				Some(VertexState::new(S::Incomplete(blocked(avail))))
			} else if changed {
				// Inputs moved again before the start: re-debounce
				Some(VertexState::new(S::CanStart(time)))
			} else {
				None
			}
		}

		S::Started(_) | S::Continues { .. } => {
			if !ready {
				Some(VertexState::new(S::Incomplete(blocked(avail))))
			} else if changed {
				// The in-flight run is computing stale values; its
				// replacement cancels it and stale-time filtering
				// swallows whatever it still reports
				Some(VertexState::new(S::CanStart(time)))
			} else {
				None
			}
		}

		S::Complete => {
			if changed {
				if ready {
					Some(VertexState::new(S::CanStart(time)))
				} else {
					Some(VertexState::new(S::Incomplete(blocked(avail))))
				}
			} else if ready && slice.data.as_ref().map_or(true, |d| d.is_partial()) {
				// Restored with holes: re-start to fill them
				Some(VertexState {
					status: S::CompleteStarted { time },
					data: slice.data.clone(),
				})
			} else {
				None
			}
		}

		S::CompleteStarted { .. } => {
			if !changed {
				None
			} else if ready {
				Some(VertexState::new(S::CanStart(time)))
			} else {
				Some(VertexState::new(S::Incomplete(blocked(avail))))
			}
		}

		// An upstream change overrides a pause: the suspended
		// iteration's inputs are gone
		S::Paused | S::PausedContinues { .. } | S::PausedInherited => {
			if !changed {
				None
			} else if ready {
				Some(VertexState::new(S::CanStart(time)))
			} else {
				Some(VertexState::new(S::Incomplete(blocked(avail))))
			}
		}
	}
}
