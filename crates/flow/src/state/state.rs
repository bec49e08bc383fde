//! Snapshots of everything the engine knows

use std::{collections::BTreeMap, sync::Arc};

use rill_util::mdmap::MdMap;

use crate::{
	api::{Artefact, Checkpoint},
	graph::FlowGraph,
	labels::{VertexId, VertexIndex},
};

use super::status::{TimeIndex, VertexStatus};

/// What a slice has produced: an output tuple and, for iterative
/// methods, the checkpoint that reproduces it.
///
/// An output slot may be `None` after a state restore; such outputs
/// are *partial* and must be restored before downstream can use them.
#[derive(Debug, Clone)]
pub struct VertexData {
	/// One slot per output port
	pub outputs: Vec<Option<Artefact>>,

	/// The checkpoint the last yield carried, if any
	pub checkpoint: Option<Checkpoint>,
}

impl VertexData {
	/// Data with every output slot filled
	pub fn full(outputs: Vec<Artefact>, checkpoint: Option<Checkpoint>) -> Self {
		Self {
			outputs: outputs.into_iter().map(Some).collect(),
			checkpoint,
		}
	}

	/// Is any output slot empty?
	pub fn is_partial(&self) -> bool {
		self.outputs.iter().any(|o| o.is_none())
	}

	/// The artefact in the given output slot, if present
	pub fn output(&self, slot: usize) -> Option<&Artefact> {
		self.outputs.get(slot).and_then(|o| o.as_ref())
	}
}

/// The full state of one slice
#[derive(Debug, Clone)]
pub struct VertexState {
	/// Where this slice is in its lifecycle
	pub status: VertexStatus,

	/// What this slice has produced, if anything
	pub data: Option<VertexData>,
}

impl VertexState {
	/// A slice with the given status and no data
	pub fn new(status: VertexStatus) -> Self {
		Self { status, data: None }
	}

	/// The canonical initial slice state
	pub fn unassigned() -> Self {
		Self::new(VertexStatus::unassigned())
	}

	/// The artefact this slice publishes in the given output slot.
	///
	/// `None` when the status does not publish outputs, or the slot
	/// is empty.
	pub fn visible_output(&self, slot: usize) -> Option<&Artefact> {
		if !self.status.publishes_outputs() {
			return None;
		}
		self.data.as_ref().and_then(|d| d.output(slot))
	}
}

/// Per-vertex slice states
pub type FlowState = BTreeMap<VertexId, MdMap<VertexState>>;

/// An immutable snapshot of the engine: the graph, every slice's
/// state, and the logical clock.
#[derive(Debug, Clone)]
pub struct State {
	/// The graph being evaluated
	pub graph: Arc<FlowGraph>,

	/// The state of every slice of every vertex
	pub flow: FlowState,

	/// The logical clock; never decreases
	pub time: TimeIndex,
}

impl State {
	/// The state of one slice, if it exists
	pub fn slice(&self, vertex: VertexId, index: &VertexIndex) -> Option<&VertexState> {
		self.flow.get(&vertex)?.get(index.as_slice())
	}

	/// The status of one slice, if it exists
	pub fn status(&self, vertex: VertexId, index: &VertexIndex) -> Option<&VertexStatus> {
		self.slice(vertex, index).map(|s| &s.status)
	}
}

/// Do two artefacts hold the very same values?
///
/// Values are opaque, so this is identity, not structural equality.
pub(crate) fn same_artefact(a: &Artefact, b: &Artefact) -> bool {
	match (a, b) {
		(Artefact::Item(x), Artefact::Item(y)) => Arc::ptr_eq(x, y),
		(Artefact::Array(xs), Artefact::Array(ys)) => {
			xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| Arc::ptr_eq(x, y))
		}
		_ => false,
	}
}
