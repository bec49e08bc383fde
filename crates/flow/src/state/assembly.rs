//! Input assembly: resolving what a slice would consume

use crate::{
	api::{Artefact, Value},
	graph::{ConnectionKind, FlowGraph},
	labels::{VertexId, VertexIndex},
};

use super::state::FlowState;

/// The result of assembling all inputs of one slice
#[derive(Debug, Clone)]
pub enum InputAssembly {
	/// Every port resolved; these are the artefacts to execute with,
	/// in port order
	Ready(Vec<Artefact>),

	/// Some input has not been produced yet
	Unassigned,

	/// Some upstream output is partial with no checkpoint to
	/// reproduce it from
	Transient,
}

impl InputAssembly {
	/// Did every port resolve?
	pub fn is_ready(&self) -> bool {
		matches!(self, Self::Ready(_))
	}
}

/// The result of assembling one input port
enum PortAssembly {
	Ready(Artefact),
	Unassigned,
	Transient,
}

/// What one upstream output slot looks like from downstream
enum SlotView<'a> {
	/// The slot holds this artefact and the producer publishes it
	Visible(&'a Artefact),

	/// Nothing to read yet
	Missing,

	/// The producer publishes partial outputs it cannot reproduce
	Transient,
}

/// Look at the output slot of one producing slice.
fn view_slot<'a>(flow: &'a FlowState, vertex: VertexId, index: &[usize], slot: usize) -> SlotView<'a> {
	let Some(map) = flow.get(&vertex) else {
		return SlotView::Missing;
	};
	let Some(slice) = map.get(index) else {
		return SlotView::Missing;
	};
	if !slice.status.publishes_outputs() {
		return SlotView::Missing;
	}
	let Some(data) = &slice.data else {
		return SlotView::Missing;
	};
	match data.output(slot) {
		Some(a) => SlotView::Visible(a),
		None if data.checkpoint.is_some() => SlotView::Missing,
		None => SlotView::Transient,
	}
}

/// Assemble one input port of the slice `(vertex, index)`.
fn assemble_port(
	graph: &FlowGraph,
	flow: &FlowState,
	vertex: VertexId,
	index: &VertexIndex,
	port: usize,
) -> PortAssembly {
	let edges: Vec<_> = graph.edges_into_port(vertex, port).collect();

	if edges.is_empty() {
		// An unconnected array port reads as the empty array;
		// anything else cannot be satisfied.
		let is_array = graph
			.vertex(vertex)
			.map(|v| v.method().inputs()[port].is_array())
			.unwrap_or(false);
		return if is_array {
			PortAssembly::Ready(Artefact::Array(Vec::new()))
		} else {
			PortAssembly::Unassigned
		};
	}

	if let [e] = edges.as_slice() {
		match e.kind {
			ConnectionKind::OneToOne(r) => {
				return match view_slot(flow, e.source, index.prefix(r), e.output_ref) {
					SlotView::Visible(a) => PortAssembly::Ready(a.clone()),
					SlotView::Missing => PortAssembly::Unassigned,
					SlotView::Transient => PortAssembly::Transient,
				};
			}

			ConnectionKind::Scatter(r) => {
				return match view_slot(flow, e.source, index.prefix(r), e.output_ref) {
					SlotView::Visible(a) => {
						let element = a
							.as_array()
							.and_then(|els| index.component(r).and_then(|k| els.get(k)));
						match element {
							Some(v) => PortAssembly::Ready(Artefact::Item(v.clone())),
							None => PortAssembly::Unassigned,
						}
					}
					SlotView::Missing => PortAssembly::Unassigned,
					SlotView::Transient => PortAssembly::Transient,
				};
			}

			ConnectionKind::Reduce(_) => {
				// Gather the source's last axis at our index. We need
				// the extent to be known and every element visible.
				let Some(n) = flow
					.get(&e.source)
					.and_then(|m| m.extent(index.as_slice()))
				else {
					return PortAssembly::Unassigned;
				};

				let mut values: Vec<Value> = Vec::with_capacity(n);
				for k in 0..n {
					let element = index.child(k);
					match view_slot(flow, e.source, element.as_slice(), e.output_ref) {
						SlotView::Visible(a) => match a.as_item() {
							Some(v) => values.push(v.clone()),
							None => return PortAssembly::Unassigned,
						},
						SlotView::Missing => return PortAssembly::Unassigned,
						SlotView::Transient => return PortAssembly::Transient,
					}
				}
				return PortAssembly::Ready(Artefact::Array(values));
			}

			ConnectionKind::Collect { .. } => {
				// Falls through to the multi-edge path below
			}
		}
	}

	// One or more collect edges: each supplies one element,
	// ordered by its claimed position.
	let mut elements: Vec<(usize, Value)> = Vec::with_capacity(edges.len());
	for e in &edges {
		let ConnectionKind::Collect { index: position, .. } = e.kind else {
			// Mixed bindings are rejected at graph construction
			return PortAssembly::Unassigned;
		};
		match view_slot(flow, e.source, index.as_slice(), e.output_ref) {
			SlotView::Visible(a) => match a.as_item() {
				Some(v) => elements.push((position, v.clone())),
				None => return PortAssembly::Unassigned,
			},
			SlotView::Missing => return PortAssembly::Unassigned,
			SlotView::Transient => return PortAssembly::Transient,
		}
	}
	elements.sort_by_key(|(position, _)| *position);
	PortAssembly::Ready(Artefact::Array(
		elements.into_iter().map(|(_, v)| v).collect(),
	))
}

/// Assemble every input port of the slice `(vertex, index)`.
///
/// The state machine uses this to decide whether a slice can start;
/// the runtime uses the same routine to hand a worker its inputs.
pub fn assemble(
	graph: &FlowGraph,
	flow: &FlowState,
	vertex: VertexId,
	index: &VertexIndex,
) -> InputAssembly {
	let Some(v) = graph.vertex(vertex) else {
		return InputAssembly::Unassigned;
	};

	let n_inputs = v.method().inputs().len();
	let mut inputs = Vec::with_capacity(n_inputs);
	let mut transient = false;
	let mut unassigned = false;

	for port in 0..n_inputs {
		match assemble_port(graph, flow, vertex, index, port) {
			PortAssembly::Ready(a) => inputs.push(a),
			PortAssembly::Unassigned => unassigned = true,
			PortAssembly::Transient => transient = true,
		}
	}

	if transient {
		InputAssembly::Transient
	} else if unassigned {
		InputAssembly::Unassigned
	} else {
		InputAssembly::Ready(inputs)
	}
}
