//! Inferring each vertex's index space from its in-edges

use rill_util::mdmap::MdMap;

use crate::{
	graph::{ConnectionKind, FlowGraph},
	labels::VertexId,
};

use super::state::{FlowState, VertexState};

/// The extent of the axis of `vertex` that follows `prefix`, as
/// constrained by one in-edge.
///
/// `None` means the extent is not yet known along that edge.
fn edge_extent(
	flow: &FlowState,
	edge_source: VertexId,
	kind: ConnectionKind,
	output_ref: usize,
	prefix: &[usize],
) -> Option<usize> {
	match kind {
		// These mirror the source's own axis at the same prefix
		ConnectionKind::OneToOne(_)
		| ConnectionKind::Reduce(_)
		| ConnectionKind::Collect { .. } => flow.get(&edge_source)?.extent(prefix),

		ConnectionKind::Scatter(r) => {
			if prefix.len() < r {
				// A mirrored axis, as above
				flow.get(&edge_source)?.extent(prefix)
			} else {
				// The scattered axis: its extent is the length of the
				// source's array output, once that output is visible
				let slice = flow.get(&edge_source)?.get(prefix)?;
				slice
					.visible_output(output_ref)
					.and_then(|a| a.array_len())
			}
		}
	}
}

/// Compute the current index space of `vertex` and rebuild its slice
/// map against it, carrying over the state of every surviving slice.
///
/// An axis extent is known iff every in-edge that constrains it
/// reports a known extent; conflicting extents intersect. New slices
/// enter with the canonical initial state.
pub(crate) fn reconcile(
	graph: &FlowGraph,
	flow: &FlowState,
	vertex: VertexId,
) -> MdMap<VertexState> {
	let rank = graph.rank(vertex).unwrap_or(0);
	let edges: Vec<_> = graph
		.edges_into(vertex)
		.map(|e| (e.source, e.kind, e.output_ref))
		.collect();
	let old = flow.get(&vertex);

	MdMap::build(
		rank,
		|prefix| {
			let mut extent: Option<usize> = None;
			for (source, kind, output_ref) in &edges {
				match edge_extent(flow, *source, *kind, *output_ref, prefix) {
					None => return None,
					Some(n) => {
						extent = Some(extent.map_or(n, |e| e.min(n)));
					}
				}
			}
			extent
		},
		|index| {
			old.and_then(|m| m.get(index))
				.cloned()
				.unwrap_or_else(VertexState::unassigned)
		},
	)
}

/// Do two slice maps cover the same index space?
pub(crate) fn same_shape(a: &MdMap<VertexState>, b: &MdMap<VertexState>) -> bool {
	a.map(|_, _| ()) == b.map(|_, _| ())
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeMap;

	use super::*;
	use crate::graph::FlowEdge;
	use crate::state::{VertexData, VertexStatus};
	use crate::testing::*;

	#[test]
	fn scatter_fanout_follows_the_source_array() {
		let a = vertex("a", TestMethod::constant_array("a", &[1, 2, 3]));
		let b = vertex("b", TestMethod::map_int("b", |x| x));
		let (ai, bi) = (a.id(), b.id());
		let g = graph(
			vec![a, b],
			vec![FlowEdge {
				source: ai,
				output_ref: 0,
				target: bi,
				input_ref: 0,
				kind: ConnectionKind::Scatter(0),
			}],
		);

		// Before `a` publishes, `b`'s axis is unknown
		let mut flow: FlowState = BTreeMap::new();
		flow.insert(ai, MdMap::scalar(VertexState::unassigned()));
		let before = reconcile(&g, &flow, bi);
		assert_eq!(before.rank(), 1);
		assert!(before.is_empty());

		// Once it does, three slices appear
		flow.insert(
			ai,
			MdMap::scalar(VertexState {
				status: VertexStatus::Complete,
				data: Some(VertexData::full(vec![ints(&[1, 2, 3])], None)),
			}),
		);
		let after = reconcile(&g, &flow, bi);
		assert_eq!(after.len(), 3);
		assert_eq!(after.extent(&[]), Some(3));
		assert!(!same_shape(&before, &after));
	}

	#[test]
	fn reconcile_carries_surviving_slices_over() {
		let a = vertex("a", TestMethod::constant_array("a", &[1, 2]));
		let b = vertex("b", TestMethod::map_int("b", |x| x));
		let (ai, bi) = (a.id(), b.id());
		let g = graph(
			vec![a, b],
			vec![FlowEdge {
				source: ai,
				output_ref: 0,
				target: bi,
				input_ref: 0,
				kind: ConnectionKind::Scatter(0),
			}],
		);

		let mut flow: FlowState = BTreeMap::new();
		flow.insert(
			ai,
			MdMap::scalar(VertexState {
				status: VertexStatus::Complete,
				data: Some(VertexData::full(vec![ints(&[1, 2])], None)),
			}),
		);
		let mut b_map = reconcile(&g, &flow, bi);
		b_map.set(
			&[0],
			VertexState {
				status: VertexStatus::Complete,
				data: Some(VertexData::full(vec![int(10)], None)),
			},
		);
		flow.insert(bi, b_map);

		let again = reconcile(&g, &flow, bi);
		assert!(matches!(
			again.get(&[0]).unwrap().status,
			VertexStatus::Complete
		));
		assert!(matches!(
			again.get(&[1]).unwrap().status,
			VertexStatus::Incomplete(_)
		));
	}

	#[test]
	fn reduce_cuts_the_last_axis() {
		let a = vertex("a", TestMethod::constant_array("a", &[1, 2]));
		let b = vertex("b", TestMethod::map_int("b", |x| x));
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

		let mut flow: FlowState = BTreeMap::new();
		flow.insert(
			ai,
			MdMap::scalar(VertexState {
				status: VertexStatus::Complete,
				data: Some(VertexData::full(vec![ints(&[1, 2])], None)),
			}),
		);
		flow.insert(bi, reconcile(&g, &flow, bi));

		// `c` has rank 0: a single slice regardless of `b`'s fanout
		let c_map = reconcile(&g, &flow, ci);
		assert_eq!(c_map.rank(), 0);
		assert_eq!(c_map.len(), 1);
	}
}
