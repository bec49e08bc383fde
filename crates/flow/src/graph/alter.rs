//! Atomic graph mutation batches

use crate::labels::VertexId;

use super::{
	edge::FlowEdge,
	errors::AlterError,
	graph::{FlowGraph, FlowVertex},
};

/// An atomic batch of graph mutations.
///
/// Applied in field order: disconnect, remove, merge, connect.
/// The whole batch is checked against the resulting graph; if
/// anything is wrong the batch is rejected and nothing changes.
#[derive(Debug, Clone, Default)]
pub struct AlterRequest {
	/// Edges to remove, matched by value
	pub disconnect: Vec<FlowEdge>,

	/// Vertices to remove, along with all their incident edges
	pub remove: Vec<VertexId>,

	/// A graph to merge in: all its vertices and edges are added
	pub merge: Option<FlowGraph>,

	/// Edges to add
	pub connect: Vec<FlowEdge>,
}

impl AlterRequest {
	/// Does this batch change nothing?
	pub fn is_empty(&self) -> bool {
		self.disconnect.is_empty()
			&& self.remove.is_empty()
			&& self.connect.is_empty()
			&& self
				.merge
				.as_ref()
				.map_or(true, |g| g.len_vertices() == 0 && g.len_edges() == 0)
	}

	/// A batch that only connects one edge
	pub fn connect_one(edge: FlowEdge) -> Self {
		Self {
			connect: vec![edge],
			..Default::default()
		}
	}

	/// A batch that only disconnects one edge
	pub fn disconnect_one(edge: FlowEdge) -> Self {
		Self {
			disconnect: vec![edge],
			..Default::default()
		}
	}

	/// A batch that only removes one vertex
	pub fn remove_one(vertex: VertexId) -> Self {
		Self {
			remove: vec![vertex],
			..Default::default()
		}
	}
}

impl FlowGraph {
	/// Apply an alteration batch, producing a new graph.
	///
	/// `self` is untouched; on error nothing at all happens.
	pub fn alter(&self, request: &AlterRequest) -> Result<FlowGraph, AlterError> {
		let mut vertices: Vec<FlowVertex> = self.vertices().cloned().collect();
		let mut edges: Vec<FlowEdge> = self.edges().to_vec();

		for e in &request.disconnect {
			match edges.iter().position(|x| x == e) {
				Some(i) => {
					edges.remove(i);
				}
				None => return Err(AlterError::NoSuchEdge { edge: e.clone() }),
			}
		}

		for v in &request.remove {
			if !vertices.iter().any(|x| x.id() == *v) {
				return Err(AlterError::NoSuchVertex { vertex: *v });
			}
			vertices.retain(|x| x.id() != *v);
			edges.retain(|e| e.source != *v && e.target != *v);
		}

		if let Some(merge) = &request.merge {
			vertices.extend(merge.vertices().cloned());
			edges.extend(merge.edges().iter().cloned());
		}

		edges.extend(request.connect.iter().cloned());

		FlowGraph::new(vertices, edges)
	}
}
