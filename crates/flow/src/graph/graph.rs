//! An immutable dataflow graph with fast reads

use itertools::Itertools;
use petgraph::{algo::toposort, graphmap::GraphMap, Directed};
use std::{collections::BTreeMap, sync::Arc};

use crate::{
	api::Method,
	labels::{VertexId, VertexName},
};

use super::{
	edge::{ConnectionKind, FlowEdge},
	errors::AlterError,
};

/// A vertex: an identity plus the method it runs.
///
/// Two vertices may share a method; they are still distinct vertices.
#[derive(Debug, Clone)]
pub struct FlowVertex {
	id: VertexId,
	name: VertexName,
	method: Arc<dyn Method>,
}

impl FlowVertex {
	/// Make a new vertex running the given method,
	/// with a fresh identity.
	pub fn new(name: impl Into<VertexName>, method: Arc<dyn Method>) -> Self {
		Self {
			id: VertexId::new(),
			name: name.into(),
			method,
		}
	}

	/// This vertex's identity
	pub fn id(&self) -> VertexId {
		self.id
	}

	/// This vertex's name, for logs
	pub fn name(&self) -> &VertexName {
		&self.name
	}

	/// The method this vertex runs
	pub fn method(&self) -> &Arc<dyn Method> {
		&self.method
	}
}

/// An immutable directed acyclic graph of vertices and typed edges.
///
/// Graphs are built whole and never mutated; an alteration produces
/// a new graph. Adjacency, ranks, and a topological order are
/// precomputed so all read paths are fast.
#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
	vertices: BTreeMap<VertexId, FlowVertex>,
	edges: Vec<FlowEdge>,

	/// Edge indices by target vertex. Redundant, but makes reads fast.
	edges_into: BTreeMap<VertexId, Vec<usize>>,

	/// Edge indices by source vertex. Redundant, but makes reads fast.
	edges_from: BTreeMap<VertexId, Vec<usize>>,

	/// Rank of each vertex, as implied by its in-edges
	ranks: BTreeMap<VertexId, usize>,

	/// Vertices in topological order, sources first
	topo: Vec<VertexId>,
}

impl FlowGraph {
	/// The graph with no vertices
	pub fn empty() -> Self {
		Self::default()
	}

	/// Build and check a graph from its parts.
	///
	/// Checks acyclicity, port references, input bindings, rank
	/// consistency, and edge type compatibility; see [`AlterError`]
	/// for everything that can be wrong.
	pub fn new(vertices: Vec<FlowVertex>, edges: Vec<FlowEdge>) -> Result<Self, AlterError> {
		let mut vmap = BTreeMap::new();
		for v in vertices {
			let id = v.id();
			if vmap.insert(id, v).is_some() {
				return Err(AlterError::DuplicateVertex { vertex: id });
			}
		}

		// Edge endpoints must exist, ports must be in range
		for e in &edges {
			let src = vmap
				.get(&e.source)
				.ok_or(AlterError::NoSuchVertex { vertex: e.source })?;
			let tgt = vmap
				.get(&e.target)
				.ok_or(AlterError::NoSuchVertex { vertex: e.target })?;

			if e.output_ref >= src.method().outputs().len() {
				return Err(AlterError::PortOutOfRange {
					vertex: e.source,
					port: e.output_ref,
					output: true,
				});
			}
			if e.input_ref >= tgt.method().inputs().len() {
				return Err(AlterError::PortOutOfRange {
					vertex: e.target,
					port: e.input_ref,
					output: false,
				});
			}
		}

		// Each input port is bound by one non-collect edge, or by
		// collect edges with pairwise-distinct element indices.
		let mut bindings: BTreeMap<(VertexId, usize), Vec<&FlowEdge>> = BTreeMap::new();
		for e in &edges {
			bindings.entry((e.target, e.input_ref)).or_default().push(e);
		}
		for ((vertex, port), es) in bindings {
			let n_collect = es.iter().filter(|e| e.kind.is_collect()).count();
			if n_collect == 0 {
				if es.len() > 1 {
					return Err(AlterError::InputBoundTwice { vertex, port });
				}
			} else if n_collect != es.len() {
				return Err(AlterError::MixedConnection { vertex, port });
			} else {
				let duplicate = es
					.iter()
					.filter_map(|e| match e.kind {
						ConnectionKind::Collect { index, .. } => Some(index),
						_ => None,
					})
					.duplicates()
					.next();
				if let Some(index) = duplicate {
					return Err(AlterError::CollectCollision {
						vertex,
						port,
						index,
					});
				}
			}
		}

		// Acyclicity, and a topological order for everyone downstream.
		// A GraphMap collapses parallel edges, which is fine here.
		let mut pg: GraphMap<VertexId, (), Directed> = GraphMap::new();
		for id in vmap.keys() {
			pg.add_node(*id);
		}
		for e in &edges {
			if e.source == e.target {
				return Err(AlterError::HasCycle);
			}
			pg.add_edge(e.source, e.target, ());
		}
		let topo = toposort(&pg, None).map_err(|_| AlterError::HasCycle)?;

		let mut edges_into: BTreeMap<VertexId, Vec<usize>> =
			vmap.keys().map(|id| (*id, Vec::new())).collect();
		let mut edges_from = edges_into.clone();
		for (i, e) in edges.iter().enumerate() {
			edges_into.get_mut(&e.target).unwrap().push(i);
			edges_from.get_mut(&e.source).unwrap().push(i);
		}

		// Every in-edge of a vertex must imply the same rank for it,
		// and every edge's rank parameter must match its source.
		let mut ranks: BTreeMap<VertexId, usize> = BTreeMap::new();
		for v in &topo {
			let ins = &edges_into[v];
			let rank = match ins.first() {
				None => 0,
				Some(first) => {
					let expected = edges[*first].kind.target_rank();
					for i in ins {
						let found = edges[*i].kind.target_rank();
						if found != expected {
							return Err(AlterError::RankMismatch {
								vertex: *v,
								expected,
								found,
							});
						}
					}
					expected
				}
			};
			ranks.insert(*v, rank);
		}
		for e in &edges {
			let expected = e.kind.source_rank();
			let found = ranks[&e.source];
			if found != expected {
				return Err(AlterError::RankMismatch {
					vertex: e.source,
					expected,
					found,
				});
			}
		}

		// Edge type compatibility
		for e in &edges {
			let o = &vmap[&e.source].method().outputs()[e.output_ref];
			let t = &vmap[&e.target].method().inputs()[e.input_ref];
			let compatible = match e.kind {
				ConnectionKind::OneToOne(_) => o == t,
				ConnectionKind::Scatter(_) => o.element() == Some(t),
				ConnectionKind::Reduce(_) | ConnectionKind::Collect { .. } => {
					t.element() == Some(o)
				}
			};
			if !compatible {
				return Err(AlterError::TypeMismatch {
					edge: e.clone(),
					source_type: o.clone(),
					target_type: t.clone(),
				});
			}
		}

		Ok(Self {
			vertices: vmap,
			edges,
			edges_into,
			edges_from,
			ranks,
			topo,
		})
	}

	/// Get a vertex by id
	pub fn vertex(&self, id: VertexId) -> Option<&FlowVertex> {
		self.vertices.get(&id)
	}

	/// Is this vertex in the graph?
	pub fn contains_vertex(&self, id: VertexId) -> bool {
		self.vertices.contains_key(&id)
	}

	/// Iterate over all vertices, in id order
	pub fn vertices(&self) -> impl Iterator<Item = &FlowVertex> {
		self.vertices.values()
	}

	/// The number of vertices in this graph
	pub fn len_vertices(&self) -> usize {
		self.vertices.len()
	}

	/// All edges in this graph
	pub fn edges(&self) -> &[FlowEdge] {
		&self.edges
	}

	/// The number of edges in this graph
	pub fn len_edges(&self) -> usize {
		self.edges.len()
	}

	/// Iterate over the edges ending at the given vertex
	pub fn edges_into(&self, id: VertexId) -> impl Iterator<Item = &FlowEdge> {
		self.edges_into
			.get(&id)
			.into_iter()
			.flatten()
			.map(|i| &self.edges[*i])
	}

	/// Iterate over the edges ending at one input port
	pub fn edges_into_port(&self, id: VertexId, port: usize) -> impl Iterator<Item = &FlowEdge> {
		self.edges_into(id).filter(move |e| e.input_ref == port)
	}

	/// Iterate over the edges starting at the given vertex
	pub fn edges_from(&self, id: VertexId) -> impl Iterator<Item = &FlowEdge> {
		self.edges_from
			.get(&id)
			.into_iter()
			.flatten()
			.map(|i| &self.edges[*i])
	}

	/// The rank of a vertex, as implied by its in-edges
	pub fn rank(&self, id: VertexId) -> Option<usize> {
		self.ranks.get(&id).copied()
	}

	/// All vertices in topological order, sources first
	pub fn topo_order(&self) -> &[VertexId] {
		&self.topo
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::graph::{AlterRequest, ConnectionKind};
	use crate::testing::*;

	#[test]
	fn ranks_follow_scatter_and_reduce() {
		let a = vertex("a", TestMethod::constant_array("a", &[1, 2, 3]));
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

		assert_eq!(g.rank(ai), Some(0));
		assert_eq!(g.rank(bi), Some(1));
		assert_eq!(g.rank(ci), Some(0));
		assert_eq!(g.topo_order(), &[ai, bi, ci]);
	}

	#[test]
	fn cycles_are_rejected() {
		let a = vertex("a", TestMethod::map_int("a", |x| x));
		let b = vertex("b", TestMethod::map_int("b", |x| x));

		let e_ab = edge(&a, 0, &b, 0, ConnectionKind::OneToOne(0));
		let e_ba = edge(&b, 0, &a, 0, ConnectionKind::OneToOne(0));

		assert_eq!(
			FlowGraph::new(vec![a, b], vec![e_ab, e_ba]).unwrap_err(),
			AlterError::HasCycle
		);
	}

	#[test]
	fn self_loops_are_rejected() {
		let a = vertex("a", TestMethod::map_int("a", |x| x));
		let e = edge(&a, 0, &a, 0, ConnectionKind::OneToOne(0));

		assert_eq!(
			FlowGraph::new(vec![a], vec![e]).unwrap_err(),
			AlterError::HasCycle
		);
	}

	#[test]
	fn an_input_cannot_be_bound_twice() {
		let a = vertex("a", TestMethod::constant("a", 1));
		let b = vertex("b", TestMethod::constant("b", 2));
		let c = vertex("c", TestMethod::map_int("c", |x| x));
		let cid = c.id();

		let e_a = edge(&a, 0, &c, 0, ConnectionKind::OneToOne(0));
		let e_b = edge(&b, 0, &c, 0, ConnectionKind::OneToOne(0));

		assert_eq!(
			FlowGraph::new(vec![a, b, c], vec![e_a, e_b]).unwrap_err(),
			AlterError::InputBoundTwice {
				vertex: cid,
				port: 0
			}
		);
	}

	#[test]
	fn collect_edges_must_claim_distinct_elements() {
		let a = vertex("a", TestMethod::constant("a", 1));
		let b = vertex("b", TestMethod::constant("b", 2));
		let c = vertex("c", TestMethod::sum("c"));
		let cid = c.id();

		let e_a = edge(&a, 0, &c, 0, ConnectionKind::Collect { index: 0, rank: 0 });
		let e_b = edge(&b, 0, &c, 0, ConnectionKind::Collect { index: 0, rank: 0 });

		assert_eq!(
			FlowGraph::new(vec![a, b, c], vec![e_a, e_b]).unwrap_err(),
			AlterError::CollectCollision {
				vertex: cid,
				port: 0,
				index: 0
			}
		);
	}

	#[test]
	fn collect_and_non_collect_cannot_mix() {
		let a = vertex("a", TestMethod::constant("a", 1));
		let b = vertex("b", TestMethod::constant("b", 2));
		let c = vertex("c", TestMethod::sum("c"));
		let cid = c.id();

		let e_a = edge(&a, 0, &c, 0, ConnectionKind::Collect { index: 0, rank: 0 });
		let e_b = edge(&b, 0, &c, 0, ConnectionKind::Reduce(0));

		// The reduce edge also fails rank checks, but binding is
		// checked first.
		assert_eq!(
			FlowGraph::new(vec![a, b, c], vec![e_a, e_b]).unwrap_err(),
			AlterError::MixedConnection {
				vertex: cid,
				port: 0
			}
		);
	}

	#[test]
	fn edge_types_must_be_compatible() {
		let a = vertex("a", TestMethod::constant("a", 1));
		let b = vertex("b", TestMethod::sum("b"));

		// `a` produces an item, `b` consumes an array; one-to-one
		// requires them to be equal.
		let e = edge(&a, 0, &b, 0, ConnectionKind::OneToOne(0));

		assert!(matches!(
			FlowGraph::new(vec![a, b], vec![e]).unwrap_err(),
			AlterError::TypeMismatch { .. }
		));
	}

	#[test]
	fn edge_rank_must_match_the_source() {
		let a = vertex("a", TestMethod::constant_array("a", &[1]));
		let b = vertex("b", TestMethod::map_int("b", |x| x));
		let aid = a.id();

		// Scatter(1) claims `a` has rank 1; it has rank 0.
		let e = edge(&a, 0, &b, 0, ConnectionKind::Scatter(1));

		assert_eq!(
			FlowGraph::new(vec![a, b], vec![e]).unwrap_err(),
			AlterError::RankMismatch {
				vertex: aid,
				expected: 1,
				found: 0
			}
		);
	}

	#[test]
	fn ports_must_be_in_range() {
		let a = vertex("a", TestMethod::constant("a", 1));
		let b = vertex("b", TestMethod::map_int("b", |x| x));
		let aid = a.id();

		let e = edge(&a, 3, &b, 0, ConnectionKind::OneToOne(0));

		assert_eq!(
			FlowGraph::new(vec![a, b], vec![e]).unwrap_err(),
			AlterError::PortOutOfRange {
				vertex: aid,
				port: 3,
				output: true
			}
		);
	}

	#[test]
	fn alter_connects_and_disconnects() {
		let a = vertex("a", TestMethod::constant("a", 1));
		let b = vertex("b", TestMethod::map_int("b", |x| x + 1));
		let e = edge(&a, 0, &b, 0, ConnectionKind::OneToOne(0));
		let g = graph(vec![a, b], vec![]);

		let connected = g.alter(&AlterRequest::connect_one(e.clone())).unwrap();
		assert_eq!(connected.len_edges(), 1);

		let disconnected = connected
			.alter(&AlterRequest::disconnect_one(e.clone()))
			.unwrap();
		assert_eq!(disconnected.len_edges(), 0);

		// Disconnecting it again fails, and the graph is unchanged
		assert_eq!(
			disconnected
				.alter(&AlterRequest::disconnect_one(e.clone()))
				.unwrap_err(),
			AlterError::NoSuchEdge { edge: e }
		);
	}

	#[test]
	fn alter_remove_takes_incident_edges() {
		let a = vertex("a", TestMethod::constant("a", 1));
		let b = vertex("b", TestMethod::map_int("b", |x| x + 1));
		let aid = a.id();
		let e = edge(&a, 0, &b, 0, ConnectionKind::OneToOne(0));
		let g = graph(vec![a, b], vec![e]);

		let altered = g.alter(&AlterRequest::remove_one(aid)).unwrap();
		assert_eq!(altered.len_vertices(), 1);
		assert_eq!(altered.len_edges(), 0);
		assert!(!altered.contains_vertex(aid));
	}

	#[test]
	fn alter_merges_a_subgraph() {
		let a = vertex("a", TestMethod::constant("a", 1));
		let aid = a.id();
		let g = graph(vec![a], vec![]);

		let b = vertex("b", TestMethod::map_int("b", |x| x * 2));
		let bid = b.id();
		let sub = graph(vec![b], vec![]);

		let merged = g
			.alter(&AlterRequest {
				merge: Some(sub),
				..Default::default()
			})
			.unwrap();
		assert!(merged.contains_vertex(aid));
		assert!(merged.contains_vertex(bid));
		assert_eq!(merged.len_vertices(), 2);
	}
}
