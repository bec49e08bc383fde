//! Edges and their connection kinds

use std::fmt::Display;

use crate::labels::VertexId;

/// The semantic of an edge: how source slices map to target slices.
///
/// The rank parameter in each variant is the rank of the axis space
/// the edge operates over; see [`ConnectionKind::source_rank`] and
/// [`ConnectionKind::target_rank`] for what that means per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
	/// Source and target share rank `r`; element-wise mapping.
	OneToOne(usize),

	/// Target has rank `r + 1`; its last axis iterates over the
	/// source's one-dimensional array output.
	Scatter(usize),

	/// Source has rank `r + 1`; the target collects all elements
	/// along the source's last axis into one array input.
	Reduce(usize),

	/// One of several edges at the same input port, supplying the
	/// array element at position `index`.
	Collect {
		/// This edge's position in the assembled array
		index: usize,

		/// Rank shared by source and target
		rank: usize,
	},
}

impl ConnectionKind {
	/// The rank the source vertex must have for this edge
	pub fn source_rank(&self) -> usize {
		match self {
			Self::OneToOne(r) => *r,
			Self::Scatter(r) => *r,
			Self::Reduce(r) => r + 1,
			Self::Collect { rank, .. } => *rank,
		}
	}

	/// The rank the target vertex must have for this edge
	pub fn target_rank(&self) -> usize {
		match self {
			Self::OneToOne(r) => *r,
			Self::Scatter(r) => r + 1,
			Self::Reduce(r) => *r,
			Self::Collect { rank, .. } => *rank,
		}
	}

	/// Is this a `Self::Collect`?
	pub fn is_collect(&self) -> bool {
		matches!(self, Self::Collect { .. })
	}
}

impl Display for ConnectionKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::OneToOne(r) => write!(f, "one-to-one({r})"),
			Self::Scatter(r) => write!(f, "scatter({r})"),
			Self::Reduce(r) => write!(f, "reduce({r})"),
			Self::Collect { index, rank } => write!(f, "collect({index}, {rank})"),
		}
	}
}

/// A directed, typed edge between an output port and an input port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowEdge {
	/// The vertex this edge starts at
	pub source: VertexId,

	/// Index into the source's outputs
	pub output_ref: usize,

	/// The vertex this edge ends at
	pub target: VertexId,

	/// Index into the target's inputs
	pub input_ref: usize,

	/// What this edge means
	pub kind: ConnectionKind,
}

impl Display for FlowEdge {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"{}:{} -[{}]-> {}:{}",
			self.source, self.output_ref, self.kind, self.target, self.input_ref
		)
	}
}
