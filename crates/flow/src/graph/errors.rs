//! Errors we may encounter when building or altering a graph

use std::{error::Error, fmt::Display};

use crate::{api::TypeDesc, labels::VertexId};

use super::edge::FlowEdge;

/// An error in a graph alteration batch.
///
/// The batch that caused one of these is rejected wholesale;
/// the running state is left untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlterError {
	/// A merged-in vertex id is already present
	DuplicateVertex {
		/// The colliding vertex
		vertex: VertexId,
	},

	/// An edge or removal referenced a vertex that does not exist
	NoSuchVertex {
		/// The missing vertex
		vertex: VertexId,
	},

	/// A disconnect listed an edge that is not in the graph
	NoSuchEdge {
		/// The missing edge
		edge: FlowEdge,
	},

	/// An edge referenced a port past the end of a vertex's port list
	PortOutOfRange {
		/// The vertex whose port list was overrun
		vertex: VertexId,
		/// The out-of-range port index
		port: usize,
		/// Was this an output port reference?
		output: bool,
	},

	/// An input port is bound by more than one non-collect edge
	InputBoundTwice {
		/// The vertex whose input is over-bound
		vertex: VertexId,
		/// The over-bound input port
		port: usize,
	},

	/// An input port mixes collect and non-collect edges
	MixedConnection {
		/// The vertex whose input is mixed
		vertex: VertexId,
		/// The mixed input port
		port: usize,
	},

	/// Two collect edges at one input port claim the same element
	CollectCollision {
		/// The vertex whose input collides
		vertex: VertexId,
		/// The colliding input port
		port: usize,
		/// The element index claimed twice
		index: usize,
	},

	/// An edge's rank parameter disagrees with a vertex's actual rank,
	/// or a vertex's in-edges imply different ranks for it
	RankMismatch {
		/// The vertex whose rank is inconsistent
		vertex: VertexId,
		/// The rank implied by the first constraint seen
		expected: usize,
		/// The conflicting rank
		found: usize,
	},

	/// An edge connects ports whose types are not compatible
	/// under its connection kind
	TypeMismatch {
		/// The offending edge
		edge: FlowEdge,
		/// The source output's descriptor
		source_type: TypeDesc,
		/// The target input's descriptor
		target_type: TypeDesc,
	},

	/// The altered graph would contain a directed cycle
	HasCycle,

	/// The engine shut down before replying
	EngineStopped,
}

impl Error for AlterError {}

impl Display for AlterError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::DuplicateVertex { vertex } => {
				write!(f, "vertex {vertex} is already in the graph")
			}
			Self::NoSuchVertex { vertex } => {
				write!(f, "no such vertex {vertex}")
			}
			Self::NoSuchEdge { edge } => {
				write!(f, "no such edge {edge}")
			}
			Self::PortOutOfRange {
				vertex,
				port,
				output,
			} => {
				let kind = if *output { "output" } else { "input" };
				write!(f, "vertex {vertex} has no {kind} port {port}")
			}
			Self::InputBoundTwice { vertex, port } => {
				write!(f, "input {port} of {vertex} is bound more than once")
			}
			Self::MixedConnection { vertex, port } => {
				write!(
					f,
					"input {port} of {vertex} mixes collect and non-collect edges"
				)
			}
			Self::CollectCollision {
				vertex,
				port,
				index,
			} => {
				write!(
					f,
					"input {port} of {vertex} has two collect edges at element {index}"
				)
			}
			Self::RankMismatch {
				vertex,
				expected,
				found,
			} => {
				write!(
					f,
					"vertex {vertex} cannot have rank {found}, expected {expected}"
				)
			}
			Self::TypeMismatch {
				edge,
				source_type,
				target_type,
			} => {
				write!(
					f,
					"edge {edge} connects incompatible types {source_type} and {target_type}"
				)
			}
			Self::HasCycle => {
				write!(f, "the graph would contain a cycle")
			}
			Self::EngineStopped => {
				write!(f, "the engine shut down before replying")
			}
		}
	}
}
