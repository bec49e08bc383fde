//! What one transition did to each vertex

use std::collections::{BTreeMap, BTreeSet};

use rill_util::mdmap::MdMap;

use crate::labels::{VertexId, VertexIndex};

use super::state::VertexState;

/// How one transition affected one vertex
#[derive(Debug, Clone)]
pub enum VertexChanges {
	/// The vertex entered the graph with these slices
	New(MdMap<VertexState>),

	/// The vertex left the graph
	Removed,

	/// The vertex's index space changed: slices appeared or vanished
	ShapeChanged {
		/// The slices before the transition
		old: MdMap<VertexState>,
		/// The slices after the transition
		new: MdMap<VertexState>,
		/// Did this vertex's in-edges change too?
		connection_changed: bool,
	},

	/// Some slices changed status, within an unchanged index space
	Modified {
		/// Which slices changed
		indices: BTreeSet<VertexIndex>,
		/// The slices before the transition
		old: MdMap<VertexState>,
		/// The slices after the transition
		new: MdMap<VertexState>,
		/// Did this vertex's in-edges change too?
		connection_changed: bool,
	},
}

/// Everything one transition changed, by vertex
pub type Changes = BTreeMap<VertexId, VertexChanges>;
