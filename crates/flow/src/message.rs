//! Messages consumed by the state machine

use crossbeam::channel::Sender;

use crate::{
	api::MethodYield,
	errors::MethodError,
	graph::{AlterError, AlterRequest},
	labels::{VertexId, VertexIndex},
	state::TimeIndex,
};

/// How an execution ended successfully
#[derive(Debug)]
pub enum SucceededResult {
	/// A final output tuple, produced outside the iteration sequence
	/// (a reproduced output, for instance)
	IterationResult(MethodYield),

	/// The iteration sequence ran dry; the last iteration's output
	/// stands as the result
	NoMoreIterations,
}

/// One message on the engine's single serialised channel.
///
/// External alterations and internal worker results travel the same
/// queue, so every observer sees one consistent order of events.
#[derive(Debug)]
pub enum Message {
	/// Atomically mutate the graph
	Alter {
		/// What to change
		request: AlterRequest,
		/// Where to report acceptance or rejection
		reply: Option<Sender<Result<(), AlterError>>>,
	},

	/// Begin execution of slices that are ready to start
	Start {
		/// The vertex to start
		vertex: VertexId,
		/// A single slice, or every ready slice when absent
		index: Option<VertexIndex>,
		/// Drop the message unless the slice is still scheduled
		/// at this time
		can_start_time: Option<TimeIndex>,
	},

	/// A worker produced one iteration
	Iteration {
		/// The executing vertex
		vertex: VertexId,
		/// The executing slice
		index: VertexIndex,
		/// The yielded outputs and checkpoint
		result: MethodYield,
		/// The time the execution was started with
		start_time: TimeIndex,
	},

	/// A worker finished
	Succeeded {
		/// The executing vertex
		vertex: VertexId,
		/// The executing slice
		index: VertexIndex,
		/// The time the execution was started with
		start_time: TimeIndex,
		/// How it finished
		result: SucceededResult,
	},

	/// A worker failed
	Failed {
		/// The executing vertex
		vertex: VertexId,
		/// The executing slice
		index: VertexIndex,
		/// The time the execution was started with
		start_time: TimeIndex,
		/// What went wrong
		error: MethodError,
	},

	/// Cancel execution of one slice, or of every slice of a vertex
	Stop {
		/// The vertex to stop
		vertex: VertexId,
		/// A single slice, or every slice when absent
		index: Option<VertexIndex>,
	},

	/// Suspend iteration of one slice, or of every slice of a vertex
	Pause {
		/// The vertex to pause
		vertex: VertexId,
		/// A single slice, or every slice when absent
		index: Option<VertexIndex>,
	},

	/// Resume suspended slices
	Resume {
		/// The vertex to resume
		vertex: VertexId,
		/// A single slice, or every slice when absent
		index: Option<VertexIndex>,
	},

	/// Leave the suspended construction state and classify
	/// everything. Sent once by the engine's `start()`.
	Activate,

	/// Tear the engine down
	Shutdown,
}
