//! The per-slice status lattice

use std::{fmt::Display, sync::Arc};

use crate::errors::MethodError;

/// A logical timestamp issued by the state machine.
///
/// Advanced on every non-empty transition; recorded into statuses
/// so that results from superseded executions can be recognised
/// and dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimeIndex(u64);

impl TimeIndex {
	/// The time before anything has happened
	pub fn zero() -> Self {
		Self(0)
	}

	/// The time directly after this one
	pub fn next(&self) -> Self {
		Self(self.0 + 1)
	}
}

impl Display for TimeIndex {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "t{}", self.0)
	}
}

/// Why a slice is incomplete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncompleteReason {
	/// Some input has never been produced
	UnassignedInputs,

	/// Some input was produced, then invalidated by an upstream change
	OutdatedInputs,

	/// The last execution failed. Not retried until inputs change.
	ExecutionFailed(Arc<MethodError>),

	/// Execution was stopped by request. Stable until inputs change.
	Stopped,

	/// Some upstream output is partial and cannot be reproduced
	TransientInputs,
}

impl Display for IncompleteReason {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::UnassignedInputs => write!(f, "unassigned inputs"),
			Self::OutdatedInputs => write!(f, "outdated inputs"),
			Self::ExecutionFailed(e) => write!(f, "execution failed: {e}"),
			Self::Stopped => write!(f, "stopped"),
			Self::TransientInputs => write!(f, "transient inputs"),
		}
	}
}

/// The status of one slice of a vertex.
///
/// Output artefacts are *not* stored here; they live in the slice's
/// [`VertexData`](super::VertexData). Statuses carry only the times
/// and counters needed to drive transitions, so they stay cheap to
/// clone and compare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VertexStatus {
	/// Cannot run; see the reason
	Incomplete(IncompleteReason),

	/// All inputs are available; scheduled to begin at the given time
	CanStart(TimeIndex),

	/// Execution is in flight
	Started(TimeIndex),

	/// An iterative method has emitted `iteration` checkpoints so far;
	/// the output of the last one is available
	Continues {
		/// How many checkpoints have been emitted
		iteration: usize,
		/// The start time of the in-flight execution
		time: TimeIndex,
	},

	/// Terminal success; outputs (and maybe a checkpoint) are in the
	/// slice's data
	Complete,

	/// Complete, but re-execution is in flight to restore outputs
	/// that were lost
	CompleteStarted {
		/// The start time of the in-flight restoration
		time: TimeIndex,
	},

	/// Iteration suspended before the first checkpoint
	Paused,

	/// Iteration suspended; the last checkpoint's output is available
	PausedContinues {
		/// How many checkpoints had been emitted
		iteration: usize,
	},

	/// Suspended because an upstream slice is paused
	PausedInherited,
}

impl VertexStatus {
	/// The canonical initial status
	pub fn unassigned() -> Self {
		Self::Incomplete(IncompleteReason::UnassignedInputs)
	}

	/// Is a worker (or a pending start) attached to this slice?
	pub fn is_running(&self) -> bool {
		matches!(
			self,
			Self::Started(_) | Self::Continues { .. } | Self::CompleteStarted { .. }
		)
	}

	/// Is this an `Incomplete`?
	pub fn is_incomplete(&self) -> bool {
		matches!(self, Self::Incomplete(_))
	}

	/// Is this slice suspended?
	pub fn is_paused(&self) -> bool {
		matches!(
			self,
			Self::Paused | Self::PausedContinues { .. } | Self::PausedInherited
		)
	}

	/// May downstream slices read this slice's outputs?
	///
	/// Whether a particular output slot actually holds a value is a
	/// separate question, answered by the slice's data.
	pub fn publishes_outputs(&self) -> bool {
		matches!(
			self,
			Self::Continues { .. }
				| Self::Complete
				| Self::CompleteStarted { .. }
				| Self::PausedContinues { .. }
				| Self::PausedInherited
		)
	}

	/// The start time an in-flight execution was issued with.
	///
	/// Messages from workers carry this time back; a mismatch means
	/// the message is stale.
	pub fn start_time(&self) -> Option<TimeIndex> {
		match self {
			Self::Started(t) => Some(*t),
			Self::Continues { time, .. } => Some(*time),
			Self::CompleteStarted { time } => Some(*time),
			_ => None,
		}
	}
}

impl Display for VertexStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Incomplete(reason) => write!(f, "incomplete ({reason})"),
			Self::CanStart(t) => write!(f, "can start at {t}"),
			Self::Started(t) => write!(f, "started at {t}"),
			Self::Continues { iteration, time } => {
				write!(f, "continues (iteration {iteration}, started {time})")
			}
			Self::Complete => write!(f, "complete"),
			Self::CompleteStarted { time } => write!(f, "complete, restoring since {time}"),
			Self::Paused => write!(f, "paused"),
			Self::PausedContinues { iteration } => {
				write!(f, "paused (iteration {iteration})")
			}
			Self::PausedInherited => write!(f, "paused (inherited)"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn time_index_is_monotonic() {
		let t = TimeIndex::zero();
		assert!(t.next() > t);
		assert!(t.next().next() > t.next());
	}

	#[test]
	fn running_statuses_carry_their_start_time() {
		let t = TimeIndex::zero().next();
		assert_eq!(VertexStatus::Started(t).start_time(), Some(t));
		assert_eq!(
			VertexStatus::Continues { iteration: 2, time: t }.start_time(),
			Some(t)
		);
		assert_eq!(
			VertexStatus::CompleteStarted { time: t }.start_time(),
			Some(t)
		);
		assert_eq!(VertexStatus::CanStart(t).start_time(), None);
		assert_eq!(VertexStatus::Complete.start_time(), None);
	}

	#[test]
	fn publishing_statuses() {
		assert!(VertexStatus::Complete.publishes_outputs());
		assert!(VertexStatus::Continues {
			iteration: 1,
			time: TimeIndex::zero()
		}
		.publishes_outputs());
		assert!(!VertexStatus::Started(TimeIndex::zero()).publishes_outputs());
		assert!(!VertexStatus::unassigned().publishes_outputs());
	}
}
