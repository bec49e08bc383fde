//! Translating change sets into runtime actions

use crate::{
	labels::{VertexId, VertexIndex},
	state::{Changes, State, TimeIndex, VertexChanges, VertexState, VertexStatus},
};

/// An imperative directive for the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
	/// The slice is scheduled: debounce, then post a start
	Delay {
		/// The scheduled vertex
		vertex: VertexId,
		/// The scheduled slice
		index: VertexIndex,
		/// The time the start must quote to be accepted
		time: TimeIndex,
	},

	/// Run the slice's method now
	Execute {
		/// The vertex to run
		vertex: VertexId,
		/// The slice to run
		index: VertexIndex,
		/// The start time to stamp on result messages
		time: TimeIndex,
	},

	/// Restore the slice's lost outputs from its checkpoint
	Reproduce {
		/// The vertex to restore
		vertex: VertexId,
		/// The slice to restore
		index: VertexIndex,
		/// The start time to stamp on result messages
		time: TimeIndex,
	},

	/// The slice left its running state: cancel its in-flight work
	StopMethod {
		/// The vertex to cancel
		vertex: VertexId,
		/// The slice to cancel
		index: VertexIndex,
		/// The start time the cancelled run was issued with, if any
		time: Option<TimeIndex>,
	},

	/// The vertex left the graph: cancel everything it had in flight
	Remove {
		/// The removed vertex
		vertex: VertexId,
	},
}

/// What one slice's transition asks of the runtime
fn rule(vertex: VertexId, index: &VertexIndex, old: Option<&VertexState>, new: &VertexState) -> Option<Action> {
	use VertexStatus as S;

	let old_status = old.map(|s| &s.status);
	match &new.status {
		S::CanStart(t) => match old_status {
			Some(S::CanStart(t0)) if t0 == t => None,
			_ => Some(Action::Delay {
				vertex,
				index: index.clone(),
				time: *t,
			}),
		},

		S::Started(t) => match old_status {
			Some(S::Started(t0)) if t0 == t => None,
			_ => Some(Action::Execute {
				vertex,
				index: index.clone(),
				time: *t,
			}),
		},

		// A slice only *enters* `Continues` under a live worker
		// (iteration messages) or by resuming from a checkpoint;
		// only the resume needs an execution.
		S::Continues { time, .. } => match old_status {
			Some(S::Complete) | Some(S::PausedContinues { .. }) => Some(Action::Execute {
				vertex,
				index: index.clone(),
				time: *time,
			}),
			_ => None,
		},

		S::CompleteStarted { time } => {
			if matches!(old_status, Some(S::CompleteStarted { time: t0 }) if t0 == time) {
				return None;
			}
			let has_checkpoint = new.data.as_ref().map_or(false, |d| d.checkpoint.is_some());
			let partial = new.data.as_ref().map_or(true, |d| d.is_partial());
			if has_checkpoint && partial {
				Some(Action::Reproduce {
					vertex,
					index: index.clone(),
					time: *time,
				})
			} else {
				Some(Action::Execute {
					vertex,
					index: index.clone(),
					time: *time,
				})
			}
		}

		// Every other destination is a non-running state: if the
		// slice was running (or scheduled), its work is now orphaned
		_ => match old_status {
			Some(s) if s.is_running() || matches!(s, S::CanStart(_)) => {
				Some(Action::StopMethod {
					vertex,
					index: index.clone(),
					time: s.start_time(),
				})
			}
			_ => None,
		},
	}
}

/// Translate one transition's change set into runtime actions.
///
/// Pure; the current rule table decides on the change set alone.
pub fn analyse(_state: &State, changes: &Changes) -> Vec<Action> {
	let mut actions = Vec::new();

	for (vertex, change) in changes {
		match change {
			VertexChanges::Removed => {
				actions.push(Action::Remove { vertex: *vertex });
			}

			VertexChanges::New(map) => {
				for (i, s) in map.iter() {
					let index = VertexIndex::new(i);
					if let Some(a) = rule(*vertex, &index, None, s) {
						actions.push(a);
					}
				}
			}

			VertexChanges::Modified {
				indices, old, new, ..
			} => {
				for index in indices {
					let Some(s) = new.get(index.as_slice()) else {
						continue;
					};
					if let Some(a) = rule(*vertex, index, old.get(index.as_slice()), s) {
						actions.push(a);
					}
				}
			}

			VertexChanges::ShapeChanged { old, new, .. } => {
				for (i, s) in new.iter() {
					let index = VertexIndex::new(i);
					if let Some(a) = rule(*vertex, &index, old.get(index.as_slice()), s) {
						actions.push(a);
					}
				}
				// Slices that vanished take their in-flight work down
				for (i, s) in old.iter() {
					if new.get(&i).is_none() && s.status.is_running() {
						actions.push(Action::StopMethod {
							vertex: *vertex,
							index: VertexIndex::new(i),
							time: s.status.start_time(),
						});
					}
				}
			}
		}
	}

	actions
}

#[cfg(test)]
mod tests {
	use std::collections::{BTreeMap, BTreeSet};
	use std::sync::Arc;

	use rill_util::mdmap::MdMap;

	use super::*;
	use crate::state::{VertexData, VertexState};
	use crate::testing::*;

	fn t(n: u64) -> TimeIndex {
		let mut t = TimeIndex::zero();
		for _ in 0..n {
			t = t.next();
		}
		t
	}

	fn empty_state() -> State {
		State {
			graph: Arc::new(graph(vec![], vec![])),
			flow: BTreeMap::new(),
			time: TimeIndex::zero(),
		}
	}

	fn modified(
		vertex: VertexId,
		old: VertexState,
		new: VertexState,
	) -> Changes {
		let mut indices = BTreeSet::new();
		indices.insert(VertexIndex::empty());
		let mut changes = BTreeMap::new();
		changes.insert(
			vertex,
			VertexChanges::Modified {
				indices,
				old: MdMap::scalar(old),
				new: MdMap::scalar(new),
				connection_changed: false,
			},
		);
		changes
	}

	#[test]
	fn entering_can_start_delays() {
		let v = VertexId::new();
		let changes = modified(
			v,
			VertexState::unassigned(),
			VertexState::new(VertexStatus::CanStart(t(1))),
		);
		assert_eq!(
			analyse(&empty_state(), &changes),
			vec![Action::Delay {
				vertex: v,
				index: VertexIndex::empty(),
				time: t(1)
			}]
		);
	}

	#[test]
	fn rescheduling_redebounces() {
		let v = VertexId::new();
		let changes = modified(
			v,
			VertexState::new(VertexStatus::CanStart(t(1))),
			VertexState::new(VertexStatus::CanStart(t(2))),
		);
		assert_eq!(
			analyse(&empty_state(), &changes),
			vec![Action::Delay {
				vertex: v,
				index: VertexIndex::empty(),
				time: t(2)
			}]
		);
	}

	#[test]
	fn starting_executes() {
		let v = VertexId::new();
		let changes = modified(
			v,
			VertexState::new(VertexStatus::CanStart(t(1))),
			VertexState::new(VertexStatus::Started(t(1))),
		);
		assert_eq!(
			analyse(&empty_state(), &changes),
			vec![Action::Execute {
				vertex: v,
				index: VertexIndex::empty(),
				time: t(1)
			}]
		);
	}

	#[test]
	fn iterations_leave_the_worker_alone() {
		let v = VertexId::new();
		let changes = modified(
			v,
			VertexState::new(VertexStatus::Started(t(1))),
			VertexState {
				status: VertexStatus::Continues {
					iteration: 1,
					time: t(1),
				},
				data: Some(VertexData::full(vec![int(1)], None)),
			},
		);
		assert_eq!(analyse(&empty_state(), &changes), vec![]);
	}

	#[test]
	fn resuming_a_checkpointed_completion_executes() {
		let v = VertexId::new();
		let cp: crate::api::Checkpoint = Arc::new(1u32);
		let changes = modified(
			v,
			VertexState {
				status: VertexStatus::Complete,
				data: Some(VertexData::full(vec![int(1)], Some(cp.clone()))),
			},
			VertexState {
				status: VertexStatus::Continues {
					iteration: 0,
					time: t(3),
				},
				data: Some(VertexData::full(vec![int(1)], Some(cp))),
			},
		);
		assert_eq!(
			analyse(&empty_state(), &changes),
			vec![Action::Execute {
				vertex: v,
				index: VertexIndex::empty(),
				time: t(3)
			}]
		);
	}

	#[test]
	fn restoring_with_a_checkpoint_reproduces() {
		let v = VertexId::new();
		let cp: crate::api::Checkpoint = Arc::new(1u32);
		let changes = modified(
			v,
			VertexState {
				status: VertexStatus::Complete,
				data: Some(VertexData {
					outputs: vec![None],
					checkpoint: Some(cp.clone()),
				}),
			},
			VertexState {
				status: VertexStatus::CompleteStarted { time: t(2) },
				data: Some(VertexData {
					outputs: vec![None],
					checkpoint: Some(cp),
				}),
			},
		);
		assert_eq!(
			analyse(&empty_state(), &changes),
			vec![Action::Reproduce {
				vertex: v,
				index: VertexIndex::empty(),
				time: t(2)
			}]
		);
	}

	#[test]
	fn restoring_without_a_checkpoint_reexecutes() {
		let v = VertexId::new();
		let changes = modified(
			v,
			VertexState {
				status: VertexStatus::Complete,
				data: Some(VertexData {
					outputs: vec![None],
					checkpoint: None,
				}),
			},
			VertexState {
				status: VertexStatus::CompleteStarted { time: t(2) },
				data: Some(VertexData {
					outputs: vec![None],
					checkpoint: None,
				}),
			},
		);
		assert_eq!(
			analyse(&empty_state(), &changes),
			vec![Action::Execute {
				vertex: v,
				index: VertexIndex::empty(),
				time: t(2)
			}]
		);
	}

	#[test]
	fn leaving_a_running_state_stops_the_method() {
		let v = VertexId::new();
		let changes = modified(
			v,
			VertexState::new(VertexStatus::Started(t(1))),
			VertexState::new(VertexStatus::Incomplete(
				crate::state::IncompleteReason::Stopped,
			)),
		);
		assert_eq!(
			analyse(&empty_state(), &changes),
			vec![Action::StopMethod {
				vertex: v,
				index: VertexIndex::empty(),
				time: Some(t(1))
			}]
		);
	}

	#[test]
	fn finishing_an_iteration_run_disposes_the_handle() {
		let v = VertexId::new();
		let changes = modified(
			v,
			VertexState {
				status: VertexStatus::Continues {
					iteration: 2,
					time: t(1),
				},
				data: Some(VertexData::full(vec![int(1)], None)),
			},
			VertexState {
				status: VertexStatus::Complete,
				data: Some(VertexData::full(vec![int(1)], None)),
			},
		);
		assert_eq!(
			analyse(&empty_state(), &changes),
			vec![Action::StopMethod {
				vertex: v,
				index: VertexIndex::empty(),
				time: Some(t(1))
			}]
		);
	}

	#[test]
	fn removal_cancels_the_vertex() {
		let v = VertexId::new();
		let mut changes = BTreeMap::new();
		changes.insert(v, VertexChanges::Removed);
		assert_eq!(
			analyse(&empty_state(), &changes),
			vec![Action::Remove { vertex: v }]
		);
	}

	#[test]
	fn shrinking_shapes_stop_vanished_slices() {
		let v = VertexId::new();
		let old = MdMap::build(
			1,
			|_| Some(2),
			|i| {
				if i[0] == 1 {
					VertexState::new(VertexStatus::Started(t(1)))
				} else {
					VertexState::new(VertexStatus::Complete)
				}
			},
		);
		let new = MdMap::build(1, |_| Some(1), |_| {
			VertexState::new(VertexStatus::Complete)
		});

		let mut changes = BTreeMap::new();
		changes.insert(
			v,
			VertexChanges::ShapeChanged {
				old,
				new,
				connection_changed: false,
			},
		);
		assert_eq!(
			analyse(&empty_state(), &changes),
			vec![Action::StopMethod {
				vertex: v,
				index: VertexIndex::new(vec![1]),
				time: Some(t(1))
			}]
		);
	}
}
