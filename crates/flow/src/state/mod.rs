//! Vertex states, snapshots, and the state machine that drives them

mod assembly;
mod changes;
mod machine;
mod shape;
#[allow(clippy::module_inception)]
mod state;
mod status;

pub use assembly::{assemble, InputAssembly};
pub use changes::{Changes, VertexChanges};
pub use machine::{StateMachine, Step};
pub use state::{FlowState, State, VertexData, VertexState};
pub use status::{IncompleteReason, TimeIndex, VertexStatus};
