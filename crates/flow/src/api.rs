//! Traits that allow external code to define dataflow methods

use smartstring::{LazyCompact, SmartString};
use std::{
	any::Any,
	fmt::{Debug, Display},
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};

use crate::{
	errors::MethodError,
	labels::{MethodId, VertexId, VertexIndex},
	observe::Observable,
};

/// A value that may travel along an edge.
///
/// The engine never looks inside; methods downcast via [`Datum::as_any`].
pub trait Datum: Any + Debug + Send + Sync {
	/// This datum as `Any`, for downcasting
	fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Debug + Send + Sync> Datum for T {
	fn as_any(&self) -> &dyn Any {
		self
	}
}

/// A shared, immutable, opaque value
pub type Value = Arc<dyn Datum>;

/// Opaque, method-defined state sufficient to resume
/// or reproduce an iteration.
pub type Checkpoint = Value;

/// An output of a method, or an assembled input to one.
#[derive(Debug, Clone)]
pub enum Artefact {
	/// A single opaque value
	Item(Value),

	/// An ordered collection of opaque values.
	/// This is what scatter iterates and what reduce or collect builds.
	Array(Vec<Value>),
}

impl Artefact {
	/// Wrap a concrete value as an item artefact
	pub fn item<T: Datum>(value: T) -> Self {
		Self::Item(Arc::new(value))
	}

	/// Wrap concrete values as an array artefact
	pub fn array<T: Datum>(values: impl IntoIterator<Item = T>) -> Self {
		Self::Array(
			values
				.into_iter()
				.map(|v| Arc::new(v) as Value)
				.collect(),
		)
	}

	/// Get this artefact's single value, if it is an item
	pub fn as_item(&self) -> Option<&Value> {
		match self {
			Self::Item(v) => Some(v),
			Self::Array(_) => None,
		}
	}

	/// Get this artefact's elements, if it is an array
	pub fn as_array(&self) -> Option<&[Value]> {
		match self {
			Self::Item(_) => None,
			Self::Array(v) => Some(v),
		}
	}

	/// The number of elements, if this artefact is an array
	pub fn array_len(&self) -> Option<usize> {
		self.as_array().map(|v| v.len())
	}
}

/// An erased port type descriptor.
///
/// This does NOT carry data. It tells us what *kind* of value a
/// port produces or consumes, and is all the graph checks when
/// edges are connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDesc {
	/// A single value of a named opaque type
	Item(SmartString<LazyCompact>),

	/// An ordered collection of the inner type
	Array(Box<TypeDesc>),
}

impl TypeDesc {
	/// Make an item descriptor with the given type name
	pub fn item(name: &str) -> Self {
		Self::Item(name.into())
	}

	/// Make an array descriptor over the given element type
	pub fn array(element: TypeDesc) -> Self {
		Self::Array(Box::new(element))
	}

	/// The element descriptor, if this is an array type
	pub fn element(&self) -> Option<&TypeDesc> {
		match self {
			Self::Item(_) => None,
			Self::Array(e) => Some(e),
		}
	}

	/// Is this an array type?
	pub fn is_array(&self) -> bool {
		matches!(self, Self::Array(_))
	}
}

impl Display for TypeDesc {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Item(name) => write!(f, "{name}"),
			Self::Array(e) => write!(f, "[{e}]"),
		}
	}
}

/// One element of a method's output sequence:
/// a full output tuple plus the checkpoint that reproduces it.
pub type MethodYield = (Vec<Artefact>, Option<Checkpoint>);

/// The lazy sequence returned by [`Method::execute`]
pub type ExecuteIter = Box<dyn Iterator<Item = Result<MethodYield, MethodError>> + Send>;

/// A unit of user computation, attached to a vertex.
///
/// A method is used by many executions concurrently, so it holds no
/// per-run state; everything a run needs arrives as arguments.
pub trait Method: Debug + Send + Sync {
	/// This method's stable identity.
	/// Two methods are the same method iff their ids are equal.
	fn id(&self) -> MethodId;

	/// A short name for logs
	fn name(&self) -> &str;

	/// Ordered input port descriptors
	fn inputs(&self) -> &[TypeDesc];

	/// Ordered output port descriptors
	fn outputs(&self) -> &[TypeDesc];

	/// Run this method.
	///
	/// Returns a lazy sequence of checkpoints, each carrying a full
	/// output tuple. Must produce at least one element, must be
	/// deterministic given `(inputs, checkpoint)`, and should honour
	/// `ctx`'s cancellation token between yields.
	fn execute(
		&self,
		ctx: MethodContext,
		inputs: Vec<Artefact>,
		checkpoint: Option<Checkpoint>,
	) -> ExecuteIter;

	/// Reproduce the outputs that [`Method::execute`] yielded together
	/// with `checkpoint`, bit-identical.
	fn reproduce(
		&self,
		inputs: Vec<Artefact>,
		checkpoint: Checkpoint,
	) -> Result<Vec<Artefact>, MethodError>;
}

/// A cooperative cancellation flag handed to workers.
///
/// The runtime checks it between iterations; method bodies may
/// check it too for faster teardown.
#[derive(Debug, Clone)]
pub struct CancelToken {
	cancelled: Arc<AtomicBool>,
}

impl CancelToken {
	pub(crate) fn new() -> Self {
		Self {
			cancelled: Arc::new(AtomicBool::new(false)),
		}
	}

	pub(crate) fn cancel(&self) {
		self.cancelled.store(true, Ordering::Release);
	}

	/// Has this task been cancelled?
	pub fn is_cancelled(&self) -> bool {
		self.cancelled.load(Ordering::Acquire)
	}
}

/// A progress report for one slice, in `[0, 1]`
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
	/// The reporting vertex
	pub vertex: VertexId,

	/// The reporting slice
	pub index: VertexIndex,

	/// How far along the slice is, in `[0, 1]`
	pub fraction: f32,
}

/// Lets a method report how far along it is
#[derive(Clone)]
pub struct ProgressReporter {
	vertex: VertexId,
	index: VertexIndex,
	hub: Arc<Observable<Progress>>,
}

impl ProgressReporter {
	pub(crate) fn new(vertex: VertexId, index: VertexIndex, hub: Arc<Observable<Progress>>) -> Self {
		Self { vertex, index, hub }
	}

	/// Report progress. Values outside `[0, 1]` are clamped.
	pub fn report(&self, fraction: f32) {
		self.hub.emit(Progress {
			vertex: self.vertex,
			index: self.index.clone(),
			fraction: fraction.clamp(0.0, 1.0),
		});
	}
}

impl Debug for ProgressReporter {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ProgressReporter")
			.field("vertex", &self.vertex)
			.field("index", &self.index)
			.finish()
	}
}

/// Everything a single method run may interact with
#[derive(Debug, Clone)]
pub struct MethodContext {
	token: CancelToken,
	progress: ProgressReporter,
}

impl MethodContext {
	pub(crate) fn new(token: CancelToken, progress: ProgressReporter) -> Self {
		Self { token, progress }
	}

	/// This run's cancellation token
	pub fn token(&self) -> &CancelToken {
		&self.token
	}

	/// This run's progress reporter
	pub fn progress(&self) -> &ProgressReporter {
		&self.progress
	}
}
