//! Stub methods and helpers shared by the unit tests

use std::{fmt::Debug, sync::Arc};

use crate::{
	api::{Artefact, Checkpoint, ExecuteIter, Method, MethodContext, MethodYield, TypeDesc, Value},
	errors::MethodError,
	graph::{ConnectionKind, FlowEdge, FlowGraph, FlowVertex},
	labels::MethodId,
};

type RunFn =
	Arc<dyn Fn(Vec<Artefact>, Option<Checkpoint>) -> Vec<Result<MethodYield, MethodError>> + Send + Sync>;
type ReproFn = Arc<dyn Fn(Vec<Artefact>, Checkpoint) -> Result<Vec<Artefact>, MethodError> + Send + Sync>;

/// A method whose behaviour is a closure, for driving the engine in tests
pub struct TestMethod {
	id: MethodId,
	name: String,
	inputs: Vec<TypeDesc>,
	outputs: Vec<TypeDesc>,
	run: RunFn,
	repro: Option<ReproFn>,
}

impl TestMethod {
	pub fn new(
		name: &str,
		inputs: Vec<TypeDesc>,
		outputs: Vec<TypeDesc>,
		run: impl Fn(Vec<Artefact>, Option<Checkpoint>) -> Vec<Result<MethodYield, MethodError>>
			+ Send
			+ Sync
			+ 'static,
	) -> Arc<Self> {
		Arc::new(Self {
			id: MethodId::new(),
			name: name.into(),
			inputs,
			outputs,
			run: Arc::new(run),
			repro: None,
		})
	}

	pub fn with_reproduce(
		name: &str,
		inputs: Vec<TypeDesc>,
		outputs: Vec<TypeDesc>,
		run: impl Fn(Vec<Artefact>, Option<Checkpoint>) -> Vec<Result<MethodYield, MethodError>>
			+ Send
			+ Sync
			+ 'static,
		repro: impl Fn(Vec<Artefact>, Checkpoint) -> Result<Vec<Artefact>, MethodError>
			+ Send
			+ Sync
			+ 'static,
	) -> Arc<Self> {
		Arc::new(Self {
			id: MethodId::new(),
			name: name.into(),
			inputs,
			outputs,
			run: Arc::new(run),
			repro: Some(Arc::new(repro)),
		})
	}

	/// No inputs, one `int` output, one yield
	pub fn constant(name: &str, value: i64) -> Arc<Self> {
		Self::new(name, vec![], vec![int_t()], move |_, _| {
			vec![Ok((vec![int(value)], None))]
		})
	}

	/// One `int` input, one `int` output, one yield
	pub fn map_int(name: &str, f: impl Fn(i64) -> i64 + Send + Sync + 'static) -> Arc<Self> {
		Self::new(name, vec![int_t()], vec![int_t()], move |inputs, _| {
			vec![Ok((vec![int(f(get_int(&inputs[0])))], None))]
		})
	}

	/// No inputs, one `[int]` output, one yield
	pub fn constant_array(name: &str, values: &[i64]) -> Arc<Self> {
		let values = values.to_vec();
		Self::new(name, vec![], vec![TypeDesc::array(int_t())], move |_, _| {
			vec![Ok((vec![ints(&values)], None))]
		})
	}

	/// One `[int]` input, one `int` output: sums its input array
	pub fn sum(name: &str) -> Arc<Self> {
		Self::new(
			name,
			vec![TypeDesc::array(int_t())],
			vec![int_t()],
			move |inputs, _| {
				let total: i64 = inputs[0].as_array().unwrap().iter().map(value_int).sum();
				vec![Ok((vec![int(total)], None))]
			},
		)
	}
}

impl Debug for TestMethod {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TestMethod").field("name", &self.name).finish()
	}
}

impl Method for TestMethod {
	fn id(&self) -> MethodId {
		self.id
	}

	fn name(&self) -> &str {
		&self.name
	}

	fn inputs(&self) -> &[TypeDesc] {
		&self.inputs
	}

	fn outputs(&self) -> &[TypeDesc] {
		&self.outputs
	}

	fn execute(
		&self,
		_ctx: MethodContext,
		inputs: Vec<Artefact>,
		checkpoint: Option<Checkpoint>,
	) -> ExecuteIter {
		Box::new((self.run)(inputs, checkpoint).into_iter())
	}

	fn reproduce(
		&self,
		inputs: Vec<Artefact>,
		checkpoint: Checkpoint,
	) -> Result<Vec<Artefact>, MethodError> {
		match &self.repro {
			Some(f) => f(inputs, checkpoint),
			None => Err(MethodError::failed("method has no reproduce")),
		}
	}
}

pub fn int_t() -> TypeDesc {
	TypeDesc::item("int")
}

pub fn int(v: i64) -> Artefact {
	Artefact::item(v)
}

pub fn ints(vs: &[i64]) -> Artefact {
	Artefact::array(vs.to_vec())
}

pub fn value_int(v: &Value) -> i64 {
	*v.as_any().downcast_ref::<i64>().unwrap()
}

pub fn get_int(a: &Artefact) -> i64 {
	value_int(a.as_item().unwrap())
}

pub fn get_ints(a: &Artefact) -> Vec<i64> {
	a.as_array().unwrap().iter().map(value_int).collect()
}

pub fn vertex(name: &str, method: Arc<TestMethod>) -> FlowVertex {
	FlowVertex::new(name, method)
}

pub fn edge(
	source: &FlowVertex,
	output_ref: usize,
	target: &FlowVertex,
	input_ref: usize,
	kind: ConnectionKind,
) -> FlowEdge {
	FlowEdge {
		source: source.id(),
		output_ref,
		target: target.id(),
		input_ref,
		kind,
	}
}

pub fn graph(vertices: Vec<FlowVertex>, edges: Vec<FlowEdge>) -> FlowGraph {
	FlowGraph::new(vertices, edges).unwrap()
}
