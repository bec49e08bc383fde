//! Identities used throughout the engine

use smartstring::{LazyCompact, SmartString};
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_VERTEX_ID: AtomicU64 = AtomicU64::new(0);
static NEXT_METHOD_ID: AtomicU64 = AtomicU64::new(0);

/// A vertex's identity.
///
/// Unique within a process, assigned at vertex construction.
/// Used as a map key everywhere, so equality and ordering are total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId(u64);

impl VertexId {
	/// Make a fresh, process-unique vertex id
	pub fn new() -> Self {
		Self(NEXT_VERTEX_ID.fetch_add(1, Ordering::Relaxed))
	}
}

impl Default for VertexId {
	fn default() -> Self {
		Self::new()
	}
}

impl Display for VertexId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "v{}", self.0)
	}
}

/// A method's identity.
///
/// Methods are compared and hashed by this id, which is assigned
/// once at construction and never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(u64);

impl MethodId {
	/// Make a fresh, process-unique method id
	pub fn new() -> Self {
		Self(NEXT_METHOD_ID.fetch_add(1, Ordering::Relaxed))
	}
}

impl Default for MethodId {
	fn default() -> Self {
		Self::new()
	}
}

impl Display for MethodId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "m{}", self.0)
	}
}

/// A vertex's human-readable name.
///
/// Only used for logs and diagnostics; never for identity.
#[derive(Debug, Hash, PartialEq, Eq, Clone, PartialOrd, Ord)]
pub struct VertexName {
	x: SmartString<LazyCompact>,
}

impl VertexName {
	/// Make a new vertex name
	pub fn new(name: &str) -> Self {
		Self { x: name.into() }
	}

	/// Get the name
	pub fn name(&self) -> &SmartString<LazyCompact> {
		&self.x
	}
}

impl Display for VertexName {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.x.fmt(f)
	}
}

impl From<String> for VertexName {
	fn from(value: String) -> Self {
		Self::new(&value)
	}
}

impl From<&str> for VertexName {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}

/// The multi-dimensional index of one slice of a vertex.
///
/// Its length always equals the vertex's rank; a rank-zero vertex
/// has the single empty index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexIndex {
	x: Vec<usize>,
}

impl VertexIndex {
	/// The empty index of a rank-zero vertex
	pub fn empty() -> Self {
		Self { x: Vec::new() }
	}

	/// Make an index from its components
	pub fn new(components: Vec<usize>) -> Self {
		Self { x: components }
	}

	/// This index's components
	pub fn as_slice(&self) -> &[usize] {
		&self.x
	}

	/// The number of components in this index
	pub fn len(&self) -> usize {
		self.x.len()
	}

	/// Is this the empty index?
	pub fn is_empty(&self) -> bool {
		self.x.is_empty()
	}

	/// The first `n` components of this index
	pub fn prefix(&self, n: usize) -> &[usize] {
		&self.x[..n]
	}

	/// The component at position `k`, if it exists
	pub fn component(&self, k: usize) -> Option<usize> {
		self.x.get(k).copied()
	}

	/// This index with one more trailing component
	pub fn child(&self, k: usize) -> Self {
		let mut x = self.x.clone();
		x.push(k);
		Self { x }
	}
}

impl From<Vec<usize>> for VertexIndex {
	fn from(value: Vec<usize>) -> Self {
		Self::new(value)
	}
}

impl From<&[usize]> for VertexIndex {
	fn from(value: &[usize]) -> Self {
		Self::new(value.to_vec())
	}
}

impl Display for VertexIndex {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "[")?;
		for (i, c) in self.x.iter().enumerate() {
			if i != 0 {
				write!(f, ", ")?;
			}
			write!(f, "{c}")?;
		}
		write!(f, "]")
	}
}
