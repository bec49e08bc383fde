//! Generic containers used by the rill dataflow engine.

#![warn(missing_docs)]

pub mod mdmap;
