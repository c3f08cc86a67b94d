//! Structural parser adapters (spec.md §4.4).

pub mod python;

pub use python::TreeSitterPythonParser;
