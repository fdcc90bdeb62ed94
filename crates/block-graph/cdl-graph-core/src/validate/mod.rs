//! Static validation of block trees.
//!
//! Two passes, run before anything executes:
//! - [`validate_block`] checks a single block and its children structurally
//!   (naming, connector references, type agreement), accumulating errors
//!   and warnings instead of stopping at the first problem.
//! - [`validate_graph`] checks the dataflow graph of every composite level
//!   for cycles and illegal fan-in.

mod block;
mod graph;

pub use block::{validate_block, ValidationMessage, ValidationResult};
pub use graph::{detect_cycles, validate_graph};
