//! Core block-graph engine: data model, JSON codec, validators, and the
//! event-driven runtime.
//!
//! The usual pipeline is parse -> validate -> execute:
//!
//! ```
//! use cdl_graph_core::{parse_str, validate_block, validate_graph, BlockExecutor};
//! use cdl_api_core::Value;
//! use hashbrown::HashMap;
//!
//! let block = parse_str(r#"{
//!     "name": "gain",
//!     "type": "Gain",
//!     "parameters": {"k": 2.0},
//!     "inputs": [{"name": "u", "type": "Real"}],
//!     "outputs": [{"name": "y", "type": "Real"}],
//!     "equations": ["y = k * u"]
//! }"#).unwrap();
//!
//! assert!(validate_block(&block).is_valid());
//! assert!(validate_graph(&block).0);
//!
//! let mut inputs = HashMap::new();
//! inputs.insert("u".to_string(), Value::Real(5.0));
//! let result = BlockExecutor::new().execute(&block, &inputs, None);
//! assert_eq!(result.outputs.get("y"), Some(&Value::Real(10.0)));
//! ```

pub mod expr;
pub mod parse;
pub mod runtime;
pub mod topo;
pub mod types;
pub mod validate;

pub use parse::{block_to_json, parse_str, parse_value, ParseError};
pub use runtime::{
    BlockExecutor, EventKind, ExecutionContext, ExecutionEvent, ExecutionResult, RuntimeError,
};
pub use topo::execution_order;
pub use types::*;
pub use validate::{
    detect_cycles, validate_block, validate_graph, ValidationMessage, ValidationResult,
};
