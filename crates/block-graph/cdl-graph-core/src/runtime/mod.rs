//! Event-driven block execution.
//!
//! Execution is organized around discrete events. Within one event every
//! connector value is assigned at most once; the [`ExecutionContext`] holds
//! the value store (keyed by [`cdl_api_core::ConnectorPath`]), parameter
//! overrides, and per-connector history, while [`BlockExecutor`] walks a
//! block tree and evaluates it against the context.

use cdl_api_core::ConnectorPath;
use thiserror::Error;

use crate::expr::ExprError;

mod context;
mod executor;

pub use context::{ContextSnapshot, EventKind, ExecutionContext, ExecutionEvent};
pub use executor::{BlockExecutor, ExecutionResult};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("an execution event is already in progress")]
    EventInProgress,
    #[error("no execution event in progress")]
    NoEvent,
    #[error("cannot {action} outside of an execution event")]
    OutsideEvent { action: &'static str },
    #[error("value at '{0}' was already assigned during this event")]
    SingleAssignment(ConnectorPath),
    #[error("type mismatch for {target}: expected {expected}, got {got}")]
    Type {
        target: String,
        expected: String,
        got: String,
    },
    #[error("unknown input '{0}'")]
    UnknownInput(String),
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),
    #[error("error evaluating equation '{lhs} = {rhs}': {source}")]
    Equation {
        lhs: String,
        rhs: String,
        source: ExprError,
    },
    #[error("unresolvable dependencies among blocks: {0:?}")]
    Dependency(Vec<String>),
    #[error("while loop exceeded maximum iterations ({0})")]
    IterationLimit(u32),
    #[error("condition input '{0}' has no value")]
    ConditionNotSet(String),
    #[error("block '{name}' in {list} not found")]
    ChildNotFound { name: String, list: &'static str },
    #[error("in block '{name}': {source}")]
    Child {
        name: String,
        source: Box<RuntimeError>,
    },
    #[error("extension block '{0}' has no executable form")]
    UnsupportedBlock(String),
}

#[cfg(test)]
mod tests;
