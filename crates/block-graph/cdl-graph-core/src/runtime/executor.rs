//! Tree-walking block executor.

use hashbrown::{HashMap, HashSet};

use cdl_api_core::{coercion, ConnectorPath, Value};

use crate::expr;
use crate::types::{Block, BlockKind, CompositeSpec, Connection, ControlFlow};

use super::context::{check_type, ExecutionContext, ExecutionEvent};
use super::RuntimeError;

/// Outcome of one [`BlockExecutor::execute`] call.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    /// Root block outputs that received a value during the event.
    pub outputs: HashMap<String, Value>,
    pub error: Option<String>,
    /// Full paths of every block that ran, in execution order. A block
    /// re-run by a `While` body appears once per iteration.
    pub blocks_executed: Vec<String>,
}

/// Evaluates a block tree against an [`ExecutionContext`].
#[derive(Debug, Default)]
pub struct BlockExecutor {
    pub context: ExecutionContext,
}

impl BlockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(context: ExecutionContext) -> Self {
        BlockExecutor { context }
    }

    /// Run one evaluation pass of `block` with the given root input values.
    ///
    /// Opens a fresh event unless the context already has one (so callers
    /// may pre-stage values with [`ExecutionContext::set_input`]); an event
    /// opened here is closed before returning. Errors are folded into the
    /// returned [`ExecutionResult`] rather than propagated.
    pub fn execute(
        &mut self,
        block: &Block,
        inputs: &HashMap<String, Value>,
        event: Option<ExecutionEvent>,
    ) -> ExecutionResult {
        let owns_event = !self.context.in_event();
        if owns_event {
            let event =
                event.unwrap_or_else(|| ExecutionEvent::input_change(self.context.time()));
            if let Err(err) = self.context.begin_event(event) {
                return failure(err, Vec::new());
            }
        }

        let root = ConnectorPath::root(&block.name);
        let mut executed = Vec::new();
        let outcome = self
            .bind_root_inputs(block, &root, inputs)
            .and_then(|()| self.run_block(block, &root, &mut executed));

        let result = match outcome {
            Ok(()) => {
                let outputs = block
                    .outputs
                    .iter()
                    .filter_map(|connector| {
                        self.context
                            .value_at(&root.child(&connector.name))
                            .cloned()
                            .map(|value| (connector.name.clone(), value))
                    })
                    .collect();
                ExecutionResult {
                    success: true,
                    outputs,
                    error: None,
                    blocks_executed: executed,
                }
            }
            Err(err) => {
                log::debug!("execution of '{}' failed: {err}", block.name);
                failure(err, executed)
            }
        };

        if owns_event {
            // Close our own event even when the pass failed.
            let _ = self.context.end_event();
        }
        result
    }

    fn bind_root_inputs(
        &mut self,
        block: &Block,
        root: &ConnectorPath,
        inputs: &HashMap<String, Value>,
    ) -> Result<(), RuntimeError> {
        for (name, value) in inputs {
            let connector = block
                .input(name)
                .ok_or_else(|| RuntimeError::UnknownInput(name.clone()))?;
            check_type(connector.ty, value, &format!("input '{name}'"))?;
            self.context.set_value(root.child(name), value.clone())?;
        }
        Ok(())
    }

    fn run_block(
        &mut self,
        block: &Block,
        path: &ConnectorPath,
        executed: &mut Vec<String>,
    ) -> Result<(), RuntimeError> {
        log::trace!("running block at '{path}'");
        executed.push(path.to_string());
        match &block.kind {
            BlockKind::Elementary { .. } => self.run_elementary(block, path),
            BlockKind::Extension { .. } => {
                Err(RuntimeError::UnsupportedBlock(block.name.clone()))
            }
            BlockKind::Composite(spec) => match &spec.control {
                ControlFlow::Generic => self.run_generic(block, spec, path, executed),
                ControlFlow::Sequence { execution_order } => {
                    self.run_listed(block, spec, path, execution_order, "execution_order", executed)
                }
                ControlFlow::Parallel { parallel_groups } => {
                    self.run_parallel(block, spec, path, parallel_groups, executed)
                }
                ControlFlow::If {
                    condition_input,
                    then_blocks,
                    else_blocks,
                } => {
                    let (branch, list) = if self.condition(path, condition_input)? {
                        (then_blocks, "then_blocks")
                    } else {
                        (else_blocks, "else_blocks")
                    };
                    self.run_listed(block, spec, path, branch, list, executed)
                }
                ControlFlow::While {
                    condition_input,
                    loop_blocks,
                    max_iterations,
                } => self.run_while(
                    block,
                    spec,
                    path,
                    condition_input,
                    loop_blocks,
                    *max_iterations,
                    executed,
                ),
            },
        }
    }

    /// Evaluate an elementary block: build the equation namespace from
    /// parameters, constants, and bound inputs, then run equations in
    /// order, publishing values whose lhs names a declared output.
    fn run_elementary(
        &mut self,
        block: &Block,
        path: &ConnectorPath,
    ) -> Result<(), RuntimeError> {
        let mut env: HashMap<String, Value> = HashMap::new();
        for param in &block.parameters {
            let value = self
                .context
                .get_parameter(&param.name)
                .cloned()
                .unwrap_or_else(|| param.value.clone());
            env.insert(param.name.clone(), value);
        }
        for constant in &block.constants {
            env.insert(constant.name.clone(), constant.value.clone());
        }
        for connector in &block.inputs {
            if let Some(value) = self.context.value_at(&path.child(&connector.name)) {
                env.insert(connector.name.clone(), value.clone());
            }
        }

        for equation in &block.equations {
            let value =
                expr::eval_str(&equation.rhs, &env).map_err(|source| RuntimeError::Equation {
                    lhs: equation.lhs.clone(),
                    rhs: equation.rhs.clone(),
                    source,
                })?;
            if block.output(&equation.lhs).is_some() {
                self.context
                    .set_value(path.child(&equation.lhs), value.clone())?;
            }
            // Locals and outputs alike feed later equations.
            env.insert(equation.lhs.clone(), value);
        }
        Ok(())
    }

    /// Dataflow scheduling: repeatedly run every child whose upstream
    /// children are done, in declaration order. No progress with children
    /// remaining means the wiring is unsatisfiable (a cycle survived
    /// validation).
    fn run_generic(
        &mut self,
        block: &Block,
        spec: &CompositeSpec,
        path: &ConnectorPath,
        executed: &mut Vec<String>,
    ) -> Result<(), RuntimeError> {
        let child_names: HashSet<&str> = spec.blocks.iter().map(|b| b.name.as_str()).collect();
        let mut done: HashSet<&str> = HashSet::new();

        while done.len() < spec.blocks.len() {
            let mut progressed = false;
            for child in &spec.blocks {
                if done.contains(child.name.as_str()) {
                    continue;
                }
                let ready = spec
                    .connections
                    .iter()
                    .filter(|conn| {
                        conn.to_block == child.name
                            && !conn.to_input.is_empty()
                            && child_names.contains(conn.from_block.as_str())
                            && !conn.from_output.is_empty()
                    })
                    .all(|conn| done.contains(conn.from_block.as_str()));
                if ready {
                    self.run_child(spec, child, path, executed)?;
                    done.insert(child.name.as_str());
                    progressed = true;
                }
            }
            if !progressed {
                let stuck = spec
                    .blocks
                    .iter()
                    .filter(|b| !done.contains(b.name.as_str()))
                    .map(|b| b.name.clone())
                    .collect();
                return Err(RuntimeError::Dependency(stuck));
            }
        }

        self.publish_boundary_outputs(block, spec, path)
    }

    /// Run exactly the named children, in list order.
    fn run_listed(
        &mut self,
        block: &Block,
        spec: &CompositeSpec,
        path: &ConnectorPath,
        names: &[String],
        list: &'static str,
        executed: &mut Vec<String>,
    ) -> Result<(), RuntimeError> {
        for name in names {
            let child = spec.child(name).ok_or_else(|| RuntimeError::ChildNotFound {
                name: name.clone(),
                list,
            })?;
            self.run_child(spec, child, path, executed)?;
        }
        self.publish_boundary_outputs(block, spec, path)
    }

    /// Groups run one after another; members of a group run sequentially
    /// as well (the grouping is a declaration of independence, not a
    /// threading directive). Children in no group run last, in
    /// declaration order.
    fn run_parallel(
        &mut self,
        block: &Block,
        spec: &CompositeSpec,
        path: &ConnectorPath,
        groups: &[Vec<String>],
        executed: &mut Vec<String>,
    ) -> Result<(), RuntimeError> {
        let mut ran: HashSet<&str> = HashSet::new();
        for group in groups {
            for name in group {
                let child = spec.child(name).ok_or_else(|| RuntimeError::ChildNotFound {
                    name: name.clone(),
                    list: "parallel_groups",
                })?;
                self.run_child(spec, child, path, executed)?;
                ran.insert(child.name.as_str());
            }
        }
        for child in &spec.blocks {
            if !ran.contains(child.name.as_str()) {
                self.run_child(spec, child, path, executed)?;
            }
        }
        self.publish_boundary_outputs(block, spec, path)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_while(
        &mut self,
        block: &Block,
        spec: &CompositeSpec,
        path: &ConnectorPath,
        condition_input: &str,
        loop_blocks: &[String],
        max_iterations: u32,
        executed: &mut Vec<String>,
    ) -> Result<(), RuntimeError> {
        let mut iterations: u32 = 0;
        while iterations < max_iterations {
            if !self.condition(path, condition_input)? {
                break;
            }
            for name in loop_blocks {
                let child = spec.child(name).ok_or_else(|| RuntimeError::ChildNotFound {
                    name: name.clone(),
                    list: "loop_blocks",
                })?;
                self.run_child(spec, child, path, executed)?;
            }
            // The body re-runs within this event, so its assignments are
            // released between iterations.
            for name in loop_blocks {
                self.context.release_assignments_under(&path.child(name));
            }
            iterations += 1;
        }
        if iterations >= max_iterations {
            return Err(RuntimeError::IterationLimit(max_iterations));
        }
        log::trace!("while '{}' settled after {iterations} iterations", block.name);
        self.publish_boundary_outputs(block, spec, path)
    }

    fn condition(
        &self,
        path: &ConnectorPath,
        condition_input: &str,
    ) -> Result<bool, RuntimeError> {
        let value = self
            .context
            .value_at(&path.child(condition_input))
            .ok_or_else(|| RuntimeError::ConditionNotSet(condition_input.to_string()))?;
        Ok(coercion::to_bool(value))
    }

    /// Bind a child's inputs from its incoming connections, then run it.
    fn run_child(
        &mut self,
        spec: &CompositeSpec,
        child: &Block,
        parent_path: &ConnectorPath,
        executed: &mut Vec<String>,
    ) -> Result<(), RuntimeError> {
        let child_path = parent_path.child(&child.name);
        for conn in &spec.connections {
            if conn.to_block != child.name || conn.to_input.is_empty() {
                continue;
            }
            let source = source_path(parent_path, conn);
            if let Some(value) = self.context.value_at(&source).cloned() {
                self.context
                    .set_value(child_path.child(&conn.to_input), value)?;
            }
        }
        self.run_block(child, &child_path, executed)
            .map_err(|source| RuntimeError::Child {
                name: child.name.clone(),
                source: Box::new(source),
            })
    }

    /// Copy child outputs wired to the composite's boundary outputs.
    fn publish_boundary_outputs(
        &mut self,
        block: &Block,
        spec: &CompositeSpec,
        path: &ConnectorPath,
    ) -> Result<(), RuntimeError> {
        for conn in &spec.connections {
            if !conn.to_input.is_empty() || block.output(&conn.to_block).is_none() {
                continue;
            }
            let source = source_path(path, conn);
            if let Some(value) = self.context.value_at(&source).cloned() {
                self.context.set_value(path.child(&conn.to_block), value)?;
            }
        }
        Ok(())
    }
}

/// Path of a connection's source value: a child output, or (with an empty
/// `from_output`) a boundary input of the enclosing composite.
fn source_path(parent_path: &ConnectorPath, conn: &Connection) -> ConnectorPath {
    if conn.from_output.is_empty() {
        parent_path.child(&conn.from_block)
    } else {
        parent_path.child(&conn.from_block).child(&conn.from_output)
    }
}

fn failure(err: RuntimeError, executed: Vec<String>) -> ExecutionResult {
    ExecutionResult {
        success: false,
        outputs: HashMap::new(),
        error: Some(err.to_string()),
        blocks_executed: executed,
    }
}
