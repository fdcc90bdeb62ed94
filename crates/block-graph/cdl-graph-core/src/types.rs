//! Data model for CDL blocks, connectors, connections, and equations.
//!
//! A block diagram is an owned tree: a composite block exclusively owns its
//! child blocks and the connections wiring them together. Connections refer
//! to children by name, never by pointer, so the tree has no back edges.
//! Structural invariants are enforced at construction time through
//! [`Block::ensure_well_formed`]; value flow happens in a separate
//! execution context and never mutates the model.

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use cdl_api_core::Value;

/// Default runaway guard for `While` blocks.
pub const DEFAULT_MAX_ITERATIONS: u32 = 1000;

/// The CDL scalar types a connector, parameter, or constant may declare.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CdlType {
    Real,
    Integer,
    Boolean,
    String,
    Enumeration,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Input,
    Output,
}

/// A typed, named port on a block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Connector {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: CdlType,
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Bounds apply to Real/Integer connectors only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Connector {
    pub fn input(name: impl Into<String>, ty: CdlType) -> Self {
        Self::new(name, ty, Direction::Input)
    }

    pub fn output(name: impl Into<String>, ty: CdlType) -> Self {
        Self::new(name, ty, Direction::Output)
    }

    pub fn new(name: impl Into<String>, ty: CdlType, direction: Direction) -> Self {
        Connector {
            name: name.into(),
            ty,
            direction,
            quantity: None,
            unit: None,
            min: None,
            max: None,
            description: None,
        }
    }
}

/// A directed wire from one block's output (or a composite's boundary input)
/// to another block's input (or the composite's boundary output).
///
/// An empty `from_output` marks the source as a boundary input of the
/// enclosing composite; an empty `to_input` marks the target as a boundary
/// output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Connection {
    pub from_block: String,
    #[serde(default)]
    pub from_output: String,
    pub to_block: String,
    #[serde(default)]
    pub to_input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Connection {
    pub fn new(
        from_block: impl Into<String>,
        from_output: impl Into<String>,
        to_block: impl Into<String>,
        to_input: impl Into<String>,
    ) -> Self {
        Connection {
            from_block: from_block.into(),
            from_output: from_output.into(),
            to_block: to_block.into(),
            to_input: to_input.into(),
            description: None,
        }
    }

    /// Full `block.port` path of the source.
    pub fn from_path(&self) -> String {
        format!("{}.{}", self.from_block, self.from_output)
    }

    /// Full `block.port` path of the target.
    pub fn to_path(&self) -> String {
        format!("{}.{}", self.to_block, self.to_input)
    }
}

/// Time-invariant binding, overridable at runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: CdlType,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Parameter {
    pub fn real(name: impl Into<String>, value: f64) -> Self {
        Parameter {
            name: name.into(),
            ty: CdlType::Real,
            value: Value::Real(value),
            quantity: None,
            unit: None,
            min: None,
            max: None,
            description: None,
        }
    }
}

/// Same shape as [`Parameter`] but fixed once constructed; the runtime
/// never overrides it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Constant {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: CdlType,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Assignment equation `lhs = rhs`, owned by exactly one elementary block
/// and evaluated in list order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Equation {
    pub lhs: String,
    pub rhs: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Equation {
    pub fn new(lhs: impl Into<String>, rhs: impl Into<String>) -> Self {
        Equation {
            lhs: lhs.into(),
            rhs: rhs.into(),
            description: None,
        }
    }
}

/// Open semantic annotations (Brick, Haystack, S223P); unknown keys pass
/// through untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SemanticMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub natural_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brick_annotation: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub haystack_annotation: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s223p_annotation: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_annotations: Option<JsonValue>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, JsonValue>,
}

/// Control-flow specialization of a composite block.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlFlow {
    /// Plain dataflow composite; execution order derived from connections.
    Generic,
    /// Children execute in the literal `execution_order` list.
    Sequence { execution_order: Vec<String> },
    /// Grouping is informational; evaluation is sequential.
    Parallel { parallel_groups: Vec<Vec<String>> },
    If {
        condition_input: String,
        then_blocks: Vec<String>,
        else_blocks: Vec<String>,
    },
    While {
        condition_input: String,
        loop_blocks: Vec<String>,
        max_iterations: u32,
    },
}

/// Children and wiring of a composite block.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeSpec {
    pub blocks: Vec<Block>,
    pub connections: Vec<Connection>,
    pub control: ControlFlow,
}

impl CompositeSpec {
    pub fn new(blocks: Vec<Block>, connections: Vec<Connection>) -> Self {
        CompositeSpec {
            blocks,
            connections,
            control: ControlFlow::Generic,
        }
    }

    /// Child block lookup by name.
    pub fn child(&self, name: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.name == name)
    }

    /// Names of all child blocks, in declaration order.
    pub fn child_names(&self) -> Vec<&str> {
        self.blocks.iter().map(|b| b.name.as_str()).collect()
    }
}

/// Block variant payload.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockKind {
    Elementary {
        implementation: Option<String>,
    },
    Composite(CompositeSpec),
    Extension {
        extension_data: JsonValue,
        implementation_language: Option<String>,
        implementation_code: Option<String>,
    },
}

/// A named unit of control logic with typed inputs, outputs, and
/// parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub name: String,
    pub block_type: String,
    pub parameters: Vec<Parameter>,
    pub constants: Vec<Constant>,
    pub inputs: Vec<Connector>,
    pub outputs: Vec<Connector>,
    pub equations: Vec<Equation>,
    pub semantic: Option<SemanticMetadata>,
    pub description: Option<String>,
    pub kind: BlockKind,
}

/// Structural-invariant violation detected at construction.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("block name cannot be empty")]
    EmptyName,
    #[error("connection source block '{0}' not found")]
    UnknownConnectionSource(String),
    #[error("connection target block '{0}' not found")]
    UnknownConnectionTarget(String),
    #[error("block '{name}' in {list} not found")]
    UnknownControlEntry { list: &'static str, name: String },
}

impl Block {
    /// Bare elementary block; callers fill in connectors and equations.
    pub fn elementary(name: impl Into<String>, block_type: impl Into<String>) -> Self {
        Block {
            name: name.into(),
            block_type: block_type.into(),
            parameters: Vec::new(),
            constants: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            equations: Vec::new(),
            semantic: None,
            description: None,
            kind: BlockKind::Elementary {
                implementation: None,
            },
        }
    }

    /// Bare composite block with the given children and wiring.
    pub fn composite(
        name: impl Into<String>,
        blocks: Vec<Block>,
        connections: Vec<Connection>,
    ) -> Self {
        Block {
            name: name.into(),
            block_type: "composite".into(),
            parameters: Vec::new(),
            constants: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            equations: Vec::new(),
            semantic: None,
            description: None,
            kind: BlockKind::Composite(CompositeSpec::new(blocks, connections)),
        }
    }

    /// Get input connector by name.
    pub fn input(&self, name: &str) -> Option<&Connector> {
        self.inputs.iter().find(|c| c.name == name)
    }

    /// Get output connector by name.
    pub fn output(&self, name: &str) -> Option<&Connector> {
        self.outputs.iter().find(|c| c.name == name)
    }

    /// Get parameter by name.
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Get constant by name.
    pub fn constant(&self, name: &str) -> Option<&Constant> {
        self.constants.iter().find(|c| c.name == name)
    }

    /// The composite payload, if this block is composite.
    pub fn as_composite(&self) -> Option<&CompositeSpec> {
        match &self.kind {
            BlockKind::Composite(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.kind, BlockKind::Composite(_))
    }

    /// Check the construction invariants of this block and, recursively,
    /// of every child block.
    ///
    /// Violations abort construction: the parser never returns a block
    /// that fails this check, and programmatic callers are expected to
    /// run it before handing a hand-built tree to the validators or the
    /// runtime.
    pub fn ensure_well_formed(&self) -> Result<(), ModelError> {
        if self.name.trim().is_empty() {
            return Err(ModelError::EmptyName);
        }

        if let BlockKind::Composite(spec) = &self.kind {
            let child_names: HashSet<&str> =
                spec.blocks.iter().map(|b| b.name.as_str()).collect();
            let boundary: HashSet<&str> = self
                .inputs
                .iter()
                .chain(self.outputs.iter())
                .map(|c| c.name.as_str())
                .collect();

            for conn in &spec.connections {
                if !child_names.contains(conn.from_block.as_str())
                    && !boundary.contains(conn.from_block.as_str())
                {
                    return Err(ModelError::UnknownConnectionSource(conn.from_block.clone()));
                }
                if !child_names.contains(conn.to_block.as_str())
                    && !boundary.contains(conn.to_block.as_str())
                {
                    return Err(ModelError::UnknownConnectionTarget(conn.to_block.clone()));
                }
            }

            let check_list = |list: &'static str, names: &[String]| -> Result<(), ModelError> {
                for name in names {
                    if !child_names.contains(name.as_str()) {
                        return Err(ModelError::UnknownControlEntry {
                            list,
                            name: name.clone(),
                        });
                    }
                }
                Ok(())
            };

            match &spec.control {
                ControlFlow::Generic | ControlFlow::Parallel { .. } => {}
                ControlFlow::Sequence { execution_order } => {
                    check_list("execution_order", execution_order)?;
                }
                ControlFlow::If {
                    then_blocks,
                    else_blocks,
                    ..
                } => {
                    check_list("then_blocks", then_blocks)?;
                    check_list("else_blocks", else_blocks)?;
                }
                ControlFlow::While { loop_blocks, .. } => {
                    check_list("loop_blocks", loop_blocks)?;
                }
            }

            for child in &spec.blocks {
                child.ensure_well_formed()?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_paths() {
        let conn = Connection::new("gain1", "y", "gain2", "u");
        assert_eq!(conn.from_path(), "gain1.y");
        assert_eq!(conn.to_path(), "gain2.u");
    }

    #[test]
    fn well_formed_rejects_unknown_endpoint() {
        let child = Block::elementary("gain", "Gain");
        let block = Block::composite(
            "ctl",
            vec![child],
            vec![Connection::new("ghost", "y", "gain", "u")],
        );
        assert_eq!(
            block.ensure_well_formed(),
            Err(ModelError::UnknownConnectionSource("ghost".into()))
        );
    }

    #[test]
    fn well_formed_accepts_boundary_endpoints() {
        let mut child = Block::elementary("gain", "Gain");
        child.inputs.push(Connector::input("u", CdlType::Real));
        child.outputs.push(Connector::output("y", CdlType::Real));

        let mut block = Block::composite(
            "ctl",
            vec![child],
            vec![
                Connection::new("u", "", "gain", "u"),
                Connection::new("gain", "y", "y", ""),
            ],
        );
        block.inputs.push(Connector::input("u", CdlType::Real));
        block.outputs.push(Connector::output("y", CdlType::Real));
        assert!(block.ensure_well_formed().is_ok());
    }

    #[test]
    fn well_formed_checks_control_lists() {
        let mut block = Block::composite("seq", vec![Block::elementary("a", "A")], vec![]);
        if let BlockKind::Composite(spec) = &mut block.kind {
            spec.control = ControlFlow::Sequence {
                execution_order: vec!["a".into(), "b".into()],
            };
        }
        assert_eq!(
            block.ensure_well_formed(),
            Err(ModelError::UnknownControlEntry {
                list: "execution_order",
                name: "b".into()
            })
        );
    }
}
