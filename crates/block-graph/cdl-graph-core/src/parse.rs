//! JSON codec for block documents.
//!
//! The document format is deliberately forgiving on the way in: parameters
//! may be a full list of objects or a `{name: value}` shorthand map,
//! connections may be written explicitly (`from_block`/`from_output`) or
//! compactly (`"from": "gain1.y"`), equations may be objects or plain
//! `"lhs = rhs"` strings, and a block's category can be inferred from its
//! `type` or from the presence of children. Connector declarations are the
//! exception: each must carry an explicit `type`. Serialization via
//! [`block_to_json`] always emits the explicit form.
//!
//! Every equation right-hand side is compiled against the expression
//! grammar while parsing, so a document with a malformed or disallowed
//! equation is rejected at load time rather than mid-execution.

use serde::Deserialize;
use serde_json::{json, Map, Value as JsonValue};
use thiserror::Error;

use cdl_api_core::Value;

use crate::expr::{self, ExprError};
use crate::types::{
    Block, BlockKind, CdlType, CompositeSpec, Connection, Connector, Constant, ControlFlow,
    Direction, Equation, ModelError, Parameter, SemanticMetadata, DEFAULT_MAX_ITERATIONS,
};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("block definition is missing a name")]
    MissingName,
    #[error("block '{0}' is missing a type")]
    MissingBlockType(String),
    #[error("block '{block}': {message}")]
    InvalidField { block: String, message: String },
    #[error("invalid equation '{lhs} = {rhs}': {source}")]
    Equation {
        lhs: String,
        rhs: String,
        source: ExprError,
    },
    #[error("block '{0}' requires a condition_input")]
    MissingCondition(String),
    #[error(transparent)]
    Model(#[from] ModelError),
}

// ---------------------------------------------------------------------------
// Raw (wire) shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawBlock {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type", alias = "block_type")]
    block_type: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<RawParams>,
    #[serde(default)]
    constants: Vec<RawBinding>,
    #[serde(default)]
    inputs: Vec<RawConnector>,
    #[serde(default)]
    outputs: Vec<RawConnector>,
    #[serde(default)]
    equations: Vec<RawEquation>,
    #[serde(default, rename = "semantic", alias = "semantic_metadata")]
    semantic: Option<SemanticMetadata>,
    #[serde(default)]
    implementation: Option<String>,

    // Composite payload.
    #[serde(default)]
    blocks: Option<Vec<RawBlock>>,
    #[serde(default)]
    connections: Vec<RawConnection>,

    // Control flow.
    #[serde(default)]
    execution_order: Option<Vec<String>>,
    #[serde(default)]
    loop_blocks: Option<Vec<String>>,
    #[serde(default)]
    parallel_groups: Option<Vec<Vec<String>>>,
    #[serde(default)]
    condition_input: Option<String>,
    #[serde(default)]
    then_blocks: Option<Vec<String>>,
    #[serde(default)]
    else_blocks: Option<Vec<String>>,
    #[serde(default)]
    max_iterations: Option<u32>,

    // Extension payload.
    #[serde(default)]
    extension_data: Option<JsonValue>,
    #[serde(default)]
    implementation_language: Option<String>,
    #[serde(default)]
    implementation_code: Option<String>,
}

/// Parameters are either a full list or a `{name: value}` shorthand map.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawParams {
    List(Vec<RawBinding>),
    Map(Map<String, JsonValue>),
}

/// Full parameter/constant object.
#[derive(Debug, Deserialize)]
struct RawBinding {
    name: String,
    #[serde(default, rename = "type")]
    ty: Option<CdlType>,
    #[serde(default)]
    value: JsonValue,
    #[serde(default)]
    quantity: Option<String>,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawConnector {
    name: String,
    #[serde(default, rename = "type")]
    ty: Option<CdlType>,
    #[serde(default)]
    quantity: Option<String>,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEquation {
    Explicit {
        lhs: String,
        rhs: String,
        #[serde(default)]
        description: Option<String>,
    },
    /// `"y = k * u"` shorthand, split on the first '='.
    Compact(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawConnection {
    Explicit {
        from_block: String,
        #[serde(default)]
        from_output: String,
        to_block: String,
        #[serde(default)]
        to_input: String,
        #[serde(default)]
        description: Option<String>,
    },
    /// `{"from": "gain1.y", "to": "limiter.u"}` shorthand. An endpoint
    /// without a dot names a boundary connector of the enclosing composite.
    Compact {
        from: String,
        to: String,
        #[serde(default)]
        description: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a block document from a JSON string.
pub fn parse_str(source: &str) -> Result<Block, ParseError> {
    let raw: JsonValue = serde_json::from_str(source)?;
    parse_value(raw)
}

/// Parse a block document from an already-decoded JSON value.
pub fn parse_value(value: JsonValue) -> Result<Block, ParseError> {
    let raw: RawBlock = serde_json::from_value(value)?;
    let block = build_block(raw)?;
    block.ensure_well_formed()?;
    log::debug!(
        "parsed block '{}' (type {}, {} children)",
        block.name,
        block.block_type,
        block.as_composite().map(|s| s.blocks.len()).unwrap_or(0)
    );
    Ok(block)
}

fn build_block(mut raw: RawBlock) -> Result<Block, ParseError> {
    let name = raw
        .name
        .take()
        .filter(|n| !n.trim().is_empty())
        .ok_or(ParseError::MissingName)?;

    let category = infer_category(&raw, &name)?;
    let block_type = match raw.block_type {
        Some(t) => t,
        None if category == Category::Composite => "composite".to_string(),
        None => return Err(ParseError::MissingBlockType(name)),
    };

    let parameters = match raw.parameters {
        Some(RawParams::List(list)) => list
            .into_iter()
            .map(|p| binding_to_parameter(p, &name))
            .collect::<Result<Vec<_>, _>>()?,
        Some(RawParams::Map(map)) => map
            .into_iter()
            .map(|(key, value)| shorthand_parameter(key, value))
            .collect(),
        None => Vec::new(),
    };

    let constants = raw
        .constants
        .into_iter()
        .map(|c| binding_to_constant(c, &name))
        .collect::<Result<Vec<_>, _>>()?;

    let inputs = raw
        .inputs
        .into_iter()
        .map(|c| build_connector(c, Direction::Input, &name))
        .collect::<Result<Vec<_>, _>>()?;
    let outputs = raw
        .outputs
        .into_iter()
        .map(|c| build_connector(c, Direction::Output, &name))
        .collect::<Result<Vec<_>, _>>()?;

    let equations = raw
        .equations
        .into_iter()
        .map(|eq| build_equation(eq, &name))
        .collect::<Result<Vec<_>, _>>()?;

    let kind = match category {
        Category::Composite => {
            let children = raw
                .blocks
                .unwrap_or_default()
                .into_iter()
                .map(build_block)
                .collect::<Result<Vec<_>, _>>()?;
            let connections = raw
                .connections
                .into_iter()
                .map(build_connection)
                .collect::<Result<Vec<_>, _>>()?;
            let control = build_control_flow(
                &name,
                &block_type,
                raw.execution_order,
                raw.loop_blocks,
                raw.parallel_groups,
                raw.condition_input,
                raw.then_blocks,
                raw.else_blocks,
                raw.max_iterations,
            )?;
            BlockKind::Composite(CompositeSpec {
                blocks: children,
                connections,
                control,
            })
        }
        Category::Extension => BlockKind::Extension {
            extension_data: raw.extension_data.unwrap_or(JsonValue::Null),
            implementation_language: raw.implementation_language,
            implementation_code: raw.implementation_code,
        },
        Category::Elementary => BlockKind::Elementary {
            implementation: raw.implementation,
        },
    };

    Ok(Block {
        name,
        block_type,
        parameters,
        constants,
        inputs,
        outputs,
        equations,
        semantic: raw.semantic,
        description: raw.description,
        kind,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Elementary,
    Composite,
    Extension,
}

/// Category resolution: an explicit `category` field wins, then a
/// categorical `type`, then the presence of children, then elementary.
fn infer_category(raw: &RawBlock, name: &str) -> Result<Category, ParseError> {
    if let Some(cat) = &raw.category {
        return match cat.to_ascii_lowercase().as_str() {
            "elementary" => Ok(Category::Elementary),
            "composite" => Ok(Category::Composite),
            "extension" => Ok(Category::Extension),
            other => Err(ParseError::InvalidField {
                block: name.to_string(),
                message: format!("unknown category '{other}'"),
            }),
        };
    }
    if let Some(ty) = &raw.block_type {
        match ty.to_ascii_lowercase().as_str() {
            "elementary" => return Ok(Category::Elementary),
            "composite" | "sequence" | "parallel" | "if" | "while" => {
                return Ok(Category::Composite)
            }
            "extension" => return Ok(Category::Extension),
            _ => {}
        }
    }
    if raw.blocks.is_some() {
        return Ok(Category::Composite);
    }
    if raw.extension_data.is_some() || raw.implementation_code.is_some() {
        return Ok(Category::Extension);
    }
    Ok(Category::Elementary)
}

#[allow(clippy::too_many_arguments)]
fn build_control_flow(
    name: &str,
    block_type: &str,
    execution_order: Option<Vec<String>>,
    loop_blocks: Option<Vec<String>>,
    parallel_groups: Option<Vec<Vec<String>>>,
    condition_input: Option<String>,
    then_blocks: Option<Vec<String>>,
    else_blocks: Option<Vec<String>>,
    max_iterations: Option<u32>,
) -> Result<ControlFlow, ParseError> {
    match block_type.to_ascii_lowercase().as_str() {
        "sequence" => Ok(ControlFlow::Sequence {
            execution_order: execution_order.unwrap_or_default(),
        }),
        "parallel" => Ok(ControlFlow::Parallel {
            parallel_groups: parallel_groups.unwrap_or_default(),
        }),
        "if" => Ok(ControlFlow::If {
            condition_input: condition_input
                .ok_or_else(|| ParseError::MissingCondition(name.to_string()))?,
            then_blocks: then_blocks.unwrap_or_default(),
            else_blocks: else_blocks.unwrap_or_default(),
        }),
        "while" => Ok(ControlFlow::While {
            condition_input: condition_input
                .ok_or_else(|| ParseError::MissingCondition(name.to_string()))?,
            // `loop_blocks` is the defined field; `execution_order` is
            // tolerated as a fallback spelling.
            loop_blocks: loop_blocks.or(execution_order).unwrap_or_default(),
            max_iterations: max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS),
        }),
        _ => Ok(ControlFlow::Generic),
    }
}

fn binding_to_parameter(raw: RawBinding, block: &str) -> Result<Parameter, ParseError> {
    let (ty, value) = binding_type_and_value(raw.ty, raw.value, &raw.name, block)?;
    Ok(Parameter {
        name: raw.name,
        ty,
        value,
        quantity: raw.quantity,
        unit: raw.unit,
        min: raw.min,
        max: raw.max,
        description: raw.description,
    })
}

fn binding_to_constant(raw: RawBinding, block: &str) -> Result<Constant, ParseError> {
    let (ty, value) = binding_type_and_value(raw.ty, raw.value, &raw.name, block)?;
    Ok(Constant {
        name: raw.name,
        ty,
        value,
        quantity: raw.quantity,
        unit: raw.unit,
        description: raw.description,
    })
}

fn binding_type_and_value(
    ty: Option<CdlType>,
    value: JsonValue,
    name: &str,
    block: &str,
) -> Result<(CdlType, Value), ParseError> {
    let value: Value = match value {
        JsonValue::Null => Value::Real(0.0),
        other => serde_json::from_value(other).map_err(|err| ParseError::InvalidField {
            block: block.to_string(),
            message: format!("invalid value for '{name}': {err}"),
        })?,
    };
    let ty = ty.unwrap_or_else(|| infer_type(&value));
    Ok((ty, value))
}

fn infer_type(value: &Value) -> CdlType {
    match value {
        Value::Bool(_) => CdlType::Boolean,
        Value::Integer(_) => CdlType::Integer,
        Value::Text(_) => CdlType::String,
        _ => CdlType::Real,
    }
}

/// Shorthand `{name: value}` parameters. A string value is a symbolic
/// placeholder (a reference to be bound later) and lands as Real 0.0.
fn shorthand_parameter(name: String, value: JsonValue) -> Parameter {
    let value: Value = match value {
        JsonValue::Bool(b) => Value::Bool(b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else {
                Value::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        _ => Value::Real(0.0),
    };
    let ty = infer_type(&value);
    Parameter {
        name,
        ty,
        value,
        quantity: None,
        unit: None,
        min: None,
        max: None,
        description: None,
    }
}

fn build_connector(
    raw: RawConnector,
    direction: Direction,
    block: &str,
) -> Result<Connector, ParseError> {
    let ty = raw.ty.ok_or_else(|| ParseError::InvalidField {
        block: block.to_string(),
        message: format!("connector '{}' is missing a type", raw.name),
    })?;
    Ok(Connector {
        name: raw.name,
        ty,
        direction,
        quantity: raw.quantity,
        unit: raw.unit,
        min: raw.min,
        max: raw.max,
        description: raw.description,
    })
}

fn build_equation(raw: RawEquation, block: &str) -> Result<Equation, ParseError> {
    let (lhs, rhs, description) = match raw {
        RawEquation::Explicit {
            lhs,
            rhs,
            description,
        } => (lhs.trim().to_string(), rhs.trim().to_string(), description),
        RawEquation::Compact(text) => {
            let Some((lhs, rhs)) = text.split_once('=') else {
                return Err(ParseError::InvalidField {
                    block: block.to_string(),
                    message: format!("equation '{text}' is not of the form 'lhs = rhs'"),
                });
            };
            (lhs.trim().to_string(), rhs.trim().to_string(), None)
        }
    };
    // Reject disallowed or malformed expressions at load time. The runtime
    // recompiles per evaluation; this pass only guards the document.
    expr::compile(&rhs).map_err(|source| ParseError::Equation {
        lhs: lhs.clone(),
        rhs: rhs.clone(),
        source,
    })?;
    Ok(Equation {
        lhs,
        rhs,
        description,
    })
}

fn build_connection(raw: RawConnection) -> Result<Connection, ParseError> {
    Ok(match raw {
        RawConnection::Explicit {
            from_block,
            from_output,
            to_block,
            to_input,
            description,
        } => Connection {
            from_block,
            from_output,
            to_block,
            to_input,
            description,
        },
        RawConnection::Compact {
            from,
            to,
            description,
        } => {
            let (from_block, from_output) = split_endpoint(&from);
            let (to_block, to_input) = split_endpoint(&to);
            Connection {
                from_block,
                from_output,
                to_block,
                to_input,
                description,
            }
        }
    })
}

/// `"gain1.y"` -> ("gain1", "y"); a bare `"u"` names a boundary connector.
fn split_endpoint(endpoint: &str) -> (String, String) {
    match endpoint.split_once('.') {
        Some((block, port)) => (block.to_string(), port.to_string()),
        None => (endpoint.to_string(), String::new()),
    }
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

/// Serialize a block to explicit-form JSON. The output round-trips through
/// [`parse_value`] to an equal model.
pub fn block_to_json(block: &Block) -> JsonValue {
    let mut out = Map::new();
    out.insert("name".into(), json!(block.name));
    out.insert("type".into(), json!(block.block_type));
    match &block.kind {
        BlockKind::Elementary { .. } => {
            out.insert("category".into(), json!("elementary"));
        }
        BlockKind::Composite(_) => {
            out.insert("category".into(), json!("composite"));
        }
        BlockKind::Extension { .. } => {
            out.insert("category".into(), json!("extension"));
        }
    }
    if let Some(desc) = &block.description {
        out.insert("description".into(), json!(desc));
    }
    if !block.parameters.is_empty() {
        out.insert("parameters".into(), json!(block.parameters));
    }
    if !block.constants.is_empty() {
        out.insert("constants".into(), json!(block.constants));
    }
    if !block.inputs.is_empty() {
        out.insert("inputs".into(), connectors_to_json(&block.inputs));
    }
    if !block.outputs.is_empty() {
        out.insert("outputs".into(), connectors_to_json(&block.outputs));
    }
    if !block.equations.is_empty() {
        out.insert("equations".into(), json!(block.equations));
    }
    if let Some(semantic) = &block.semantic {
        out.insert("semantic".into(), json!(semantic));
    }
    match &block.kind {
        BlockKind::Elementary { implementation } => {
            if let Some(implementation) = implementation {
                out.insert("implementation".into(), json!(implementation));
            }
        }
        BlockKind::Composite(spec) => {
            out.insert(
                "blocks".into(),
                JsonValue::Array(spec.blocks.iter().map(block_to_json).collect()),
            );
            if !spec.connections.is_empty() {
                out.insert("connections".into(), json!(spec.connections));
            }
            match &spec.control {
                ControlFlow::Generic => {}
                ControlFlow::Sequence { execution_order } => {
                    out.insert("execution_order".into(), json!(execution_order));
                }
                ControlFlow::Parallel { parallel_groups } => {
                    out.insert("parallel_groups".into(), json!(parallel_groups));
                }
                ControlFlow::If {
                    condition_input,
                    then_blocks,
                    else_blocks,
                } => {
                    out.insert("condition_input".into(), json!(condition_input));
                    out.insert("then_blocks".into(), json!(then_blocks));
                    out.insert("else_blocks".into(), json!(else_blocks));
                }
                ControlFlow::While {
                    condition_input,
                    loop_blocks,
                    max_iterations,
                } => {
                    out.insert("condition_input".into(), json!(condition_input));
                    out.insert("loop_blocks".into(), json!(loop_blocks));
                    out.insert("max_iterations".into(), json!(max_iterations));
                }
            }
        }
        BlockKind::Extension {
            extension_data,
            implementation_language,
            implementation_code,
        } => {
            out.insert("extension_data".into(), extension_data.clone());
            if let Some(lang) = implementation_language {
                out.insert("implementation_language".into(), json!(lang));
            }
            if let Some(code) = implementation_code {
                out.insert("implementation_code".into(), json!(code));
            }
        }
    }
    JsonValue::Object(out)
}

/// Connectors carry their direction structurally (inputs vs outputs
/// sections), so the field itself is not emitted.
fn connectors_to_json(connectors: &[Connector]) -> JsonValue {
    JsonValue::Array(
        connectors
            .iter()
            .map(|c| {
                let mut value = serde_json::to_value(c).unwrap_or(JsonValue::Null);
                if let JsonValue::Object(map) = &mut value {
                    map.remove("direction");
                }
                value
            })
            .collect(),
    )
}
