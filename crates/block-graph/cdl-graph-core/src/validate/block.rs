//! Structural block validation.

use hashbrown::{HashMap, HashSet};
use std::fmt;

use crate::types::{Block, CdlType, ControlFlow};

/// One finding, with the path of the block it concerns ("ctl.gain1").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationMessage {
    pub message: String,
    pub context: Option<String>,
}

impl ValidationMessage {
    fn new(message: impl Into<String>) -> Self {
        ValidationMessage {
            message: message.into(),
            context: None,
        }
    }

    fn prefixed(mut self, prefix: &str) -> Self {
        self.context = Some(match self.context.take() {
            Some(ctx) => format!("{prefix}.{ctx}"),
            None => prefix.to_string(),
        });
        self
    }
}

impl fmt::Display for ValidationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(ctx) => write!(f, "{ctx}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Accumulated findings for a block tree. A block is valid when no errors
/// were recorded; warnings never fail validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub errors: Vec<ValidationMessage>,
    pub warnings: Vec<ValidationMessage>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(ValidationMessage::new(message));
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(ValidationMessage::new(message));
    }

    /// Fold a child block's findings in, prefixing their context with the
    /// child's name.
    fn absorb(&mut self, child: &str, other: ValidationResult) {
        self.errors
            .extend(other.errors.into_iter().map(|m| m.prefixed(child)));
        self.warnings
            .extend(other.warnings.into_iter().map(|m| m.prefixed(child)));
    }
}

/// Validate one block and, recursively, all of its children.
pub fn validate_block(block: &Block) -> ValidationResult {
    let mut result = ValidationResult::default();

    if block.name.trim().is_empty() {
        result.error("block name is empty");
    }

    for name in duplicates(block.inputs.iter().map(|c| c.name.as_str())) {
        result.error(format!("duplicate input name '{name}'"));
    }
    for name in duplicates(block.outputs.iter().map(|c| c.name.as_str())) {
        result.error(format!("duplicate output name '{name}'"));
    }
    for name in duplicates(block.parameters.iter().map(|p| p.name.as_str())) {
        result.warning(format!("duplicate parameter name '{name}'"));
    }

    let input_names: HashSet<&str> = block.inputs.iter().map(|c| c.name.as_str()).collect();
    for output in &block.outputs {
        if input_names.contains(output.name.as_str()) {
            result.warning(format!(
                "'{}' is both an input and an output",
                output.name
            ));
        }
    }

    if let Some(spec) = block.as_composite() {
        for name in duplicates(spec.blocks.iter().map(|b| b.name.as_str())) {
            result.error(format!("duplicate child block name '{name}'"));
        }

        let children: HashMap<&str, &Block> =
            spec.blocks.iter().map(|b| (b.name.as_str(), b)).collect();

        for conn in &spec.connections {
            let source_ty = check_source(block, &children, conn, &mut result);
            let target_ty = check_target(block, &children, conn, &mut result);
            if let (Some(from), Some(to)) = (source_ty, target_ty) {
                if from != to {
                    result.warning(format!(
                        "type mismatch in connection {} -> {}: {:?} vs {:?}",
                        conn.from_path(),
                        conn.to_path(),
                        from,
                        to
                    ));
                }
            }
        }

        match &spec.control {
            ControlFlow::If {
                condition_input, ..
            }
            | ControlFlow::While {
                condition_input, ..
            } => {
                if block.input(condition_input).is_none() {
                    result.error(format!(
                        "condition_input '{condition_input}' is not an input of block '{}'",
                        block.name
                    ));
                }
            }
            _ => {}
        }

        for child in &spec.blocks {
            result.absorb(&child.name, validate_block(child));
        }

        log::debug!(
            "validated '{}': {} errors, {} warnings",
            block.name,
            result.errors.len(),
            result.warnings.len()
        );
    }

    result
}

/// Resolve a connection source, recording errors for missing endpoints.
/// Returns the source connector's type when it resolves.
fn check_source(
    block: &Block,
    children: &HashMap<&str, &Block>,
    conn: &crate::types::Connection,
    result: &mut ValidationResult,
) -> Option<CdlType> {
    if conn.from_output.is_empty() {
        // Boundary source: an input connector of the composite itself.
        match block.input(&conn.from_block) {
            Some(connector) => Some(connector.ty),
            None => {
                result.error(format!(
                    "connection source '{}' is not an input of block '{}'",
                    conn.from_block, block.name
                ));
                None
            }
        }
    } else {
        match children.get(conn.from_block.as_str()) {
            Some(child) => match child.output(&conn.from_output) {
                Some(connector) => Some(connector.ty),
                None => {
                    result.error(format!(
                        "connection source '{}' does not exist",
                        conn.from_path()
                    ));
                    None
                }
            },
            None => {
                result.error(format!(
                    "connection source block '{}' not found",
                    conn.from_block
                ));
                None
            }
        }
    }
}

fn check_target(
    block: &Block,
    children: &HashMap<&str, &Block>,
    conn: &crate::types::Connection,
    result: &mut ValidationResult,
) -> Option<CdlType> {
    if conn.to_input.is_empty() {
        match block.output(&conn.to_block) {
            Some(connector) => Some(connector.ty),
            None => {
                result.error(format!(
                    "connection target '{}' is not an output of block '{}'",
                    conn.to_block, block.name
                ));
                None
            }
        }
    } else {
        match children.get(conn.to_block.as_str()) {
            Some(child) => match child.input(&conn.to_input) {
                Some(connector) => Some(connector.ty),
                None => {
                    result.error(format!(
                        "connection target '{}' does not exist",
                        conn.to_path()
                    ));
                    None
                }
            },
            None => {
                result.error(format!(
                    "connection target block '{}' not found",
                    conn.to_block
                ));
                None
            }
        }
    }
}

/// Duplicate entries, in first-seen order.
fn duplicates<'a, I>(names: I) -> Vec<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    let mut dups = Vec::new();
    for name in names {
        if !seen.insert(name) && !dups.contains(&name) {
            dups.push(name);
        }
    }
    dups
}
