//! Topological ordering of a composite's children.

use hashbrown::HashMap;
use std::collections::VecDeque;

use crate::types::Block;

/// Kahn's algorithm over the child-to-child connections of a composite.
///
/// Boundary connections (where one endpoint is a connector of `block`
/// itself) impose no ordering and are skipped. Children with equal depth
/// come out in declaration order. Returns `None` when `block` is not a
/// composite or when a cycle prevents a complete ordering.
pub fn execution_order(block: &Block) -> Option<Vec<String>> {
    let spec = block.as_composite()?;

    let mut indegree: HashMap<&str, usize> = HashMap::new();
    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
    for child in &spec.blocks {
        indegree.insert(child.name.as_str(), 0);
        edges.insert(child.name.as_str(), Vec::new());
    }

    for conn in &spec.connections {
        let from = conn.from_block.as_str();
        let to = conn.to_block.as_str();
        if !indegree.contains_key(from) || !indegree.contains_key(to) {
            continue;
        }
        edges.entry(from).or_default().push(to);
        *indegree.entry(to).or_default() += 1;
    }

    // Declaration order seeds the queue so independent children keep a
    // stable, author-visible order.
    let mut queue: VecDeque<&str> = spec
        .blocks
        .iter()
        .map(|b| b.name.as_str())
        .filter(|name| indegree[name] == 0)
        .collect();

    let mut order = Vec::with_capacity(spec.blocks.len());
    while let Some(name) = queue.pop_front() {
        order.push(name.to_string());
        if let Some(next) = edges.get(name) {
            for &target in next {
                let degree = indegree.get_mut(target)?;
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(target);
                }
            }
        }
    }

    if order.len() == spec.blocks.len() {
        Some(order)
    } else {
        log::debug!(
            "no topological order for '{}': {} of {} children placed",
            block.name,
            order.len(),
            spec.blocks.len()
        );
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Connection;

    fn chain() -> Block {
        Block::composite(
            "ctl",
            vec![
                Block::elementary("c", "Gain"),
                Block::elementary("a", "Gain"),
                Block::elementary("b", "Gain"),
            ],
            vec![
                Connection::new("a", "y", "b", "u"),
                Connection::new("b", "y", "c", "u"),
            ],
        )
    }

    #[test]
    fn orders_by_dependencies_not_declaration() {
        let order = execution_order(&chain()).unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn cycle_yields_none() {
        let block = Block::composite(
            "ctl",
            vec![Block::elementary("a", "Gain"), Block::elementary("b", "Gain")],
            vec![
                Connection::new("a", "y", "b", "u"),
                Connection::new("b", "y", "a", "u"),
            ],
        );
        assert!(execution_order(&block).is_none());
    }

    #[test]
    fn non_composite_yields_none() {
        assert!(execution_order(&Block::elementary("gain", "Gain")).is_none());
    }

    #[test]
    fn boundary_connections_are_ignored() {
        let mut block = chain();
        if let Some(spec) = match &mut block.kind {
            crate::types::BlockKind::Composite(spec) => Some(spec),
            _ => None,
        } {
            spec.connections.push(Connection::new("u", "", "a", "u"));
        }
        use crate::types::{CdlType, Connector};
        block.inputs.push(Connector::input("u", CdlType::Real));
        let order = execution_order(&block).unwrap();
        assert_eq!(order.len(), 3);
    }
}
