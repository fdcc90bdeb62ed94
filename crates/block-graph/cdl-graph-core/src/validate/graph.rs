//! Dataflow-graph validation: cycles and fan-in.

use hashbrown::{HashMap, HashSet};

use crate::types::Block;

/// Validate the dataflow graph of `block` and every nested composite.
///
/// Returns `(valid, errors)`; the graph is valid when no cycles exist and
/// no input has more than one incoming connection.
pub fn validate_graph(block: &Block) -> (bool, Vec<String>) {
    let mut errors = Vec::new();

    for cycle in detect_cycles(block) {
        errors.push(format!("Cycle detected: {}", cycle.join(" -> ")));
    }
    errors.extend(fan_in_errors(block));

    let valid = errors.is_empty();
    if !valid {
        log::debug!("graph validation of '{}' failed: {errors:?}", block.name);
    }
    (valid, errors)
}

/// Find every cycle among the children of `block`, recursing into nested
/// composites. Each cycle lists the nodes in traversal order and repeats
/// the starting node, e.g. `["a", "b", "a"]`.
pub fn detect_cycles(block: &Block) -> Vec<Vec<String>> {
    let mut cycles = Vec::new();
    let Some(spec) = block.as_composite() else {
        return cycles;
    };

    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
    let child_names: HashSet<&str> = spec.blocks.iter().map(|b| b.name.as_str()).collect();
    for conn in &spec.connections {
        if child_names.contains(conn.from_block.as_str())
            && child_names.contains(conn.to_block.as_str())
        {
            edges
                .entry(conn.from_block.as_str())
                .or_default()
                .push(conn.to_block.as_str());
        }
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut on_path: HashSet<&str> = HashSet::new();
    let mut path: Vec<&str> = Vec::new();
    for child in &spec.blocks {
        if !visited.contains(child.name.as_str()) {
            walk(
                child.name.as_str(),
                &edges,
                &mut visited,
                &mut on_path,
                &mut path,
                &mut cycles,
            );
        }
    }

    for child in &spec.blocks {
        cycles.extend(detect_cycles(child));
    }
    cycles
}

fn walk<'a>(
    node: &'a str,
    edges: &HashMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    on_path: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
    cycles: &mut Vec<Vec<String>>,
) {
    visited.insert(node);
    on_path.insert(node);
    path.push(node);

    if let Some(next) = edges.get(node) {
        for &target in next {
            if on_path.contains(target) {
                // Back edge: slice the current path from the repeated node.
                let start = path.iter().position(|&n| n == target).unwrap_or(0);
                let mut cycle: Vec<String> =
                    path[start..].iter().map(|n| n.to_string()).collect();
                cycle.push(target.to_string());
                cycles.push(cycle);
            } else if !visited.contains(target) {
                walk(target, edges, visited, on_path, path, cycles);
            }
        }
    }

    path.pop();
    on_path.remove(node);
}

/// One connection per input: every child input fed by more than one
/// connection is reported.
fn fan_in_errors(block: &Block) -> Vec<String> {
    let mut errors = Vec::new();
    let Some(spec) = block.as_composite() else {
        return errors;
    };

    let mut sources: HashMap<String, Vec<String>> = HashMap::new();
    for conn in &spec.connections {
        if conn.to_input.is_empty() {
            continue;
        }
        sources
            .entry(conn.to_path())
            .or_default()
            .push(conn.from_path());
    }

    let mut overloaded: Vec<(String, Vec<String>)> = sources
        .into_iter()
        .filter(|(_, froms)| froms.len() > 1)
        .collect();
    overloaded.sort();
    for (target, froms) in overloaded {
        errors.push(format!(
            "Input '{target}' has multiple connections: {}",
            froms.join(", ")
        ));
    }

    for child in &spec.blocks {
        errors.extend(fan_in_errors(child));
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Connection;

    fn diagram(connections: Vec<Connection>) -> Block {
        Block::composite(
            "ctl",
            vec![
                Block::elementary("a", "Gain"),
                Block::elementary("b", "Gain"),
                Block::elementary("c", "Gain"),
            ],
            connections,
        )
    }

    #[test]
    fn acyclic_graph_is_valid() {
        let block = diagram(vec![
            Connection::new("a", "y", "b", "u"),
            Connection::new("b", "y", "c", "u"),
        ]);
        let (valid, errors) = validate_graph(&block);
        assert!(valid, "unexpected errors: {errors:?}");
    }

    #[test]
    fn reports_cycle_with_repeated_start() {
        let block = diagram(vec![
            Connection::new("a", "y", "b", "u"),
            Connection::new("b", "y", "a", "u"),
        ]);
        let cycles = detect_cycles(&block);
        assert_eq!(cycles, vec![vec!["a".to_string(), "b".into(), "a".into()]]);

        let (valid, errors) = validate_graph(&block);
        assert!(!valid);
        assert_eq!(errors, vec!["Cycle detected: a -> b -> a"]);
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let block = diagram(vec![Connection::new("a", "y", "a", "u")]);
        let cycles = detect_cycles(&block);
        assert_eq!(cycles, vec![vec!["a".to_string(), "a".into()]]);
    }

    #[test]
    fn fan_in_is_an_error() {
        let block = diagram(vec![
            Connection::new("a", "y", "c", "u"),
            Connection::new("b", "y", "c", "u"),
        ]);
        let (valid, errors) = validate_graph(&block);
        assert!(!valid);
        assert_eq!(
            errors,
            vec!["Input 'c.u' has multiple connections: a.y, b.y"]
        );
    }

    #[test]
    fn boundary_outputs_allow_multiple_writers_check() {
        // Boundary connections (empty to_input) do not count as fan-in.
        let block = diagram(vec![
            Connection::new("a", "y", "y", ""),
            Connection::new("b", "y", "y", ""),
        ]);
        let (_, errors) = validate_graph(&block);
        assert!(errors.is_empty());
    }

    #[test]
    fn nested_cycles_are_found() {
        let inner = Block::composite(
            "inner",
            vec![Block::elementary("x", "Gain"), Block::elementary("z", "Gain")],
            vec![
                Connection::new("x", "y", "z", "u"),
                Connection::new("z", "y", "x", "u"),
            ],
        );
        let block = Block::composite("outer", vec![inner], vec![]);
        let (valid, errors) = validate_graph(&block);
        assert!(!valid);
        assert_eq!(errors, vec!["Cycle detected: x -> z -> x"]);
    }
}
