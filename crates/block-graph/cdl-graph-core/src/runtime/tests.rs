//! Behavioral tests for the executor: dataflow scheduling, control flow,
//! the single-assignment rule, and error reporting.

use hashbrown::HashMap;

use cdl_api_core::{ConnectorPath, Value};

use crate::parse::parse_str;
use crate::runtime::{BlockExecutor, EventKind, ExecutionContext, ExecutionEvent};
use crate::types::{
    Block, BlockKind, CdlType, Connection, Connector, Constant, ControlFlow, Equation, Parameter,
};
use crate::validate::{validate_block, validate_graph};

fn gain(name: &str, k: f64) -> Block {
    let mut block = Block::elementary(name, "Gain");
    block.parameters.push(Parameter::real("k", k));
    block.inputs.push(Connector::input("u", CdlType::Real));
    block.outputs.push(Connector::output("y", CdlType::Real));
    block.equations.push(Equation::new("y", "k * u"));
    block
}

/// `u -> gain1(k=2) -> gain2(k=3) -> y`
fn gain_chain() -> Block {
    let mut block = Block::composite(
        "ctl",
        vec![gain("gain1", 2.0), gain("gain2", 3.0)],
        vec![
            Connection::new("u", "", "gain1", "u"),
            Connection::new("gain1", "y", "gain2", "u"),
            Connection::new("gain2", "y", "y", ""),
        ],
    );
    block.inputs.push(Connector::input("u", CdlType::Real));
    block.outputs.push(Connector::output("y", CdlType::Real));
    block
}

fn real_inputs(pairs: &[(&str, f64)]) -> HashMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::Real(*v)))
        .collect()
}

fn run(block: &Block, inputs: HashMap<String, Value>) -> super::ExecutionResult {
    BlockExecutor::new().execute(block, &inputs, None)
}

#[test]
fn gain_chain_computes_output() {
    let block = gain_chain();
    assert!(validate_block(&block).is_valid());
    assert!(validate_graph(&block).0);

    let result = run(&block, real_inputs(&[("u", 5.0)]));
    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.outputs.get("y"), Some(&Value::Real(30.0)));
    assert_eq!(
        result.blocks_executed,
        vec!["ctl", "ctl.gain1", "ctl.gain2"]
    );
}

#[test]
fn declaration_order_does_not_matter() {
    // gain2 declared before gain1; scheduling follows the wiring.
    let mut block = Block::composite(
        "ctl",
        vec![gain("gain2", 3.0), gain("gain1", 2.0)],
        vec![
            Connection::new("u", "", "gain1", "u"),
            Connection::new("gain1", "y", "gain2", "u"),
            Connection::new("gain2", "y", "y", ""),
        ],
    );
    block.inputs.push(Connector::input("u", CdlType::Real));
    block.outputs.push(Connector::output("y", CdlType::Real));

    let result = run(&block, real_inputs(&[("u", 5.0)]));
    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.outputs.get("y"), Some(&Value::Real(30.0)));
    assert_eq!(
        result.blocks_executed,
        vec!["ctl", "ctl.gain1", "ctl.gain2"]
    );
}

#[test]
fn fan_in_violates_single_assignment() {
    let mut block = Block::composite(
        "ctl",
        vec![gain("a", 1.0), gain("b", 1.0), gain("sink", 1.0)],
        vec![
            Connection::new("u", "", "a", "u"),
            Connection::new("u", "", "b", "u"),
            Connection::new("a", "y", "sink", "u"),
            Connection::new("b", "y", "sink", "u"),
        ],
    );
    block.inputs.push(Connector::input("u", CdlType::Real));

    // The graph validator flags it statically...
    let (valid, errors) = validate_graph(&block);
    assert!(!valid);
    assert!(errors[0].contains("multiple connections"));

    // ...and the runtime refuses the second write.
    let result = run(&block, real_inputs(&[("u", 1.0)]));
    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("already assigned"));
}

#[test]
fn equation_self_reference_is_undefined() {
    let mut block = gain("acc", 1.0);
    block.equations.clear();
    block.equations.push(Equation::new("y", "y + u"));

    let result = run(&block, real_inputs(&[("u", 1.0)]));
    assert!(!result.success);
    assert!(result
        .error
        .as_deref()
        .unwrap()
        .contains("undefined name 'y'"));
}

#[test]
fn cycle_deadlocks_the_scheduler() {
    let block = Block::composite(
        "ctl",
        vec![gain("a", 1.0), gain("b", 1.0)],
        vec![
            Connection::new("a", "y", "b", "u"),
            Connection::new("b", "y", "a", "u"),
        ],
    );
    let result = run(&block, HashMap::new());
    assert!(!result.success);
    assert!(result
        .error
        .as_deref()
        .unwrap()
        .contains("unresolvable dependencies"));
}

#[test]
fn nested_composites_resolve_paths() {
    let inner = gain_chain(); // named "ctl"
    let mut outer = Block::composite(
        "outer",
        vec![inner],
        vec![
            Connection::new("u", "", "ctl", "u"),
            Connection::new("ctl", "y", "y", ""),
        ],
    );
    outer.inputs.push(Connector::input("u", CdlType::Real));
    outer.outputs.push(Connector::output("y", CdlType::Real));

    let mut executor = BlockExecutor::new();
    let result = executor.execute(&outer, &real_inputs(&[("u", 2.0)]), None);
    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.outputs.get("y"), Some(&Value::Real(12.0)));
    assert_eq!(
        result.blocks_executed,
        vec!["outer", "outer.ctl", "outer.ctl.gain1", "outer.ctl.gain2"]
    );

    // Intermediate values stay addressable by full path.
    let inner_y = ConnectorPath::parse("outer.ctl.gain1.y").unwrap();
    assert_eq!(executor.context.value_at(&inner_y), Some(&Value::Real(4.0)));
}

#[test]
fn sequence_runs_in_listed_order() {
    let mut a = Block::elementary("a", "Const");
    a.constants.push(Constant {
        name: "c".into(),
        ty: CdlType::Real,
        value: Value::Real(1.0),
        quantity: None,
        unit: None,
        description: None,
    });
    a.outputs.push(Connector::output("y", CdlType::Real));
    a.equations.push(Equation::new("y", "c"));
    let mut b = a.clone();
    b.name = "b".into();

    let mut block = Block::composite("seq", vec![a, b], vec![]);
    block.block_type = "Sequence".into();
    if let BlockKind::Composite(spec) = &mut block.kind {
        spec.control = ControlFlow::Sequence {
            execution_order: vec!["b".into(), "a".into()],
        };
    }

    let result = run(&block, HashMap::new());
    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.blocks_executed, vec!["seq", "seq.b", "seq.a"]);
}

#[test]
fn sequence_reports_missing_child() {
    let mut block = Block::composite("seq", vec![gain("a", 1.0)], vec![]);
    if let BlockKind::Composite(spec) = &mut block.kind {
        spec.control = ControlFlow::Sequence {
            execution_order: vec!["ghost".into()],
        };
    }
    let result = run(&block, HashMap::new());
    assert!(!result.success);
    assert!(result
        .error
        .as_deref()
        .unwrap()
        .contains("'ghost' in execution_order not found"));
}

#[test]
fn parallel_groups_run_in_group_order() {
    let mut block = Block::composite(
        "par",
        vec![gain("g1", 1.0), gain("g2", 1.0)],
        vec![
            Connection::new("u", "", "g1", "u"),
            Connection::new("u", "", "g2", "u"),
        ],
    );
    block.inputs.push(Connector::input("u", CdlType::Real));
    block.block_type = "Parallel".into();
    if let BlockKind::Composite(spec) = &mut block.kind {
        spec.control = ControlFlow::Parallel {
            parallel_groups: vec![vec!["g2".into()], vec!["g1".into()]],
        };
    }

    let result = run(&block, real_inputs(&[("u", 1.0)]));
    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.blocks_executed, vec!["par", "par.g2", "par.g1"]);
}

fn if_block() -> Block {
    let mut block = Block::composite(
        "branch",
        vec![gain("heat", 10.0), gain("cool", 100.0)],
        vec![
            Connection::new("u", "", "heat", "u"),
            Connection::new("u", "", "cool", "u"),
            Connection::new("heat", "y", "y", ""),
            Connection::new("cool", "y", "y", ""),
        ],
    );
    block.block_type = "If".into();
    block.inputs.push(Connector::input("cond", CdlType::Boolean));
    block.inputs.push(Connector::input("u", CdlType::Real));
    block.outputs.push(Connector::output("y", CdlType::Real));
    if let BlockKind::Composite(spec) = &mut block.kind {
        spec.control = ControlFlow::If {
            condition_input: "cond".into(),
            then_blocks: vec!["heat".into()],
            else_blocks: vec!["cool".into()],
        };
    }
    block
}

#[test]
fn if_selects_then_branch() {
    let mut inputs = real_inputs(&[("u", 2.0)]);
    inputs.insert("cond".into(), Value::Bool(true));
    let result = run(&if_block(), inputs);
    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.outputs.get("y"), Some(&Value::Real(20.0)));
    assert_eq!(result.blocks_executed, vec!["branch", "branch.heat"]);
}

#[test]
fn if_selects_else_branch() {
    let mut inputs = real_inputs(&[("u", 2.0)]);
    inputs.insert("cond".into(), Value::Bool(false));
    let result = run(&if_block(), inputs);
    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.outputs.get("y"), Some(&Value::Real(200.0)));
    assert_eq!(result.blocks_executed, vec!["branch", "branch.cool"]);
}

#[test]
fn unset_condition_is_an_error() {
    let result = run(&if_block(), real_inputs(&[("u", 2.0)]));
    assert!(!result.success);
    assert!(result
        .error
        .as_deref()
        .unwrap()
        .contains("condition input 'cond' has no value"));
}

fn while_block(max_iterations: u32) -> Block {
    let mut block = Block::composite(
        "loop",
        vec![gain("body", 1.0)],
        vec![Connection::new("u", "", "body", "u")],
    );
    block.block_type = "While".into();
    block.inputs.push(Connector::input("go", CdlType::Boolean));
    block.inputs.push(Connector::input("u", CdlType::Real));
    if let BlockKind::Composite(spec) = &mut block.kind {
        spec.control = ControlFlow::While {
            condition_input: "go".into(),
            loop_blocks: vec!["body".into()],
            max_iterations,
        };
    }
    block
}

#[test]
fn while_skips_body_when_condition_is_false() {
    let mut inputs = real_inputs(&[("u", 1.0)]);
    inputs.insert("go".into(), Value::Bool(false));
    let result = run(&while_block(10), inputs);
    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.blocks_executed, vec!["loop"]);
}

#[test]
fn while_enforces_iteration_cap() {
    // The condition never changes, so the loop runs to the cap and fails.
    let mut inputs = real_inputs(&[("u", 1.0)]);
    inputs.insert("go".into(), Value::Bool(true));
    let result = run(&while_block(10), inputs);
    assert!(!result.success);
    assert!(result
        .error
        .as_deref()
        .unwrap()
        .contains("exceeded maximum iterations (10)"));
    let body_runs = result
        .blocks_executed
        .iter()
        .filter(|p| p.as_str() == "loop.body")
        .count();
    assert_eq!(body_runs, 10);
}

#[test]
fn while_default_cap_is_one_thousand_iterations() {
    let mut inputs = real_inputs(&[("u", 1.0)]);
    inputs.insert("go".into(), Value::Bool(true));
    let result = run(
        &while_block(crate::types::DEFAULT_MAX_ITERATIONS),
        inputs,
    );
    assert!(!result.success);
    assert!(result
        .error
        .as_deref()
        .unwrap()
        .contains("exceeded maximum iterations (1000)"));
    let body_runs = result
        .blocks_executed
        .iter()
        .filter(|p| p.as_str() == "loop.body")
        .count();
    assert_eq!(body_runs, 1000);
}

#[test]
fn parameter_overrides_take_effect() {
    let block = gain("gain", 2.0);
    let mut executor = BlockExecutor::with_context(ExecutionContext::for_block(&block));
    executor
        .context
        .set_parameter("k", Value::Real(5.0))
        .unwrap();

    let result = executor.execute(&block, &real_inputs(&[("u", 5.0)]), None);
    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.outputs.get("y"), Some(&Value::Real(25.0)));
}

#[test]
fn constants_and_functions_in_equations() {
    let mut block = Block::elementary("lim", "LimitedGain");
    block.parameters.push(Parameter::real("k", 2.0));
    block.constants.push(Constant {
        name: "yMax".into(),
        ty: CdlType::Real,
        value: Value::Real(10.0),
        quantity: None,
        unit: None,
        description: None,
    });
    block.inputs.push(Connector::input("e", CdlType::Real));
    block.outputs.push(Connector::output("y", CdlType::Real));
    block.equations.push(Equation::new("y", "min(yMax, k * e)"));

    let result = run(&block, real_inputs(&[("e", 30.0)]));
    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.outputs.get("y"), Some(&Value::Real(10.0)));
}

#[test]
fn intermediate_equation_values_stay_local() {
    let mut block = Block::elementary("pctl", "P");
    block.parameters.push(Parameter::real("k", 2.0));
    block.inputs.push(Connector::input("set", CdlType::Real));
    block.inputs.push(Connector::input("meas", CdlType::Real));
    block.outputs.push(Connector::output("y", CdlType::Real));
    block.equations.push(Equation::new("e", "set - meas"));
    block.equations.push(Equation::new("y", "k * e"));

    let mut executor = BlockExecutor::new();
    let result = executor.execute(&block, &real_inputs(&[("set", 22.0), ("meas", 20.5)]), None);
    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.outputs.get("y"), Some(&Value::Real(3.0)));
    // "e" is a local, never published to the context.
    let local = ConnectorPath::parse("pctl.e").unwrap();
    assert_eq!(executor.context.value_at(&local), None);
}

#[test]
fn boolean_blocks_evaluate_logic() {
    let mut block = Block::elementary("and", "And");
    block.inputs.push(Connector::input("u1", CdlType::Boolean));
    block.inputs.push(Connector::input("u2", CdlType::Boolean));
    block.outputs.push(Connector::output("y", CdlType::Boolean));
    block.equations.push(Equation::new("y", "u1 and u2"));

    let mut inputs = HashMap::new();
    inputs.insert("u1".to_string(), Value::Bool(true));
    inputs.insert("u2".to_string(), Value::Bool(false));
    let result = run(&block, inputs);
    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.outputs.get("y"), Some(&Value::Bool(false)));
}

#[test]
fn typed_inputs_are_checked_at_the_boundary() {
    let block = gain("gain", 2.0);
    let mut inputs = HashMap::new();
    inputs.insert("u".to_string(), Value::Text("five".into()));
    let result = run(&block, inputs);
    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("type mismatch"));

    let mut inputs = HashMap::new();
    inputs.insert("nope".to_string(), Value::Real(1.0));
    let result = run(&block, inputs);
    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("unknown input"));
}

#[test]
fn extension_blocks_do_not_execute() {
    let mut block = Block::elementary("ext", "Vendor");
    block.kind = BlockKind::Extension {
        extension_data: serde_json::json!({"vendor": "acme"}),
        implementation_language: Some("python".into()),
        implementation_code: None,
    };
    let result = run(&block, HashMap::new());
    assert!(!result.success);
    assert!(result
        .error
        .as_deref()
        .unwrap()
        .contains("no executable form"));
}

#[test]
fn events_accumulate_history() {
    let block = gain("gain", 2.0);
    let mut executor = BlockExecutor::new();
    for (t, u) in [(0.0, 1.0), (1.0, 4.0)] {
        let event = ExecutionEvent::new(EventKind::InputChange, t);
        let result = executor.execute(&block, &real_inputs(&[("u", u)]), Some(event));
        assert!(result.success, "error: {:?}", result.error);
    }

    let y = ConnectorPath::parse("gain.y").unwrap();
    assert_eq!(
        executor.context.history_of(&y),
        &[(0.0, Value::Real(2.0)), (1.0, Value::Real(8.0))]
    );
    assert_eq!(executor.context.event_history().len(), 2);
    assert_eq!(executor.context.time(), 1.0);
}

#[test]
fn caller_managed_events_stay_open() {
    let block = gain("gain", 2.0);
    let mut executor = BlockExecutor::with_context(ExecutionContext::for_block(&block));
    executor
        .context
        .begin_event(ExecutionEvent::input_change(0.0))
        .unwrap();
    executor.context.set_input("u", Value::Real(3.0)).unwrap();

    let result = executor.execute(&block, &HashMap::new(), None);
    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.outputs.get("y"), Some(&Value::Real(6.0)));

    // The executor did not close the event it did not open.
    assert!(executor.context.in_event());
    executor.context.end_event().unwrap();
}

#[test]
fn parsed_documents_execute_end_to_end() {
    let block = parse_str(
        r#"{
            "name": "zone",
            "type": "composite",
            "inputs": [{"name": "u", "type": "Real"}],
            "outputs": [{"name": "y", "type": "Real"}],
            "blocks": [{
                "name": "gain",
                "type": "Gain",
                "parameters": [{"name": "k", "type": "Real", "value": 4.0}],
                "inputs": [{"name": "u", "type": "Real"}],
                "outputs": [{"name": "y", "type": "Real"}],
                "equations": [{"lhs": "y", "rhs": "k * u"}]
            }],
            "connections": [
                {"from": "u", "to": "gain.u"},
                {"from": "gain.y", "to": "y"}
            ]
        }"#,
    )
    .unwrap();
    assert!(validate_block(&block).is_valid());
    assert!(validate_graph(&block).0);

    let result = run(&block, real_inputs(&[("u", 2.5)]));
    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.outputs.get("y"), Some(&Value::Real(10.0)));
}
