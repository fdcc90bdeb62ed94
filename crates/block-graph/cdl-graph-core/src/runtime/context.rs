//! The runtime value store.
//!
//! Values are keyed by [`ConnectorPath`]: the root block's connectors live
//! at `root.port`, and each level of composite nesting extends the path by
//! one segment (`root.child.port`). The single-assignment rule is enforced
//! per event: a path written once cannot be written again until the event
//! ends (the executor relaxes this locally for `While` loop bodies, which
//! re-run within one event).

use hashbrown::{HashMap, HashSet};

use cdl_api_core::{ConnectorPath, Value, ValueKind};

use crate::types::{Block, CdlType};

use super::RuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventKind {
    Init,
    #[default]
    InputChange,
    ParameterChange,
    Timer,
    External,
}

/// One discrete stimulus driving an evaluation pass.
#[derive(Debug, Clone, Default)]
pub struct ExecutionEvent {
    pub kind: EventKind,
    pub time: f64,
    pub data: HashMap<String, Value>,
}

impl ExecutionEvent {
    pub fn new(kind: EventKind, time: f64) -> Self {
        ExecutionEvent {
            kind,
            time,
            data: HashMap::new(),
        }
    }

    pub fn input_change(time: f64) -> Self {
        Self::new(EventKind::InputChange, time)
    }
}

/// Restorable slice of context state.
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    values: HashMap<ConnectorPath, Value>,
    parameters: HashMap<String, Value>,
    time: f64,
}

/// Holds every connector value, parameter override, and value history for
/// one block tree across events.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    values: HashMap<ConnectorPath, Value>,
    parameters: HashMap<String, Value>,
    history: HashMap<ConnectorPath, Vec<(f64, Value)>>,
    written: HashSet<ConnectorPath>,
    current_event: Option<ExecutionEvent>,
    event_history: Vec<ExecutionEvent>,
    block: Option<Block>,
    time: f64,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context bound to a block: parameter defaults are seeded and typed
    /// input access is enabled.
    pub fn for_block(block: &Block) -> Self {
        let mut ctx = Self::new();
        for param in &block.parameters {
            ctx.parameters
                .insert(param.name.clone(), param.value.clone());
        }
        ctx.block = Some(block.clone());
        ctx
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn in_event(&self) -> bool {
        self.current_event.is_some()
    }

    pub fn current_event(&self) -> Option<&ExecutionEvent> {
        self.current_event.as_ref()
    }

    pub fn event_history(&self) -> &[ExecutionEvent] {
        &self.event_history
    }

    /// Open an event. The single-assignment set resets here.
    pub fn begin_event(&mut self, event: ExecutionEvent) -> Result<(), RuntimeError> {
        if self.current_event.is_some() {
            return Err(RuntimeError::EventInProgress);
        }
        log::trace!("begin event {:?} at t={}", event.kind, event.time);
        self.time = event.time;
        self.written.clear();
        self.current_event = Some(event);
        Ok(())
    }

    /// Close the current event and archive it.
    pub fn end_event(&mut self) -> Result<ExecutionEvent, RuntimeError> {
        let event = self.current_event.take().ok_or(RuntimeError::NoEvent)?;
        self.written.clear();
        self.event_history.push(event.clone());
        Ok(event)
    }

    /// Assign a value at `path`. Requires an open event and enforces the
    /// single-assignment rule.
    pub fn set_value(&mut self, path: ConnectorPath, value: Value) -> Result<(), RuntimeError> {
        if self.current_event.is_none() {
            return Err(RuntimeError::OutsideEvent {
                action: "set a value",
            });
        }
        if !self.written.insert(path.clone()) {
            return Err(RuntimeError::SingleAssignment(path));
        }
        self.history
            .entry(path.clone())
            .or_default()
            .push((self.time, value.clone()));
        self.values.insert(path, value);
        Ok(())
    }

    /// Read a value during an event.
    pub fn get_value(&self, path: &ConnectorPath) -> Result<Option<&Value>, RuntimeError> {
        if self.current_event.is_none() {
            return Err(RuntimeError::OutsideEvent {
                action: "read a value",
            });
        }
        Ok(self.values.get(path))
    }

    /// Inspect a value without an event (post-hoc examination).
    pub fn value_at(&self, path: &ConnectorPath) -> Option<&Value> {
        self.values.get(path)
    }

    pub fn has_value(&self, path: &ConnectorPath) -> bool {
        self.values.contains_key(path)
    }

    /// Assignment history of one connector, oldest first.
    pub fn history_of(&self, path: &ConnectorPath) -> &[(f64, Value)] {
        self.history.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Typed write to an input connector of the bound block.
    pub fn set_input(&mut self, name: &str, value: Value) -> Result<(), RuntimeError> {
        let block = self.block.as_ref().ok_or(RuntimeError::UnknownInput(
            name.to_string(),
        ))?;
        let connector = block
            .input(name)
            .ok_or_else(|| RuntimeError::UnknownInput(name.to_string()))?;
        check_type(connector.ty, &value, &format!("input '{name}'"))?;
        let path = ConnectorPath::root(&block.name).child(name);
        self.set_value(path, value)
    }

    /// Read an input connector of the bound block.
    pub fn get_input(&self, name: &str) -> Option<&Value> {
        let block = self.block.as_ref()?;
        block.input(name)?;
        self.values
            .get(&ConnectorPath::root(&block.name).child(name))
    }

    /// Read an output connector of the bound block.
    pub fn get_output(&self, name: &str) -> Option<&Value> {
        let block = self.block.as_ref()?;
        block.output(name)?;
        self.values
            .get(&ConnectorPath::root(&block.name).child(name))
    }

    /// Override a parameter. With a bound block the parameter must exist
    /// and the value must match its declared type.
    pub fn set_parameter(&mut self, name: &str, value: Value) -> Result<(), RuntimeError> {
        if let Some(block) = &self.block {
            let param = block
                .parameter(name)
                .ok_or_else(|| RuntimeError::UnknownParameter(name.to_string()))?;
            check_type(param.ty, &value, &format!("parameter '{name}'"))?;
        }
        self.parameters.insert(name.to_string(), value);
        Ok(())
    }

    pub fn get_parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }

    /// Drop all values, history, and events; parameters return to the
    /// bound block's defaults.
    pub fn reset(&mut self) {
        self.values.clear();
        self.history.clear();
        self.written.clear();
        self.current_event = None;
        self.event_history.clear();
        self.time = 0.0;
        self.parameters.clear();
        if let Some(block) = &self.block {
            for param in &block.parameters {
                self.parameters
                    .insert(param.name.clone(), param.value.clone());
            }
        }
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            values: self.values.clone(),
            parameters: self.parameters.clone(),
            time: self.time,
        }
    }

    pub fn restore(&mut self, snapshot: ContextSnapshot) {
        self.values = snapshot.values;
        self.parameters = snapshot.parameters;
        self.time = snapshot.time;
        self.written.clear();
    }

    /// Allow re-assignment of every path under `prefix` within the current
    /// event. Used between iterations of a `While` body.
    pub(crate) fn release_assignments_under(&mut self, prefix: &ConnectorPath) {
        self.written.retain(|path| !starts_with(path, prefix));
    }
}

fn starts_with(path: &ConnectorPath, prefix: &ConnectorPath) -> bool {
    if prefix.len() > path.len() {
        return false;
    }
    path.segments().zip(prefix.segments()).all(|(a, b)| a == b)
}

/// Accept a value for a declared CDL type. Integers satisfy Real, text
/// satisfies Enumeration.
pub(crate) fn check_type(
    ty: CdlType,
    value: &Value,
    target: &str,
) -> Result<(), RuntimeError> {
    let ok = match ty {
        CdlType::Real => matches!(value.kind(), ValueKind::Real | ValueKind::Integer),
        CdlType::Integer => value.kind() == ValueKind::Integer,
        CdlType::Boolean => value.kind() == ValueKind::Bool,
        CdlType::String | CdlType::Enumeration => value.kind() == ValueKind::Text,
    };
    if ok {
        Ok(())
    } else {
        Err(RuntimeError::Type {
            target: target.to_string(),
            expected: format!("{ty:?}"),
            got: format!("{:?}", value.kind()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Connector;

    fn ctx() -> ExecutionContext {
        let mut block = Block::elementary("gain", "Gain");
        block.inputs.push(Connector::input("u", CdlType::Real));
        block.outputs.push(Connector::output("y", CdlType::Real));
        block
            .parameters
            .push(crate::types::Parameter::real("k", 2.0));
        ExecutionContext::for_block(&block)
    }

    #[test]
    fn values_require_an_open_event() {
        let mut ctx = ctx();
        let err = ctx.set_input("u", Value::Real(1.0)).unwrap_err();
        assert!(matches!(err, RuntimeError::OutsideEvent { .. }));

        ctx.begin_event(ExecutionEvent::input_change(0.0)).unwrap();
        ctx.set_input("u", Value::Real(1.0)).unwrap();
        assert_eq!(ctx.get_input("u"), Some(&Value::Real(1.0)));
    }

    #[test]
    fn single_assignment_per_event() {
        let mut ctx = ctx();
        ctx.begin_event(ExecutionEvent::input_change(0.0)).unwrap();
        ctx.set_input("u", Value::Real(1.0)).unwrap();
        let err = ctx.set_input("u", Value::Real(2.0)).unwrap_err();
        assert!(matches!(err, RuntimeError::SingleAssignment(_)));

        // The next event may assign the same path again.
        ctx.end_event().unwrap();
        ctx.begin_event(ExecutionEvent::input_change(1.0)).unwrap();
        ctx.set_input("u", Value::Real(2.0)).unwrap();
    }

    #[test]
    fn overlapping_events_are_rejected() {
        let mut ctx = ctx();
        ctx.begin_event(ExecutionEvent::input_change(0.0)).unwrap();
        let err = ctx
            .begin_event(ExecutionEvent::input_change(1.0))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::EventInProgress));
        assert!(ctx.end_event().is_ok());
        assert!(matches!(ctx.end_event(), Err(RuntimeError::NoEvent)));
    }

    #[test]
    fn typed_input_rejects_mismatches() {
        let mut ctx = ctx();
        ctx.begin_event(ExecutionEvent::input_change(0.0)).unwrap();
        let err = ctx.set_input("u", Value::Bool(true)).unwrap_err();
        assert!(matches!(err, RuntimeError::Type { .. }));
        // Integers are accepted where a Real is declared.
        ctx.set_input("u", Value::Integer(3)).unwrap();
    }

    #[test]
    fn parameters_seed_and_override() {
        let mut ctx = ctx();
        assert_eq!(ctx.get_parameter("k"), Some(&Value::Real(2.0)));
        ctx.set_parameter("k", Value::Real(5.0)).unwrap();
        assert_eq!(ctx.get_parameter("k"), Some(&Value::Real(5.0)));
        assert!(matches!(
            ctx.set_parameter("nope", Value::Real(1.0)),
            Err(RuntimeError::UnknownParameter(_))
        ));

        ctx.reset();
        assert_eq!(ctx.get_parameter("k"), Some(&Value::Real(2.0)));
    }

    #[test]
    fn history_records_each_event() {
        let mut ctx = ctx();
        for (t, v) in [(0.0, 1.0), (1.0, 2.0)] {
            ctx.begin_event(ExecutionEvent::input_change(t)).unwrap();
            ctx.set_input("u", Value::Real(v)).unwrap();
            ctx.end_event().unwrap();
        }
        let path = ConnectorPath::parse("gain.u").unwrap();
        let history = ctx.history_of(&path);
        assert_eq!(
            history,
            &[(0.0, Value::Real(1.0)), (1.0, Value::Real(2.0))]
        );
        assert_eq!(ctx.event_history().len(), 2);
    }

    #[test]
    fn snapshot_and_restore() {
        let mut ctx = ctx();
        ctx.begin_event(ExecutionEvent::input_change(0.0)).unwrap();
        ctx.set_input("u", Value::Real(1.0)).unwrap();
        ctx.end_event().unwrap();

        let snap = ctx.snapshot();
        ctx.begin_event(ExecutionEvent::input_change(1.0)).unwrap();
        ctx.set_input("u", Value::Real(9.0)).unwrap();
        ctx.end_event().unwrap();

        ctx.restore(snap);
        assert_eq!(ctx.get_input("u"), Some(&Value::Real(1.0)));
        assert_eq!(ctx.time(), 0.0);
    }
}
