//! Machine definition types.
//!
//! Machine definitions use a JSON (or YAML) DSL:
//!
//! ```json
//! {
//!   "name": "blink",
//!   "initial": "Idle",
//!   "states": [
//!     {"name": "Idle"},
//!     {"name": "Blinking", "action": "toggle_led"}
//!   ],
//!   "transitions": [
//!     {"from": "Idle", "to": "Blinking", "event": "start"},
//!     {"from": "Blinking", "to": "Blinking", "delay_ms": 500},
//!     {"from": "Blinking", "to": "Idle", "event": "stop", "guard": "is_stop"}
//!   ],
//!   "variables": [{"name": "period", "type": "int", "initial": 500}],
//!   "inputs": ["start", "stop"],
//!   "outputs": ["led"]
//! }
//! ```
//!
//! Guards and actions are identifiers resolved by an
//! [`Evaluator`](crate::evaluator::Evaluator); the definition never contains
//! expression source.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A state in the machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDef {
    /// Unique state name.
    pub name: String,

    /// Action run every time the state is entered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl StateDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: None,
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }
}

/// A transition as written in the definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionDef {
    /// Source state.
    pub from: String,

    /// Target state.
    pub to: String,

    /// Input event that triggers this transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,

    /// Guard identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,

    /// Fixed delay in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,

    /// Variable holding the delay in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_var: Option<String>,
}

impl TransitionDef {
    /// An immediate transition.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            event: None,
            guard: None,
            delay_ms: None,
            delay_var: None,
        }
    }

    pub fn on_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    pub fn with_guard(mut self, guard: impl Into<String>) -> Self {
        self.guard = Some(guard.into());
        self
    }

    pub fn after_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    pub fn after_var(mut self, variable: impl Into<String>) -> Self {
        self.delay_var = Some(variable.into());
        self
    }
}

/// A typed variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDef {
    pub name: String,

    /// Type hint carried for generated code (`int`, `bool`, `string`, ...).
    #[serde(rename = "type", default = "default_type_hint")]
    pub type_hint: String,

    /// Initial value. Scalars of any JSON type are accepted and stored as text.
    #[serde(default, deserialize_with = "deserialize_scalar")]
    pub initial: String,
}

impl VariableDef {
    pub fn new(
        name: impl Into<String>,
        type_hint: impl Into<String>,
        initial: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            type_hint: type_hint.into(),
            initial: initial.into(),
        }
    }
}

fn default_type_hint() -> String {
    "string".to_string()
}

fn deserialize_scalar<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct ScalarVisitor;

    impl<'de> Visitor<'de> for ScalarVisitor {
        type Value = String;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string, number or boolean")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(v.to_string())
        }

        fn visit_bool<E>(self, v: bool) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(v.to_string())
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(v.to_string())
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(v.to_string())
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(v.to_string())
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(String::new())
        }
    }

    deserializer.deserialize_any(ScalarVisitor)
}

/// Raw machine definition as produced by the designer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineDefinitionRaw {
    /// Automaton name, announced in `READY`.
    #[serde(default)]
    pub name: String,

    /// Initial state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<String>,

    /// States in declaration order.
    pub states: Vec<StateDef>,

    /// Transitions in declaration order.
    #[serde(default)]
    pub transitions: Vec<TransitionDef>,

    #[serde(default)]
    pub variables: Vec<VariableDef>,

    #[serde(default)]
    pub inputs: Vec<String>,

    #[serde(default)]
    pub outputs: Vec<String>,
}

/// How a delayed transition obtains its delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delay {
    /// Literal milliseconds.
    Fixed(u64),
    /// Milliseconds read from a variable when the source state is entered.
    Variable(String),
}

/// What makes a transition eligible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Fires with no external stimulus, subject only to its guard.
    Immediate,
    /// Fires on a matching input event.
    Event(String),
    /// Fires when a timer scheduled on state entry expires.
    Delayed(Delay),
}

/// A validated transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: String,
    pub to: String,
    pub trigger: Trigger,
    pub guard: Option<String>,
}

/// Validated and indexed machine definition.
#[derive(Debug, Clone)]
pub struct MachineDefinition {
    /// Machine name.
    pub name: String,

    /// Initial state, if one was designated.
    pub initial: Option<String>,

    states: Vec<StateDef>,

    state_index: HashMap<String, usize>,

    transitions: Vec<Transition>,

    /// Outgoing transition indices per state, in declaration order.
    outgoing: Vec<Vec<usize>>,

    variables: Vec<VariableDef>,

    inputs: Vec<String>,

    outputs: Vec<String>,

    /// Hash of the definition for integrity checks.
    pub checksum: String,
}

impl MachineDefinition {
    /// Parses and validates a machine definition from JSON.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, CoreError> {
        let raw: MachineDefinitionRaw = serde_json::from_value(json.clone())?;
        Self::from_raw(raw)
    }

    /// Parses and validates a machine definition from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, CoreError> {
        let raw: MachineDefinitionRaw = serde_json::from_str(text)?;
        Self::from_raw(raw)
    }

    /// Creates a machine definition from raw parts.
    pub fn from_raw(raw: MachineDefinitionRaw) -> Result<Self, CoreError> {
        // Build state index
        let mut state_index = HashMap::new();
        for (idx, state) in raw.states.iter().enumerate() {
            if state.name.is_empty() {
                return Err(invalid("state with empty name"));
            }
            if state_index.insert(state.name.clone(), idx).is_some() {
                return Err(invalid(format!("duplicate state '{}'", state.name)));
            }
        }

        // Validate initial state
        if let Some(initial) = &raw.initial {
            if !state_index.contains_key(initial) {
                return Err(invalid(format!(
                    "initial state '{}' not in states list",
                    initial
                )));
            }
        }

        let variables: HashSet<&str> = unique_names(
            raw.variables.iter().map(|v| v.name.as_str()),
            "variable",
        )?;
        unique_names(raw.inputs.iter().map(String::as_str), "input")?;
        unique_names(raw.outputs.iter().map(String::as_str), "output")?;

        // Build and validate transitions
        let mut transitions = Vec::with_capacity(raw.transitions.len());
        let mut outgoing = vec![Vec::new(); raw.states.len()];
        for t in &raw.transitions {
            let from = *state_index.get(&t.from).ok_or_else(|| {
                invalid(format!("transition source '{}' not in states list", t.from))
            })?;
            if !state_index.contains_key(&t.to) {
                return Err(invalid(format!(
                    "transition target '{}' not in states list",
                    t.to
                )));
            }

            let delay = match (t.delay_ms, &t.delay_var) {
                (Some(_), Some(_)) => {
                    return Err(invalid(format!(
                        "transition '{}' -> '{}' has both delay_ms and delay_var",
                        t.from, t.to
                    )))
                }
                (Some(0), None) => {
                    return Err(invalid(format!(
                        "transition '{}' -> '{}' has a zero delay",
                        t.from, t.to
                    )))
                }
                (Some(ms), None) => Some(Delay::Fixed(ms)),
                (None, Some(var)) => {
                    if !variables.contains(var.as_str()) {
                        return Err(invalid(format!(
                            "delay variable '{}' is not declared",
                            var
                        )));
                    }
                    Some(Delay::Variable(var.clone()))
                }
                (None, None) => None,
            };

            let trigger = match (&t.event, delay) {
                (Some(_), Some(_)) => {
                    return Err(invalid(format!(
                        "transition '{}' -> '{}' is both event-triggered and delayed",
                        t.from, t.to
                    )))
                }
                (Some(event), None) => Trigger::Event(event.clone()),
                (None, Some(delay)) => Trigger::Delayed(delay),
                (None, None) => Trigger::Immediate,
            };

            outgoing[from].push(transitions.len());
            transitions.push(Transition {
                from: t.from.clone(),
                to: t.to.clone(),
                trigger,
                guard: t.guard.clone(),
            });
        }

        // Compute checksum
        let json_bytes = serde_json::to_vec(&raw)?;
        let checksum = format!("{:08x}", crc32c::crc32c(&json_bytes));

        Ok(Self {
            name: raw.name,
            initial: raw.initial,
            states: raw.states,
            state_index,
            transitions,
            outgoing,
            variables: raw.variables,
            inputs: raw.inputs,
            outputs: raw.outputs,
            checksum,
        })
    }

    /// Returns true if the given state is valid for this machine.
    pub fn has_state(&self, state: &str) -> bool {
        self.state_index.contains_key(state)
    }

    /// Looks up a state by name.
    pub fn state(&self, name: &str) -> Option<&StateDef> {
        self.state_index.get(name).map(|&idx| &self.states[idx])
    }

    pub fn states(&self) -> &[StateDef] {
        &self.states
    }

    /// Returns a transition by its declaration index.
    pub fn transition(&self, idx: usize) -> &Transition {
        &self.transitions[idx]
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Returns the indices of all transitions leaving `state`, in declaration order.
    pub fn outgoing(&self, state: &str) -> &[usize] {
        self.state_index
            .get(state)
            .map(|&idx| self.outgoing[idx].as_slice())
            .unwrap_or(&[])
    }

    /// Immediate transitions leaving `state`, in declaration order.
    pub fn immediate_from(&self, state: &str) -> Vec<usize> {
        self.outgoing(state)
            .iter()
            .copied()
            .filter(|&idx| self.transitions[idx].trigger == Trigger::Immediate)
            .collect()
    }

    /// Transitions leaving `state` on `event`, in declaration order.
    pub fn event_from(&self, state: &str, event: &str) -> Vec<usize> {
        self.outgoing(state)
            .iter()
            .copied()
            .filter(|&idx| matches!(&self.transitions[idx].trigger, Trigger::Event(e) if e == event))
            .collect()
    }

    /// Delayed transitions leaving `state`, in declaration order.
    pub fn delayed_from(&self, state: &str) -> Vec<usize> {
        self.outgoing(state)
            .iter()
            .copied()
            .filter(|&idx| matches!(self.transitions[idx].trigger, Trigger::Delayed(_)))
            .collect()
    }

    pub fn variables(&self) -> &[VariableDef] {
        &self.variables
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.iter().any(|v| v.name == name)
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn has_input(&self, name: &str) -> bool {
        self.inputs.iter().any(|i| i == name)
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn has_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|o| o == name)
    }
}

fn invalid(reason: impl Into<String>) -> CoreError {
    CoreError::InvalidDefinition {
        reason: reason.into(),
    }
}

fn unique_names<'a>(
    names: impl Iterator<Item = &'a str>,
    namespace: &str,
) -> Result<HashSet<&'a str>, CoreError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(invalid(format!("duplicate {} '{}'", namespace, name)));
        }
    }
    Ok(seen)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_definition() -> serde_json::Value {
        serde_json::json!({
            "name": "blink",
            "initial": "Idle",
            "states": [
                {"name": "Idle"},
                {"name": "Blinking", "action": "toggle_led"}
            ],
            "transitions": [
                {"from": "Idle", "to": "Blinking", "event": "start"},
                {"from": "Blinking", "to": "Blinking", "delay_ms": 500},
                {"from": "Blinking", "to": "Idle", "event": "stop"},
                {"from": "Blinking", "to": "Idle", "delay_var": "timeout"},
                {"from": "Idle", "to": "Idle", "guard": "never"}
            ],
            "variables": [
                {"name": "timeout", "type": "int", "initial": 5000},
                {"name": "label"}
            ],
            "inputs": ["start", "stop"],
            "outputs": ["led"]
        })
    }

    #[test]
    fn test_parse_definition() {
        let def = MachineDefinition::from_json(&sample_definition()).unwrap();

        assert_eq!(def.name, "blink");
        assert_eq!(def.initial.as_deref(), Some("Idle"));
        assert_eq!(def.states().len(), 2);
        assert_eq!(def.transitions().len(), 5);
        assert_eq!(
            def.state("Blinking").unwrap().action.as_deref(),
            Some("toggle_led")
        );
        assert_eq!(def.checksum.len(), 8);
    }

    #[test]
    fn test_scalar_initial_values() {
        let def = MachineDefinition::from_json(&sample_definition()).unwrap();
        let timeout = &def.variables()[0];
        assert_eq!(timeout.type_hint, "int");
        assert_eq!(timeout.initial, "5000");

        let label = &def.variables()[1];
        assert_eq!(label.type_hint, "string");
        assert_eq!(label.initial, "");
    }

    #[test]
    fn test_trigger_partition() {
        let def = MachineDefinition::from_json(&sample_definition()).unwrap();

        assert_eq!(def.event_from("Idle", "start"), vec![0]);
        assert!(def.event_from("Idle", "stop").is_empty());
        assert_eq!(def.delayed_from("Blinking"), vec![1, 3]);
        assert_eq!(def.immediate_from("Idle"), vec![4]);
        assert!(def.immediate_from("Blinking").is_empty());

        assert_eq!(def.transition(1).trigger, Trigger::Delayed(Delay::Fixed(500)));
        assert_eq!(
            def.transition(3).trigger,
            Trigger::Delayed(Delay::Variable("timeout".to_string()))
        );
    }

    #[test]
    fn test_outgoing_preserves_declaration_order() {
        let def = MachineDefinition::from_json(&sample_definition()).unwrap();
        assert_eq!(def.outgoing("Blinking"), &[1, 2, 3]);
        assert_eq!(def.outgoing("Missing"), &[] as &[usize]);
    }

    #[test]
    fn test_initial_state_is_optional() {
        let json = serde_json::json!({
            "states": [{"name": "a"}]
        });
        let def = MachineDefinition::from_json(&json).unwrap();
        assert!(def.initial.is_none());
    }

    #[test]
    fn test_invalid_initial_state() {
        let json = serde_json::json!({
            "states": [{"name": "a"}, {"name": "b"}],
            "initial": "c"
        });

        let result = MachineDefinition::from_json(&json);
        assert!(matches!(result, Err(CoreError::InvalidDefinition { .. })));
    }

    #[test]
    fn test_invalid_transition_endpoints() {
        let json = serde_json::json!({
            "states": [{"name": "a"}, {"name": "b"}],
            "initial": "a",
            "transitions": [{"from": "a", "to": "c"}]
        });
        assert!(matches!(
            MachineDefinition::from_json(&json),
            Err(CoreError::InvalidDefinition { .. })
        ));

        let json = serde_json::json!({
            "states": [{"name": "a"}],
            "transitions": [{"from": "z", "to": "a"}]
        });
        assert!(matches!(
            MachineDefinition::from_json(&json),
            Err(CoreError::InvalidDefinition { .. })
        ));
    }

    #[test]
    fn test_duplicate_names() {
        let json = serde_json::json!({
            "states": [{"name": "a"}, {"name": "a"}]
        });
        assert!(MachineDefinition::from_json(&json).is_err());

        let json = serde_json::json!({
            "states": [{"name": "a"}],
            "variables": [{"name": "x"}, {"name": "x"}]
        });
        assert!(MachineDefinition::from_json(&json).is_err());

        let json = serde_json::json!({
            "states": [{"name": "a"}],
            "outputs": ["led", "led"]
        });
        assert!(MachineDefinition::from_json(&json).is_err());
    }

    #[test]
    fn test_same_name_in_different_namespaces() {
        let json = serde_json::json!({
            "states": [{"name": "led"}],
            "variables": [{"name": "led"}],
            "inputs": ["led"],
            "outputs": ["led"]
        });
        assert!(MachineDefinition::from_json(&json).is_ok());
    }

    #[test]
    fn test_invalid_delays() {
        let both = serde_json::json!({
            "states": [{"name": "a"}],
            "variables": [{"name": "d"}],
            "transitions": [{"from": "a", "to": "a", "delay_ms": 10, "delay_var": "d"}]
        });
        assert!(MachineDefinition::from_json(&both).is_err());

        let zero = serde_json::json!({
            "states": [{"name": "a"}],
            "transitions": [{"from": "a", "to": "a", "delay_ms": 0}]
        });
        assert!(MachineDefinition::from_json(&zero).is_err());

        let undeclared = serde_json::json!({
            "states": [{"name": "a"}],
            "transitions": [{"from": "a", "to": "a", "delay_var": "missing"}]
        });
        assert!(MachineDefinition::from_json(&undeclared).is_err());

        let event_and_delay = serde_json::json!({
            "states": [{"name": "a"}],
            "transitions": [{"from": "a", "to": "a", "event": "go", "delay_ms": 10}]
        });
        assert!(MachineDefinition::from_json(&event_and_delay).is_err());
    }

    #[test]
    fn test_checksum_is_stable() {
        let a = MachineDefinition::from_json(&sample_definition()).unwrap();
        let b = MachineDefinition::from_json(&sample_definition()).unwrap();
        assert_eq!(a.checksum, b.checksum);
    }

    #[test]
    fn test_builder_helpers() {
        let raw = MachineDefinitionRaw {
            name: "m".to_string(),
            initial: Some("a".to_string()),
            states: vec![StateDef::new("a").with_action("enter_a"), StateDef::new("b")],
            transitions: vec![
                TransitionDef::new("a", "b").on_event("go").with_guard("ok"),
                TransitionDef::new("b", "a").after_ms(20),
            ],
            variables: vec![VariableDef::new("n", "int", "0")],
            inputs: vec!["go".to_string()],
            outputs: vec![],
        };
        let def = MachineDefinition::from_raw(raw).unwrap();
        assert_eq!(def.event_from("a", "go"), vec![0]);
        assert_eq!(def.transition(0).guard.as_deref(), Some("ok"));
        assert_eq!(def.delayed_from("b"), vec![1]);
        assert!(def.has_variable("n"));
        assert!(def.has_input("go"));
        assert!(!def.has_output("go"));
    }
}
