//! Guard and action evaluation.
//!
//! Generated code supplies the behavior behind every guard and action
//! identifier of a machine definition. The interpreter only ever sees the
//! [`Evaluator`] trait: guards answer yes or no given the current bindings
//! and an optional trigger value, actions return a list of [`Effect`]s that
//! the interpreter applies and reports.

use std::collections::HashMap;
use thiserror::Error;

/// Failure raised by a guard or action callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Read-only view of the automaton's values handed to callbacks.
#[derive(Debug, Clone, Copy)]
pub struct Bindings<'a> {
    variables: &'a HashMap<String, String>,
    inputs: &'a HashMap<String, String>,
    outputs: &'a HashMap<String, String>,
}

impl<'a> Bindings<'a> {
    pub fn new(
        variables: &'a HashMap<String, String>,
        inputs: &'a HashMap<String, String>,
        outputs: &'a HashMap<String, String>,
    ) -> Self {
        Self {
            variables,
            inputs,
            outputs,
        }
    }

    /// Current value of a variable.
    pub fn variable(&self, name: &str) -> Option<&'a str> {
        self.variables.get(name).map(String::as_str)
    }

    /// Last value observed on an input.
    pub fn input(&self, name: &str) -> Option<&'a str> {
        self.inputs.get(name).map(String::as_str)
    }

    /// Last value written to an output.
    pub fn output(&self, name: &str) -> Option<&'a str> {
        self.outputs.get(name).map(String::as_str)
    }

    /// Parses a variable as an integer.
    pub fn variable_i64(&self, name: &str) -> Option<i64> {
        self.variable(name).and_then(|v| v.trim().parse().ok())
    }
}

/// A side effect requested by an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Assign a declared variable.
    SetVariable { name: String, value: String },
    /// Write a declared output channel.
    WriteOutput { name: String, value: String },
    /// Emit a diagnostic line.
    Log(String),
    /// Ask the engine to shut down once the current resolution finishes.
    Terminate,
}

impl Effect {
    pub fn set_variable(name: impl Into<String>, value: impl Into<String>) -> Self {
        Effect::SetVariable {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn write_output(name: impl Into<String>, value: impl Into<String>) -> Self {
        Effect::WriteOutput {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn log(text: impl Into<String>) -> Self {
        Effect::Log(text.into())
    }
}

/// Guard and action capability implemented by generated code.
pub trait Evaluator {
    /// Evaluates the guard `id`. `trigger` carries the input value for
    /// event-triggered transitions and is `None` otherwise.
    fn evaluate_guard(
        &self,
        id: &str,
        bindings: &Bindings<'_>,
        trigger: Option<&str>,
    ) -> Result<bool, EvalError>;

    /// Runs the action `id` and returns the effects to apply.
    fn run_action(&self, id: &str, bindings: &Bindings<'_>) -> Result<Vec<Effect>, EvalError>;
}

type GuardFn = Box<dyn Fn(&Bindings<'_>, Option<&str>) -> Result<bool, EvalError>>;
type ActionFn = Box<dyn Fn(&Bindings<'_>) -> Result<Vec<Effect>, EvalError>>;

/// Evaluator backed by closures registered per identifier.
///
/// Unregistered identifiers evaluate to an error, which the interpreter
/// reports and treats as a false guard or a no-op action.
#[derive(Default)]
pub struct CallbackEvaluator {
    guards: HashMap<String, GuardFn>,
    actions: HashMap<String, ActionFn>,
}

impl CallbackEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a guard.
    pub fn with_guard<F>(mut self, id: impl Into<String>, guard: F) -> Self
    where
        F: Fn(&Bindings<'_>, Option<&str>) -> Result<bool, EvalError> + 'static,
    {
        self.guards.insert(id.into(), Box::new(guard));
        self
    }

    /// Registers an action.
    pub fn with_action<F>(mut self, id: impl Into<String>, action: F) -> Self
    where
        F: Fn(&Bindings<'_>) -> Result<Vec<Effect>, EvalError> + 'static,
    {
        self.actions.insert(id.into(), Box::new(action));
        self
    }

    pub fn has_guard(&self, id: &str) -> bool {
        self.guards.contains_key(id)
    }

    pub fn has_action(&self, id: &str) -> bool {
        self.actions.contains_key(id)
    }
}

impl std::fmt::Debug for CallbackEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut guards: Vec<_> = self.guards.keys().collect();
        guards.sort();
        let mut actions: Vec<_> = self.actions.keys().collect();
        actions.sort();
        f.debug_struct("CallbackEvaluator")
            .field("guards", &guards)
            .field("actions", &actions)
            .finish()
    }
}

impl Evaluator for CallbackEvaluator {
    fn evaluate_guard(
        &self,
        id: &str,
        bindings: &Bindings<'_>,
        trigger: Option<&str>,
    ) -> Result<bool, EvalError> {
        let guard = self
            .guards
            .get(id)
            .ok_or_else(|| EvalError::new(format!("no guard registered for '{}'", id)))?;
        guard(bindings, trigger)
    }

    fn run_action(&self, id: &str, bindings: &Bindings<'_>) -> Result<Vec<Effect>, EvalError> {
        let action = self
            .actions
            .get(id)
            .ok_or_else(|| EvalError::new(format!("no action registered for '{}'", id)))?;
        action(bindings)
    }
}
