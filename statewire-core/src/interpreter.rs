//! The automaton interpreter.
//!
//! An [`Interpreter`] owns the runtime state of one automaton and decides,
//! for every stimulus, which transition fires:
//!
//! - on [`start`](Interpreter::start) the initial state is entered;
//! - on an input event the event-triggered transitions of the current state
//!   are tried in declaration order;
//! - on a timer expiry the delayed transition it belongs to is re-checked.
//!
//! After every state entry the immediate transitions of the new state are
//! chained until none fires. Entering the same state twice within one
//! resolution is reported as [`CoreError::CycleDetected`].
//!
//! All side effects go through the [`Host`] passed to each call.

use crate::definition::{Delay, MachineDefinition, Trigger};
use crate::error::CoreError;
use crate::evaluator::{Bindings, Effect, Evaluator};
use crate::host::{Host, TimerId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// A timer scheduled from the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScheduledDelay {
    id: TimerId,
    /// Index of the delayed transition in the definition.
    transition: usize,
}

/// Mutable state of a started automaton.
#[derive(Debug, Clone)]
struct RuntimeState {
    current: String,
    variables: HashMap<String, String>,
    inputs: HashMap<String, String>,
    outputs: HashMap<String, String>,
    running: bool,
    terminate_requested: bool,
    timers: Vec<ScheduledDelay>,
}

impl RuntimeState {
    fn new(definition: &MachineDefinition, initial: &str) -> Self {
        let variables = definition
            .variables()
            .iter()
            .map(|v| (v.name.clone(), v.initial.clone()))
            .collect();

        Self {
            current: initial.to_string(),
            variables,
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            running: true,
            terminate_requested: false,
            timers: Vec::new(),
        }
    }

    fn bindings(&self) -> Bindings<'_> {
        Bindings::new(&self.variables, &self.inputs, &self.outputs)
    }
}

/// Interpreter for one machine definition.
pub struct Interpreter {
    definition: Arc<MachineDefinition>,
    evaluator: Box<dyn Evaluator>,
    runtime: Option<RuntimeState>,
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("machine", &self.definition.name)
            .field("runtime", &self.runtime)
            .finish()
    }
}

impl Interpreter {
    /// Creates an interpreter. Nothing happens until [`start`](Self::start).
    pub fn new(definition: Arc<MachineDefinition>, evaluator: impl Evaluator + 'static) -> Self {
        Self {
            definition,
            evaluator: Box::new(evaluator),
            runtime: None,
        }
    }

    pub fn definition(&self) -> &Arc<MachineDefinition> {
        &self.definition
    }

    pub fn is_started(&self) -> bool {
        self.runtime.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.runtime.as_ref().is_some_and(|rt| rt.running)
    }

    /// Returns true once an action asked for shutdown or
    /// [`terminate`](Self::terminate) ran.
    pub fn is_terminate_requested(&self) -> bool {
        self.runtime
            .as_ref()
            .is_some_and(|rt| rt.terminate_requested)
    }

    /// Current state, `None` before start.
    pub fn current_state(&self) -> Option<&str> {
        self.runtime.as_ref().map(|rt| rt.current.as_str())
    }

    pub fn variable(&self, name: &str) -> Option<&str> {
        self.runtime
            .as_ref()
            .and_then(|rt| rt.variables.get(name))
            .map(String::as_str)
    }

    /// Last value observed on an input.
    pub fn input(&self, name: &str) -> Option<&str> {
        self.runtime
            .as_ref()
            .and_then(|rt| rt.inputs.get(name))
            .map(String::as_str)
    }

    /// Last value written to an output.
    pub fn output(&self, name: &str) -> Option<&str> {
        self.runtime
            .as_ref()
            .and_then(|rt| rt.outputs.get(name))
            .map(String::as_str)
    }

    /// Timers scheduled from the current state that have not expired yet.
    pub fn pending_timers(&self) -> Vec<TimerId> {
        self.runtime
            .as_ref()
            .map(|rt| rt.timers.iter().map(|t| t.id).collect())
            .unwrap_or_default()
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Enters the initial state and chains immediate transitions.
    pub fn start(&mut self, host: &mut dyn Host) -> Result<(), CoreError> {
        if self.runtime.is_some() {
            return Err(CoreError::AlreadyStarted);
        }

        let initial =
            self.definition
                .initial
                .clone()
                .ok_or_else(|| CoreError::NotConfigured {
                    reason: format!("machine '{}' has no initial state", self.definition.name),
                })?;
        if !self.definition.has_state(&initial) {
            return Err(CoreError::StateNotFound { state: initial });
        }

        tracing::info!(
            machine = %self.definition.name,
            state = %initial,
            "Starting automaton"
        );

        self.runtime = Some(RuntimeState::new(&self.definition, &initial));

        let mut visited = HashSet::new();
        visited.insert(initial.clone());
        self.enter_state(host, &initial);
        self.settle(host, &mut visited)
    }

    /// Evaluates one stimulus.
    ///
    /// With an event `(name, value)` the event-triggered transitions of the
    /// current state are tried; without one the immediate transitions are.
    /// Nothing fires once an action has requested termination.
    /// Returns whether the automaton is still running.
    pub fn step(
        &mut self,
        host: &mut dyn Host,
        event: Option<(&str, &str)>,
    ) -> Result<bool, CoreError> {
        let rt = self.runtime.as_ref().ok_or(CoreError::NotStarted)?;
        if !rt.running {
            return Ok(false);
        }
        if rt.terminate_requested {
            return Ok(self.is_running());
        }
        let current = rt.current.clone();

        let mut visited = HashSet::new();
        if let Some((name, value)) = event {
            let candidates = self.definition.event_from(&current, name);
            let Some(idx) = self.first_eligible(host, &candidates, Some(value)) else {
                tracing::debug!(state = %current, event = %name, "No transition for event");
                return Ok(self.is_running());
            };

            let target = self.definition.transition(idx).to.clone();
            tracing::debug!(from = %current, to = %target, event = %name, "Event transition");
            visited.insert(target.clone());
            self.enter_state(host, &target);
        }

        self.settle(host, &mut visited)?;
        Ok(self.is_running())
    }

    /// Records an input value and evaluates it as an event.
    pub fn process_input_event(
        &mut self,
        host: &mut dyn Host,
        name: &str,
        value: &str,
    ) -> Result<bool, CoreError> {
        let rt = self.runtime.as_mut().ok_or(CoreError::NotStarted)?;
        if !self.definition.has_input(name) {
            tracing::debug!(input = %name, "Event is not a declared input");
        }
        rt.inputs.insert(name.to_string(), value.to_string());

        self.step(host, Some((name, value)))
    }

    /// Handles the expiry of a timer scheduled by this interpreter.
    ///
    /// The guard of the delayed transition is re-checked; expiries of timers
    /// from a state that was already left are ignored.
    pub fn fire_timer(&mut self, host: &mut dyn Host, id: TimerId) -> Result<bool, CoreError> {
        let rt = self.runtime.as_mut().ok_or(CoreError::NotStarted)?;
        if !rt.running {
            return Ok(false);
        }
        if rt.terminate_requested {
            return Ok(true);
        }

        let Some(pos) = rt.timers.iter().position(|t| t.id == id) else {
            tracing::debug!(%id, "Ignoring expiry of unknown timer");
            return Ok(true);
        };
        let scheduled = rt.timers.remove(pos);

        if self
            .first_eligible(host, &[scheduled.transition], None)
            .is_none()
        {
            tracing::debug!(%id, "Delayed transition guard is false");
            return Ok(self.is_running());
        }

        let target = self.definition.transition(scheduled.transition).to.clone();
        tracing::debug!(%id, to = %target, "Delayed transition");
        self.perform_state_transition(host, &target)?;
        Ok(self.is_running())
    }

    /// Moves to `target` and chains immediate transitions from there.
    pub fn perform_state_transition(
        &mut self,
        host: &mut dyn Host,
        target: &str,
    ) -> Result<(), CoreError> {
        if self.runtime.is_none() {
            return Err(CoreError::NotStarted);
        }
        if !self.definition.has_state(target) {
            return Err(CoreError::StateNotFound {
                state: target.to_string(),
            });
        }

        let mut visited = HashSet::new();
        visited.insert(target.to_string());
        self.enter_state(host, target);
        self.settle(host, &mut visited)
    }

    /// Reports the current state, every variable and every output.
    pub fn report_status(&self, host: &mut dyn Host) -> Result<(), CoreError> {
        let rt = self.runtime.as_ref().ok_or(CoreError::NotStarted)?;

        host.on_state(&rt.current);
        for variable in self.definition.variables() {
            let value = rt.variables.get(&variable.name).map(String::as_str);
            host.on_variable(&variable.name, value.unwrap_or_default());
        }
        for output in self.definition.outputs() {
            let value = rt.outputs.get(output).map(String::as_str);
            host.on_output(output, value.unwrap_or_default());
        }
        Ok(())
    }

    /// Stops the automaton and cancels its pending timers.
    pub fn terminate(&mut self, host: &mut dyn Host) {
        let Some(rt) = self.runtime.as_mut() else {
            return;
        };
        if rt.running {
            tracing::info!(state = %rt.current, "Terminating automaton");
        }
        rt.terminate_requested = true;
        rt.running = false;
        for scheduled in rt.timers.drain(..) {
            host.cancel_timer(scheduled.id);
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Chains immediate transitions from the current state.
    fn settle(&mut self, host: &mut dyn Host, visited: &mut HashSet<String>) -> Result<(), CoreError> {
        let definition = Arc::clone(&self.definition);

        loop {
            let current = match self.runtime.as_ref() {
                Some(rt) if rt.running && !rt.terminate_requested => rt.current.clone(),
                _ => return Ok(()),
            };

            let candidates = definition.immediate_from(&current);
            let Some(idx) = self.first_eligible(host, &candidates, None) else {
                return Ok(());
            };

            let target = &definition.transition(idx).to;
            if !visited.insert(target.clone()) {
                tracing::warn!(from = %current, to = %target, "Immediate transition cycle");
                return Err(CoreError::CycleDetected {
                    state: target.clone(),
                });
            }

            tracing::debug!(from = %current, to = %target, "Immediate transition");
            self.enter_state(host, target);
        }
    }

    /// Returns the first candidate whose guard passes.
    fn first_eligible(
        &self,
        host: &mut dyn Host,
        candidates: &[usize],
        trigger: Option<&str>,
    ) -> Option<usize> {
        let rt = self.runtime.as_ref()?;
        let bindings = rt.bindings();

        for &idx in candidates {
            let Some(guard) = self.definition.transition(idx).guard.as_deref() else {
                return Some(idx);
            };

            match self.evaluator.evaluate_guard(guard, &bindings, trigger) {
                Ok(true) => return Some(idx),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(guard = %guard, error = %e, "Guard evaluation failed");
                    host.on_error(&CoreError::GuardFailed {
                        guard: guard.to_string(),
                        reason: e.message,
                    });
                }
            }
        }

        None
    }

    /// Leaves the current state for `target`: cancels the timers of the old
    /// state, runs the entry action, reports the state, schedules delays.
    fn enter_state(&mut self, host: &mut dyn Host, target: &str) {
        let definition = Arc::clone(&self.definition);
        let Some(rt) = self.runtime.as_mut() else {
            return;
        };

        for scheduled in rt.timers.drain(..) {
            host.cancel_timer(scheduled.id);
        }
        rt.current = target.to_string();

        if let Some(action) = definition.state(target).and_then(|s| s.action.as_deref()) {
            self.run_action(host, action);
        }
        host.on_state(target);
        self.schedule_delayed(host, &definition, target);
    }

    fn run_action(&mut self, host: &mut dyn Host, action: &str) {
        let result = match self.runtime.as_ref() {
            Some(rt) => self.evaluator.run_action(action, &rt.bindings()),
            None => return,
        };

        match result {
            Ok(effects) => self.apply_effects(host, effects),
            Err(e) => {
                tracing::warn!(action = %action, error = %e, "Action failed");
                host.on_error(&CoreError::ActionFailed {
                    action: action.to_string(),
                    reason: e.message,
                });
            }
        }
    }

    fn apply_effects(&mut self, host: &mut dyn Host, effects: Vec<Effect>) {
        let definition = Arc::clone(&self.definition);
        let Some(rt) = self.runtime.as_mut() else {
            return;
        };

        for effect in effects {
            match effect {
                Effect::SetVariable { name, value } => {
                    if !definition.has_variable(&name) {
                        host.on_error(&CoreError::UnknownVariable { name });
                        continue;
                    }
                    host.on_variable(&name, &value);
                    rt.variables.insert(name, value);
                }
                Effect::WriteOutput { name, value } => {
                    if !definition.has_output(&name) {
                        host.on_error(&CoreError::UnknownOutput { name });
                        continue;
                    }
                    host.on_output(&name, &value);
                    rt.outputs.insert(name, value);
                }
                Effect::Log(text) => host.on_log(&text),
                Effect::Terminate => {
                    tracing::info!(state = %rt.current, "Action requested termination");
                    rt.terminate_requested = true;
                }
            }
        }
    }

    fn schedule_delayed(&mut self, host: &mut dyn Host, definition: &MachineDefinition, state: &str) {
        for idx in definition.delayed_from(state) {
            let transition = definition.transition(idx);
            let Trigger::Delayed(delay) = &transition.trigger else {
                continue;
            };

            let scheduled = self.resolve_delay(delay).and_then(|ms| {
                host.schedule_timer(Duration::from_millis(ms), &transition.to)
            });
            match scheduled {
                Ok(id) => {
                    tracing::debug!(%id, from = %state, to = %transition.to, "Scheduled delayed transition");
                    if let Some(rt) = self.runtime.as_mut() {
                        rt.timers.push(ScheduledDelay {
                            id,
                            transition: idx,
                        });
                    }
                }
                Err(e) => host.on_error(&e),
            }
        }
    }

    /// Resolves a delay to milliseconds. Variable delays are read now.
    fn resolve_delay(&self, delay: &Delay) -> Result<u64, CoreError> {
        match delay {
            Delay::Fixed(ms) => Ok(*ms),
            Delay::Variable(name) => {
                let raw = self
                    .variable(name)
                    .ok_or_else(|| CoreError::UnknownVariable { name: name.clone() })?;
                let ms: i64 = raw.trim().parse().map_err(|_| CoreError::InvalidDelay {
                    reason: format!("variable '{}' does not hold an integer: {:?}", name, raw),
                })?;
                if ms <= 0 {
                    return Err(CoreError::InvalidDelay {
                        reason: format!("variable '{}' holds non-positive delay {}", name, ms),
                    });
                }
                Ok(ms as u64)
            }
        }
    }
}
