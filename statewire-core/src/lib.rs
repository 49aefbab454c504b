//! # statewire-core
//!
//! Automaton core for statewire.
//!
//! This crate provides:
//! - Machine definition parsing and validation
//! - Transition evaluation (immediate, event-triggered, delayed)
//! - The `Evaluator` seam through which generated code supplies guards and actions
//! - The `Host` seam through which side effects leave the interpreter
//!
//! Nothing in here performs I/O; the runtime crate implements [`Host`] over a
//! UDP transport and a timer manager.

pub mod definition;
pub mod error;
pub mod evaluator;
pub mod host;
pub mod interpreter;

pub use definition::{
    Delay, MachineDefinition, MachineDefinitionRaw, StateDef, Transition, TransitionDef, Trigger,
    VariableDef,
};
pub use error::CoreError;
pub use evaluator::{Bindings, CallbackEvaluator, Effect, EvalError, Evaluator};
pub use host::{Host, HostEvent, RecordingHost, TimerId};
pub use interpreter::Interpreter;
