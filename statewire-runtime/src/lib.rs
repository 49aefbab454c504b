//! # statewire-runtime
//!
//! Runtime engine for statewire automata.
//!
//! This crate provides:
//! - UDP transport to the observer
//! - Delay timers in a generation-checked arena
//! - The single-threaded engine event loop and its status API
//! - Layered configuration (defaults, YAML file, environment)
//! - Glue that drives an `Interpreter` from the engine

pub mod config;
pub mod engine;
pub mod error;
pub mod launch;
pub mod timer;
pub mod transport;

pub use config::{Config, ConfigError, MachineConfig, NetworkConfig};
pub use engine::{Engine, EngineSettings, EventHandlers, Link, ShutdownHandle};
pub use error::{RuntimeError, TimerError, TransportError};
pub use launch::{interpreter_handlers, launch, start_interpreter};
pub use timer::{ActiveTimer, TimerManager};
pub use transport::Transport;
