//! The seam between the interpreter and its surroundings.

use crate::error::CoreError;
use std::fmt;
use std::time::Duration;

/// Identifier of a scheduled timer.
///
/// `index` addresses a slot in the timer arena; `generation` increases
/// monotonically with every scheduled timer, so an id is never reused and a
/// stale id never matches a newer timer occupying the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId {
    generation: u64,
    index: u32,
}

impl TimerId {
    pub fn new(index: u32, generation: u64) -> Self {
        Self { generation, index }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.generation)
    }
}

/// Receiver of the interpreter's side effects.
///
/// The runtime implements this over the UDP transport and the timer manager;
/// every call happens on the event loop thread.
pub trait Host {
    /// The automaton is (now) in `state`.
    fn on_state(&mut self, state: &str);

    /// An output channel holds `value`.
    fn on_output(&mut self, name: &str, value: &str);

    /// A variable holds `value`.
    fn on_variable(&mut self, name: &str, value: &str);

    /// Diagnostic text from an action.
    fn on_log(&mut self, text: &str);

    /// A recoverable failure.
    fn on_error(&mut self, error: &CoreError);

    /// Schedules an expiry for `target` after `delay`.
    fn schedule_timer(&mut self, delay: Duration, target: &str) -> Result<TimerId, CoreError>;

    /// Cancels a timer. Unknown ids are ignored.
    fn cancel_timer(&mut self, id: TimerId);
}

/// Everything a [`RecordingHost`] observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    State(String),
    Output(String, String),
    Variable(String, String),
    Log(String),
    Error(String),
    Scheduled(TimerId, Duration, String),
    Cancelled(TimerId),
}

/// A [`Host`] that records every call, for tests and benchmarks.
#[derive(Debug, Default)]
pub struct RecordingHost {
    pub events: Vec<HostEvent>,
    next_generation: u64,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// States reported, in order.
    pub fn states(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                HostEvent::State(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Error codes reported, in order.
    pub fn errors(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                HostEvent::Error(code) => Some(code.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Timers scheduled and not cancelled since.
    pub fn pending_timers(&self) -> Vec<TimerId> {
        let mut pending = Vec::new();
        for event in &self.events {
            match event {
                HostEvent::Scheduled(id, _, _) => pending.push(*id),
                HostEvent::Cancelled(id) => pending.retain(|p| p != id),
                _ => {}
            }
        }
        pending
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl Host for RecordingHost {
    fn on_state(&mut self, state: &str) {
        self.events.push(HostEvent::State(state.to_string()));
    }

    fn on_output(&mut self, name: &str, value: &str) {
        self.events
            .push(HostEvent::Output(name.to_string(), value.to_string()));
    }

    fn on_variable(&mut self, name: &str, value: &str) {
        self.events
            .push(HostEvent::Variable(name.to_string(), value.to_string()));
    }

    fn on_log(&mut self, text: &str) {
        self.events.push(HostEvent::Log(text.to_string()));
    }

    fn on_error(&mut self, error: &CoreError) {
        self.events
            .push(HostEvent::Error(error.error_code().to_string()));
    }

    fn schedule_timer(&mut self, delay: Duration, target: &str) -> Result<TimerId, CoreError> {
        if delay.is_zero() {
            return Err(CoreError::InvalidDelay {
                reason: "delay must be positive".to_string(),
            });
        }
        self.next_generation += 1;
        let id = TimerId::new(0, self.next_generation);
        self.events
            .push(HostEvent::Scheduled(id, delay, target.to_string()));
        Ok(id)
    }

    fn cancel_timer(&mut self, id: TimerId) {
        self.events.push(HostEvent::Cancelled(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_ids_order_by_generation() {
        let a = TimerId::new(5, 1);
        let b = TimerId::new(0, 2);
        assert!(a < b);
        assert_eq!(b.to_string(), "timer#2");
    }

    #[test]
    fn test_recording_host_tracks_pending_timers() {
        let mut host = RecordingHost::new();
        let a = host.schedule_timer(Duration::from_millis(10), "x").unwrap();
        let b = host.schedule_timer(Duration::from_millis(20), "y").unwrap();
        host.cancel_timer(a);

        assert_eq!(host.pending_timers(), vec![b]);
        assert!(host.schedule_timer(Duration::ZERO, "z").is_err());
    }
}
