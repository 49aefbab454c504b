//! Delay timers.
//!
//! Every scheduled timer occupies a slot in a generation-checked arena and
//! owns a spawned sleep task. When the sleep completes the task sends the
//! timer's id over a channel; [`TimerManager::expired`] claims the id from
//! the arena before handing the timer out. An id whose slot was cancelled
//! (or reused by a newer timer) no longer matches and its expiry is dropped,
//! even if the notification was already queued.
//!
//! Must be used from within a Tokio runtime.

use crate::error::TimerError;
use statewire_core::TimerId;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// A timer handed out on expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTimer {
    pub id: TimerId,
    /// Target state the timer was scheduled for.
    pub target: String,
    pub deadline: Instant,
}

struct Entry {
    generation: u64,
    target: String,
    deadline: Instant,
    handle: JoinHandle<()>,
}

/// Owner of all outstanding delay timers.
pub struct TimerManager {
    slots: Vec<Option<Entry>>,
    free: Vec<u32>,
    next_generation: u64,
    expired_tx: mpsc::UnboundedSender<TimerId>,
    expired_rx: mpsc::UnboundedReceiver<TimerId>,
}

impl TimerManager {
    pub fn new() -> Self {
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            next_generation: 0,
            expired_tx,
            expired_rx,
        }
    }

    /// Schedules an expiry for `target` after `delay`.
    pub fn schedule(&mut self, delay: Duration, target: &str) -> Result<TimerId, TimerError> {
        if delay.is_zero() {
            return Err(TimerError::InvalidDelay(format!(
                "zero delay for target '{}'",
                target
            )));
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(None);
                (self.slots.len() - 1) as u32
            }
        };
        let id = TimerId::new(index, generation);
        let deadline = Instant::now() + delay;

        let tx = self.expired_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = tx.send(id);
        });

        self.slots[index as usize] = Some(Entry {
            generation,
            target: target.to_string(),
            deadline,
            handle,
        });

        tracing::debug!(%id, target = %target, delay_ms = delay.as_millis() as u64, "Timer scheduled");
        Ok(id)
    }

    /// Cancels a timer. Returns false if it already expired or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.take(id) {
            Some(entry) => {
                entry.handle.abort();
                tracing::debug!(%id, target = %entry.target, "Timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancels every outstanding timer and returns how many there were.
    pub fn cancel_all(&mut self) -> usize {
        let mut cancelled = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(entry) = slot.take() {
                entry.handle.abort();
                self.free.push(index as u32);
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            tracing::debug!(count = cancelled, "Cancelled all timers");
        }
        cancelled
    }

    /// Returns whether `id` is still outstanding.
    pub fn contains(&self, id: TimerId) -> bool {
        self.entry(id).is_some()
    }

    /// Number of outstanding timers.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits for the next expiry of an outstanding timer.
    ///
    /// The timer is removed from the manager before it is returned. Cancel
    /// safe: an expiry is claimed only once it is returned. Never yields
    /// `None` while the manager is alive, since it holds a sender itself.
    pub async fn expired(&mut self) -> Option<ActiveTimer> {
        loop {
            let id = self.expired_rx.recv().await?;
            match self.take(id) {
                Some(entry) => {
                    return Some(ActiveTimer {
                        id,
                        target: entry.target,
                        deadline: entry.deadline,
                    })
                }
                None => tracing::debug!(%id, "Dropping expiry of cancelled timer"),
            }
        }
    }

    fn entry(&self, id: TimerId) -> Option<&Entry> {
        self.slots
            .get(id.index() as usize)
            .and_then(Option::as_ref)
            .filter(|e| e.generation == id.generation())
    }

    fn take(&mut self, id: TimerId) -> Option<Entry> {
        self.entry(id)?;
        let entry = self.slots[id.index() as usize].take();
        self.free.push(id.index());
        entry
    }
}

impl Default for TimerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TimerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerManager")
            .field("outstanding", &self.len())
            .field("next_generation", &self.next_generation)
            .finish()
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        for entry in self.slots.iter_mut().filter_map(Option::take) {
            entry.handle.abort();
        }
    }
}
