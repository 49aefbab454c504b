//! The engine event loop.
//!
//! An [`Engine`] owns the transport, the timer manager and the registered
//! handlers. [`Engine::run`] multiplexes the shutdown handle, OS signals,
//! outbound flushes, timer expiries and inbound datagrams on one `select!`
//! loop; each event is handled to completion before the next one is looked
//! at.
//!
//! Handlers receive the automaton state by exclusive reference together with
//! the [`Link`], the outbound half of the engine.

use crate::error::{RuntimeError, TimerError, TransportError};
use crate::timer::{ActiveTimer, TimerManager};
use crate::transport::Transport;
use statewire_core::{CoreError, Host, TimerId};
use statewire_protocol::{
    Command, InboundMessage, MessageKind, OutboundMessage, DEFAULT_LISTEN_PORT, DEFAULT_PEER_PORT,
    MAX_DATAGRAM_SIZE,
};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::broadcast;

/// How long [`Engine::stop`] waits for queued status messages to drain.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Name announced in `READY`.
    pub name: String,
    pub bind_host: String,
    /// Local port (0 = ephemeral).
    pub listen_port: u16,
    pub peer_host: String,
    pub peer_port: u16,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            name: "statewire".to_string(),
            bind_host: "127.0.0.1".to_string(),
            listen_port: DEFAULT_LISTEN_PORT,
            peer_host: "127.0.0.1".to_string(),
            peer_port: DEFAULT_PEER_PORT,
        }
    }
}

impl EngineSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    pub fn with_peer(mut self, host: impl Into<String>, port: u16) -> Self {
        self.peer_host = host.into();
        self.peer_port = port;
        self
    }
}

/// Outbound half of the engine: transport, timers and the status API.
#[derive(Debug)]
pub struct Link {
    transport: Transport,
    recv_buf: Vec<u8>,
    timers: TimerManager,
    pending_errors: Vec<String>,
    stop_requested: bool,
}

impl Link {
    fn new(transport: Transport) -> Self {
        Self {
            transport,
            recv_buf: vec![0u8; MAX_DATAGRAM_SIZE],
            timers: TimerManager::new(),
            pending_errors: Vec::new(),
            stop_requested: false,
        }
    }

    /// Sends a status message. Failures are logged and queued for the
    /// error handler.
    pub fn send(&mut self, message: &OutboundMessage) {
        if let Err(e) = self.transport.send(message) {
            self.send_failed(e);
        }
    }

    /// Writes status messages queued while the socket was not writable.
    fn flush(&mut self) {
        if let Err(e) = self.transport.flush() {
            self.send_failed(e);
        }
    }

    fn send_failed(&mut self, e: TransportError) {
        tracing::warn!(error = %e, "Failed to send status message");
        self.pending_errors.push(RuntimeError::from(e).report());
    }

    pub fn send_state_update(&mut self, state: &str) {
        self.send(&OutboundMessage::state(state));
    }

    pub fn send_output_update(&mut self, name: &str, value: &str) {
        self.send(&OutboundMessage::output(name, value));
    }

    pub fn send_var_update(&mut self, name: &str, value: &str) {
        self.send(&OutboundMessage::var(name, value));
    }

    pub fn send_log(&mut self, text: &str) {
        self.send(&OutboundMessage::log(text));
    }

    /// Sends `ERROR <text>` and queues the text for the error handler.
    pub fn send_error(&mut self, text: &str) {
        tracing::warn!(error = %text, "Reporting error");
        self.send(&OutboundMessage::error(text));
        self.pending_errors.push(text.to_string());
    }

    pub fn schedule_timer(&mut self, delay: Duration, target: &str) -> Result<TimerId, TimerError> {
        self.timers.schedule(delay, target)
    }

    pub fn cancel_timer(&mut self, id: TimerId) -> bool {
        self.timers.cancel(id)
    }

    pub fn cancel_all_timers(&mut self) -> usize {
        self.timers.cancel_all()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Asks the loop to stop once the current event is handled.
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn peer(&self) -> SocketAddr {
        self.transport.peer()
    }
}

impl Host for Link {
    fn on_state(&mut self, state: &str) {
        self.send_state_update(state);
    }

    fn on_output(&mut self, name: &str, value: &str) {
        self.send_output_update(name, value);
    }

    fn on_variable(&mut self, name: &str, value: &str) {
        self.send_var_update(name, value);
    }

    fn on_log(&mut self, text: &str) {
        self.send_log(text);
    }

    fn on_error(&mut self, error: &CoreError) {
        self.send_error(&error.report());
    }

    fn schedule_timer(&mut self, delay: Duration, target: &str) -> Result<TimerId, CoreError> {
        Ok(self.timers.schedule(delay, target)?)
    }

    fn cancel_timer(&mut self, id: TimerId) {
        self.timers.cancel(id);
    }
}

pub type InputHandler<S> = Box<dyn FnMut(&mut S, &mut Link, &str, &str)>;
pub type TimeoutHandler<S> = Box<dyn FnMut(&mut S, &mut Link, TimerId, &str)>;
pub type TerminateHandler<S> = Box<dyn FnMut(&mut S, &mut Link)>;
pub type ErrorHandler<S> = Box<dyn FnMut(&mut S, &str)>;
pub type StatusHandler<S> = Box<dyn FnMut(&mut S, &mut Link)>;

/// The five callbacks the loop dispatches to.
pub struct EventHandlers<S> {
    /// `INPUT|name|value` received.
    pub input: Option<InputHandler<S>>,
    /// A timer expired; receives the id and target state.
    pub timeout: Option<TimeoutHandler<S>>,
    /// The engine is stopping.
    pub terminate: Option<TerminateHandler<S>>,
    /// An error was reported.
    pub error: Option<ErrorHandler<S>>,
    /// `CMD|GET_STATUS|` received.
    pub status: Option<StatusHandler<S>>,
}

impl<S> Default for EventHandlers<S> {
    fn default() -> Self {
        Self {
            input: None,
            timeout: None,
            terminate: None,
            error: None,
            status: None,
        }
    }
}

impl<S> EventHandlers<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_input(mut self, f: impl FnMut(&mut S, &mut Link, &str, &str) + 'static) -> Self {
        self.input = Some(Box::new(f));
        self
    }

    pub fn on_timeout(mut self, f: impl FnMut(&mut S, &mut Link, TimerId, &str) + 'static) -> Self {
        self.timeout = Some(Box::new(f));
        self
    }

    pub fn on_terminate(mut self, f: impl FnMut(&mut S, &mut Link) + 'static) -> Self {
        self.terminate = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnMut(&mut S, &str) + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    pub fn on_status_request(mut self, f: impl FnMut(&mut S, &mut Link) + 'static) -> Self {
        self.status = Some(Box::new(f));
        self
    }

    /// Names of the handlers not set.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.input.is_none() {
            missing.push("input");
        }
        if self.timeout.is_none() {
            missing.push("timeout");
        }
        if self.terminate.is_none() {
            missing.push("terminate");
        }
        if self.error.is_none() {
            missing.push("error");
        }
        if self.status.is_none() {
            missing.push("status");
        }
        missing
    }
}

/// Handle that stops a running engine from the outside.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }
}

/// Why the loop is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Command,
    Signal,
    Requested,
}

/// The automaton runtime engine.
pub struct Engine<S> {
    settings: EngineSettings,
    link: Link,
    handlers: EventHandlers<S>,
    shutdown: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
    stopped: bool,
}

impl<S> std::fmt::Debug for Engine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("settings", &self.settings)
            .field("link", &self.link)
            .field("missing_handlers", &self.handlers.missing())
            .field("stopped", &self.stopped)
            .finish()
    }
}

impl<S> Engine<S> {
    /// Binds the transport, starts receiving and announces `READY <name>`.
    pub async fn initialize(settings: EngineSettings) -> Result<Self, RuntimeError> {
        let mut transport = Transport::initialize(
            &settings.bind_host,
            settings.listen_port,
            &settings.peer_host,
            settings.peer_port,
        )
        .await?;
        transport.start_receive();
        transport.send(&OutboundMessage::ready(&settings.name))?;

        tracing::info!(name = %settings.name, "Engine ready");

        let (shutdown, shutdown_rx) = broadcast::channel(1);
        Ok(Self {
            settings,
            link: Link::new(transport),
            handlers: EventHandlers::new(),
            shutdown,
            shutdown_rx,
            stopped: false,
        })
    }

    pub fn set_event_handlers(&mut self, handlers: EventHandlers<S>) {
        self.handlers = handlers;
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown.clone(),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut Link {
        &mut self.link
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.link.local_addr()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Runs the loop until a stop is requested, SIGINT/SIGTERM arrives or
    /// `CMD|TERMINATE|` is received. The termination handler runs before the
    /// engine stops.
    pub async fn run(&mut self, state: &mut S) -> Result<(), RuntimeError> {
        self.run_until(state, shutdown_signal()).await
    }

    /// Like [`run`](Self::run), with `signal` standing in for the OS signals.
    /// Its completion takes the same path as SIGINT/SIGTERM.
    pub async fn run_until(
        &mut self,
        state: &mut S,
        signal: impl Future<Output = ()>,
    ) -> Result<(), RuntimeError> {
        let missing = self.handlers.missing();
        if !missing.is_empty() {
            let err = RuntimeError::NotConfigured {
                missing: missing.join(", "),
            };
            tracing::error!(error = %err, "Cannot run engine");
            let report = err.report();
            self.link.send(&OutboundMessage::error(&report));
            if let Some(on_error) = self.handlers.error.as_mut() {
                on_error(state, &report);
            }
            return Err(err);
        }
        if self.stopped {
            return Ok(());
        }

        tokio::pin!(signal);

        tracing::info!(name = %self.settings.name, "Engine running");

        // Errors queued before the loop started (e.g. by the interpreter's start).
        self.drain_errors(state);

        loop {
            let reason = if self.link.stop_requested {
                Some(StopReason::Requested)
            } else {
                tokio::select! {
                    biased;

                    _ = self.shutdown_rx.recv() => {
                        tracing::info!("Shutdown requested");
                        Some(StopReason::Requested)
                    }

                    _ = &mut signal => Some(StopReason::Signal),

                    result = self.link.transport.writable() => {
                        match result {
                            Ok(()) => self.link.flush(),
                            Err(e) => self.link.send_failed(e),
                        }
                        None
                    }

                    timer = self.link.timers.expired() => {
                        if let Some(timer) = timer {
                            self.dispatch_timeout(state, timer);
                        }
                        None
                    }

                    result = self.link.transport.recv(&mut self.link.recv_buf) => {
                        self.dispatch_message(state, result)
                    }
                }
            };
            self.drain_errors(state);

            let reason = reason.or(self.link.stop_requested.then_some(StopReason::Requested));
            if let Some(reason) = reason {
                tracing::info!(?reason, "Engine stopping");
                if let Some(on_terminate) = self.handlers.terminate.as_mut() {
                    on_terminate(state, &mut self.link);
                }
                self.drain_errors(state);
                self.stop().await;
                return Ok(());
            }
        }
    }

    /// Sends `TERMINATING`, cancels all timers, waits (bounded) for queued
    /// status messages to leave and closes the transport. Idempotent.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.link.send(&OutboundMessage::Terminating);
        self.link.cancel_all_timers();

        let link = &mut self.link;
        let flushed = tokio::time::timeout(FLUSH_TIMEOUT, async {
            while link.transport.queued() > 0 {
                match link.transport.writable().await {
                    Ok(()) => link.flush(),
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to flush status messages");
                        break;
                    }
                }
            }
        })
        .await;
        if flushed.is_err() {
            tracing::warn!(
                queued = self.link.transport.queued(),
                "Timed out flushing status messages"
            );
        }

        self.link.transport.shutdown();
        self.stopped = true;
        tracing::info!(name = %self.settings.name, "Engine stopped");
    }

    fn dispatch_timeout(&mut self, state: &mut S, timer: ActiveTimer) {
        tracing::debug!(id = %timer.id, target = %timer.target, "Timer expired");
        if let Some(on_timeout) = self.handlers.timeout.as_mut() {
            on_timeout(state, &mut self.link, timer.id, &timer.target);
        }
    }

    fn dispatch_message(
        &mut self,
        state: &mut S,
        result: Result<InboundMessage, TransportError>,
    ) -> Option<StopReason> {
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                self.link.send_error(&RuntimeError::from(e).report());
                return None;
            }
        };

        match message.kind {
            MessageKind::Input => {
                tracing::debug!(name = %message.name, value = %message.value, "Input");
                if let Some(on_input) = self.handlers.input.as_mut() {
                    on_input(state, &mut self.link, &message.name, &message.value);
                }
                None
            }
            MessageKind::Cmd => match message.as_command() {
                Ok(Command::Terminate) => Some(StopReason::Command),
                Ok(Command::GetStatus) => {
                    tracing::debug!("Status requested");
                    if let Some(on_status) = self.handlers.status.as_mut() {
                        on_status(state, &mut self.link);
                    }
                    None
                }
                Err(e) => {
                    let err = RuntimeError::from(TransportError::from(e));
                    self.link.send_error(&err.report());
                    None
                }
            },
        }
    }

    fn drain_errors(&mut self, state: &mut S) {
        if self.link.pending_errors.is_empty() {
            return;
        }
        let errors = std::mem::take(&mut self.link.pending_errors);
        if let Some(on_error) = self.handlers.error.as_mut() {
            for text in &errors {
                on_error(state, text);
            }
        }
    }
}

/// Completes on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
