//! Runtime error types.

use statewire_protocol::ProtocolError;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors from the UDP transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to resolve peer host '{host}': {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("peer host '{host}' resolved to no address")]
    NoAddress { host: String },

    #[error("send to {peer} failed: {source}")]
    Send {
        peer: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("receive failed: {0}")]
    Recv(#[source] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl TransportError {
    pub fn error_code(&self) -> &'static str {
        match self {
            TransportError::Bind { .. } => "BIND_FAILED",
            TransportError::Resolve { .. } => "RESOLVE_FAILED",
            TransportError::NoAddress { .. } => "NO_ADDRESS",
            TransportError::Send { .. } => "SEND_FAILED",
            TransportError::Recv(_) => "RECV_FAILED",
            TransportError::Protocol(e) => e.error_code(),
        }
    }
}

/// Errors from the timer manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimerError {
    #[error("invalid delay: {0}")]
    InvalidDelay(String),
}

impl TimerError {
    pub fn error_code(&self) -> &'static str {
        match self {
            TimerError::InvalidDelay(_) => "INVALID_DELAY",
        }
    }
}

/// Runtime errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("timer error: {0}")]
    Timer(#[from] TimerError),

    #[error("core error: {0}")]
    Core(#[from] statewire_core::CoreError),

    #[error("engine not configured: missing {missing}")]
    NotConfigured { missing: String },
}

impl RuntimeError {
    /// Returns the stable code used as the prefix of `ERROR` reports.
    pub fn error_code(&self) -> &'static str {
        match self {
            RuntimeError::Transport(e) => e.error_code(),
            RuntimeError::Timer(e) => e.error_code(),
            RuntimeError::Core(e) => e.error_code(),
            RuntimeError::NotConfigured { .. } => "NOT_CONFIGURED",
        }
    }

    /// Formats the error as the text of an `ERROR` status message.
    pub fn report(&self) -> String {
        match self {
            // The core error already carries its own wording.
            RuntimeError::Core(e) => e.report(),
            RuntimeError::Transport(TransportError::Protocol(e)) => {
                format!("{}: {}", e.error_code(), e)
            }
            RuntimeError::Transport(e) => format!("{}: {}", e.error_code(), e),
            RuntimeError::Timer(e) => format!("{}: {}", e.error_code(), e),
            RuntimeError::NotConfigured { .. } => format!("{}: {}", self.error_code(), self),
        }
    }
}

impl From<TimerError> for statewire_core::CoreError {
    fn from(e: TimerError) -> Self {
        match e {
            TimerError::InvalidDelay(reason) => statewire_core::CoreError::InvalidDelay { reason },
        }
    }
}
