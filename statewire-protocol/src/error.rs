//! Protocol error types.

use thiserror::Error;

/// Longest excerpt of an offending datagram carried in an error.
pub const MAX_ECHO_CHARS: usize = 64;

/// Shortens `text` to [`MAX_ECHO_CHARS`] characters, marking the cut with `…`.
pub(crate) fn excerpt(text: &str) -> String {
    match text.char_indices().nth(MAX_ECHO_CHARS) {
        Some((end, _)) => format!("{}…", &text[..end]),
        None => text.to_string(),
    }
}

/// Errors raised while decoding datagrams.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed message (expected KIND|NAME|VALUE): {datagram:?}")]
    Malformed { datagram: String },

    #[error("unknown message kind: {0}")]
    UnknownKind(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("unrecognized status line: {0:?}")]
    UnknownStatus(String),

    #[error("invalid UTF-8 in datagram")]
    InvalidUtf8,
}

impl ProtocolError {
    /// Returns a stable code used as the prefix of `ERROR` reports.
    pub fn error_code(&self) -> &'static str {
        match self {
            ProtocolError::Malformed { .. } => "MALFORMED_MESSAGE",
            ProtocolError::UnknownKind(_) => "UNKNOWN_KIND",
            ProtocolError::UnknownCommand(_) => "UNKNOWN_COMMAND",
            ProtocolError::UnknownStatus(_) => "UNKNOWN_STATUS",
            ProtocolError::InvalidUtf8 => "INVALID_UTF8",
        }
    }
}
