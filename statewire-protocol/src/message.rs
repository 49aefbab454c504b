//! Message types for both directions of the protocol.
//!
//! Inbound (observer -> engine) messages are pipe-delimited triples:
//!
//! ```text
//! INPUT|start|1
//! CMD|TERMINATE|
//! CMD|GET_STATUS|
//! ```
//!
//! Outbound (engine -> observer) messages are a keyword followed by a payload:
//!
//! ```text
//! READY blink
//! STATE Blinking
//! OUTPUT led="1"
//! VAR count="3"
//! LOG entering Idle
//! ERROR CYCLE_DETECTED: ...
//! TERMINATING
//! ```

use crate::error::{excerpt, ProtocolError};
use crate::FIELD_SEPARATOR;
use std::fmt;
use std::str::FromStr;

/// Kind of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// A value arriving on a named input channel.
    Input,
    /// A control command for the engine.
    Cmd,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Input => "INPUT",
            MessageKind::Cmd => "CMD",
        }
    }
}

impl FromStr for MessageKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INPUT" => Ok(MessageKind::Input),
            "CMD" => Ok(MessageKind::Cmd),
            other => Err(ProtocolError::UnknownKind(excerpt(other))),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine control commands carried by `CMD` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Graceful shutdown.
    Terminate,
    /// Resynchronization dump of state, variables and outputs.
    GetStatus,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Terminate => "TERMINATE",
            Command::GetStatus => "GET_STATUS",
        }
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TERMINATE" => Ok(Command::Terminate),
            "GET_STATUS" => Ok(Command::GetStatus),
            other => Err(ProtocolError::UnknownCommand(excerpt(other))),
        }
    }
}

/// A parsed `KIND|NAME|VALUE` triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub kind: MessageKind,
    pub name: String,
    pub value: String,
}

impl InboundMessage {
    pub fn input(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Input,
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn command(command: Command) -> Self {
        Self {
            kind: MessageKind::Cmd,
            name: command.as_str().to_string(),
            value: String::new(),
        }
    }

    /// Parses a single message.
    ///
    /// The text is split at the first two separators, so the value may itself
    /// contain `|`. A single trailing line terminator is ignored.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let line = strip_line_terminator(text);

        let mut fields = line.splitn(3, FIELD_SEPARATOR);
        let (kind, name, value) = match (fields.next(), fields.next(), fields.next()) {
            (Some(kind), Some(name), Some(value)) => (kind, name, value),
            _ => {
                return Err(ProtocolError::Malformed {
                    datagram: excerpt(line),
                })
            }
        };

        if name.is_empty() {
            return Err(ProtocolError::Malformed {
                datagram: excerpt(line),
            });
        }

        Ok(Self {
            kind: kind.parse()?,
            name: name.to_string(),
            value: value.to_string(),
        })
    }

    /// Interprets the name of a `CMD` message.
    pub fn as_command(&self) -> Result<Command, ProtocolError> {
        if self.kind != MessageKind::Cmd {
            return Err(ProtocolError::UnknownCommand(excerpt(&self.name)));
        }
        self.name.parse()
    }
}

impl FromStr for InboundMessage {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}",
            self.kind,
            self.name,
            self.value,
            sep = FIELD_SEPARATOR
        )
    }
}

/// A status message sent to the observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Engine is operational.
    Ready { name: String },
    /// New current state.
    State { state: String },
    /// Value written to an output channel.
    Output { name: String, value: String },
    /// Current value of a variable.
    Var { name: String, value: String },
    /// Diagnostic text.
    Log { text: String },
    /// Failure report.
    Error { text: String },
    /// Graceful-exit notice.
    Terminating,
}

impl OutboundMessage {
    pub fn ready(name: impl Into<String>) -> Self {
        OutboundMessage::Ready { name: name.into() }
    }

    pub fn state(state: impl Into<String>) -> Self {
        OutboundMessage::State {
            state: state.into(),
        }
    }

    pub fn output(name: impl Into<String>, value: impl Into<String>) -> Self {
        OutboundMessage::Output {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn var(name: impl Into<String>, value: impl Into<String>) -> Self {
        OutboundMessage::Var {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn log(text: impl Into<String>) -> Self {
        OutboundMessage::Log { text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        OutboundMessage::Error { text: text.into() }
    }

    /// Returns the leading keyword of the message.
    pub fn keyword(&self) -> &'static str {
        match self {
            OutboundMessage::Ready { .. } => "READY",
            OutboundMessage::State { .. } => "STATE",
            OutboundMessage::Output { .. } => "OUTPUT",
            OutboundMessage::Var { .. } => "VAR",
            OutboundMessage::Log { .. } => "LOG",
            OutboundMessage::Error { .. } => "ERROR",
            OutboundMessage::Terminating => "TERMINATING",
        }
    }

    /// Parses a status line as produced by the `Display` impl.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let line = strip_line_terminator(text);
        if line == "TERMINATING" {
            return Ok(OutboundMessage::Terminating);
        }

        let (keyword, payload) = line
            .split_once(' ')
            .ok_or_else(|| ProtocolError::UnknownStatus(excerpt(line)))?;

        match keyword {
            "READY" => Ok(OutboundMessage::ready(payload)),
            "STATE" => Ok(OutboundMessage::state(payload)),
            "LOG" => Ok(OutboundMessage::log(payload)),
            "ERROR" => Ok(OutboundMessage::error(payload)),
            "OUTPUT" | "VAR" => {
                let (name, value) = parse_assignment(payload)
                    .ok_or_else(|| ProtocolError::UnknownStatus(excerpt(line)))?;
                if keyword == "OUTPUT" {
                    Ok(OutboundMessage::output(name, value))
                } else {
                    Ok(OutboundMessage::var(name, value))
                }
            }
            _ => Err(ProtocolError::UnknownStatus(excerpt(line))),
        }
    }
}

impl FromStr for OutboundMessage {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for OutboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutboundMessage::Ready { name } => write!(f, "READY {}", name),
            OutboundMessage::State { state } => write!(f, "STATE {}", state),
            OutboundMessage::Output { name, value } => write!(f, "OUTPUT {}=\"{}\"", name, value),
            OutboundMessage::Var { name, value } => write!(f, "VAR {}=\"{}\"", name, value),
            OutboundMessage::Log { text } => write!(f, "LOG {}", text),
            OutboundMessage::Error { text } => write!(f, "ERROR {}", text),
            OutboundMessage::Terminating => f.write_str("TERMINATING"),
        }
    }
}

/// Splits `name="value"` into its parts.
fn parse_assignment(payload: &str) -> Option<(&str, &str)> {
    let (name, quoted) = payload.split_once('=')?;
    let value = quoted.strip_prefix('"')?.strip_suffix('"')?;
    if name.is_empty() {
        return None;
    }
    Some((name, value))
}

fn strip_line_terminator(text: &str) -> &str {
    text.strip_suffix("\r\n")
        .or_else(|| text.strip_suffix('\n'))
        .unwrap_or(text)
}
