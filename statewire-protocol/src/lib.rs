//! # statewire-protocol
//!
//! Wire protocol spoken between a running automaton and its observer.
//!
//! This crate provides:
//! - Inbound `KIND|NAME|VALUE` triple parsing (observer -> engine)
//! - Outbound status line formatting and parsing (engine -> observer)
//! - Error codes and protocol constants
//!
//! Every message travels in its own UDP datagram as UTF-8 text.

pub mod codec;
pub mod error;
pub mod message;

pub use codec::{Decoder, Encoder};
pub use error::ProtocolError;
pub use message::{Command, InboundMessage, MessageKind, OutboundMessage};

/// Default port the engine listens on for observer input.
pub const DEFAULT_LISTEN_PORT: u16 = 9001;

/// Default port the observer listens on for status messages.
pub const DEFAULT_PEER_PORT: u16 = 9000;

/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Separator between the fields of an inbound triple.
pub const FIELD_SEPARATOR: char = '|';
