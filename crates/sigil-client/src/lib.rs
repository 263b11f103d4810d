//! # sigil-client
//!
//! Protocol core of the Sigil chat client: friend handshake, end-to-end
//! encrypted messages, chunked file transfer and typing signals over an
//! untrusted relay. Presentation layers drive a [`Session`] (directly or via
//! [`runtime::spawn_session`]) and react to [`SessionEvent`]s.

pub mod channel;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod files;
mod handshake;
pub mod keyfile;
mod messaging;
pub mod registry;
pub mod runtime;
pub mod session;
pub mod transport;
pub mod typing;

#[cfg(test)]
mod testutil;

pub use channel::{ChannelEvent, EnvelopeChannel};
pub use config::{ClientConfig, ProtocolConfig};
pub use error::{ConfigError, SessionError};
pub use events::{FriendSummary, SessionEvent};
pub use files::OutgoingFile;
pub use registry::{Direction, FileAttachment, Friend, FriendRegistry, Message, Payload, TrustState};
pub use runtime::{spawn_session, SessionCommand};
pub use session::{LocalKeys, Session};
