use thiserror::Error;

use sigil_shared::{CryptoError, PeerId, ProtocolError};

use crate::registry::TrustState;

/// Errors produced by session operations and inbound handlers.
///
/// Local operations return these to the caller, inbound handlers report them
/// as `SessionEvent::Error`. `AlreadyWelcomed` is the one fatal case: it is
/// reported as `SessionEvent::Fatal` and every later call fails with
/// `Unusable`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Send attempted before the handshake with this peer completed.
    #[error("Peer {0} is not ready: no established key")]
    PeerNotReady(PeerId),

    #[error("File too large: {size} bytes (max {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Unknown peer: {0}")]
    UnknownPeer(PeerId),

    #[error("Cannot add yourself as a friend")]
    SelfRequest,

    #[error("Peer {peer} is already known ({state})")]
    AlreadyKnown { peer: PeerId, state: TrustState },

    #[error("No pending friend request from {0}")]
    NoPendingRequest(PeerId),

    /// The relay has not sent WELCOME yet.
    #[error("Local identity not yet assigned by the relay")]
    IdentityUnknown,

    #[error("Local identity already assigned ({0})")]
    AlreadyWelcomed(PeerId),

    #[error("Session is unusable after a fatal protocol error")]
    Unusable,

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Envelope channel closed")]
    ChannelClosed,

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Refusing to overwrite existing key file {0}")]
    Exists(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SessionError>;
