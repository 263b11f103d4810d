use serde::Serialize;
use uuid::Uuid;

use sigil_shared::{ConnectionStatus, PeerId};

use crate::error::SessionError;
use crate::registry::{Message, TrustState};

/// Everything the presentation layer needs to react to.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The relay assigned our identity.
    Welcome { id: PeerId },

    Presence(ConnectionStatus),

    /// A peer wants to become friends; answer with accept or reject.
    FriendRequest { from: PeerId, has_key: bool },

    FriendRequestSent { to: PeerId },

    /// A key is now bound to `peer` (first time or rotation).
    FriendEstablished { peer: PeerId, fingerprint: String },

    /// A message was appended to `peer`'s history.
    MessageAppended {
        peer: PeerId,
        message: Message,
        unread: usize,
    },

    TransferStarted {
        peer: PeerId,
        id: Uuid,
        name: String,
        size: u64,
    },

    /// The transfer was refused, dropped or failed to decrypt.
    TransferFailed { peer: PeerId, id: Uuid, name: String },

    TypingStarted { peer: PeerId },

    TypingStopped { peer: PeerId },

    /// An `ERROR` envelope from the relay. Local state is unchanged.
    ServerError { message: String },

    /// A non-fatal condition raised while handling inbound traffic.
    Error(SessionError),

    /// The session stopped and must be rebuilt on a fresh connection.
    Fatal(SessionError),
}

/// Listing entry for one friend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FriendSummary {
    pub id: PeerId,
    pub trust: TrustState,
    pub fingerprint: Option<String>,
    pub messages: usize,
    pub unread: usize,
}
