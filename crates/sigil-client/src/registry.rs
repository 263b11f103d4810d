//! Local identity and the friend registry.
//!
//! One [`Friend`] per known peer id. A friend's public key is stored inside
//! the `Established` trust variant, so "key bound iff established" holds by
//! construction. Histories are append-only.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info};

use sigil_shared::constants::DECRYPTION_ERROR_PLACEHOLDER;
use sigil_shared::PeerId;

use crate::error::{Result, SessionError};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Outbound,
    Inbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MessageKind {
    Text,
    File,
}

/// A received or sent file. `content` is the decrypted (or local) bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttachment {
    pub name: String,
    pub mime: String,
    pub size: u64,
    pub content: Bytes,
}

impl FileAttachment {
    pub fn is_image(&self) -> bool {
        self.mime.starts_with("image/")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    /// Something arrived but could not be decrypted or verified.
    DecryptionFailed,
    File(FileAttachment),
}

/// One chat item. Immutable once appended to a history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub direction: Direction,
    pub payload: Payload,
    /// Epoch millis: sender-assigned for inbound, local for outbound.
    pub timestamp: i64,
}

impl Message {
    pub fn text(direction: Direction, text: impl Into<String>, timestamp: i64) -> Self {
        Self {
            direction,
            payload: Payload::Text(text.into()),
            timestamp,
        }
    }

    pub fn decryption_failed(timestamp: i64) -> Self {
        Self {
            direction: Direction::Inbound,
            payload: Payload::DecryptionFailed,
            timestamp,
        }
    }

    pub fn file(direction: Direction, attachment: FileAttachment, timestamp: i64) -> Self {
        Self {
            direction,
            payload: Payload::File(attachment),
            timestamp,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self.payload {
            Payload::Text(_) | Payload::DecryptionFailed => MessageKind::Text,
            Payload::File(_) => MessageKind::File,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(text) => Some(text),
            Payload::DecryptionFailed => Some(DECRYPTION_ERROR_PLACEHOLDER),
            Payload::File(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Friends
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustState {
    PendingOutbound,
    PendingInbound,
    Established,
}

impl std::fmt::Display for TrustState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TrustState::PendingOutbound => "pending_outbound",
            TrustState::PendingInbound => "pending_inbound",
            TrustState::Established => "established",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
enum Trust<K> {
    PendingOutbound,
    PendingInbound,
    Established(K),
}

#[derive(Debug, Clone)]
pub struct Friend<K> {
    id: PeerId,
    trust: Trust<K>,
    history: Vec<Message>,
    unread: usize,
}

impl<K> Friend<K> {
    fn new(id: PeerId, origin: Direction) -> Self {
        let trust = match origin {
            Direction::Outbound => Trust::PendingOutbound,
            Direction::Inbound => Trust::PendingInbound,
        };
        Self {
            id,
            trust,
            history: Vec::new(),
            unread: 0,
        }
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn trust_state(&self) -> TrustState {
        match self.trust {
            Trust::PendingOutbound => TrustState::PendingOutbound,
            Trust::PendingInbound => TrustState::PendingInbound,
            Trust::Established(_) => TrustState::Established,
        }
    }

    pub fn public_key(&self) -> Option<&K> {
        match &self.trust {
            Trust::Established(key) => Some(key),
            _ => None,
        }
    }

    pub fn is_established(&self) -> bool {
        matches!(self.trust, Trust::Established(_))
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn unread(&self) -> usize {
        self.unread
    }

    pub(crate) fn append(&mut self, message: Message, mark_unread: bool) {
        if mark_unread {
            self.unread += 1;
        }
        self.history.push(message);
    }

    pub(crate) fn mark_read(&mut self) {
        self.unread = 0;
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct FriendRegistry<K> {
    local_id: Option<PeerId>,
    friends: BTreeMap<PeerId, Friend<K>>,
}

impl<K> FriendRegistry<K> {
    pub fn new() -> Self {
        Self {
            local_id: None,
            friends: BTreeMap::new(),
        }
    }

    /// Record the relay-assigned identity. Only the first call takes effect.
    pub fn on_welcome(&mut self, assigned: PeerId) -> Result<()> {
        if let Some(existing) = &self.local_id {
            return Err(SessionError::AlreadyWelcomed(existing.clone()));
        }
        info!(id = %assigned, "Local identity assigned");
        self.local_id = Some(assigned);
        Ok(())
    }

    pub fn local_id(&self) -> Option<&PeerId> {
        self.local_id.as_ref()
    }

    pub fn get(&self, peer: &PeerId) -> Option<&Friend<K>> {
        self.friends.get(peer)
    }

    pub(crate) fn get_mut(&mut self, peer: &PeerId) -> Option<&mut Friend<K>> {
        self.friends.get_mut(peer)
    }

    /// Return the friend for `peer`, creating it pending in the given
    /// direction if absent. An existing friend keeps its trust state.
    pub fn get_or_create_friend(&mut self, peer: &PeerId, origin: Direction) -> &mut Friend<K> {
        self.friends.entry(peer.clone()).or_insert_with(|| {
            debug!(peer = %peer, origin = ?origin, "Creating friend entry");
            Friend::new(peer.clone(), origin)
        })
    }

    /// Bind `key` to `peer` and mark it established. Rebinding replaces the
    /// previous key.
    pub fn bind_key(&mut self, peer: &PeerId, key: K) -> &Friend<K> {
        let friend = self.get_or_create_friend(peer, Direction::Outbound);
        let rotated = friend.is_established();
        friend.trust = Trust::Established(key);
        info!(peer = %peer, rotated, "Peer key bound");
        friend
    }

    /// Remove `peer` if it is still `pending_inbound`. Returns whether an
    /// entry was removed.
    pub(crate) fn forget_pending_inbound(&mut self, peer: &PeerId) -> bool {
        let pending = matches!(
            self.friends.get(peer).map(Friend::trust_state),
            Some(TrustState::PendingInbound)
        );
        if pending {
            self.friends.remove(peer);
        }
        pending
    }

    pub fn is_established(&self, peer: &PeerId) -> bool {
        self.friends
            .get(peer)
            .map(Friend::is_established)
            .unwrap_or(false)
    }

    /// The bound key, or `PeerNotReady`.
    pub fn public_key(&self, peer: &PeerId) -> Result<&K> {
        self.friends
            .get(peer)
            .and_then(Friend::public_key)
            .ok_or_else(|| SessionError::PeerNotReady(peer.clone()))
    }

    pub fn friends(&self) -> impl Iterator<Item = &Friend<K>> {
        self.friends.values()
    }

    pub fn len(&self) -> usize {
        self.friends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.friends.is_empty()
    }
}

impl<K> Default for FriendRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}
