//! Encrypted text messages.

use tracing::{debug, info};

use sigil_shared::{now_millis, CryptoEngine, CryptoError, Envelope, EnvelopeBody, PeerId};

use crate::error::{Result, SessionError};
use crate::events::SessionEvent;
use crate::registry::{Direction, Message};
use crate::session::Session;

impl<C: CryptoEngine> Session<C> {
    /// Encrypt `text` for `to`, send it, and echo it into the local history.
    pub async fn send_message(&mut self, to: &PeerId, text: &str) -> Result<()> {
        self.ensure_usable()?;
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyMessage);
        }

        let recipient = self.registry.public_key(to)?;
        let content = self
            .engine
            .encrypt_and_sign(text.as_bytes(), recipient, &self.keys.private)?;
        let timestamp = now_millis();

        self.channel
            .send(Envelope::to(
                to,
                EnvelopeBody::Message {
                    content,
                    timestamp: Some(timestamp),
                },
            ))
            .await?;

        // optimistic echo, the relay never acknowledges
        self.append_message(to, Message::text(Direction::Outbound, text, timestamp));
        Ok(())
    }

    pub(crate) fn on_message(
        &mut self,
        from: PeerId,
        content: &str,
        timestamp: Option<i64>,
    ) -> Result<()> {
        let timestamp = timestamp.unwrap_or_else(now_millis);

        let Some(friend) = self.registry.get(&from) else {
            return Err(SessionError::UnknownPeer(from));
        };

        let decrypted = match friend.public_key() {
            Some(key) => self
                .engine
                .decrypt_and_verify(content, &self.keys.private, key)
                .map_err(SessionError::from)
                .and_then(|bytes| {
                    String::from_utf8(bytes).map_err(|_| CryptoError::Decryption.into())
                }),
            None => Err(SessionError::PeerNotReady(from.clone())),
        };

        match decrypted {
            Ok(text) => {
                debug!(peer = %from, len = text.len(), "Message decrypted");
                self.append_message(&from, Message::text(Direction::Inbound, text, timestamp));
                Ok(())
            }
            Err(e) => {
                // the sentinel keeps the failed message's place in the history
                self.append_message(&from, Message::decryption_failed(timestamp));
                Err(e)
            }
        }
    }

    /// Append to `peer`'s history. Inbound messages outside the open
    /// conversation count as unread.
    pub(crate) fn append_message(&mut self, peer: &PeerId, message: Message) {
        let mark_unread = message.direction == Direction::Inbound
            && self.open_conversation.as_ref() != Some(peer);

        let Some(friend) = self.registry.get_mut(peer) else {
            debug!(peer = %peer, "Dropping message for unknown friend");
            return;
        };
        friend.append(message.clone(), mark_unread);
        let unread = friend.unread();

        if mark_unread {
            info!(peer = %peer, unread, "New message");
        }
        self.emit(SessionEvent::MessageAppended {
            peer: peer.clone(),
            message,
            unread,
        });
    }

    /// The conversation with `peer`, oldest first.
    pub fn history(&self, peer: &PeerId) -> Result<&[Message]> {
        self.registry
            .get(peer)
            .map(|friend| friend.history())
            .ok_or_else(|| SessionError::UnknownPeer(peer.clone()))
    }
}
