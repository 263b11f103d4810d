//! Friend handshake: exchange of armored public keys through the relay.
//!
//! ```text
//! A                         relay                         B
//! |-- FRIEND_REQUEST{key_A} --->|-- FRIEND_REQUEST{key_A} -->|  B: pending_inbound
//! |                             |                            |  (user decides)
//! |<-- FRIEND_ACCEPTED{key_B} --|<-- ACCEPT_FRIEND{key_B} ---|  B: established
//! A: established
//! ```

use tracing::{debug, info, warn};

use sigil_shared::{CryptoEngine, CryptoError, Envelope, EnvelopeBody, PeerId};

use crate::error::{Result, SessionError};
use crate::events::SessionEvent;
use crate::registry::{Direction, TrustState};
use crate::session::Session;

impl<C: CryptoEngine> Session<C> {
    /// Send our public key to `to` and track them as `pending_outbound`.
    pub async fn request_friend(&mut self, to: &PeerId) -> Result<()> {
        self.ensure_usable()?;
        let local = self.registry.local_id().ok_or(SessionError::IdentityUnknown)?;
        if local == to {
            return Err(SessionError::SelfRequest);
        }
        if let Some(friend) = self.registry.get(to) {
            return Err(SessionError::AlreadyKnown {
                peer: to.clone(),
                state: friend.trust_state(),
            });
        }

        self.channel
            .send(Envelope::to(
                to,
                EnvelopeBody::FriendRequest {
                    public_key: Some(self.keys.public_armored.clone()),
                },
            ))
            .await?;

        self.registry.get_or_create_friend(to, Direction::Outbound);
        info!(peer = %to, "Friend request sent");
        self.emit(SessionEvent::FriendRequestSent { to: to.clone() });
        Ok(())
    }

    /// Accept the pending request from `peer`: bind its key and send ours.
    /// The request stays pending if the key does not parse or the send fails.
    pub async fn accept_friend(&mut self, peer: &PeerId) -> Result<()> {
        self.ensure_usable()?;
        let offer = self
            .pending_requests
            .get(peer)
            .ok_or_else(|| SessionError::NoPendingRequest(peer.clone()))?;
        let armored = offer.as_deref().ok_or_else(|| {
            CryptoError::KeyParse("friend request carried no public key".into())
        })?;
        let key = self.engine.read_public_key(armored)?;

        self.channel
            .send(Envelope::to(
                peer,
                EnvelopeBody::AcceptFriend {
                    public_key: self.keys.public_armored.clone(),
                },
            ))
            .await?;

        self.pending_requests.remove(peer);
        self.establish(peer, key);
        Ok(())
    }

    /// Drop the pending request from `peer`. Nothing is sent, and a
    /// `pending_inbound` entry is forgotten so either side can ask again.
    pub fn reject_friend(&mut self, peer: &PeerId) -> Result<()> {
        self.ensure_usable()?;
        self.pending_requests
            .remove(peer)
            .ok_or_else(|| SessionError::NoPendingRequest(peer.clone()))?;
        let forgotten = self.registry.forget_pending_inbound(peer);
        info!(peer = %peer, forgotten, "Friend request rejected");
        Ok(())
    }

    pub(crate) fn on_friend_request(
        &mut self,
        from: PeerId,
        public_key: Option<String>,
    ) -> Result<()> {
        if self.registry.local_id() == Some(&from) {
            warn!("Ignoring friend request from our own id");
            return Ok(());
        }

        let friend = self.registry.get_or_create_friend(&from, Direction::Inbound);
        let state = friend.trust_state();
        if state == TrustState::Established {
            info!(peer = %from, "Friend request from an established friend");
        }

        let has_key = public_key.is_some();
        if !has_key {
            warn!(peer = %from, "Friend request without a public key");
        }
        if self.pending_requests.insert(from.clone(), public_key).is_some() {
            debug!(peer = %from, "Replacing earlier pending request");
        }

        info!(peer = %from, state = %state, "Friend request received");
        self.emit(SessionEvent::FriendRequest { from, has_key });
        Ok(())
    }

    pub(crate) fn on_friend_accepted(
        &mut self,
        from: PeerId,
        public_key: Option<String>,
    ) -> Result<()> {
        let armored = public_key.ok_or_else(|| {
            CryptoError::KeyParse("FRIEND_ACCEPTED carried no public key".into())
        })?;
        let key = self.engine.read_public_key(&armored)?;

        match self.registry.get(&from).map(|f| f.trust_state()) {
            Some(TrustState::PendingOutbound) => {}
            Some(state) => warn!(peer = %from, state = %state, "FRIEND_ACCEPTED in unexpected state"),
            None => warn!(peer = %from, "Unsolicited FRIEND_ACCEPTED"),
        }

        // a crossed request from the same peer is settled by this acceptance
        self.pending_requests.remove(&from);
        self.establish(&from, key);
        Ok(())
    }

    fn establish(&mut self, peer: &PeerId, key: C::PublicKey) {
        let fingerprint = self.engine.fingerprint(&key);
        self.registry.bind_key(peer, key);
        info!(peer = %peer, fingerprint = %fingerprint, "Friend established");
        self.emit(SessionEvent::FriendEstablished {
            peer: peer.clone(),
            fingerprint,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{befriend, relay, TestPeer};

    #[tokio::test]
    async fn test_handshake_symmetry() {
        let mut alice = TestPeer::new("AAA111");
        let mut bob = TestPeer::new("BBB222");

        alice.session.request_friend(&bob.id()).await.unwrap();
        assert_eq!(
            alice.session.friend(&bob.id()).unwrap().trust_state(),
            TrustState::PendingOutbound
        );

        bob.deliver_from(&mut alice);
        assert_eq!(
            bob.session.friend(&alice.id()).unwrap().trust_state(),
            TrustState::PendingInbound
        );
        assert!(bob.session.has_pending_request(&alice.id()));

        bob.session.accept_friend(&alice.id()).await.unwrap();
        alice.deliver_from(&mut bob);

        let alice_key = alice.session.local_keys().public_key().clone();
        let bob_key = bob.session.local_keys().public_key().clone();
        let expected = alice.session.engine().fingerprint(&bob_key);
        assert_eq!(
            alice.session.friend(&bob.id()).unwrap().public_key(),
            Some(&bob_key)
        );
        assert_eq!(
            bob.session.friend(&alice.id()).unwrap().public_key(),
            Some(&alice_key)
        );
        assert!(alice.drain_events().iter().any(|e| matches!(
            e,
            SessionEvent::FriendEstablished { fingerprint, .. } if *fingerprint == expected
        )));
    }

    #[tokio::test]
    async fn test_friend_accept_alias_from_json() {
        let mut alice = TestPeer::new("AAA111");
        let bob = TestPeer::new("BBB222");
        alice.session.request_friend(&bob.id()).await.unwrap();

        let frame = serde_json::json!({
            "type": "FRIEND_ACCEPT",
            "from": "BBB222",
            "publicKey": bob.session.local_keys().public_armored(),
        })
        .to_string();
        alice
            .session
            .handle_envelope(Envelope::from_json(&frame).unwrap());

        assert!(alice.session.registry().is_established(&bob.id()));
    }

    #[tokio::test]
    async fn test_request_before_welcome() {
        let mut alice = TestPeer::unwelcomed();
        let err = alice
            .session
            .request_friend(&PeerId::new("BBB222"))
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::IdentityUnknown);
        assert!(alice.sent().is_empty());
    }

    #[tokio::test]
    async fn test_request_self_and_duplicates_rejected() {
        let mut alice = TestPeer::new("AAA111");
        let bob = TestPeer::new("BBB222");

        let alice_id = alice.id();
        let err = alice.session.request_friend(&alice_id).await.unwrap_err();
        assert_eq!(err, SessionError::SelfRequest);

        alice.session.request_friend(&bob.id()).await.unwrap();
        let err = alice.session.request_friend(&bob.id()).await.unwrap_err();
        assert_eq!(
            err,
            SessionError::AlreadyKnown {
                peer: bob.id(),
                state: TrustState::PendingOutbound
            }
        );
        assert_eq!(alice.sent().len(), 1);

        befriend(&mut alice, &mut TestPeer::new("DDD444")).await;
        let err = alice
            .session
            .request_friend(&PeerId::new("DDD444"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::AlreadyKnown {
                state: TrustState::Established,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_reject_sends_nothing() {
        let mut alice = TestPeer::new("AAA111");
        let mut bob = TestPeer::new("BBB222");
        alice.session.request_friend(&bob.id()).await.unwrap();
        bob.deliver_from(&mut alice);

        bob.session.reject_friend(&alice.id()).unwrap();
        assert!(bob.sent().is_empty());
        assert!(!bob.session.has_pending_request(&alice.id()));
        assert!(bob.session.friend(&alice.id()).is_none());

        let err = bob.session.accept_friend(&alice.id()).await.unwrap_err();
        assert_eq!(err, SessionError::NoPendingRequest(alice.id()));
    }

    #[tokio::test]
    async fn test_reject_then_request_back() {
        let mut alice = TestPeer::new("AAA111");
        let mut bob = TestPeer::new("BBB222");
        alice.session.request_friend(&bob.id()).await.unwrap();
        bob.deliver_from(&mut alice);
        bob.session.reject_friend(&alice.id()).unwrap();

        // bob changes his mind and asks alice, who is still pending_outbound
        bob.session.request_friend(&alice.id()).await.unwrap();
        alice.deliver_from(&mut bob);
        assert!(alice.session.has_pending_request(&bob.id()));

        alice.session.accept_friend(&bob.id()).await.unwrap();
        bob.deliver_from(&mut alice);

        assert!(alice.session.registry().is_established(&bob.id()));
        assert!(bob.session.registry().is_established(&alice.id()));
    }

    #[tokio::test]
    async fn test_accept_keeps_request_when_send_fails() {
        let mut alice = TestPeer::new("AAA111");
        let TestPeer {
            mut session,
            outbox,
            ..
        } = TestPeer::new("BBB222");
        let bob_id = session.local_id().cloned().unwrap();

        alice.session.request_friend(&bob_id).await.unwrap();
        for envelope in alice.sent() {
            session.handle_envelope(relay(&alice.id(), envelope));
        }
        drop(outbox);

        let err = session.accept_friend(&alice.id()).await.unwrap_err();
        assert_eq!(err, SessionError::ChannelClosed);
        assert!(session.has_pending_request(&alice.id()));
        assert_eq!(
            session.friend(&alice.id()).unwrap().trust_state(),
            TrustState::PendingInbound
        );
    }

    #[tokio::test]
    async fn test_malformed_key_does_not_advance_trust() {
        let mut alice = TestPeer::new("AAA111");
        let bob = PeerId::new("BBB222");
        alice.session.request_friend(&bob).await.unwrap();
        alice.drain_events();

        alice.session.handle_envelope(relay(
            &bob,
            Envelope::to(
                &alice.id(),
                EnvelopeBody::FriendAccepted {
                    public_key: Some("-----BEGIN NONSENSE-----".into()),
                },
            ),
        ));

        assert_eq!(
            alice.session.friend(&bob).unwrap().trust_state(),
            TrustState::PendingOutbound
        );
        assert!(matches!(
            alice.drain_events().as_slice(),
            [SessionEvent::Error(SessionError::Crypto(CryptoError::KeyParse(_)))]
        ));
    }

    #[tokio::test]
    async fn test_accept_request_without_key_fails() {
        let mut bob = TestPeer::new("BBB222");
        let alice = PeerId::new("AAA111");
        bob.session.handle_envelope(relay(
            &alice,
            Envelope::to(&bob.id(), EnvelopeBody::FriendRequest { public_key: None }),
        ));
        assert!(matches!(
            bob.drain_events().as_slice(),
            [SessionEvent::FriendRequest { has_key: false, .. }]
        ));

        let err = bob.session.accept_friend(&alice).await.unwrap_err();
        assert!(matches!(err, SessionError::Crypto(CryptoError::KeyParse(_))));
        assert!(bob.sent().is_empty());
        assert!(!bob.session.registry().is_established(&alice));
        assert!(bob.session.has_pending_request(&alice));
    }
}
