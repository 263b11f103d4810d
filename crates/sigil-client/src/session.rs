//! The protocol core: one explicit session context owning the friend
//! registry, the in-flight transfer table and the typing indicator.
//!
//! All state is mutated through `&mut self`, so inbound envelopes are
//! processed one at a time in arrival order. A second envelope for a peer
//! cannot interleave with a decrypt already running for that peer.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use sigil_shared::{ConnectionStatus, CryptoEngine, Envelope, EnvelopeBody, PeerId, ProtocolError};

use crate::channel::{ChannelEvent, EnvelopeChannel};
use crate::config::ProtocolConfig;
use crate::error::{Result, SessionError};
use crate::events::{FriendSummary, SessionEvent};
use crate::files::TransferTable;
use crate::registry::{Friend, FriendRegistry};
use crate::typing::TypingTracker;

/// The local key material, loaded once at startup.
pub struct LocalKeys<C: CryptoEngine> {
    pub(crate) public_armored: String,
    pub(crate) public: C::PublicKey,
    pub(crate) private: C::PrivateKey,
}

impl<C: CryptoEngine> LocalKeys<C> {
    /// Parse the armored public key and unlock the private key.
    pub fn load(
        engine: &C,
        public_armored: &str,
        private_armored: &str,
        passphrase: &str,
    ) -> Result<Self> {
        let public = engine.read_public_key(public_armored)?;
        let private = engine.read_and_decrypt_private_key(private_armored, passphrase)?;
        info!(fingerprint = %engine.fingerprint(&public), "Local keys loaded");

        Ok(Self {
            public_armored: public_armored.to_string(),
            public,
            private,
        })
    }

    pub fn public_armored(&self) -> &str {
        &self.public_armored
    }

    pub fn public_key(&self) -> &C::PublicKey {
        &self.public
    }
}

pub struct Session<C: CryptoEngine> {
    pub(crate) engine: C,
    pub(crate) config: ProtocolConfig,
    pub(crate) keys: LocalKeys<C>,
    pub(crate) registry: FriendRegistry<C::PublicKey>,
    /// Inbound friend requests awaiting a decision, with the offered key.
    pub(crate) pending_requests: HashMap<PeerId, Option<String>>,
    pub(crate) transfers: TransferTable,
    pub(crate) typing: TypingTracker,
    pub(crate) open_conversation: Option<PeerId>,
    pub(crate) channel: EnvelopeChannel,
    /// Set by a fatal protocol error. Nothing is processed afterwards.
    unusable: bool,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl<C: CryptoEngine> Session<C> {
    /// Build a session. Returns the receiver for presentation events.
    pub fn new(
        engine: C,
        keys: LocalKeys<C>,
        config: ProtocolConfig,
        channel: EnvelopeChannel,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let session = Self {
            engine,
            typing: TypingTracker::new(config.typing_timeout),
            config,
            keys,
            registry: FriendRegistry::new(),
            pending_requests: HashMap::new(),
            transfers: TransferTable::new(),
            open_conversation: None,
            channel,
            unusable: false,
            events,
        };
        (session, events_rx)
    }

    // -- accessors ----------------------------------------------------------

    pub fn engine(&self) -> &C {
        &self.engine
    }

    pub fn local_keys(&self) -> &LocalKeys<C> {
        &self.keys
    }

    pub fn local_id(&self) -> Option<&PeerId> {
        self.registry.local_id()
    }

    pub fn registry(&self) -> &FriendRegistry<C::PublicKey> {
        &self.registry
    }

    pub fn friend(&self, peer: &PeerId) -> Option<&Friend<C::PublicKey>> {
        self.registry.get(peer)
    }

    pub fn transfers(&self) -> &TransferTable {
        &self.transfers
    }

    pub fn open_conversation_id(&self) -> Option<&PeerId> {
        self.open_conversation.as_ref()
    }

    pub fn typing_peer(&self) -> Option<&PeerId> {
        self.typing.typing_peer()
    }

    pub fn typing_deadline(&self) -> Option<Instant> {
        self.typing.deadline()
    }

    /// True once a fatal protocol error has stopped the session.
    pub fn is_unusable(&self) -> bool {
        self.unusable
    }

    pub(crate) fn ensure_usable(&self) -> Result<()> {
        if self.unusable {
            return Err(SessionError::Unusable);
        }
        Ok(())
    }

    pub fn has_pending_request(&self, peer: &PeerId) -> bool {
        self.pending_requests.contains_key(peer)
    }

    pub fn friend_summaries(&self) -> Vec<FriendSummary> {
        self.registry
            .friends()
            .map(|friend| FriendSummary {
                id: friend.id().clone(),
                trust: friend.trust_state(),
                fingerprint: friend.public_key().map(|k| self.engine.fingerprint(k)),
                messages: friend.history().len(),
                unread: friend.unread(),
            })
            .collect()
    }

    // -- events -------------------------------------------------------------

    pub(crate) fn emit(&self, event: SessionEvent) {
        // presentation may have gone away; the session keeps running
        let _ = self.events.send(event);
    }

    pub(crate) fn report(&self, error: SessionError) {
        match &error {
            SessionError::Crypto(e) => error!(error = %e, "Crypto failure"),
            other => warn!(error = %other, "Session error"),
        }
        self.emit(SessionEvent::Error(error));
    }

    fn fail(&mut self, error: SessionError) {
        error!(error = %error, "Fatal protocol error, session unusable");
        self.unusable = true;
        self.emit(SessionEvent::Fatal(error));
    }

    // -- transport lifecycle ------------------------------------------------

    pub fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened => {
                info!("Relay connection open");
                self.emit(SessionEvent::Presence(ConnectionStatus::Online));
            }
            ChannelEvent::Frame(envelope) => self.handle_envelope(envelope),
            ChannelEvent::Closed { code } => {
                let status = ConnectionStatus::Offline { code };
                if status.is_abnormal() {
                    warn!(code = ?code, "Relay connection closed unexpectedly");
                } else {
                    info!("Relay connection closed");
                }
                self.emit(SessionEvent::Presence(status));
            }
            ChannelEvent::Failed(reason) => {
                warn!(reason = %reason, "Relay connection error");
                self.emit(SessionEvent::Presence(ConnectionStatus::Offline { code: None }));
            }
        }
    }

    // -- inbound dispatch ---------------------------------------------------

    /// Route one inbound envelope to its handler. Failures are reported as
    /// events; only a second WELCOME stops the session.
    pub fn handle_envelope(&mut self, envelope: Envelope) {
        let kind = envelope.kind();
        if self.unusable {
            debug!(kind, "Session unusable, dropping envelope");
            return;
        }
        debug!(kind, from = ?envelope.from.as_ref().map(|p| p.as_str()), "Envelope received");

        if let Err(error) = self.dispatch(envelope) {
            match error {
                SessionError::Protocol(violation) => {
                    warn!(kind, error = %violation, "Ignoring envelope");
                }
                fatal @ SessionError::AlreadyWelcomed(_) => self.fail(fatal),
                other => self.report(other),
            }
        }
    }

    fn dispatch(&mut self, envelope: Envelope) -> Result<()> {
        let kind = envelope.kind();
        let Envelope { from, body, .. } = envelope;
        let sender = move || -> Result<PeerId> {
            from.ok_or_else(|| {
                ProtocolError::Violation(format!("{kind} envelope without `from`")).into()
            })
        };

        match body {
            EnvelopeBody::Welcome { user_id } => self.on_welcome(user_id),
            EnvelopeBody::FriendRequest { public_key } => {
                self.on_friend_request(sender()?, public_key)
            }
            EnvelopeBody::FriendAccepted { public_key } => {
                self.on_friend_accepted(sender()?, public_key)
            }
            EnvelopeBody::Message { content, timestamp } => {
                self.on_message(sender()?, &content, timestamp)
            }
            EnvelopeBody::Typing => {
                self.on_typing(sender()?);
                Ok(())
            }
            EnvelopeBody::FileStart { name, size, mime } => {
                self.on_file_start(sender()?, name, size, mime);
                Ok(())
            }
            EnvelopeBody::FileChunk { chunk } => {
                self.on_file_chunk(&sender()?, chunk);
                Ok(())
            }
            EnvelopeBody::FileEnd => self.on_file_end(sender()?),
            EnvelopeBody::Error { message } => {
                warn!(message = %message, "Relay reported an error");
                self.emit(SessionEvent::ServerError { message });
                Ok(())
            }
            EnvelopeBody::AcceptFriend { .. } => Err(ProtocolError::Violation(
                "ACCEPT_FRIEND is client-to-relay only".into(),
            )
            .into()),
        }
    }

    fn on_welcome(&mut self, assigned: PeerId) -> Result<()> {
        self.registry.on_welcome(assigned.clone())?;
        self.emit(SessionEvent::Welcome { id: assigned });
        Ok(())
    }

    // -- conversation focus & typing -----------------------------------------

    /// Mark `peer`'s conversation as the one on screen. Only established
    /// friends can be opened.
    pub fn open_conversation(&mut self, peer: &PeerId) -> Result<()> {
        self.ensure_usable()?;
        let friend = self
            .registry
            .get_mut(peer)
            .filter(|f| f.is_established())
            .ok_or_else(|| SessionError::PeerNotReady(peer.clone()))?;
        friend.mark_read();

        if self.open_conversation.as_ref() != Some(peer) {
            self.clear_typing();
            self.open_conversation = Some(peer.clone());
        }
        debug!(peer = %peer, "Conversation opened");
        Ok(())
    }

    pub fn close_conversation(&mut self) {
        self.clear_typing();
        self.open_conversation = None;
    }

    /// Tell `peer` we are composing. Sent on every input change.
    pub async fn send_typing(&self, peer: &PeerId) -> Result<()> {
        self.ensure_usable()?;
        self.channel
            .send(Envelope::to(peer, EnvelopeBody::Typing))
            .await
    }

    fn on_typing(&mut self, from: PeerId) {
        if self.open_conversation.as_ref() != Some(&from) {
            debug!(peer = %from, "Typing from a conversation that is not open");
            return;
        }
        if self.typing.touch(&from, Instant::now()) {
            self.emit(SessionEvent::TypingStarted { peer: from });
        }
    }

    /// Clear the typing indicator if it lapsed by `now`.
    pub fn expire_typing(&mut self, now: Instant) {
        if let Some(peer) = self.typing.expire(now) {
            self.emit(SessionEvent::TypingStopped { peer });
        }
    }

    fn clear_typing(&mut self) {
        if let Some(peer) = self.typing.clear() {
            self.emit(SessionEvent::TypingStopped { peer });
        }
    }
}
