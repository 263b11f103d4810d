//! In-process peers and a relay stand-in for session tests.

use std::time::Duration;

use tokio::sync::mpsc;

use sigil_shared::{CryptoEngine, Envelope, EnvelopeBody, PeerId, SealEngine};

use crate::channel::EnvelopeChannel;
use crate::config::ProtocolConfig;
use crate::events::SessionEvent;
use crate::session::{LocalKeys, Session};

const PASSPHRASE: &str = "correct horse battery staple";

pub(crate) fn test_config() -> ProtocolConfig {
    ProtocolConfig {
        pacing_delay: Duration::ZERO,
        channel_capacity: 4096,
        ..ProtocolConfig::default()
    }
}

/// What the relay does to a frame: stamp `from`, strip `to`, and turn the
/// client's ACCEPT_FRIEND into the FRIEND_ACCEPTED the other side sees.
pub(crate) fn relay(from: &PeerId, envelope: Envelope) -> Envelope {
    let body = match envelope.body {
        EnvelopeBody::AcceptFriend { public_key } => EnvelopeBody::FriendAccepted {
            public_key: Some(public_key),
        },
        other => other,
    };
    Envelope {
        from: Some(from.clone()),
        to: None,
        body,
    }
}

pub(crate) struct TestPeer {
    pub session: Session<SealEngine>,
    pub outbox: mpsc::Receiver<Envelope>,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl TestPeer {
    pub fn new(id: &str) -> Self {
        Self::with_config(id, test_config())
    }

    pub fn with_config(id: &str, config: ProtocolConfig) -> Self {
        let mut peer = Self::build(id, config);
        peer.session.handle_envelope(Envelope {
            from: None,
            to: None,
            body: EnvelopeBody::Welcome {
                user_id: PeerId::new(id),
            },
        });
        peer.drain_events();
        peer
    }

    /// A peer the relay has not greeted yet.
    pub fn unwelcomed() -> Self {
        Self::build("anonymous", test_config())
    }

    fn build(name: &str, config: ProtocolConfig) -> Self {
        let engine = SealEngine::new();
        let pair = engine.generate_key_pair(name, PASSPHRASE).unwrap();
        let keys = LocalKeys::load(&engine, &pair.public_key, &pair.private_key, PASSPHRASE).unwrap();
        let (channel, outbox) = EnvelopeChannel::new(config.channel_capacity);
        let (session, events) = Session::new(engine, keys, config, channel);
        Self {
            session,
            outbox,
            events,
        }
    }

    pub fn id(&self) -> PeerId {
        self.session.local_id().cloned().unwrap()
    }

    /// Everything this peer has queued for the relay.
    pub fn sent(&mut self) -> Vec<Envelope> {
        let mut sent = Vec::new();
        while let Ok(envelope) = self.outbox.try_recv() {
            sent.push(envelope);
        }
        sent
    }

    /// Deliver everything `other` has sent, as the relay would.
    pub fn deliver_from(&mut self, other: &mut TestPeer) {
        let from = other.id();
        for envelope in other.sent() {
            self.session.handle_envelope(relay(&from, envelope));
        }
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Run the full handshake between two peers and discard its events.
pub(crate) async fn befriend(a: &mut TestPeer, b: &mut TestPeer) {
    a.session.request_friend(&b.id()).await.unwrap();
    b.deliver_from(a);
    b.session.accept_friend(&a.id()).await.unwrap();
    a.deliver_from(b);
    a.drain_events();
    b.drain_events();
}
