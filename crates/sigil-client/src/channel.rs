//! The envelope channel between the session and whatever transport carries
//! frames to the relay. Sending is fire-and-forget: a successful `send` only
//! means the envelope was queued, the relay never acknowledges delivery.

use tokio::sync::mpsc;
use tracing::debug;

use sigil_shared::Envelope;

use crate::error::{Result, SessionError};

/// Outbound half, held by the session.
#[derive(Debug, Clone)]
pub struct EnvelopeChannel {
    tx: mpsc::Sender<Envelope>,
}

impl EnvelopeChannel {
    /// Create a channel plus the receiver the transport drains, in FIFO order.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub async fn send(&self, envelope: Envelope) -> Result<()> {
        debug!(
            kind = envelope.kind(),
            to = ?envelope.to.as_ref().map(|p| p.as_str()),
            "Queueing envelope"
        );
        self.tx
            .send(envelope)
            .await
            .map_err(|_| SessionError::ChannelClosed)
    }
}

/// Inbound events from the transport: lifecycle plus parsed frames.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Opened,
    Frame(Envelope),
    Closed { code: Option<u16> },
    Failed(String),
}
