//! Decaying "peer is typing" indicator. Every TYPING restarts the timer;
//! the indicator clears once no TYPING arrived for `timeout`.

use std::time::Duration;

use tokio::time::Instant;

use sigil_shared::PeerId;

#[derive(Debug)]
pub struct TypingTracker {
    timeout: Duration,
    active: Option<(PeerId, Instant)>,
}

impl TypingTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            active: None,
        }
    }

    /// Restart the indicator for `peer`. Returns true if it was not already
    /// showing for this peer.
    pub fn touch(&mut self, peer: &PeerId, now: Instant) -> bool {
        let newly_raised = !matches!(&self.active, Some((current, _)) if current == peer);
        self.active = Some((peer.clone(), now + self.timeout));
        newly_raised
    }

    /// When the current indicator lapses, if one is showing.
    pub fn deadline(&self) -> Option<Instant> {
        self.active.as_ref().map(|(_, deadline)| *deadline)
    }

    pub fn typing_peer(&self) -> Option<&PeerId> {
        self.active.as_ref().map(|(peer, _)| peer)
    }

    /// Clear the indicator if its deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Option<PeerId> {
        match &self.active {
            Some((_, deadline)) if *deadline <= now => self.clear(),
            _ => None,
        }
    }

    pub fn clear(&mut self) -> Option<PeerId> {
        self.active.take().map(|(peer, _)| peer)
    }
}
