// Wire vocabulary, identifiers and the crypto capability shared by Sigil clients.

pub mod armor;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod types;

pub use crypto::{ArmoredKeyPair, CryptoEngine, SealEngine, SealPrivateKey, SealPublicKey};
pub use error::{CryptoError, ProtocolError};
pub use protocol::{Envelope, EnvelopeBody};
pub use types::{now_millis, ConnectionStatus, PeerId};
