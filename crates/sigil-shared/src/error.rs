use thiserror::Error;

/// Failures of the crypto capability. Signature and AEAD failures both map
/// to `Decryption`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Key parse error: {0}")]
    KeyParse(String),

    #[error("Invalid passphrase or malformed private key")]
    InvalidPassphrase,

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext, wrong key or bad signature")]
    Decryption,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Unknown `type`, missing required field or malformed JSON.
    #[error("Protocol violation: {0}")]
    Violation(String),

    #[error("Envelope serialization failed: {0}")]
    Serialization(String),

    #[error("Peer id must not be empty")]
    EmptyPeerId,
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            ProtocolError::Violation(e.to_string())
        } else {
            ProtocolError::Serialization(e.to_string())
        }
    }
}
