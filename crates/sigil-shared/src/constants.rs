/// Application name
pub const APP_NAME: &str = "Sigil";

/// Armor / key format version
pub const FORMAT_VERSION: u8 = 1;

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Salt size for passphrase-derived keys
pub const SALT_SIZE: usize = 16;

/// X25519 / Ed25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Poly1305 authentication tag size in bytes
pub const AEAD_TAG_SIZE: usize = 16;

/// Ed25519 signature size in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Maximum outbound file size in bytes (100 MiB)
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Size of one FILE_CHUNK slice of armored ciphertext (64 KiB of text)
pub const FILE_CHUNK_SIZE: usize = 64 * 1024;

/// Yield to the channel after every Nth chunk
pub const FILE_PACING_INTERVAL: usize = 10;

/// Pause inserted at each pacing point, in milliseconds
pub const FILE_PACING_DELAY_MS: u64 = 10;

/// Typing indicator lifetime after the last TYPING envelope, in milliseconds
pub const TYPING_TIMEOUT_MS: u64 = 2_000;

/// WebSocket-style normal closure code
pub const NORMAL_CLOSE_CODE: u16 = 1000;

/// Armor line width in characters
pub const ARMOR_LINE_WIDTH: usize = 64;

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_MESSAGE_KEY: &str = "sigil-message-key-v1";
pub const KDF_CONTEXT_PASSPHRASE_KEY: &str = "sigil-passphrase-key-v1";
pub const KDF_CONTEXT_FINGERPRINT: &str = "sigil-key-fingerprint-v1";

/// Placeholder rendered for an inbound message that failed to decrypt
pub const DECRYPTION_ERROR_PLACEHOLDER: &str = "[DECRYPTION_ERROR]";
