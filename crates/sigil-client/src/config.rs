//! Client configuration loaded from environment variables.
//!
//! All protocol settings have defaults matching the wire protocol, so the
//! client can start with only a relay address and key files.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sigil_shared::constants::{
    FILE_CHUNK_SIZE, FILE_PACING_DELAY_MS, FILE_PACING_INTERVAL, MAX_FILE_SIZE,
    TYPING_TIMEOUT_MS,
};

/// Tunables of the protocol core.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Characters of armored ciphertext per FILE_CHUNK.
    /// Env: `SIGIL_CHUNK_SIZE`
    pub chunk_size: usize,

    /// Pause after every Nth chunk (0 disables pacing).
    /// Env: `SIGIL_PACING_INTERVAL`
    pub pacing_interval: usize,

    /// Length of each pacing pause.
    /// Env: `SIGIL_PACING_DELAY_MS`
    pub pacing_delay: Duration,

    /// Largest file accepted for sending, in bytes.
    /// Env: `SIGIL_MAX_FILE_SIZE`
    pub max_file_size: u64,

    /// Typing indicator lifetime after the last TYPING.
    /// Env: `SIGIL_TYPING_TIMEOUT_MS`
    pub typing_timeout: Duration,

    /// Capacity of the outbound envelope queue.
    pub channel_capacity: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            chunk_size: FILE_CHUNK_SIZE,
            pacing_interval: FILE_PACING_INTERVAL,
            pacing_delay: Duration::from_millis(FILE_PACING_DELAY_MS),
            max_file_size: MAX_FILE_SIZE,
            typing_timeout: Duration::from_millis(TYPING_TIMEOUT_MS),
            channel_capacity: 256,
        }
    }
}

/// Settings for the `sigil` binary.
#[derive(Clone)]
pub struct ClientConfig {
    /// Relay address (`host:port`).
    /// Env: `SIGIL_RELAY_ADDR`
    /// Default: `127.0.0.1:8765`
    pub relay_addr: String,

    /// Armored public key file.
    /// Env: `SIGIL_PUBLIC_KEY`
    pub public_key_path: Option<PathBuf>,

    /// Armored, passphrase-protected private key file.
    /// Env: `SIGIL_PRIVATE_KEY`
    pub private_key_path: Option<PathBuf>,

    /// Env: `SIGIL_PASSPHRASE`
    pub passphrase: Option<String>,

    pub protocol: ProtocolConfig,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("relay_addr", &self.relay_addr)
            .field("public_key_path", &self.public_key_path)
            .field("private_key_path", &self.private_key_path)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("protocol", &self.protocol)
            .finish()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_addr: "127.0.0.1:8765".to_string(),
            public_key_path: None,
            private_key_path: None,
            passphrase: None,
            protocol: ProtocolConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("SIGIL_RELAY_ADDR") {
            config.relay_addr = addr;
        }

        if let Some(path) = lookup("SIGIL_PUBLIC_KEY") {
            config.public_key_path = Some(PathBuf::from(path));
        }

        if let Some(path) = lookup("SIGIL_PRIVATE_KEY") {
            config.private_key_path = Some(PathBuf::from(path));
        }

        if let Some(passphrase) = lookup("SIGIL_PASSPHRASE") {
            if !passphrase.is_empty() {
                config.passphrase = Some(passphrase);
            }
        }

        let protocol = &mut config.protocol;

        if let Some(n) = parse_var::<usize>(&lookup, "SIGIL_CHUNK_SIZE") {
            if n > 0 {
                protocol.chunk_size = n;
            } else {
                tracing::warn!("SIGIL_CHUNK_SIZE must be positive, using default");
            }
        }

        if let Some(n) = parse_var::<usize>(&lookup, "SIGIL_PACING_INTERVAL") {
            protocol.pacing_interval = n;
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "SIGIL_PACING_DELAY_MS") {
            protocol.pacing_delay = Duration::from_millis(ms);
        }

        if let Some(n) = parse_var::<u64>(&lookup, "SIGIL_MAX_FILE_SIZE") {
            protocol.max_file_size = n;
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "SIGIL_TYPING_TIMEOUT_MS") {
            protocol.typing_timeout = Duration::from_millis(ms);
        }

        config
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid setting, using default");
            None
        }
    }
}
