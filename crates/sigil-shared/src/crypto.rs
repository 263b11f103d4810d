//! The crypto capability consumed by the protocol core, and `SealEngine`,
//! the engine shipped with Sigil.
//!
//! The protocol core only ever talks to [`CryptoEngine`]. Key handles are
//! opaque associated types.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{EphemeralSecret, PublicKey as DhPublicKey, StaticSecret};

use crate::armor::{self, LABEL_MESSAGE, LABEL_PRIVATE_KEY, LABEL_PUBLIC_KEY};
use crate::constants::{
    AEAD_TAG_SIZE, FORMAT_VERSION, KDF_CONTEXT_FINGERPRINT, KDF_CONTEXT_MESSAGE_KEY,
    KDF_CONTEXT_PASSPHRASE_KEY, NONCE_SIZE, PUBKEY_SIZE, SALT_SIZE, SIGNATURE_SIZE,
};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; 32];

/// Both halves of a freshly generated key pair, armored for export.
#[derive(Debug, Clone)]
pub struct ArmoredKeyPair {
    pub public_key: String,
    pub private_key: String,
}

pub trait CryptoEngine: Send + Sync + 'static {
    /// Parsed peer public key. Shared read-only by the friend that holds it.
    type PublicKey: Clone + std::fmt::Debug + Send + Sync + 'static;
    /// Decrypted local private key. Never leaves the session.
    type PrivateKey: Send + Sync + 'static;

    fn generate_key_pair(&self, name: &str, passphrase: &str)
        -> Result<ArmoredKeyPair, CryptoError>;

    /// Fails with `KeyParse` on malformed input.
    fn read_public_key(&self, armored: &str) -> Result<Self::PublicKey, CryptoError>;

    /// Fails with `InvalidPassphrase` on a wrong passphrase or malformed key.
    fn read_and_decrypt_private_key(
        &self,
        armored: &str,
        passphrase: &str,
    ) -> Result<Self::PrivateKey, CryptoError>;

    fn encrypt_and_sign(
        &self,
        plaintext: &[u8],
        recipient: &Self::PublicKey,
        signer: &Self::PrivateKey,
    ) -> Result<String, CryptoError>;

    /// Fails with `Decryption` for both cryptographic and signature failures.
    fn decrypt_and_verify(
        &self,
        armored: &str,
        decryption: &Self::PrivateKey,
        verification: &Self::PublicKey,
    ) -> Result<Vec<u8>, CryptoError>;

    /// Length of the armored text `encrypt_and_sign` produces for
    /// `plaintext_len` bytes.
    fn armored_len(&self, plaintext_len: usize) -> usize;

    /// Short, stable, human-comparable identifier of a public key.
    fn fingerprint(&self, key: &Self::PublicKey) -> String;
}

// ---------------------------------------------------------------------------
// SealEngine key material
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct PublicKeyRecord {
    version: u8,
    name: String,
    signing_key: [u8; 32],
    dh_key: [u8; 32],
}

#[derive(Serialize, Deserialize)]
struct SecretKeyRecord {
    version: u8,
    name: String,
    signing_secret: [u8; 32],
    dh_secret: [u8; 32],
}

/// A peer's Ed25519 verifying key plus X25519 agreement key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealPublicKey {
    name: String,
    verifying: VerifyingKey,
    dh: DhPublicKey,
}

impl SealPublicKey {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The local Ed25519 signing key plus X25519 static secret.
#[derive(Clone)]
pub struct SealPrivateKey {
    name: String,
    signing: SigningKey,
    dh: StaticSecret,
}

impl SealPrivateKey {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn public_key(&self) -> SealPublicKey {
        SealPublicKey {
            name: self.name.clone(),
            verifying: self.signing.verifying_key(),
            dh: DhPublicKey::from(&self.dh),
        }
    }
}

impl std::fmt::Debug for SealPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealPrivateKey")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// SealEngine
// ---------------------------------------------------------------------------

/// Ed25519 signatures, X25519 ephemeral-static agreement and
/// XChaCha20-Poly1305 sealing, wrapped in Sigil armor.
#[derive(Debug, Clone, Copy, Default)]
pub struct SealEngine;

impl SealEngine {
    pub fn new() -> Self {
        Self
    }

    fn armor_public(key: &SealPublicKey) -> Result<String, CryptoError> {
        let record = PublicKeyRecord {
            version: FORMAT_VERSION,
            name: key.name.clone(),
            signing_key: key.verifying.to_bytes(),
            dh_key: key.dh.to_bytes(),
        };
        let bytes = bincode::serialize(&record).map_err(|_| CryptoError::EncryptionFailed)?;
        Ok(armor::encode(LABEL_PUBLIC_KEY, &bytes))
    }

    fn armor_private(key: &SealPrivateKey, passphrase: &str) -> Result<String, CryptoError> {
        let record = SecretKeyRecord {
            version: FORMAT_VERSION,
            name: key.name.clone(),
            signing_secret: key.signing.to_bytes(),
            dh_secret: key.dh.to_bytes(),
        };
        let bytes = bincode::serialize(&record).map_err(|_| CryptoError::EncryptionFailed)?;

        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);
        let sealed = encrypt(&derive_passphrase_key(passphrase, &salt), &bytes)?;

        let mut blob = Vec::with_capacity(SALT_SIZE + sealed.len());
        blob.extend_from_slice(&salt);
        blob.extend_from_slice(&sealed);
        Ok(armor::encode(LABEL_PRIVATE_KEY, &blob))
    }
}

impl CryptoEngine for SealEngine {
    type PublicKey = SealPublicKey;
    type PrivateKey = SealPrivateKey;

    fn generate_key_pair(
        &self,
        name: &str,
        passphrase: &str,
    ) -> Result<ArmoredKeyPair, CryptoError> {
        let private = SealPrivateKey {
            name: name.to_string(),
            signing: SigningKey::generate(&mut OsRng),
            dh: StaticSecret::random_from_rng(OsRng),
        };

        Ok(ArmoredKeyPair {
            public_key: Self::armor_public(&private.public_key())?,
            private_key: Self::armor_private(&private, passphrase)?,
        })
    }

    fn read_public_key(&self, armored: &str) -> Result<SealPublicKey, CryptoError> {
        let bytes = armor::decode(LABEL_PUBLIC_KEY, armored)
            .map_err(|e| CryptoError::KeyParse(e.to_string()))?;
        let record: PublicKeyRecord = bincode::deserialize(&bytes)
            .map_err(|_| CryptoError::KeyParse("malformed public key record".into()))?;

        if record.version != FORMAT_VERSION {
            return Err(CryptoError::KeyParse(format!(
                "unsupported key version {}",
                record.version
            )));
        }

        let verifying = VerifyingKey::from_bytes(&record.signing_key)
            .map_err(|_| CryptoError::KeyParse("invalid signing key".into()))?;

        Ok(SealPublicKey {
            name: record.name,
            verifying,
            dh: DhPublicKey::from(record.dh_key),
        })
    }

    fn read_and_decrypt_private_key(
        &self,
        armored: &str,
        passphrase: &str,
    ) -> Result<SealPrivateKey, CryptoError> {
        let blob =
            armor::decode(LABEL_PRIVATE_KEY, armored).map_err(|_| CryptoError::InvalidPassphrase)?;
        if blob.len() < SALT_SIZE {
            return Err(CryptoError::InvalidPassphrase);
        }

        let (salt, sealed) = blob.split_at(SALT_SIZE);
        let bytes = decrypt(&derive_passphrase_key(passphrase, salt), sealed)
            .map_err(|_| CryptoError::InvalidPassphrase)?;
        let record: SecretKeyRecord =
            bincode::deserialize(&bytes).map_err(|_| CryptoError::InvalidPassphrase)?;

        Ok(SealPrivateKey {
            name: record.name,
            signing: SigningKey::from_bytes(&record.signing_secret),
            dh: StaticSecret::from(record.dh_secret),
        })
    }

    fn encrypt_and_sign(
        &self,
        plaintext: &[u8],
        recipient: &SealPublicKey,
        signer: &SealPrivateKey,
    ) -> Result<String, CryptoError> {
        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_public = DhPublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&recipient.dh);
        if !shared.was_contributory() {
            return Err(CryptoError::EncryptionFailed);
        }
        let key = derive_message_key(shared.as_bytes(), &ephemeral_public, &recipient.dh);

        // signature binds the recipient key
        let signature = signer.signing.sign(&signed_bytes(&recipient.dh, plaintext));

        let mut body = Vec::with_capacity(SIGNATURE_SIZE + plaintext.len());
        body.extend_from_slice(&signature.to_bytes());
        body.extend_from_slice(plaintext);
        let sealed = encrypt(&key, &body)?;

        let mut packet = Vec::with_capacity(1 + PUBKEY_SIZE + sealed.len());
        packet.push(FORMAT_VERSION);
        packet.extend_from_slice(ephemeral_public.as_bytes());
        packet.extend_from_slice(&sealed);

        Ok(armor::encode(LABEL_MESSAGE, &packet))
    }

    fn decrypt_and_verify(
        &self,
        armored: &str,
        decryption: &SealPrivateKey,
        verification: &SealPublicKey,
    ) -> Result<Vec<u8>, CryptoError> {
        let packet = armor::decode(LABEL_MESSAGE, armored).map_err(|_| CryptoError::Decryption)?;
        if packet.len() < 1 + PUBKEY_SIZE || packet[0] != FORMAT_VERSION {
            return Err(CryptoError::Decryption);
        }

        let mut ephemeral_bytes = [0u8; PUBKEY_SIZE];
        ephemeral_bytes.copy_from_slice(&packet[1..1 + PUBKEY_SIZE]);
        let ephemeral_public = DhPublicKey::from(ephemeral_bytes);

        let shared = decryption.dh.diffie_hellman(&ephemeral_public);
        if !shared.was_contributory() {
            return Err(CryptoError::Decryption);
        }
        let own_public = DhPublicKey::from(&decryption.dh);
        let key = derive_message_key(shared.as_bytes(), &ephemeral_public, &own_public);

        let body = decrypt(&key, &packet[1 + PUBKEY_SIZE..])?;
        if body.len() < SIGNATURE_SIZE {
            return Err(CryptoError::Decryption);
        }
        let (signature_bytes, plaintext) = body.split_at(SIGNATURE_SIZE);
        let signature = Signature::from_slice(signature_bytes).map_err(|_| CryptoError::Decryption)?;

        verification
            .verifying
            .verify(&signed_bytes(&own_public, plaintext), &signature)
            .map_err(|_| CryptoError::Decryption)?;

        Ok(plaintext.to_vec())
    }

    fn armored_len(&self, plaintext_len: usize) -> usize {
        // version, ephemeral key, nonce, then the sealed signature and plaintext
        let packet = 1
            + PUBKEY_SIZE
            + NONCE_SIZE
            + SIGNATURE_SIZE
            + plaintext_len
            + AEAD_TAG_SIZE;
        armor::encoded_len(LABEL_MESSAGE, packet)
    }

    fn fingerprint(&self, key: &SealPublicKey) -> String {
        let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_FINGERPRINT);
        hasher.update(key.verifying.as_bytes());
        hasher.update(key.dh.as_bytes());
        hex::encode(&hasher.finalize().as_bytes()[..8])
    }
}

fn signed_bytes(recipient_dh: &DhPublicKey, plaintext: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(PUBKEY_SIZE + plaintext.len());
    out.extend_from_slice(recipient_dh.as_bytes());
    out.extend_from_slice(plaintext);
    out
}

// ---------------------------------------------------------------------------
// Symmetric primitives
// ---------------------------------------------------------------------------

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

// Returns nonce || ciphertext (24 bytes nonce prepended)
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::Decryption);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::Decryption)
}

// BLAKE3 KDF with domain separation
fn derive_message_key(
    shared_secret: &[u8; 32],
    ephemeral: &DhPublicKey,
    recipient: &DhPublicKey,
) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_MESSAGE_KEY);
    hasher.update(shared_secret);
    hasher.update(ephemeral.as_bytes());
    hasher.update(recipient.as_bytes());
    *hasher.finalize().as_bytes()
}

fn derive_passphrase_key(passphrase: &str, salt: &[u8]) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_PASSPHRASE_KEY);
    hasher.update(salt);
    hasher.update(passphrase.as_bytes());
    *hasher.finalize().as_bytes()
}
